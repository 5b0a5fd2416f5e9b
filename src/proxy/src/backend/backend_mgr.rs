use crate::backend::pool::pooled_conn_mgr::PooledConnMgr;
use crate::backend::pool::BackendPoolConfig;

use crate::backend::router::{BackendLoadBalancerType, BackendRouter, BackendRouterTrait};
use crate::backend::{BackendInstance, BackendStatus};

use dashmap::DashMap;
use deadpool::managed::{Object, Pool};
use std::io::ErrorKind;
use std::sync::{Arc, OnceLock};
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct BackendManagerOptions {
    pub tls: bool,
    pub pool_size: u16,
    pub static_router: bool,
    pub balance_type: BackendLoadBalancerType,
    pub pool_config: BackendPoolConfig,
}

impl Default for BackendManagerOptions {
    fn default() -> Self {
        Self {
            tls: false,
            pool_size: 100,
            static_router: true,
            balance_type: BackendLoadBalancerType::Random,
            pool_config: BackendPoolConfig::default(),
        }
    }
}

static BE_MGR_ONCE: OnceLock<Arc<BackendMgr>> = OnceLock::new();

pub fn get_or_init_backend_mgr(
    router: BackendRouterTrait,
    mgr_options: BackendManagerOptions,
) -> Arc<BackendMgr> {
    Arc::clone(BE_MGR_ONCE.get_or_init(|| Arc::new(BackendMgr::new(router, mgr_options))))
}

pub struct BackendMgr {
    mgr_options: BackendManagerOptions,
    router: BackendRouterTrait,
    be_conn_pool: DashMap<BackendInstance, Pool<PooledConnMgr>>,
}

impl BackendMgr {
    pub fn new(router: BackendRouterTrait, mgr_options: BackendManagerOptions) -> Self {
        Self {
            mgr_options,
            router,
            be_conn_pool: DashMap::new(),
        }
    }

    async fn init_backend_pool(
        &self,
        backend_instance: BackendInstance,
    ) -> Result<(), std::io::Error> {
        let backend_status = backend_instance.status;
        let max_size = self.mgr_options.pool_config.max_size;
        match backend_status {
            BackendStatus::Ready => {
                let conn_mgr = PooledConnMgr::new(backend_instance.clone());
                let inner_pool_rs = Pool::builder(conn_mgr).max_size(max_size as usize).build();
                match inner_pool_rs {
                    Ok(inner_pool) => {
                        info!(
                            "ProxySrv backend_mgr conn pool initialized successfully. {:?}",
                            backend_instance.addr
                        );
                        self.be_conn_pool.insert(backend_instance, inner_pool);
                        Ok(())
                    }
                    Err(e) => {
                        warn!("ProxySrv backend_mgr init backend_conn_pool Err {:?}", e);
                        Err(std::io::Error::new(
                            ErrorKind::ConnectionRefused,
                            e.to_string(),
                        ))
                    }
                }
            }
            BackendStatus::Offline => {
                if let Some(entry) = self.be_conn_pool.get(&backend_instance) {
                    let pool = entry.value();
                    pool.close();
                }
                self.be_conn_pool.remove(&backend_instance);
                Ok(())
            }
            BackendStatus::NotReady => Ok(()),
        }
    }

    /// Loads the backend list from the router and opens a pool for every
    /// backend currently reported `Ready`. Called once at startup; the static
    /// backend list never changes shape again after this.
    pub async fn prepare_backend_conn_pool(&self) -> Result<(), std::io::Error> {
        let backends = self.router.load_backends().await?;
        for backend in backends {
            self.init_backend_pool(backend).await?;
        }
        Ok(())
    }

    pub async fn connect_to_backend(
        &self,
    ) -> Result<Pool<PooledConnMgr, Object<PooledConnMgr>>, std::io::Error> {
        let balancer_type = &self.mgr_options.balance_type;
        let backend_addr = self.router.selector(balancer_type).await?;
        if let Some(pool) = self.be_conn_pool.get(&backend_addr) {
            let pool_values = pool.value().clone();
            Ok(pool_values)
        } else {
            Err(std::io::Error::new(
                ErrorKind::NotConnected,
                "no backend_addr found",
            ))
        }
    }
}
