mod static_router;

use crate::backend::router::static_router::StaticRouter;
use crate::backend::BackendInstance;
use crate::server::proxy_cli_args::ProxyServerArgs;
use async_trait::async_trait;
use chrono::Utc;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::VecDeque;
use std::io::Error;
use std::sync::Mutex;
use strum_macros::EnumString;

#[derive(Debug, Clone, EnumString)]
pub enum BackendRouterType {
    #[strum(serialize = "static")]
    Static,
}

pub enum BackendRouterTrait {
    Static(Box<StaticRouter>),
}

#[async_trait]
impl BackendRouter for BackendRouterTrait {
    async fn selector(&self, backend_selector: &BackendLoadBalancerType) -> Result<BackendInstance, Error> {
        match self {
            BackendRouterTrait::Static(router) => router.selector(backend_selector).await,
        }
    }

    async fn load_backends(&self) -> Result<VecDeque<BackendInstance>, Error> {
        match self {
            BackendRouterTrait::Static(router) => router.load_backends().await,
        }
    }
}

#[derive(Debug, Clone, EnumString)]
pub enum BackendLoadBalancerType {
    #[strum(serialize = "random")]
    Random,
    #[strum(serialize = "p2c")]
    P2C,
}

pub trait BackendLoadBalancer: Send + Sync {
    fn balance(&self, backends: usize) -> usize;
}

pub struct RandomBalancer {
    rand: Mutex<StdRng>,
}

impl Default for RandomBalancer {
    fn default() -> Self {
        Self::new()
    }
}

impl RandomBalancer {
    pub fn new() -> Self {
        Self {
            rand: Mutex::new(StdRng::seed_from_u64(
                Utc::now().timestamp_subsec_nanos().into(),
            )),
        }
    }
}

impl BackendLoadBalancer for RandomBalancer {
    fn balance(&self, backends: usize) -> usize {
        let mut mut_rand = self.rand.lock().unwrap();
        mut_rand.gen_range(0..backends)
    }
}

/// `BackendRouter` is the proxy's backend-selection policy: given the static
/// (or dynamically-loaded, in the future) list of backends, picks one per
/// incoming session according to the load-balancing strategy.
///
/// This sits underneath the session-routing `Router` trait (see
/// `crate::router`), which decides *whether* to route a query at all and to
/// which already-established backend connection; `BackendRouter` only answers
/// "which backend instance should a brand new connection be opened to".
#[async_trait]
pub trait BackendRouter: Send + Sync {
    async fn selector(&self, backend_selector: &BackendLoadBalancerType) -> Result<BackendInstance, Error>;

    async fn load_backends(&self) -> Result<VecDeque<BackendInstance>, Error>;
}

pub async fn new_backend_router_v2(proxy_args: &ProxyServerArgs) -> BackendRouterTrait {
    let test_backend_list = proxy_args.static_backend_list();
    BackendRouterTrait::Static(Box::new(StaticRouter::new(test_backend_list)))
}

pub fn new_balancer(
    balancer_type_opt: Option<BackendLoadBalancerType>,
) -> impl BackendLoadBalancer {
    if let Some(balancer_type) = balancer_type_opt {
        match balancer_type {
            BackendLoadBalancerType::Random => RandomBalancer::new(),
            // for now only support random.
            _ => unreachable!(),
        }
    } else {
        RandomBalancer::new()
    }
}
