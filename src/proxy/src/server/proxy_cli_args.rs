use crate::backend::backend_mgr::BackendManagerOptions;
use crate::backend::router::{BackendLoadBalancerType, BackendRouterType};
use crate::backend::{BackendInstance, BackendStatus};
use crate::session::history::HistoryOverflowPolicy;

use clap::{Parser, Subcommand};
use itertools::Itertools;
use std::collections::VecDeque;
use std::ops::Deref;
use std::str::FromStr;
use std::sync::LazyLock;

pub static TEST_BACKEND_ADDRS: LazyLock<VecDeque<BackendInstance>> = LazyLock::new(|| {
    VecDeque::from(vec![BackendInstance {
        addr: "127.0.0.1:3315".to_string(),
        status: BackendStatus::Ready,
    }])
});

#[derive(Parser, Default, Debug, Clone)]
#[clap(
    name = "my-proxy",
    version = "0.1.0",
    about = "mysql proxy for serverless database."
)]
pub struct ProxyServerArgs {
    #[clap(long, value_name = "WORKS", default_value_t = 4)]
    pub works: usize,
    #[clap(long, value_name = "PORT", default_value_t = 3310)]
    pub port: u16,
    #[clap(long, value_name = "HTTP_PORT", default_value_t = 9000)]
    pub http_port: u16,
    #[clap(long, value_name = "TLS", default_value_t = false)]
    pub tls: bool,
    #[clap(long, value_name = "ENABLE METRICS COLLECTOR", default_value_t = false)]
    pub enable_metrics: bool,
    #[clap(long, value_name = "ENABLE REST API", default_value_t = false)]
    pub enable_rest: bool,
    #[clap(long, value_name = "ROUTE_NAME")]
    pub router: Option<String>,
    #[clap(long, value_name = "BALANCE")]
    pub balance: Option<String>,
    #[clap(long, value_name = "LOG_LEVEL")]
    pub log_level: Option<String>,
    #[clap(subcommand)]
    pub backend: Option<BackendConfigArgs>,
    /// What to do with a session's command history when it grows past
    /// `history_max_entries` without the session ever going idle.
    #[clap(long, value_name = "HISTORY_OVERFLOW", default_value = "disable_pooling")]
    pub history_overflow_policy: String,
    #[clap(long, value_name = "HISTORY_MAX_ENTRIES", default_value_t = 1024)]
    pub history_max_entries: usize,
    /// Largest client packet payload the proxy will buffer before replying
    /// with ER_NET_PACKET_TOO_LARGE, mirrors the backend's max_allowed_packet.
    #[clap(long, value_name = "MAX_PACKET_SIZE", default_value_t = 16 * 1024 * 1024)]
    pub max_packet_size: usize,
}

#[derive(Subcommand, Clone, Debug, PartialEq, Eq)]
#[command(next_line_help = true)]
pub enum BackendConfigArgs {
    #[command(long_about = "Proxy only a specific backend. For testing purposes.")]
    Backend {
        #[clap(long)]
        backend_addr: String,
    },
}

impl ProxyServerArgs {
    pub fn new_backend_opts(&self) -> BackendManagerOptions {
        let balancer_type_str = self.balancer_type();

        BackendManagerOptions {
            static_router: if let Some(router) = self.router.as_ref() {
                router.eq_ignore_ascii_case("static")
            } else {
                true
            },
            balance_type: BackendLoadBalancerType::from_str(balancer_type_str.as_str()).unwrap(),
            ..Default::default()
        }
    }

    pub fn balancer_type(&self) -> String {
        if let Some(balance) = self.balance.as_ref() {
            balance.clone().to_lowercase()
        } else {
            "random".to_lowercase()
        }
    }

    pub fn router_type(&self) -> Option<BackendRouterType> {
        if let Some(router_str) = &self.router {
            let router = BackendRouterType::from_str(router_str.as_str()).unwrap();
            Some(router)
        } else {
            None
        }
    }

    pub fn history_overflow_policy(&self) -> HistoryOverflowPolicy {
        HistoryOverflowPolicy::from_str(self.history_overflow_policy.as_str())
            .unwrap_or(HistoryOverflowPolicy::DisablePooling)
    }

    // only for testing purposes.
    pub fn static_backend_list(&self) -> VecDeque<BackendInstance> {
        if let Some(backend_cmd) = &self.backend {
            match backend_cmd {
                BackendConfigArgs::Backend {
                    backend_addr: addrs,
                    ..
                } => {
                    let backend_list = addrs
                        .split(',')
                        .map(|addr| BackendInstance {
                            addr: addr.to_string(),
                            status: BackendStatus::Ready,
                        })
                        .collect_vec();
                    VecDeque::from(backend_list)
                }
            }
        } else {
            TEST_BACKEND_ADDRS.deref().clone()
        }
    }
}
