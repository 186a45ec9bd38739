//! Forwarding DNS proxy that drops A records pointing into the same network
//! group as the host it runs on.

pub mod config;
pub mod filter;
pub mod handler;
pub mod logging;
pub mod packet;
pub mod records;
pub mod server;
pub mod upstream;

pub use config::DnsConfig;
pub use filter::{AnswerFilter, ResponseWriter, ServeOutcome, rewrite_answers};
pub use handler::handle_query;
pub use upstream::{Upstream, UpstreamForwarder, UpstreamResult};

use std::sync::Arc;

pub struct DnsState {
    pub config: DnsConfig,
    pub upstream: UpstreamForwarder,
    pub filter: AnswerFilter,
    pub query_logger: Option<logging::QueryLogger>,
}

impl DnsState {
    /// Build the serving state. Spawns the query log writer when a log path
    /// is configured, so this must run inside a tokio runtime.
    pub fn new(config: DnsConfig, filter: AnswerFilter) -> Self {
        let upstream = UpstreamForwarder::new(&config.upstream_servers, config.upstream_timeout_ms);
        let query_logger = if config.query_log_path.is_empty() {
            None
        } else {
            Some(logging::QueryLogger::new(&config.query_log_path))
        };
        Self { config, upstream, filter, query_logger }
    }
}

pub type SharedDnsState = Arc<DnsState>;
