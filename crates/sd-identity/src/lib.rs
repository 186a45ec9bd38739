pub mod config;
pub mod discovery;
pub mod monitor;
pub mod state;

pub use config::IdentityConfig;
pub use discovery::{DiscoveryError, HttpDiscovery, IpDiscovery};
pub use monitor::{IdentityMonitor, RetryPolicy};
pub use state::LocalIdentity;
