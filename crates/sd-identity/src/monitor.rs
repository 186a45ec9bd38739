use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use sd_iptable::IntervalTable;

use crate::discovery::IpDiscovery;
use crate::state::LocalIdentity;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Lookups per refresh cycle.
    pub attempts: u32,
    /// Pause between two failed lookups of the same cycle.
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            backoff: Duration::from_secs(10),
        }
    }
}

/// Keeps `LocalIdentity` in sync with the host's public address.
pub struct IdentityMonitor<D> {
    discovery: D,
    table: Arc<IntervalTable>,
    identity: Arc<LocalIdentity>,
    retry: RetryPolicy,
}

impl<D: IpDiscovery> IdentityMonitor<D> {
    pub fn new(
        discovery: D,
        table: Arc<IntervalTable>,
        identity: Arc<LocalIdentity>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            discovery,
            table,
            identity,
            retry,
        }
    }

    /// Run one refresh cycle. Returns `true` if a new value was published.
    /// When every attempt fails the previous value is left untouched.
    pub async fn refresh(&self) -> bool {
        let attempts = self.retry.attempts.max(1);

        for attempt in 1..=attempts {
            match self.discovery.discover().await {
                Ok(ip) => {
                    let previous = self.identity.local_group();
                    let raw_group = self.table.classify(ip);
                    let group = self.identity.publish(ip, raw_group);
                    if group != previous {
                        info!("Local IP {} is in group {} (was {})", ip, group, previous);
                    } else {
                        debug!("Local IP {} still in group {}", ip, group);
                    }
                    return true;
                }
                Err(e) => {
                    warn!("Local IP lookup failed (attempt {}/{}): {}", attempt, attempts, e);
                }
            }

            if attempt < attempts {
                tokio::time::sleep(self.retry.backoff).await;
            }
        }

        error!(
            "Local IP lookup gave up after {} attempts, keeping {} (group {})",
            attempts,
            self.identity.local_ip(),
            self.identity.local_group()
        );
        false
    }

    /// Refresh every `interval`, forever. The first cycle runs one interval
    /// from now; call `refresh` beforehand for an immediate value.
    pub async fn run(self, interval: Duration) {
        let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            self.refresh().await;
        }
    }
}

impl<D: IpDiscovery + Send + Sync + 'static> IdentityMonitor<D> {
    pub fn spawn(self, interval: Duration) -> JoinHandle<()> {
        tokio::spawn(self.run(interval))
    }
}
