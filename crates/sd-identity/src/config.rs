use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::monitor::RetryPolicy;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityConfig {
    /// "What is my IP" endpoint returning `{"ip": "a.b.c.d"}`.
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_refresh_interval")]
    pub refresh_interval_secs: u64,
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,
    #[serde(default = "default_retry_backoff")]
    pub retry_backoff_secs: u64,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

fn default_endpoint() -> String {
    "https://api.ipify.org?format=json".to_string()
}
fn default_refresh_interval() -> u64 {
    300
}
fn default_retry_attempts() -> u32 {
    3
}
fn default_retry_backoff() -> u64 {
    10
}
fn default_request_timeout() -> u64 {
    10
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            refresh_interval_secs: default_refresh_interval(),
            retry_attempts: default_retry_attempts(),
            retry_backoff_secs: default_retry_backoff(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

impl IdentityConfig {
    pub fn refresh_interval(&self) -> Duration {
        // tokio intervals panic on a zero period
        Duration::from_secs(self.refresh_interval_secs.max(1))
    }

    pub fn request_timeout(&self) -> Duration {
        // reqwest fails every request at once with a zero timeout
        Duration::from_secs(self.request_timeout_secs.max(1))
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            attempts: self.retry_attempts.max(1),
            backoff: Duration::from_secs(self.retry_backoff_secs),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config: IdentityConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config.endpoint, "https://api.ipify.org?format=json");
        assert_eq!(config.refresh_interval(), Duration::from_secs(300));
        let retry = config.retry_policy();
        assert_eq!(retry.attempts, 3);
        assert_eq!(retry.backoff, Duration::from_secs(10));
    }

    #[test]
    fn test_zero_values_are_clamped() {
        let config: IdentityConfig =
            serde_json::from_str(r#"{"refresh_interval_secs": 0, "retry_attempts": 0, "request_timeout_secs": 0}"#)
                .unwrap();
        assert_eq!(config.refresh_interval(), Duration::from_secs(1));
        assert_eq!(config.request_timeout(), Duration::from_secs(1));
        assert_eq!(config.retry_policy().attempts, 1);
    }
}
