use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::table::OverlapPolicy;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IpTableConfig {
    /// CIDR list files, in group order.
    #[serde(default)]
    pub sources: Vec<PathBuf>,
    #[serde(default)]
    pub allow_overlaps: bool,
}

impl IpTableConfig {
    pub fn overlap_policy(&self) -> OverlapPolicy {
        if self.allow_overlaps {
            OverlapPolicy::Allow
        } else {
            OverlapPolicy::Reject
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config: IpTableConfig = serde_json::from_str("{}").unwrap();
        assert!(config.sources.is_empty());
        assert_eq!(config.overlap_policy(), OverlapPolicy::Reject);
    }

    #[test]
    fn test_sources_keep_order() {
        let config: IpTableConfig = serde_json::from_str(
            r#"{"sources": ["/etc/splitdns/telecom.txt", "/etc/splitdns/unicom.txt"], "allow_overlaps": true}"#,
        )
        .unwrap();
        assert_eq!(config.sources[1], PathBuf::from("/etc/splitdns/unicom.txt"));
        assert_eq!(config.overlap_policy(), OverlapPolicy::Allow);
    }
}
