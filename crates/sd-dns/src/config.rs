use serde::{Deserialize, Serialize};
use std::net::{IpAddr, SocketAddr};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DnsConfig {
    #[serde(default = "default_listen_addresses")]
    pub listen_addresses: Vec<String>,
    #[serde(default = "default_dns_port")]
    pub port: u16,
    #[serde(default = "default_upstream_servers")]
    pub upstream_servers: Vec<String>,
    #[serde(default = "default_upstream_timeout")]
    pub upstream_timeout_ms: u64,
    /// Empty disables the query log
    #[serde(default)]
    pub query_log_path: String,
}

fn default_listen_addresses() -> Vec<String> {
    vec!["0.0.0.0".to_string()]
}
fn default_dns_port() -> u16 {
    53
}
fn default_upstream_servers() -> Vec<String> {
    vec!["1.1.1.1".to_string(), "8.8.8.8".to_string()]
}
fn default_upstream_timeout() -> u64 {
    3000
}

impl Default for DnsConfig {
    fn default() -> Self {
        Self {
            listen_addresses: default_listen_addresses(),
            port: default_dns_port(),
            upstream_servers: default_upstream_servers(),
            upstream_timeout_ms: default_upstream_timeout(),
            query_log_path: String::new(),
        }
    }
}

impl DnsConfig {
    /// Socket addresses to bind. Entries that are not IP addresses are
    /// returned as errors so the caller can report them.
    pub fn listen_socket_addrs(&self) -> Result<Vec<SocketAddr>, String> {
        self.listen_addresses
            .iter()
            .map(|addr| {
                addr.parse::<IpAddr>()
                    .map(|ip| SocketAddr::new(ip, self.port))
                    .map_err(|_| addr.clone())
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_dns_config() {
        let config = DnsConfig::default();
        assert_eq!(config.port, 53);
        assert_eq!(config.upstream_timeout_ms, 3000);
        assert_eq!(config.upstream_servers.len(), 2);
        assert!(config.query_log_path.is_empty());
    }

    #[test]
    fn test_partial_json() {
        let config: DnsConfig = serde_json::from_str(r#"{"port": 5353}"#).unwrap();
        assert_eq!(config.port, 5353);
        assert_eq!(config.listen_addresses, vec!["0.0.0.0"]);
    }

    #[test]
    fn test_listen_socket_addrs() {
        let config = DnsConfig {
            listen_addresses: vec!["127.0.0.1".into(), "::1".into()],
            port: 5300,
            ..Default::default()
        };
        let addrs = config.listen_socket_addrs().unwrap();
        assert_eq!(addrs[0], "127.0.0.1:5300".parse().unwrap());
        assert_eq!(addrs[1], "[::1]:5300".parse().unwrap());

        let bad = DnsConfig {
            listen_addresses: vec!["localhost".into()],
            ..Default::default()
        };
        assert_eq!(bad.listen_socket_addrs().unwrap_err(), "localhost");
    }
}
