use serde::Deserialize;
use std::future::Future;
use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DiscoveryError {
    #[error("Request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("Unexpected status code {0}")]
    Status(u16),
    #[error("Malformed response body: {0}")]
    Malformed(String),
    #[error("Address {0} is not IPv4")]
    NotIpv4(IpAddr),
}

/// Source of the host's public IPv4 address.
pub trait IpDiscovery {
    fn discover(&self) -> impl Future<Output = Result<Ipv4Addr, DiscoveryError>> + Send;
}

#[derive(Deserialize)]
struct MyIp {
    ip: String,
}

/// Plain HTTP GET against a JSON "what is my IP" service.
pub struct HttpDiscovery {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpDiscovery {
    pub fn new(endpoint: &str, timeout: Duration) -> Result<Self, DiscoveryError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()?;
        Ok(Self {
            client,
            endpoint: endpoint.to_string(),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

impl IpDiscovery for HttpDiscovery {
    async fn discover(&self) -> Result<Ipv4Addr, DiscoveryError> {
        let response = self.client.get(&self.endpoint).send().await?;
        let status = response.status();
        if status != reqwest::StatusCode::OK {
            return Err(DiscoveryError::Status(status.as_u16()));
        }

        let body = response.bytes().await?;
        parse_body(&body)
    }
}

fn parse_body(body: &[u8]) -> Result<Ipv4Addr, DiscoveryError> {
    let my_ip: MyIp =
        serde_json::from_slice(body).map_err(|e| DiscoveryError::Malformed(e.to_string()))?;
    let ip: IpAddr = my_ip
        .ip
        .trim()
        .parse()
        .map_err(|_| DiscoveryError::Malformed(format!("invalid address {:?}", my_ip.ip)))?;
    match ip {
        IpAddr::V4(v4) => Ok(v4),
        IpAddr::V6(_) => Err(DiscoveryError::NotIpv4(ip)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::Router;
    use axum::http::StatusCode;
    use axum::routing::get;

    async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{addr}/")
    }

    #[test]
    fn test_parse_body() {
        assert_eq!(
            parse_body(br#"{"ip":"203.0.113.7"}"#).unwrap(),
            Ipv4Addr::new(203, 0, 113, 7)
        );
        assert!(matches!(parse_body(b"<html>"), Err(DiscoveryError::Malformed(_))));
        assert!(matches!(parse_body(br#"{"ip":"nope"}"#), Err(DiscoveryError::Malformed(_))));
        assert!(matches!(parse_body(br#"{"addr":"1.2.3.4"}"#), Err(DiscoveryError::Malformed(_))));
        assert!(matches!(parse_body(br#"{"ip":"2001:db8::1"}"#), Err(DiscoveryError::NotIpv4(_))));
    }

    #[tokio::test]
    async fn test_discover_ok() {
        let url = serve(Router::new().route(
            "/",
            get(|| async { axum::Json(serde_json::json!({ "ip": "198.51.100.23" })) }),
        ))
        .await;

        let discovery = HttpDiscovery::new(&url, Duration::from_secs(5)).unwrap();
        assert_eq!(discovery.discover().await.unwrap(), Ipv4Addr::new(198, 51, 100, 23));
    }

    #[tokio::test]
    async fn test_discover_status_error() {
        let url = serve(Router::new().route(
            "/",
            get(|| async { (StatusCode::SERVICE_UNAVAILABLE, "down") }),
        ))
        .await;

        let discovery = HttpDiscovery::new(&url, Duration::from_secs(5)).unwrap();
        assert!(matches!(discovery.discover().await, Err(DiscoveryError::Status(503))));
    }

    #[tokio::test]
    async fn test_discover_transport_error() {
        // Bind then drop to get a port nobody listens on
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let discovery =
            HttpDiscovery::new(&format!("http://{addr}/"), Duration::from_secs(2)).unwrap();
        assert!(matches!(discovery.discover().await, Err(DiscoveryError::Transport(_))));
    }
}
