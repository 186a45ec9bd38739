use anyhow::Result;
use rand::Rng;
use std::future::Future;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpStream, UdpSocket};
use tokio::time::timeout;
use tracing::debug;

use crate::packet::{self, DnsMessage, RCODE_SERVFAIL};

/// What the upstream step hands to the answer filter: a response code, an
/// optional error and the response message if one could be decoded.
#[derive(Debug)]
pub struct UpstreamResult {
    pub rcode: u8,
    pub error: Option<anyhow::Error>,
    pub message: Option<DnsMessage>,
}

impl UpstreamResult {
    pub fn answered(message: DnsMessage) -> Self {
        Self {
            rcode: message.rcode(),
            error: None,
            message: Some(message),
        }
    }

    pub fn failed(error: anyhow::Error) -> Self {
        Self {
            rcode: RCODE_SERVFAIL,
            error: Some(error),
            message: None,
        }
    }

    /// Only a NOERROR response without error and with a message is filtered.
    pub fn is_success(&self) -> bool {
        self.rcode == packet::RCODE_NOERROR && self.error.is_none() && self.message.is_some()
    }
}

/// Resolves a raw client query.
pub trait Upstream {
    fn resolve(&self, query: &[u8]) -> impl Future<Output = UpstreamResult> + Send;
}

/// Forwards queries to a list of recursive resolvers, first answer wins.
pub struct UpstreamForwarder {
    servers: Vec<SocketAddr>,
    timeout_ms: u64,
}

/// Accepts `1.1.1.1`, `1.1.1.1:5353`, `2606:4700::1111` and `[2606:4700::1111]:53`.
fn parse_server(s: &str) -> Option<SocketAddr> {
    if let Ok(addr) = s.parse::<SocketAddr>() {
        return Some(addr);
    }
    s.parse::<std::net::IpAddr>().ok().map(|ip| SocketAddr::new(ip, 53))
}

fn set_txid(packet: &mut [u8], txid: u16) {
    if packet.len() >= 2 {
        packet[..2].copy_from_slice(&txid.to_be_bytes());
    }
}

impl UpstreamForwarder {
    pub fn new(servers: &[String], timeout_ms: u64) -> Self {
        let servers = servers
            .iter()
            .filter_map(|s| {
                let addr = parse_server(s);
                if addr.is_none() {
                    debug!("Ignoring invalid upstream server '{}'", s);
                }
                addr
            })
            .collect();
        Self { servers, timeout_ms }
    }

    pub fn servers(&self) -> &[SocketAddr] {
        &self.servers
    }

    /// Forward a query over UDP with a random TXID (RFC 5452), falling back
    /// to TCP when the answer is truncated. The client's TXID is restored in
    /// the returned bytes.
    pub async fn forward(&self, query_bytes: &[u8]) -> Result<Vec<u8>> {
        if query_bytes.len() < 12 {
            anyhow::bail!("Query too short to forward");
        }
        if self.servers.is_empty() {
            anyhow::bail!("No upstream servers configured");
        }

        let half_timeout = Duration::from_millis(self.timeout_ms / 2);
        let full_timeout = Duration::from_millis(self.timeout_ms);

        let client_txid = u16::from_be_bytes([query_bytes[0], query_bytes[1]]);
        let upstream_txid: u16 = rand::rng().random();
        let mut upstream_query = query_bytes.to_vec();
        set_txid(&mut upstream_query, upstream_txid);

        for (i, server) in self.servers.iter().enumerate() {
            // The first server gets a shorter leash so a dead primary does
            // not eat the whole budget.
            let t = if i == 0 { half_timeout } else { full_timeout };

            let mut response = match self.forward_udp(&upstream_query, *server, t, upstream_txid).await {
                Ok(r) => r,
                Err(e) => {
                    debug!("UDP forward to {} failed: {}", server, e);
                    continue;
                }
            };

            if response[2] & 0x02 != 0 {
                debug!("Response truncated from {}, retrying over TCP", server);
                match self.forward_tcp(&upstream_query, *server, full_timeout).await {
                    Ok(tcp_response) => response = tcp_response,
                    Err(e) => debug!("TCP forward to {} failed: {}", server, e),
                }
            }

            set_txid(&mut response, client_txid);
            return Ok(response);
        }

        anyhow::bail!("All upstream servers failed")
    }

    async fn forward_udp(
        &self,
        query: &[u8],
        server: SocketAddr,
        dur: Duration,
        expected_txid: u16,
    ) -> Result<Vec<u8>> {
        let bind_addr = if server.is_ipv4() {
            SocketAddr::from(([0, 0, 0, 0], 0))
        } else {
            SocketAddr::from(([0u16; 8], 0))
        };

        let socket = UdpSocket::bind(bind_addr).await?;
        socket.send_to(query, server).await?;

        let mut buf = vec![0u8; 4096];
        let (len, src) = timeout(dur, socket.recv_from(&mut buf)).await??;
        buf.truncate(len);

        if src.ip() != server.ip() {
            anyhow::bail!("Response from unexpected source {} (expected {})", src.ip(), server.ip());
        }
        if buf.len() < 12 {
            anyhow::bail!("Response too short: {} bytes", buf.len());
        }
        let txid = u16::from_be_bytes([buf[0], buf[1]]);
        if txid != expected_txid {
            anyhow::bail!("TXID mismatch: expected {:04x}, got {:04x}", expected_txid, txid);
        }
        if buf[2] & 0x80 == 0 {
            anyhow::bail!("Response missing QR flag");
        }

        Ok(buf)
    }

    async fn forward_tcp(&self, query: &[u8], server: SocketAddr, dur: Duration) -> Result<Vec<u8>> {
        let mut stream = timeout(dur, TcpStream::connect(server)).await??;

        stream.write_all(&(query.len() as u16).to_be_bytes()).await?;
        stream.write_all(query).await?;

        let mut len_buf = [0u8; 2];
        timeout(dur, stream.read_exact(&mut len_buf)).await??;
        let mut response = vec![0u8; u16::from_be_bytes(len_buf) as usize];
        timeout(dur, stream.read_exact(&mut response)).await??;

        if response.len() < 12 {
            anyhow::bail!("TCP response too short: {} bytes", response.len());
        }
        Ok(response)
    }
}

impl Upstream for UpstreamForwarder {
    async fn resolve(&self, query: &[u8]) -> UpstreamResult {
        match self.forward(query).await {
            Ok(bytes) => match packet::parse_message(&bytes) {
                Ok(message) => UpstreamResult::answered(message),
                // Not ours to filter, but the client may still make sense of it
                Err(e) => match DnsMessage::unparsed(bytes) {
                    Ok(message) => UpstreamResult {
                        rcode: message.rcode(),
                        error: Some(anyhow::anyhow!("Unparseable upstream response: {}", e)),
                        message: Some(message),
                    },
                    Err(_) => UpstreamResult::failed(anyhow::anyhow!("Unparseable upstream response: {}", e)),
                },
            },
            Err(e) => UpstreamResult::failed(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::RCODE_NOERROR;
    use crate::packet::tests::{a, query_bytes, response_bytes};
    use crate::records::RecordType;
    use std::net::Ipv4Addr;

    #[test]
    fn test_parse_server() {
        assert_eq!(parse_server("1.1.1.1"), Some("1.1.1.1:53".parse().unwrap()));
        assert_eq!(parse_server("9.9.9.9:5353"), Some("9.9.9.9:5353".parse().unwrap()));
        assert_eq!(parse_server("2606:4700::1111"), Some("[2606:4700::1111]:53".parse().unwrap()));
        assert_eq!(parse_server("[::1]:5300"), Some("[::1]:5300".parse().unwrap()));
        assert_eq!(parse_server("dns.example"), None);
    }

    #[test]
    fn test_invalid_servers_dropped() {
        let fwd = UpstreamForwarder::new(&["8.8.8.8".to_string(), "bogus".to_string()], 1000);
        assert_eq!(fwd.servers().len(), 1);
    }

    #[tokio::test]
    async fn test_forward_restores_txid() {
        let server = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = server.local_addr().unwrap();

        tokio::spawn(async move {
            let mut buf = [0u8; 512];
            let (len, src) = server.recv_from(&mut buf).await.unwrap();
            let answer = a("example.com", Ipv4Addr::new(5, 6, 7, 8), 60);
            let response = response_bytes(&buf[..len], RCODE_NOERROR, &[answer]);
            server.send_to(&response, src).await.unwrap();
        });

        let fwd = UpstreamForwarder::new(&[addr.to_string()], 2000);
        let query = query_bytes(0x4242, "example.com", RecordType::A, None);
        let result = fwd.resolve(&query).await;

        assert!(result.is_success());
        let message = result.message.unwrap();
        assert_eq!(message.header.id, 0x4242);
        assert_eq!(message.answers[0].ipv4(), Some(Ipv4Addr::new(5, 6, 7, 8)));
    }

    #[tokio::test]
    async fn test_undecodable_reply_is_kept() {
        let server = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = server.local_addr().unwrap();

        tokio::spawn(async move {
            let mut buf = [0u8; 512];
            let (len, src) = server.recv_from(&mut buf).await.unwrap();
            let answer = a("example.com", Ipv4Addr::new(5, 6, 7, 8), 60);
            let mut response = response_bytes(&buf[..len], RCODE_NOERROR, &[answer]);
            response.truncate(response.len() - 1);
            server.send_to(&response, src).await.unwrap();
        });

        let fwd = UpstreamForwarder::new(&[addr.to_string()], 2000);
        let query = query_bytes(0x0808, "example.com", RecordType::A, None);
        let result = fwd.resolve(&query).await;

        assert!(!result.is_success());
        assert!(result.error.is_some());
        let message = result.message.unwrap();
        assert!(message.is_verbatim());
        let bytes = message.to_bytes();
        assert_eq!(&bytes[..2], &[0x08, 0x08]);
    }

    #[tokio::test]
    async fn test_no_answer_is_failure() {
        // Nobody replies on this socket
        let silent = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let fwd = UpstreamForwarder::new(&[silent.local_addr().unwrap().to_string()], 200);
        let query = query_bytes(1, "example.com", RecordType::A, None);

        let result = fwd.resolve(&query).await;
        assert!(!result.is_success());
        assert_eq!(result.rcode, RCODE_SERVFAIL);
        assert!(result.error.is_some());
        assert!(result.message.is_none());
    }
}
