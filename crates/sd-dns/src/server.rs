use anyhow::Result;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream, UdpSocket};
use tracing::{debug, info, warn};

use crate::SharedDnsState;
use crate::filter::ResponseWriter;
use crate::handler::handle_query;
use crate::packet::{DnsMessage, MIN_UDP_PAYLOAD};

/// Sends one datagram back to the client, truncated to its payload limit.
pub struct UdpWriter {
    socket: Arc<UdpSocket>,
    dest: SocketAddr,
    limit: usize,
}

impl UdpWriter {
    pub fn new(socket: Arc<UdpSocket>, dest: SocketAddr) -> Self {
        Self { socket, dest, limit: MIN_UDP_PAYLOAD }
    }
}

impl ResponseWriter for UdpWriter {
    async fn write_msg(&mut self, message: &DnsMessage) -> std::io::Result<()> {
        let bytes = message.to_udp_bytes(self.limit);
        self.socket.send_to(&bytes, self.dest).await?;
        Ok(())
    }

    fn set_payload_limit(&mut self, limit: usize) {
        self.limit = limit;
    }
}

/// Writes a length-prefixed message on a TCP stream.
pub struct TcpWriter<'a> {
    stream: &'a mut TcpStream,
}

impl ResponseWriter for TcpWriter<'_> {
    async fn write_msg(&mut self, message: &DnsMessage) -> std::io::Result<()> {
        let bytes = message.to_bytes();
        if bytes.len() > u16::MAX as usize {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                "response exceeds 65535 bytes",
            ));
        }
        let mut framed = Vec::with_capacity(bytes.len() + 2);
        framed.extend_from_slice(&(bytes.len() as u16).to_be_bytes());
        framed.extend_from_slice(&bytes);
        self.stream.write_all(&framed).await
    }
}

/// Run a DNS UDP server on the given address.
pub async fn run_udp_server(addr: SocketAddr, state: SharedDnsState) -> Result<()> {
    let socket = Arc::new(UdpSocket::bind(addr).await?);
    info!("DNS UDP server listening on {}", addr);

    let mut buf = [0u8; 4096];

    loop {
        let (len, src) = match socket.recv_from(&mut buf).await {
            Ok(r) => r,
            Err(e) => {
                warn!("UDP recv error: {}", e);
                continue;
            }
        };

        let packet = buf[..len].to_vec();
        let socket = socket.clone();
        let state = state.clone();

        tokio::spawn(async move {
            let mut writer = UdpWriter::new(socket, src);
            handle_query(
                &packet,
                src,
                &state.upstream,
                &state.filter,
                state.query_logger.as_ref(),
                &mut writer,
            )
            .await;
        });
    }
}

/// Run a DNS TCP server on the given address.
pub async fn run_tcp_server(addr: SocketAddr, state: SharedDnsState) -> Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!("DNS TCP server listening on {}", addr);

    loop {
        let (stream, src) = match listener.accept().await {
            Ok(r) => r,
            Err(e) => {
                warn!("TCP accept error: {}", e);
                continue;
            }
        };

        let state = state.clone();
        tokio::spawn(async move {
            if let Err(e) = handle_tcp_connection(stream, src, &state).await {
                debug!("TCP connection error from {}: {}", src, e);
            }
        });
    }
}

async fn handle_tcp_connection(
    mut stream: TcpStream,
    src: SocketAddr,
    state: &SharedDnsState,
) -> Result<()> {
    let mut len_buf = [0u8; 2];
    stream.read_exact(&mut len_buf).await?;
    let msg_len = u16::from_be_bytes(len_buf) as usize;

    if msg_len < 12 {
        return Ok(());
    }

    let mut query_buf = vec![0u8; msg_len];
    stream.read_exact(&mut query_buf).await?;

    let mut writer = TcpWriter { stream: &mut stream };
    handle_query(
        &query_buf,
        src,
        &state.upstream,
        &state.filter,
        state.query_logger.as_ref(),
        &mut writer,
    )
    .await;

    Ok(())
}
