mod supervisor;

use anyhow::Context;
use sd_common::{EnvConfig, load_json_or_default};
use sd_dns::{AnswerFilter, DnsConfig, DnsState};
use sd_identity::{HttpDiscovery, IdentityConfig, IdentityMonitor, LocalIdentity};
use sd_iptable::IpTableConfig;
use std::sync::Arc;
use supervisor::{ServicePriority, spawn_supervised};
use tracing::info;

/// Contents of the JSON config file
#[derive(Debug, serde::Deserialize, Default)]
struct SplitDnsConfig {
    #[serde(default)]
    dns: DnsConfig,
    #[serde(default)]
    identity: IdentityConfig,
    #[serde(default)]
    iptable: IpTableConfig,
}

fn main() -> anyhow::Result<()> {
    // The .env file may set RUST_LOG, and it has to be applied while the
    // process is still single-threaded
    let env = EnvConfig::load(None);

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(run(env))
}

async fn run(env: EnvConfig) -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,splitdns=debug")),
        )
        .init();

    info!("splitdns starting...");

    let config: SplitDnsConfig = load_json_or_default(&env.config_path)?;
    let table = Arc::new(sd_iptable::load_table(&config.iptable)?);

    // Listen addresses are checked before anything goes on the network
    let listen_addrs = config
        .dns
        .listen_socket_addrs()
        .map_err(|addr| anyhow::anyhow!("Invalid listen address '{}'", addr))?;

    let identity = Arc::new(LocalIdentity::new());
    let discovery = HttpDiscovery::new(&config.identity.endpoint, config.identity.request_timeout())
        .context("Failed to build HTTP client for IP discovery")?;
    let monitor = IdentityMonitor::new(
        discovery,
        table.clone(),
        identity.clone(),
        config.identity.retry_policy(),
    );

    // One cycle before serving; on failure we start with the default group
    monitor.refresh().await;
    info!(
        "Local IP {} (group {}), refreshing every {:?}",
        identity.local_ip(),
        identity.local_group(),
        config.identity.refresh_interval()
    );
    monitor.spawn(config.identity.refresh_interval());

    let filter = AnswerFilter::new(table, identity);
    let state = Arc::new(DnsState::new(config.dns, filter));
    info!("Upstream servers: {:?}", state.upstream.servers());

    for addr in listen_addrs {
        let udp_state = state.clone();
        spawn_supervised(format!("dns-udp-{addr}"), ServicePriority::Critical, move || {
            sd_dns::server::run_udp_server(addr, udp_state.clone())
        });

        let tcp_state = state.clone();
        spawn_supervised(format!("dns-tcp-{addr}"), ServicePriority::Important, move || {
            sd_dns::server::run_tcp_server(addr, tcp_state.clone())
        });
    }

    tokio::signal::ctrl_c().await?;
    info!("Shutting down");
    Ok(())
}
