// src/main.rs
use anyhow::{Context, Result};
use clap::Parser;
use heartbeat_proxy::{
    config::{self, ProxyConfig},
    metrics::MetricsRegistry,
    protocol::JsonSerializer,
    proxy::{BackendPool, Proxy},
    server::start_metrics_server,
};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::{error, info};

#[derive(Debug, Parser)]
#[command(name = "heartbeat-proxy", about = "Heartbeat-aware message proxy")]
struct Args {
    #[arg(long, default_value_t = 4444, env = "PROXY_PORT", help = "Port to listen on")]
    port: u16,

    #[arg(long, help = "Number of worker tasks (defaults to available parallelism)")]
    workers: Option<usize>,

    #[arg(long, help = "Enable debug logging")]
    debug: bool,

    #[arg(long, default_value = "servers.json", env = "PROXY_SERVERS", help = "JSON or YAML file with the backend list")]
    servers: PathBuf,

    #[arg(long, default_value_t = 250, help = "Heartbeat interval in milliseconds")]
    heartbeat_ms: u64,

    #[arg(long, default_value_t = 1000, help = "Silence in milliseconds after which a backend is considered dead")]
    deathtime_ms: u64,

    #[arg(long, help = "Backend I/O timeout in milliseconds (defaults to the death timeout)")]
    io_timeout_ms: Option<u64>,

    #[arg(long, help = "Serve prometheus metrics on this port")]
    metrics_port: Option<u16>,
}

impl Args {
    fn proxy_config(&self) -> ProxyConfig {
        let workers = self.workers.unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        });

        ProxyConfig {
            port: self.port,
            workers,
            heartbeat: Duration::from_millis(self.heartbeat_ms),
            deathtime: Duration::from_millis(self.deathtime_ms),
            io_timeout: Duration::from_millis(self.io_timeout_ms.unwrap_or(self.deathtime_ms)),
            ..ProxyConfig::default()
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize tracing
    let level = if args.debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(format!("heartbeat_proxy={}", level).parse()?)
                .add_directive("hyper=info".parse()?),
        )
        .init();

    let config = args.proxy_config();
    config.validate()?;

    info!("Loading backend list from: {}", args.servers.display());
    let servers = config::load_servers_config(&args.servers).await?;

    let metrics_registry = Arc::new(MetricsRegistry::new()?);

    let pool = BackendPool::new(servers.servers);
    let proxy = Proxy::new(config, pool, Arc::new(JsonSerializer::new()))
        .with_metrics(metrics_registry.collector());

    let addr = proxy.start().await.context("Failed to start server")?;
    info!("Proxy listening on {} ({} workers)", addr, proxy.config().workers);

    let metrics_server = match args.metrics_port {
        Some(port) => {
            let metrics_addr: SocketAddr = ([0, 0, 0, 0], port).into();
            match start_metrics_server(
                metrics_addr,
                metrics_registry.clone(),
                "/metrics".to_string(),
                proxy.shutdown_token(),
            ) {
                Ok(handle) => Some(handle),
                Err(e) => {
                    proxy.stop().await;
                    return Err(e);
                }
            }
        }
        None => None,
    };

    if let Err(e) = shutdown_signal().await {
        error!("Failed to listen for shutdown signal: {}", e);
    }

    proxy.stop().await;
    if let Some(handle) = metrics_server {
        let _ = handle.await;
    }

    Ok(())
}

// Graceful shutdown handler
async fn shutdown_signal() -> std::io::Result<()> {
    let ctrl_c = signal::ctrl_c();

    #[cfg(unix)]
    {
        let mut terminate = signal::unix::signal(signal::unix::SignalKind::terminate())?;
        tokio::select! {
            result = ctrl_c => result?,
            _ = terminate.recv() => {},
        }
    }

    #[cfg(not(unix))]
    ctrl_c.await?;

    info!("Shutdown signal received");
    Ok(())
}
