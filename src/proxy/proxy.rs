// ────────────────────────────────
// src/proxy/proxy.rs
// Proxy facade: binds the frontend, spawns health monitors, workers and the
// dispatch loop, and tears all of it down again.
// ────────────────────────────────

use super::connections::{release_departed, ConnectionRouter};
use super::frontend::dispatch_loop;
use super::pool::BackendPool;
use super::reply::reject;
use super::shutdown::ShutdownCoordinator;
use super::worker::{run_worker, WorkerContext};
use crate::config::ProxyConfig;
use crate::health::HealthMonitor;
use crate::load_balancer::{BackendSelector, FirstAliveSelector};
use crate::metrics::MetricsCollector;
use crate::protocol::{CodecError, Serializer};
use crate::transport::{DealerOptions, RouterSocket, TransportError};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::info;

// Custom error type for proxy operations. The display text is what clients see
// in the `error` field of a failed response.
#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    #[error("invalid request format: expected identity and payload frames, got {0} frame(s)")]
    MalformedRequest(usize),

    #[error("invalid request format: {0}")]
    Decode(#[from] CodecError),

    #[error("failed to get backend connection: no available backends")]
    NoAvailableBackends,

    #[error("request to backend {address} failed: {source}")]
    Backend {
        address: String,
        #[source]
        source: TransportError,
    },

    #[error("backend {0} sent an empty reply")]
    EmptyReply(String),

    #[error("failed to bind socket: {0}")]
    Bind(#[source] TransportError),

    #[error("internal error while handling request: {0}")]
    WorkerFault(String),

    #[error("proxy is shutting down")]
    ShuttingDown,

    #[error("proxy is already running")]
    AlreadyRunning,
}

impl ProxyError {
    pub fn outcome(&self) -> &'static str {
        match self {
            ProxyError::MalformedRequest(_) | ProxyError::Decode(_) => "bad_request",
            ProxyError::NoAvailableBackends => "no_backend",
            ProxyError::Backend { .. } | ProxyError::EmptyReply(_) => "backend_error",
            ProxyError::WorkerFault(_) => "fault",
            ProxyError::ShuttingDown => "shutdown",
            ProxyError::Bind(_) | ProxyError::AlreadyRunning => "startup",
        }
    }
}

struct Running {
    socket: Arc<RouterSocket>,
    router: Arc<ConnectionRouter>,
}

pub struct Proxy {
    config: ProxyConfig,
    pool: BackendPool,
    serializer: Arc<dyn Serializer>,
    selector: Arc<dyn BackendSelector>,
    metrics: Option<Arc<MetricsCollector>>,
    shutdown: ShutdownCoordinator,
    running: Mutex<Option<Running>>,
}

impl Proxy {
    pub fn new(config: ProxyConfig, pool: BackendPool, serializer: Arc<dyn Serializer>) -> Self {
        Self {
            config,
            pool,
            serializer,
            selector: Arc::new(FirstAliveSelector::new()),
            metrics: None,
            shutdown: ShutdownCoordinator::new(),
            running: Mutex::new(None),
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<MetricsCollector>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn with_selector(mut self, selector: Arc<dyn BackendSelector>) -> Self {
        self.selector = selector;
        self
    }

    pub fn config(&self) -> &ProxyConfig {
        &self.config
    }

    pub fn pool(&self) -> &BackendPool {
        &self.pool
    }

    // Lets the metrics endpoint stop with the proxy.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.token()
    }

    pub async fn start(&self) -> Result<SocketAddr, ProxyError> {
        let mut running = self.running.lock().await;
        if running.is_some() {
            return Err(ProxyError::AlreadyRunning);
        }
        if self.shutdown.is_shutting_down() {
            return Err(ProxyError::ShuttingDown);
        }

        let socket = RouterSocket::bind(&self.config.listen_addr(), self.config.io_timeout)
            .await
            .map_err(ProxyError::Bind)?;
        let socket = Arc::new(socket);
        let local_addr = socket.local_addr();

        info!(
            "Starting server on {} with {} workers ({} backends, selector: {})",
            local_addr,
            self.config.workers,
            self.pool.len(),
            self.selector.name()
        );

        self.register_servers();

        let router = Arc::new(
            ConnectionRouter::new(
                self.pool.clone(),
                self.selector.clone(),
                DealerOptions::new(self.config.io_timeout),
                self.shutdown.token(),
            )
            .with_metrics(self.metrics.clone()),
        );

        let (queue_tx, queue_rx) = mpsc::channel(self.config.queue_capacity);
        let queue = Arc::new(Mutex::new(queue_rx));

        let context = Arc::new(WorkerContext {
            socket: socket.clone(),
            router: router.clone(),
            serializer: self.serializer.clone(),
            metrics: self.metrics.clone(),
        });

        for number in 1..=self.config.workers {
            self.shutdown.spawn(
                format!("worker-{}", number),
                run_worker(number, context.clone(), queue.clone(), self.shutdown.token()),
            );
        }

        self.shutdown.spawn(
            "departures",
            release_departed(router.clone(), socket.departures(), self.shutdown.token()),
        );

        self.shutdown.spawn(
            "frontend",
            dispatch_loop(
                socket.clone(),
                self.serializer.clone(),
                queue_tx,
                self.shutdown.token(),
            ),
        );

        *running = Some(Running { socket, router });
        Ok(local_addr)
    }

    // Safe to call more than once.
    pub async fn stop(&self) {
        let running = self.running.lock().await.take();

        info!("Initiating shutdown sequence for server ...");
        self.shutdown.shutdown().await;

        if let Some(running) = running {
            // Accepted by the socket but never picked up by the frontend loop.
            while let Some(frames) = running.socket.try_recv() {
                reject(&running.socket, self.serializer.as_ref(), frames, &ProxyError::ShuttingDown);
            }
            running.socket.close().await;
            running.router.close_all().await;
        }

        info!("Server shutdown complete.");
    }

    pub async fn client_bindings(&self) -> usize {
        match self.running.lock().await.as_ref() {
            Some(running) => running.router.len(),
            None => 0,
        }
    }

    fn register_servers(&self) {
        if let Some(metrics) = &self.metrics {
            metrics.update_total_backends(self.pool.len());
        }

        for backend in self.pool.all_backends() {
            let monitor = HealthMonitor::new(backend.clone(), &self.config, self.serializer.clone())
                .with_metrics(self.metrics.clone());

            self.shutdown.spawn(
                format!("monitor {}", backend.address),
                monitor.run(self.shutdown.token()),
            );
        }
    }
}
