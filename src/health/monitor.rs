// src/health/monitor.rs
use crate::config::ProxyConfig;
use crate::metrics::MetricsCollector;
use crate::protocol::{RequestEnvelope, Serializer};
use crate::proxy::{Backend, Transition};
use crate::retry::Backoff;
use crate::transport::{parse_endpoint, DealerOptions, DealerSocket, Frames, TransportError};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval, interval_at, sleep, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

const RECV_ERROR_PAUSE: Duration = Duration::from_millis(10);

// Heartbeats, replies and the death timer all run on this one task.
pub struct HealthMonitor {
    backend: Arc<Backend>,
    heartbeat: Duration,
    deathtime: Duration,
    io_timeout: Duration,
    serializer: Arc<dyn Serializer>,
    metrics: Option<Arc<MetricsCollector>>,
    backoff: Backoff,
}

impl HealthMonitor {
    pub fn new(backend: Arc<Backend>, config: &ProxyConfig, serializer: Arc<dyn Serializer>) -> Self {
        Self {
            backend,
            heartbeat: config.heartbeat,
            deathtime: config.deathtime,
            io_timeout: config.io_timeout,
            serializer,
            metrics: None,
            backoff: Backoff::new(config.heartbeat, config.deathtime * 5),
        }
    }

    pub fn with_metrics(mut self, metrics: Option<Arc<MetricsCollector>>) -> Self {
        self.metrics = metrics;
        self
    }

    pub async fn run(self, cancel: CancellationToken) {
        let address = self.backend.address.clone();
        info!("Registering server: {:?} (weight: {})", address, self.backend.weight);

        if let Some(metrics) = &self.metrics {
            metrics.update_backend_alive(&address, false);
        }

        if let Err(e) = parse_endpoint(&address) {
            error!("Not monitoring server {:?}: {}", address, e);
            return;
        }

        let mut options = DealerOptions::new(self.io_timeout)
            .with_reconnect(true)
            .with_backoff(self.backoff.clone());
        options.dial_timeout = self.deathtime;

        // The backend may not be up yet; keep dialing until it is or we are told to stop.
        let dealer = self
            .backoff
            .retry_until_cancelled(&cancel, || async {
                DealerSocket::dial(&address, options.clone(), &cancel)
                    .await
                    .map_err(|e| {
                        warn!("Failed to connect to server {:?}: {}", address, e);
                        e
                    })
            })
            .await;

        let Some(dealer) = dealer else {
            debug!("Stopped before server {:?} could be reached", address);
            return;
        };

        self.watch(&dealer, &cancel).await;

        dealer.close().await;
        info!("Server {:?} handler stopped", address);
    }

    async fn watch(&self, dealer: &DealerSocket, cancel: &CancellationToken) {
        let mut heartbeat = interval(self.heartbeat);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut death = interval_at(Instant::now() + self.deathtime, self.deathtime);
        death.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("Stopping health monitor for {:?}", self.backend.address);
                    break;
                }
                _ = heartbeat.tick() => self.send_heartbeat(dealer).await,
                _ = death.tick() => self.check_death().await,
                received = dealer.recv() => match received {
                    Ok(frames) => {
                        if self.handle_reply(frames).await {
                            death.reset();
                        }
                    }
                    Err(TransportError::Timeout) => {}
                    Err(TransportError::Closed) => break,
                    Err(e) => {
                        error!("Failed to receive message from server {:?}: {}", self.backend.address, e);
                        sleep(RECV_ERROR_PAUSE).await;
                    }
                },
            }
        }
    }

    async fn send_heartbeat(&self, dealer: &DealerSocket) {
        let heartbeat = match self.serializer.encode_request(&RequestEnvelope::health_check()) {
            Ok(heartbeat) => heartbeat,
            Err(e) => {
                error!("Failed to serialize heartbeat: {}", e);
                return;
            }
        };

        match dealer.send(vec![heartbeat]).await {
            Ok(()) => {
                if let Some(metrics) = &self.metrics {
                    metrics.record_heartbeat_sent(&self.backend.address);
                }
            }
            Err(e) => error!("Failed to send heartbeat to server {:?}: {}", self.backend.address, e),
        }
    }

    async fn handle_reply(&self, frames: Frames) -> bool {
        let Some(payload) = frames.first() else {
            debug!("Ignoring empty message from {:?}", self.backend.address);
            return false;
        };

        let response = match self.serializer.decode_response(payload) {
            Ok(response) => response,
            Err(e) => {
                error!("Failed to parse reply from server {:?}: {}", self.backend.address, e);
                return false;
            }
        };

        if !response.is_health_check() {
            debug!("Ignoring {:?} reply on health connection", response.kind);
            return false;
        }

        if let Some(metrics) = &self.metrics {
            metrics.record_heartbeat_received(&self.backend.address);
        }

        if self.backend.record_heartbeat().await == Transition::Revived {
            info!("Server {:?} is now alive", self.backend.address);
            if let Some(metrics) = &self.metrics {
                metrics.update_backend_alive(&self.backend.address, true);
            }
        }

        true
    }

    async fn check_death(&self) {
        if self.backend.expire_if_silent(self.deathtime).await == Transition::Died {
            let last = self
                .backend
                .last_heartbeat()
                .await
                .map(|t| t.to_rfc3339())
                .unwrap_or_else(|| "never".to_string());
            warn!(
                "Server {:?} is considered dead (last heartbeat: {})",
                self.backend.address, last
            );
            if let Some(metrics) = &self.metrics {
                metrics.update_backend_alive(&self.backend.address, false);
            }
        }
    }
}
