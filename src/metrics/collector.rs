// src/metrics/collector.rs
use prometheus::core::Collector;
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, IntGaugeVec,
    Opts, Registry, TextEncoder,
};
use std::sync::Arc;
use std::time::Instant;
use anyhow::Result;

pub struct MetricsRegistry {
    registry: Registry,
    collector: Arc<MetricsCollector>,
}

impl MetricsRegistry {
    pub fn new() -> Result<Self> {
        let registry = Registry::new();
        let collector = Arc::new(MetricsCollector::new(&registry)?);

        Ok(Self {
            registry,
            collector,
        })
    }

    pub fn collector(&self) -> Arc<MetricsCollector> {
        self.collector.clone()
    }

    pub fn gather(&self) -> Vec<u8> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
            tracing::error!("Failed to encode metrics: {}", e);
        }
        buffer
    }
}

pub struct MetricsCollector {
    // Request metrics
    pub requests_total: IntCounterVec,
    pub request_duration_seconds: HistogramVec,
    pub worker_faults_total: IntCounter,

    // Backend metrics
    pub backend_requests_total: IntCounterVec,
    pub backend_request_duration_seconds: HistogramVec,
    pub backend_alive: IntGaugeVec,
    pub heartbeats_sent_total: IntCounterVec,
    pub heartbeats_received_total: IntCounterVec,

    // System metrics
    pub client_bindings: IntGauge,
    pub alive_backends: IntGauge,
    pub total_backends: IntGauge,
}

impl MetricsCollector {
    pub fn new(registry: &Registry) -> Result<Self> {
        Ok(Self {
            requests_total: registered(
                registry,
                IntCounterVec::new(
                    Opts::new("proxy_requests_total", "Client requests by outcome"),
                    &["outcome"],
                )?,
            )?,
            request_duration_seconds: registered(
                registry,
                HistogramVec::new(
                    HistogramOpts::new(
                        "proxy_request_duration_seconds",
                        "Time from dequeue to reply, in seconds",
                    ),
                    &["outcome"],
                )?,
            )?,
            worker_faults_total: registered(
                registry,
                IntCounter::new("proxy_worker_faults_total", "Faults recovered inside workers")?,
            )?,
            backend_requests_total: registered(
                registry,
                IntCounterVec::new(
                    Opts::new("proxy_backend_requests_total", "Requests forwarded to backends"),
                    &["backend", "status"],
                )?,
            )?,
            backend_request_duration_seconds: registered(
                registry,
                HistogramVec::new(
                    HistogramOpts::new(
                        "proxy_backend_request_duration_seconds",
                        "Backend round trip duration",
                    ),
                    &["backend"],
                )?,
            )?,
            backend_alive: registered(
                registry,
                IntGaugeVec::new(
                    Opts::new("proxy_backend_alive", "Backend liveness (1=alive, 0=dead)"),
                    &["backend"],
                )?,
            )?,
            heartbeats_sent_total: registered(
                registry,
                IntCounterVec::new(
                    Opts::new("proxy_heartbeats_sent_total", "Heartbeats sent to backends"),
                    &["backend"],
                )?,
            )?,
            heartbeats_received_total: registered(
                registry,
                IntCounterVec::new(
                    Opts::new(
                        "proxy_heartbeats_received_total",
                        "Heartbeat replies received from backends",
                    ),
                    &["backend"],
                )?,
            )?,
            client_bindings: registered(
                registry,
                IntGauge::new("proxy_client_bindings", "Client identities bound to a backend")?,
            )?,
            alive_backends: registered(
                registry,
                IntGauge::new("proxy_alive_backends", "Number of alive backends")?,
            )?,
            total_backends: registered(
                registry,
                IntGauge::new("proxy_total_backends", "Total number of backends")?,
            )?,
        })
    }

    pub fn record_request(&self, outcome: &str, duration: std::time::Duration) {
        self.requests_total.with_label_values(&[outcome]).inc();
        self.request_duration_seconds
            .with_label_values(&[outcome])
            .observe(duration.as_secs_f64());
    }

    pub fn record_backend_request(
        &self,
        backend: &str,
        success: bool,
        duration: std::time::Duration,
    ) {
        let status = if success { "success" } else { "failure" };
        self.backend_requests_total
            .with_label_values(&[backend, status])
            .inc();

        self.backend_request_duration_seconds
            .with_label_values(&[backend])
            .observe(duration.as_secs_f64());
    }

    pub fn record_worker_fault(&self) {
        self.worker_faults_total.inc();
    }

    pub fn record_heartbeat_sent(&self, backend: &str) {
        self.heartbeats_sent_total.with_label_values(&[backend]).inc();
    }

    pub fn record_heartbeat_received(&self, backend: &str) {
        self.heartbeats_received_total
            .with_label_values(&[backend])
            .inc();
    }

    pub fn update_backend_alive(&self, backend: &str, alive: bool) {
        let gauge = self.backend_alive.with_label_values(&[backend]);
        let previous = gauge.get();
        let value = if alive { 1 } else { 0 };
        gauge.set(value);
        self.alive_backends.add(value - previous);
    }

    pub fn update_client_bindings(&self, count: usize) {
        self.client_bindings.set(count as i64);
    }

    pub fn update_total_backends(&self, total: usize) {
        self.total_backends.set(total as i64);
    }
}

fn registered<M>(registry: &Registry, metric: M) -> Result<M>
where
    M: Collector + Clone + 'static,
{
    registry.register(Box::new(metric.clone()))?;
    Ok(metric)
}

pub struct Timer {
    start: Instant,
}

impl Timer {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> std::time::Duration {
        self.start.elapsed()
    }
}

impl Default for Timer {
    fn default() -> Self {
        Self::new()
    }
}
