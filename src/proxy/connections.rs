// src/proxy/connections.rs
use super::pool::BackendPool;
use super::proxy::ProxyError;
use crate::load_balancer::BackendSelector;
use crate::metrics::MetricsCollector;
use crate::transport::{DealerOptions, DealerSocket, Frames};
use bytes::Bytes;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub struct ClientConnection {
    pub address: String,
    pub dealer: DealerSocket,
}

type Slot = Arc<Mutex<Option<ClientConnection>>>;

/// Maps client identities to live backend connections. Different identities
/// route concurrently; requests for the same identity are serialized on the
/// identity's slot so one connection never has two requests outstanding.
///
/// A slot is only removed from the map while its lock is held, and a router that
/// wins a lock on a slot no longer in the map starts over.
pub struct ConnectionRouter {
    pool: BackendPool,
    selector: Arc<dyn BackendSelector>,
    connections: DashMap<Bytes, Slot>,
    options: DealerOptions,
    cancel: CancellationToken,
    metrics: Option<Arc<MetricsCollector>>,
}

pub struct RoutedConnection {
    identity: Bytes,
    slot: Slot,
    guard: OwnedMutexGuard<Option<ClientConnection>>,
}

impl RoutedConnection {
    pub fn address(&self) -> &str {
        self.guard.as_ref().map(|c| c.address.as_str()).unwrap_or_default()
    }

    // One request, one reply, same connection.
    pub async fn request(&self, payload: Bytes) -> Result<Frames, ProxyError> {
        let connection = self
            .guard
            .as_ref()
            .ok_or_else(|| ProxyError::WorkerFault("connection slot is empty".to_string()))?;

        connection
            .dealer
            .send(vec![payload])
            .await
            .map_err(|source| ProxyError::Backend {
                address: connection.address.clone(),
                source,
            })?;

        connection
            .dealer
            .recv()
            .await
            .map_err(|source| ProxyError::Backend {
                address: connection.address.clone(),
                source,
            })
    }
}

impl ConnectionRouter {
    pub fn new(
        pool: BackendPool,
        selector: Arc<dyn BackendSelector>,
        options: DealerOptions,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            pool,
            selector,
            connections: DashMap::new(),
            options,
            cancel,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Option<Arc<MetricsCollector>>) -> Self {
        self.metrics = metrics;
        self
    }

    pub async fn route(&self, identity: &Bytes) -> Result<RoutedConnection, ProxyError> {
        let (slot, mut guard) = self.lock_slot(identity).await;

        if let Some(connection) = guard.as_ref() {
            let alive = match self.pool.get_backend(&connection.address) {
                Some(backend) => backend.is_alive().await,
                None => false,
            };

            if alive && !connection.dealer.is_closed() {
                return Ok(RoutedConnection {
                    identity: identity.clone(),
                    slot,
                    guard,
                });
            }

            if let Some(stale) = guard.take() {
                info!("Backend {:?} is gone, rebinding client", stale.address);
                stale.dealer.close().await;
            }
        }

        for backend in self.selector.candidates(&self.pool.all_backends()).await {
            match DealerSocket::dial(&backend.address, self.options.clone(), &self.cancel).await {
                Ok(dealer) => {
                    debug!("Bound client to {:?}", dealer.endpoint());
                    *guard = Some(ClientConnection {
                        address: backend.address.clone(),
                        dealer,
                    });
                    self.update_metrics();
                    return Ok(RoutedConnection {
                        identity: identity.clone(),
                        slot,
                        guard,
                    });
                }
                Err(e) => warn!("Failed to connect to backend {:?}: {}", backend.address, e),
            }
        }

        self.forget(identity, &slot);
        Err(ProxyError::NoAvailableBackends)
    }

    // A late reply dies with the connection.
    pub async fn invalidate(&self, mut routed: RoutedConnection) {
        if let Some(connection) = routed.guard.take() {
            debug!("Dropping connection to {:?}", connection.address);
            connection.dealer.close().await;
        }
        self.forget(&routed.identity, &routed.slot);
    }

    pub async fn release(&self, identity: &Bytes) {
        let Some(slot) = self.connections.get(identity).map(|e| e.value().clone()) else {
            return;
        };

        let mut guard = slot.lock().await;
        if let Some(connection) = guard.take() {
            debug!(
                "Client {} left, closing connection to {:?}",
                String::from_utf8_lossy(identity),
                connection.address
            );
            connection.dealer.close().await;
        }
        self.forget(identity, &slot);
    }

    pub async fn bound_backend(&self, identity: &Bytes) -> Option<String> {
        let slot = self.connections.get(identity)?.value().clone();
        let guard = slot.lock().await;
        guard.as_ref().map(|c| c.address.clone())
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    // Used at shutdown once no worker is routing anymore.
    pub async fn close_all(&self) {
        let slots: Vec<Slot> = self
            .connections
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        self.connections.clear();

        for slot in slots {
            if let Some(connection) = slot.lock().await.take() {
                connection.dealer.close().await;
            }
        }

        self.update_metrics();
    }

    async fn lock_slot(&self, identity: &Bytes) -> (Slot, OwnedMutexGuard<Option<ClientConnection>>) {
        loop {
            let slot = self
                .connections
                .entry(identity.clone())
                .or_default()
                .value()
                .clone();
            let guard = slot.clone().lock_owned().await;

            let current = self
                .connections
                .get(identity)
                .is_some_and(|entry| Arc::ptr_eq(entry.value(), &slot));
            if current {
                return (slot, guard);
            }
        }
    }

    // Caller holds the slot's lock.
    fn forget(&self, identity: &Bytes, slot: &Slot) {
        self.connections
            .remove_if(identity, |_, current| Arc::ptr_eq(current, slot));
        self.update_metrics();
    }

    fn update_metrics(&self) {
        if let Some(metrics) = &self.metrics {
            metrics.update_client_bindings(self.connections.len());
        }
    }
}

pub(crate) async fn release_departed(
    router: Arc<ConnectionRouter>,
    mut departures: broadcast::Receiver<Bytes>,
    cancel: CancellationToken,
) {
    loop {
        let departed = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            departed = departures.recv() => departed,
        };

        match departed {
            Ok(identity) => router.release(&identity).await,
            Err(RecvError::Lagged(missed)) => {
                warn!("Missed {} client departures, their bindings stay until shutdown", missed)
            }
            Err(RecvError::Closed) => break,
        }
    }
}
