// src/transport/router.rs
use super::{Frames, MultipartCodec, TransportError};
use bytes::Bytes;
use dashmap::DashMap;
use futures::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc, Mutex};
use tokio::time::timeout;
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, warn};
use uuid::Uuid;

const INBOUND_CAPACITY: usize = 64;
const PEER_QUEUE_CAPACITY: usize = 64;
const DEPARTURE_CAPACITY: usize = 256;
const ACCEPT_ERROR_PAUSE: Duration = Duration::from_millis(50);

type PeerMap = DashMap<Bytes, mpsc::Sender<Frames>>;

// Inbound messages arrive as `[identity, frames...]`; replies are routed by the identity frame.
pub struct RouterSocket {
    local_addr: SocketAddr,
    inbound: Mutex<mpsc::Receiver<Frames>>,
    peers: Arc<PeerMap>,
    departures: broadcast::Sender<Bytes>,
    recv_timeout: Duration,
    cancel: CancellationToken,
    tasks: TaskTracker,
}

impl RouterSocket {
    pub async fn bind(addr: &str, recv_timeout: Duration) -> Result<Self, TransportError> {
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;

        let (inbound_tx, inbound_rx) = mpsc::channel(INBOUND_CAPACITY);
        let peers = Arc::new(PeerMap::new());
        let (departures, _) = broadcast::channel(DEPARTURE_CAPACITY);
        let cancel = CancellationToken::new();
        let tasks = TaskTracker::new();

        tasks.spawn(accept_loop(
            listener,
            inbound_tx,
            peers.clone(),
            departures.clone(),
            cancel.clone(),
            tasks.clone(),
        ));

        debug!("Router socket listening on {}", local_addr);

        Ok(Self {
            local_addr,
            inbound: Mutex::new(inbound_rx),
            peers,
            departures,
            recv_timeout,
            cancel,
            tasks,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }

    pub async fn recv(&self) -> Result<Frames, TransportError> {
        let mut inbound = self.inbound.lock().await;
        match timeout(self.recv_timeout, inbound.recv()).await {
            Err(_) => Err(TransportError::Timeout),
            Ok(None) => Err(TransportError::Closed),
            Ok(Some(frames)) => Ok(frames),
        }
    }

    pub fn try_recv(&self) -> Option<Frames> {
        self.inbound.try_lock().ok()?.try_recv().ok()
    }

    pub fn departures(&self) -> broadcast::Receiver<Bytes> {
        self.departures.subscribe()
    }

    pub fn send(&self, mut frames: Frames) -> Result<(), TransportError> {
        if self.cancel.is_cancelled() {
            return Err(TransportError::Closed);
        }
        if frames.is_empty() {
            return Err(TransportError::UnknownPeer);
        }

        let identity = frames.remove(0);
        let peer = self
            .peers
            .get(&identity)
            .map(|entry| entry.value().clone())
            .ok_or(TransportError::UnknownPeer)?;

        peer.try_send(frames).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => TransportError::PeerBusy,
            mpsc::error::TrySendError::Closed(_) => TransportError::UnknownPeer,
        })
    }

    pub async fn close(&self) {
        self.cancel.cancel();
        self.tasks.close();
        self.tasks.wait().await;
        self.peers.clear();
    }
}

impl Drop for RouterSocket {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn accept_loop(
    listener: TcpListener,
    inbound: mpsc::Sender<Frames>,
    peers: Arc<PeerMap>,
    departures: broadcast::Sender<Bytes>,
    cancel: CancellationToken,
    tasks: TaskTracker,
) {
    loop {
        let accepted = tokio::select! {
            _ = cancel.cancelled() => break,
            accepted = listener.accept() => accepted,
        };

        match accepted {
            Ok((stream, peer_addr)) => {
                let _ = stream.set_nodelay(true);

                let identity = Bytes::from(Uuid::new_v4().simple().to_string());
                let (tx, rx) = mpsc::channel(PEER_QUEUE_CAPACITY);
                peers.insert(identity.clone(), tx);

                debug!(%peer_addr, "peer connected");
                tasks.spawn(serve_peer(
                    stream,
                    identity,
                    rx,
                    inbound.clone(),
                    peers.clone(),
                    departures.clone(),
                    cancel.clone(),
                ));
            }
            Err(e) => {
                warn!("Failed to accept connection: {}", e);
                tokio::time::sleep(ACCEPT_ERROR_PAUSE).await;
            }
        }
    }
}

async fn serve_peer(
    stream: TcpStream,
    identity: Bytes,
    mut outbound: mpsc::Receiver<Frames>,
    inbound: mpsc::Sender<Frames>,
    peers: Arc<PeerMap>,
    departures: broadcast::Sender<Bytes>,
    cancel: CancellationToken,
) {
    let (mut sink, mut source) = Framed::new(stream, MultipartCodec::default()).split();

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                while let Ok(frames) = outbound.try_recv() {
                    if sink.feed(frames).await.is_err() {
                        break;
                    }
                }
                let _ = sink.flush().await;
                break;
            }
            message = outbound.recv() => match message {
                Some(frames) => {
                    if let Err(e) = sink.send(frames).await {
                        debug!("write to peer failed: {}", e);
                        break;
                    }
                }
                None => break,
            },
            message = source.next() => match message {
                Some(Ok(mut frames)) => {
                    frames.insert(0, identity.clone());
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        sent = inbound.send(frames) => if sent.is_err() { break },
                    }
                }
                Some(Err(e)) => {
                    warn!("dropping peer after protocol error: {}", e);
                    break;
                }
                None => break,
            },
        }
    }

    peers.remove(&identity);
    let _ = departures.send(identity);
    debug!("peer disconnected");
}
