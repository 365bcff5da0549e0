// tests/common/mod.rs
#![allow(dead_code)]

use bytes::Bytes;
use heartbeat_proxy::config::ProxyConfig;
use heartbeat_proxy::protocol::{JsonSerializer, RequestEnvelope, ResponseEnvelope, Serializer};
use heartbeat_proxy::proxy::Proxy;
use heartbeat_proxy::transport::{DealerOptions, DealerSocket, Frames, RouterSocket};
use serde_json::json;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy)]
pub enum Mode {
    /// Reply with the request content unchanged.
    Echo,
    /// Reply with `{"backend": name, "echo": content}`.
    Tagged,
    /// Answer heartbeats only.
    Mute,
}

/// In-process backend answering heartbeats and requests.
pub struct TestBackend {
    pub name: String,
    pub address: String,
    heartbeats: Arc<AtomicBool>,
    socket: Arc<RouterSocket>,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl TestBackend {
    pub async fn spawn(name: &str, mode: Mode) -> Self {
        let socket = Arc::new(
            RouterSocket::bind("127.0.0.1:0", Duration::from_millis(100))
                .await
                .unwrap(),
        );
        let address = format!("tcp://{}", socket.local_addr());
        let heartbeats = Arc::new(AtomicBool::new(true));
        let cancel = CancellationToken::new();

        let task = tokio::spawn(serve(
            name.to_string(),
            mode,
            socket.clone(),
            heartbeats.clone(),
            cancel.clone(),
        ));

        Self {
            name: name.to_string(),
            address,
            heartbeats,
            socket,
            cancel,
            task,
        }
    }

    /// Stop answering heartbeats; requests are still served.
    pub fn silence(&self) {
        self.heartbeats.store(false, Ordering::SeqCst);
    }

    pub fn resume(&self) {
        self.heartbeats.store(true, Ordering::SeqCst);
    }

    /// Open connections, the proxy's health monitor included.
    pub fn peer_count(&self) -> usize {
        self.socket.peer_count()
    }

    pub async fn shutdown(self) {
        self.cancel.cancel();
        let _ = self.task.await;
        self.socket.close().await;
    }
}

async fn serve(
    name: String,
    mode: Mode,
    socket: Arc<RouterSocket>,
    heartbeats: Arc<AtomicBool>,
    cancel: CancellationToken,
) {
    let serializer = JsonSerializer::new();

    loop {
        let frames = tokio::select! {
            _ = cancel.cancelled() => break,
            frames = socket.recv() => frames,
        };
        let Ok(frames) = frames else { continue };
        if frames.len() < 2 {
            continue;
        }

        let Ok(request) = serializer.decode_request(&frames[1]) else { continue };

        let reply = if request.is_health_check() {
            if !heartbeats.load(Ordering::SeqCst) {
                continue;
            }
            ResponseEnvelope::success(request.id, request.kind, serde_json::Value::Null)
        } else {
            match mode {
                Mode::Echo => ResponseEnvelope::success(request.id, request.kind, request.content),
                Mode::Tagged => ResponseEnvelope::success(
                    request.id,
                    request.kind,
                    json!({"backend": name, "echo": request.content}),
                ),
                Mode::Mute => continue,
            }
        };

        let encoded = serializer.encode_response(&reply).unwrap();
        let _ = socket.send(vec![frames[0].clone(), encoded]);
    }
}

/// Client of the proxy frontend.
pub struct TestClient {
    dealer: DealerSocket,
    serializer: JsonSerializer,
    _cancel: CancellationToken,
}

impl TestClient {
    pub async fn connect(addr: SocketAddr) -> Self {
        let cancel = CancellationToken::new();
        let dealer = DealerSocket::dial(
            &format!("tcp://{}", addr),
            DealerOptions::new(Duration::from_secs(3)),
            &cancel,
        )
        .await
        .unwrap();

        Self {
            dealer,
            serializer: JsonSerializer::new(),
            _cancel: cancel,
        }
    }

    pub async fn send_raw(&self, frames: Frames) -> Bytes {
        self.dealer.send(frames).await.unwrap();
        let reply = self.dealer.recv().await.unwrap();
        assert_eq!(reply.len(), 1, "reply must be a single payload frame");
        reply.into_iter().next().unwrap()
    }

    pub async fn request(&self, request: &RequestEnvelope) -> ResponseEnvelope {
        let payload = self.serializer.encode_request(request).unwrap();
        let reply = self.send_raw(vec![payload]).await;
        self.serializer.decode_response(&reply).unwrap()
    }
}

pub fn fast_config(workers: usize) -> ProxyConfig {
    ProxyConfig {
        bind_host: "127.0.0.1".to_string(),
        port: 0,
        workers,
        heartbeat: Duration::from_millis(25),
        deathtime: Duration::from_millis(150),
        io_timeout: Duration::from_millis(500),
        queue_capacity: 1,
    }
}

pub async fn wait_for_alive(proxy: &Proxy, address: &str, alive: bool) {
    let backend = proxy.pool().get_backend(address).unwrap();
    for _ in 0..300 {
        if backend.is_alive().await == alive {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("backend {} never became alive={}", address, alive);
}

/// An address nothing listens on.
pub fn unused_address() -> String {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let address = format!("tcp://{}", listener.local_addr().unwrap());
    drop(listener);
    address
}
