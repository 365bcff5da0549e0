// src/transport/dealer.rs
use super::{parse_endpoint, Frames, MultipartCodec, TransportError};
use crate::retry::Backoff;
use futures::{SinkExt, StreamExt};
use std::sync::Mutex as StdMutex;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

const QUEUE_CAPACITY: usize = 64;

#[derive(Debug, Clone)]
pub struct DealerOptions {
    pub timeout: Duration,
    pub dial_timeout: Duration,
    pub reconnect: bool,
    pub backoff: Backoff,
}

impl DealerOptions {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            dial_timeout: timeout,
            reconnect: false,
            backoff: Backoff::default(),
        }
    }

    pub fn with_reconnect(mut self, reconnect: bool) -> Self {
        self.reconnect = reconnect;
        self
    }

    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }
}

enum DriveExit {
    Cancelled,
    Lost(String),
}

pub struct DealerSocket {
    endpoint: String,
    outbound: mpsc::Sender<Frames>,
    inbound: Mutex<mpsc::Receiver<Frames>>,
    timeout: Duration,
    cancel: CancellationToken,
    driver: StdMutex<Option<JoinHandle<()>>>,
}

impl DealerSocket {
    pub async fn dial(
        address: &str,
        options: DealerOptions,
        parent: &CancellationToken,
    ) -> Result<Self, TransportError> {
        let endpoint = parse_endpoint(address)?;
        let stream = connect(&endpoint, options.dial_timeout).await?;

        let (outbound_tx, outbound_rx) = mpsc::channel(QUEUE_CAPACITY);
        let (inbound_tx, inbound_rx) = mpsc::channel(QUEUE_CAPACITY);
        let cancel = parent.child_token();

        let driver = tokio::spawn(run_connection(
            stream,
            endpoint.clone(),
            options.clone(),
            outbound_rx,
            inbound_tx,
            cancel.clone(),
        ));

        Ok(Self {
            endpoint,
            outbound: outbound_tx,
            inbound: Mutex::new(inbound_rx),
            timeout: options.timeout,
            cancel,
            driver: StdMutex::new(Some(driver)),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub async fn send(&self, frames: Frames) -> Result<(), TransportError> {
        if self.cancel.is_cancelled() {
            return Err(TransportError::Closed);
        }

        match timeout(self.timeout, self.outbound.send(frames)).await {
            Err(_) => Err(TransportError::Timeout),
            Ok(Err(_)) => Err(TransportError::Closed),
            Ok(Ok(())) => Ok(()),
        }
    }

    pub async fn recv(&self) -> Result<Frames, TransportError> {
        let mut inbound = self.inbound.lock().await;
        match timeout(self.timeout, inbound.recv()).await {
            Err(_) => Err(TransportError::Timeout),
            Ok(None) => Err(TransportError::Closed),
            Ok(Some(frames)) => Ok(frames),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled() || self.outbound.is_closed()
    }

    pub async fn close(&self) {
        self.cancel.cancel();
        let driver = self
            .driver
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(driver) = driver {
            let _ = driver.await;
        }
    }
}

impl Drop for DealerSocket {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn connect(endpoint: &str, dial_timeout: Duration) -> Result<TcpStream, TransportError> {
    let stream = match timeout(dial_timeout, TcpStream::connect(endpoint)).await {
        Err(_) => {
            return Err(TransportError::Dial {
                endpoint: endpoint.to_string(),
                reason: "connect timed out".to_string(),
            })
        }
        Ok(Err(e)) => {
            return Err(TransportError::Dial {
                endpoint: endpoint.to_string(),
                reason: e.to_string(),
            })
        }
        Ok(Ok(stream)) => stream,
    };

    let _ = stream.set_nodelay(true);
    Ok(stream)
}

async fn run_connection(
    stream: TcpStream,
    endpoint: String,
    options: DealerOptions,
    mut outbound: mpsc::Receiver<Frames>,
    inbound: mpsc::Sender<Frames>,
    cancel: CancellationToken,
) {
    let mut stream = Some(stream);

    while let Some(current) = stream.take() {
        match drive(current, &mut outbound, &inbound, &cancel).await {
            DriveExit::Cancelled => break,
            DriveExit::Lost(reason) => {
                if !options.reconnect {
                    debug!("connection to {} lost: {}", endpoint, reason);
                    break;
                }
                warn!("connection to {} lost: {}, reconnecting", endpoint, reason);
            }
        }

        stream = options
            .backoff
            .retry_until_cancelled(&cancel, || connect(&endpoint, options.dial_timeout))
            .await;

        if stream.is_some() {
            debug!("reconnected to {}", endpoint);
        }
    }
}

async fn drive(
    stream: TcpStream,
    outbound: &mut mpsc::Receiver<Frames>,
    inbound: &mpsc::Sender<Frames>,
    cancel: &CancellationToken,
) -> DriveExit {
    let (mut sink, mut source) = Framed::new(stream, MultipartCodec::default()).split();

    loop {
        tokio::select! {
            _ = cancel.cancelled() => return DriveExit::Cancelled,
            message = outbound.recv() => match message {
                Some(frames) => {
                    if let Err(e) = sink.send(frames).await {
                        return DriveExit::Lost(e.to_string());
                    }
                }
                None => return DriveExit::Cancelled,
            },
            message = source.next() => match message {
                Some(Ok(frames)) => match inbound.try_send(frames) {
                    Ok(()) => {}
                    Err(mpsc::error::TrySendError::Full(_)) => {
                        warn!("inbound queue full, dropping message");
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => return DriveExit::Cancelled,
                },
                Some(Err(e)) => return DriveExit::Lost(e.to_string()),
                None => return DriveExit::Lost("connection closed by peer".to_string()),
            },
        }
    }
}
