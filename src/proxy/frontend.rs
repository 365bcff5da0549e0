// src/proxy/frontend.rs
use super::proxy::ProxyError;
use super::reply::reject;
use crate::protocol::Serializer;
use crate::transport::{Frames, RouterSocket, TransportError};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

// Returning drops `queue`, which tells the workers no more work is coming.
pub(crate) async fn dispatch_loop(
    socket: Arc<RouterSocket>,
    serializer: Arc<dyn Serializer>,
    queue: mpsc::Sender<Frames>,
    cancel: CancellationToken,
) {
    info!("Starting main loop for server ...");

    loop {
        let received = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            received = socket.recv() => received,
        };

        let frames = match received {
            Ok(frames) => frames,
            Err(TransportError::Timeout) => continue,
            Err(TransportError::Closed) => {
                debug!("Frontend socket closed");
                break;
            }
            Err(e) => {
                error!("Failed to receive message from socket: {}", e);
                continue;
            }
        };

        let permit = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            permit = queue.reserve() => permit.ok(),
        };

        match permit {
            Some(permit) => permit.send(frames),
            None => {
                reject(&socket, serializer.as_ref(), frames, &ProxyError::ShuttingDown);
                break;
            }
        }
    }

    warn!("Stop signal received, exiting main loop");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{JsonSerializer, RequestEnvelope};
    use crate::transport::{DealerOptions, DealerSocket};
    use serde_json::json;
    use std::time::Duration;

    #[tokio::test]
    async fn test_held_message_is_rejected_on_cancel() {
        let socket = Arc::new(
            RouterSocket::bind("127.0.0.1:0", Duration::from_millis(100))
                .await
                .unwrap(),
        );
        let serializer = JsonSerializer::new();
        let cancel = CancellationToken::new();

        // Nobody consumes the queue: the first message fills it, the second is held.
        let (queue_tx, _queue_rx) = mpsc::channel(1);
        let frontend = tokio::spawn(dispatch_loop(
            socket.clone(),
            Arc::new(JsonSerializer::new()),
            queue_tx,
            cancel.clone(),
        ));

        let client_cancel = CancellationToken::new();
        let client = DealerSocket::dial(
            &format!("tcp://{}", socket.local_addr()),
            DealerOptions::new(Duration::from_secs(2)),
            &client_cancel,
        )
        .await
        .unwrap();

        for id in [1, 2] {
            let payload = serializer
                .encode_request(&RequestEnvelope::new(id, "echo", json!(id)))
                .unwrap();
            client.send(vec![payload]).await.unwrap();
        }
        tokio::time::sleep(Duration::from_millis(100)).await;

        cancel.cancel();
        frontend.await.unwrap();

        let reply = client.recv().await.unwrap();
        let response = serializer.decode_response(&reply[0]).unwrap();
        assert_eq!(response.id, 2);
        assert!(!response.success);
        assert_eq!(response.error.as_deref(), Some("proxy is shutting down"));

        client.close().await;
        socket.close().await;
    }
}
