// src/proxy/reply.rs
use super::proxy::ProxyError;
use crate::protocol::{ResponseEnvelope, Serializer};
use crate::transport::{Frames, RouterSocket, TransportError};
use bytes::Bytes;
use tracing::{debug, error, warn};

pub(crate) fn send_to_client(
    socket: &RouterSocket,
    identity: &Bytes,
    payload: Bytes,
) -> Result<(), TransportError> {
    socket
        .send(vec![identity.clone(), payload])
        .map_err(|e| {
            warn!(
                "Failed to reply to client {}: {}",
                String::from_utf8_lossy(identity),
                e
            );
            e
        })
}

pub(crate) fn reply_error(
    socket: &RouterSocket,
    serializer: &dyn Serializer,
    identity: &Bytes,
    id: i64,
    kind: &str,
    error: &ProxyError,
) -> Result<(), TransportError> {
    let response = ResponseEnvelope::failure(id, kind, error.to_string());

    let encoded = match serializer.encode_response(&response) {
        Ok(encoded) => encoded,
        Err(e) => {
            error!("Failed to serialize error response: {}", e);
            fallback_frame(id, kind)
        }
    };

    send_to_client(socket, identity, encoded)
}

pub(crate) fn reject(
    socket: &RouterSocket,
    serializer: &dyn Serializer,
    frames: Frames,
    error: &ProxyError,
) {
    let Some(identity) = frames.first() else { return };

    let (id, kind) = frames
        .get(1)
        .and_then(|payload| serializer.decode_request(payload).ok())
        .map(|request| (request.id, request.kind))
        .unwrap_or_default();

    debug!(
        "Rejecting request from {} ({})",
        String::from_utf8_lossy(identity),
        error
    );
    let _ = reply_error(socket, serializer, identity, id, &kind, error);
}

// Generic failure envelope for when the configured serializer cannot encode one.
fn fallback_frame(id: i64, kind: &str) -> Bytes {
    let fallback = serde_json::json!({
        "id": id,
        "type": kind,
        "success": false,
        "error": "internal proxy error",
    });

    serde_json::to_vec(&fallback)
        .map(Bytes::from)
        .unwrap_or_else(|_| {
            Bytes::from_static(br#"{"id":0,"type":"","success":false,"error":"internal proxy error"}"#)
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{JsonSerializer, RequestEnvelope};
    use crate::transport::{DealerOptions, DealerSocket};
    use serde_json::{json, Value};
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;

    #[test]
    fn test_fallback_frame_is_a_failure_envelope() {
        let frame = fallback_frame(12, "allocate");
        let decoded: Value = serde_json::from_slice(&frame).unwrap();

        assert_eq!(decoded["id"], 12);
        assert_eq!(decoded["type"], "allocate");
        assert_eq!(decoded["success"], false);
        assert!(decoded.get("content").is_none());
    }

    #[tokio::test]
    async fn test_reject_answers_with_request_header() {
        let socket = RouterSocket::bind("127.0.0.1:0", Duration::from_secs(1))
            .await
            .unwrap();
        let cancel = CancellationToken::new();
        let client = DealerSocket::dial(
            &format!("tcp://{}", socket.local_addr()),
            DealerOptions::new(Duration::from_secs(1)),
            &cancel,
        )
        .await
        .unwrap();
        let serializer = JsonSerializer::new();

        let payload = serializer
            .encode_request(&RequestEnvelope::new(31, "allocate", json!(null)))
            .unwrap();
        client.send(vec![payload]).await.unwrap();
        let frames = socket.recv().await.unwrap();

        reject(&socket, &serializer, frames, &ProxyError::ShuttingDown);

        let reply = client.recv().await.unwrap();
        let response = serializer.decode_response(&reply[0]).unwrap();
        assert_eq!(response.id, 31);
        assert_eq!(response.kind, "allocate");
        assert_eq!(response.error.as_deref(), Some("proxy is shutting down"));

        client.close().await;
        socket.close().await;
    }

    #[tokio::test]
    async fn test_reply_to_unknown_peer_fails() {
        let socket = RouterSocket::bind("127.0.0.1:0", Duration::from_secs(1))
            .await
            .unwrap();

        let result = reply_error(
            &socket,
            &JsonSerializer::new(),
            &Bytes::from_static(b"gone"),
            1,
            "echo",
            &ProxyError::ShuttingDown,
        );
        assert!(matches!(result, Err(TransportError::UnknownPeer)));
        socket.close().await;
    }
}
