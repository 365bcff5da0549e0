// src/protocol/serializer.rs
use super::envelope::{RequestEnvelope, ResponseEnvelope};
use bytes::Bytes;
use serde_json::Value;

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("failed to encode envelope: {0}")]
    Encode(String),

    #[error("failed to decode envelope: {message}")]
    Decode {
        id: Option<i64>,
        kind: Option<String>,
        message: String,
    },
}

impl CodecError {
    pub fn correlation_id(&self) -> Option<i64> {
        match self {
            CodecError::Decode { id, .. } => *id,
            CodecError::Encode(_) => None,
        }
    }

    pub fn kind(&self) -> Option<&str> {
        match self {
            CodecError::Decode { kind, .. } => kind.as_deref(),
            CodecError::Encode(_) => None,
        }
    }
}

pub trait Serializer: Send + Sync {
    fn encode_request(&self, request: &RequestEnvelope) -> Result<Bytes, CodecError>;
    fn decode_request(&self, data: &[u8]) -> Result<RequestEnvelope, CodecError>;
    fn encode_response(&self, response: &ResponseEnvelope) -> Result<Bytes, CodecError>;
    fn decode_response(&self, data: &[u8]) -> Result<ResponseEnvelope, CodecError>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct JsonSerializer;

impl JsonSerializer {
    pub fn new() -> Self {
        Self
    }

    fn decode_error(data: &[u8], err: serde_json::Error) -> CodecError {
        // Salvage the header so the error reply can still be correlated.
        let header = serde_json::from_slice::<Value>(data).ok();
        let id = header
            .as_ref()
            .and_then(|v| v.get("id"))
            .and_then(Value::as_i64);
        let kind = header
            .as_ref()
            .and_then(|v| v.get("type"))
            .and_then(Value::as_str)
            .map(str::to_owned);

        CodecError::Decode {
            id,
            kind,
            message: err.to_string(),
        }
    }
}

impl Serializer for JsonSerializer {
    fn encode_request(&self, request: &RequestEnvelope) -> Result<Bytes, CodecError> {
        serde_json::to_vec(request)
            .map(Bytes::from)
            .map_err(|e| CodecError::Encode(e.to_string()))
    }

    fn decode_request(&self, data: &[u8]) -> Result<RequestEnvelope, CodecError> {
        serde_json::from_slice(data).map_err(|e| Self::decode_error(data, e))
    }

    fn encode_response(&self, response: &ResponseEnvelope) -> Result<Bytes, CodecError> {
        serde_json::to_vec(response)
            .map(Bytes::from)
            .map_err(|e| CodecError::Encode(e.to_string()))
    }

    fn decode_response(&self, data: &[u8]) -> Result<ResponseEnvelope, CodecError> {
        serde_json::from_slice(data).map_err(|e| Self::decode_error(data, e))
    }
}
