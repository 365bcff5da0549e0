// src/protocol/envelope.rs
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const HEALTH_CHECK: &str = "health-check";

const HEARTBEAT_ID_RANGE: i64 = 1_000_000;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestEnvelope {
    pub id: i64,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub content: Value,
}

impl RequestEnvelope {
    pub fn new(id: i64, kind: impl Into<String>, content: Value) -> Self {
        Self {
            id,
            kind: kind.into(),
            content,
        }
    }

    pub fn health_check() -> Self {
        let id = rand::thread_rng().gen_range(0..HEARTBEAT_ID_RANGE);
        Self::new(id, HEALTH_CHECK, Value::Null)
    }

    pub fn is_health_check(&self) -> bool {
        self.kind == HEALTH_CHECK
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseEnvelope {
    pub id: i64,
    #[serde(rename = "type")]
    pub kind: String,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<Value>,
}

impl ResponseEnvelope {
    pub fn success(id: i64, kind: impl Into<String>, content: Value) -> Self {
        Self {
            id,
            kind: kind.into(),
            success: true,
            error: None,
            content: Some(content),
        }
    }

    pub fn failure(id: i64, kind: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            id,
            kind: kind.into(),
            success: false,
            error: Some(error.into()),
            content: None,
        }
    }

    pub fn is_health_check(&self) -> bool {
        self.kind == HEALTH_CHECK
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_health_check_request() {
        let heartbeat = RequestEnvelope::health_check();
        assert!(heartbeat.is_health_check());
        assert!((0..HEARTBEAT_ID_RANGE).contains(&heartbeat.id));
        assert_eq!(heartbeat.content, Value::Null);
    }

    #[test]
    fn test_failure_omits_content() {
        let response = ResponseEnvelope::failure(3, "allocate", "no available backends");
        let encoded = serde_json::to_value(&response).unwrap();

        assert_eq!(
            encoded,
            json!({"id": 3, "type": "allocate", "success": false, "error": "no available backends"})
        );
    }

    #[test]
    fn test_success_omits_error() {
        let response = ResponseEnvelope::success(7, "echo", json!("x"));
        let encoded = serde_json::to_value(&response).unwrap();

        assert_eq!(
            encoded,
            json!({"id": 7, "type": "echo", "success": true, "content": "x"})
        );
    }

    #[test]
    fn test_request_without_content_decodes_as_null() {
        let request: RequestEnvelope = serde_json::from_str(r#"{"id":1,"type":"ping"}"#).unwrap();
        assert_eq!(request.content, Value::Null);
        assert!(!request.is_health_check());
    }
}
