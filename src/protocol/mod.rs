// src/protocol/mod.rs
mod envelope;
mod serializer;

pub use envelope::{RequestEnvelope, ResponseEnvelope, HEALTH_CHECK};
pub use serializer::{CodecError, JsonSerializer, Serializer};
