// src/transport/mod.rs
//
// Message transport between clients, the proxy and backends. Every message is a
// list of frames; a router prefixes inbound messages with the sender identity and
// uses the first frame of outbound messages to pick the peer.
mod codec;
mod dealer;
mod router;

pub use codec::MultipartCodec;
pub use dealer::{DealerOptions, DealerSocket};
pub use router::RouterSocket;

use bytes::Bytes;
use url::Url;

pub type Frames = Vec<Bytes>;

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("operation timed out")]
    Timeout,

    #[error("socket is closed")]
    Closed,

    #[error("invalid endpoint {0:?}")]
    InvalidEndpoint(String),

    #[error("failed to dial {endpoint}: {reason}")]
    Dial { endpoint: String, reason: String },

    #[error("unknown peer")]
    UnknownPeer,

    #[error("peer is not keeping up, message dropped")]
    PeerBusy,
}

pub fn parse_endpoint(address: &str) -> Result<String, TransportError> {
    let url = Url::parse(address).map_err(|_| TransportError::InvalidEndpoint(address.to_string()))?;

    if url.scheme() != "tcp" {
        return Err(TransportError::InvalidEndpoint(address.to_string()));
    }

    let host = url
        .host_str()
        .ok_or_else(|| TransportError::InvalidEndpoint(address.to_string()))?;
    let port = url
        .port()
        .ok_or_else(|| TransportError::InvalidEndpoint(address.to_string()))?;

    Ok(format!("{}:{}", host, port))
}
