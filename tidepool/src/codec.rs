//! Pluggable wire serialization for RPC payloads.
//!
//! Every value that crosses a node boundary (the actor façade's `Tell` and
//! `ServiceInquiry`, heartbeats, close notices) is encoded to bytes with a
//! [`MessageCodec`] before it reaches the transport. [`JsonCodec`] is the
//! default: human-readable and good enough for the control-plane traffic
//! this crate produces.
//!
//! # Example
//!
//! ```rust
//! use tidepool::codec::{JsonCodec, MessageCodec};
//!
//! let codec = JsonCodec;
//! let bytes = codec.encode(&("echo", 42u32)).unwrap();
//! let (name, value): (String, u32) = codec.decode(&bytes).unwrap();
//! assert_eq!(name, "echo");
//! assert_eq!(value, 42);
//! ```

use serde::de::DeserializeOwned;
use serde::Serialize;

/// Error type for codec operations.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// Failed to encode a value to bytes.
    #[error("encode error: {0}")]
    Encode(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// Failed to decode bytes to a value.
    #[error("decode error: {0}")]
    Decode(#[source] Box<dyn std::error::Error + Send + Sync>),
}

/// Wire serialization format shared by every RPC in the crate.
///
/// Codecs are cloned into the proxy, the RPC façade and the membership
/// agent, all of which are shared across tasks, hence `Send + Sync`.
pub trait MessageCodec: Clone + Send + Sync + 'static {
    /// Encode a serializable value to bytes.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::Encode`] if serialization fails.
    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, CodecError>;

    /// Decode bytes into a value.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::Decode`] if the bytes are not a valid `T`.
    fn decode<T: DeserializeOwned>(&self, buf: &[u8]) -> Result<T, CodecError>;
}

/// JSON codec backed by `serde_json`.
#[derive(Clone, Default, Debug, Copy)]
pub struct JsonCodec;

impl MessageCodec for JsonCodec {
    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, CodecError> {
        serde_json::to_vec(value).map_err(|e| CodecError::Encode(Box::new(e)))
    }

    fn decode<T: DeserializeOwned>(&self, buf: &[u8]) -> Result<T, CodecError> {
        serde_json::from_slice(buf).map_err(|e| CodecError::Decode(Box::new(e)))
    }
}
