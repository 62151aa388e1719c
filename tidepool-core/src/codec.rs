//! Pluggable payload serialization.
//!
//! The wire formats of the cluster protocol itself are fixed and hand-rolled;
//! this codec is for the payloads the protocol carries opaquely: application
//! messages and the gossiped metadata value.

use serde::de::DeserializeOwned;
use serde::Serialize;

/// Error type for codec operations.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// Failed to encode a message to bytes.
    #[error("encode error: {0}")]
    Encode(#[source] Box<dyn std::error::Error + Send + Sync>),
    /// Failed to decode bytes to a message.
    #[error("decode error: {0}")]
    Decode(#[source] Box<dyn std::error::Error + Send + Sync>),
}

/// Pluggable message serialization format.
///
/// Implementations must be cheap to clone; a codec instance is stored in
/// every component that serializes payloads.
pub trait MessageCodec: Clone + 'static {
    /// Encode a serializable message to bytes.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::Encode`] if serialization fails.
    fn encode<T: Serialize>(&self, msg: &T) -> Result<Vec<u8>, CodecError>;

    /// Decode bytes to a deserializable message.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::Decode`] if deserialization fails.
    fn decode<T: DeserializeOwned>(&self, buf: &[u8]) -> Result<T, CodecError>;
}

/// JSON codec using serde_json.
///
/// Human-readable and schema-free, which is exactly right for cluster
/// metadata that changes shape across releases.
#[derive(Clone, Copy, Debug, Default)]
pub struct JsonCodec;

impl MessageCodec for JsonCodec {
    fn encode<T: Serialize>(&self, msg: &T) -> Result<Vec<u8>, CodecError> {
        serde_json::to_vec(msg).map_err(|e| CodecError::Encode(Box::new(e)))
    }

    fn decode<T: DeserializeOwned>(&self, buf: &[u8]) -> Result<T, CodecError> {
        serde_json::from_slice(buf).map_err(|e| CodecError::Decode(Box::new(e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Sample {
        id: u32,
        name: String,
    }

    #[test]
    fn roundtrip() {
        let codec = JsonCodec;
        let msg = Sample {
            id: 7,
            name: "seven".into(),
        };
        let bytes = codec.encode(&msg).expect("encode");
        let decoded: Sample = codec.decode(&bytes).expect("decode");
        assert_eq!(msg, decoded);
    }

    #[test]
    fn decode_failure_is_an_error() {
        let codec = JsonCodec;
        let result: Result<Sample, _> = codec.decode(b"{ not json");
        assert!(matches!(result, Err(CodecError::Decode(_))));
    }

    #[test]
    fn primitives_roundtrip() {
        let codec = JsonCodec;
        let bytes = codec.encode(&873i32).expect("encode");
        let decoded: i32 = codec.decode(&bytes).expect("decode");
        assert_eq!(decoded, 873);
    }
}
