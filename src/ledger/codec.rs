use serde::{Deserialize, Serialize};

/// Database codec trait for encoding/decoding types to/from bytes
pub trait DbCodec<T> {
    fn encode(obj: &T) -> Result<Vec<u8>, CodecError>;
    fn decode(data: &[u8]) -> Result<T, CodecError>;
}

/// Default codec: serde_json rows, human-readable when poking at the DB
#[derive(Debug, Clone)]
pub struct JsonDbCodec;

impl<T> DbCodec<T> for JsonDbCodec
where
    T: Serialize + for<'de> Deserialize<'de>,
{
    fn encode(obj: &T) -> Result<Vec<u8>, CodecError> {
        serde_json::to_vec(obj).map_err(|e| CodecError::SerializationError(e.to_string()))
    }

    fn decode(data: &[u8]) -> Result<T, CodecError> {
        serde_json::from_slice(data).map_err(|e| CodecError::DeserializationError(e.to_string()))
    }
}

/// Key codec for plain UTF-8 string keys (bytewise order == lexicographic order)
#[derive(Debug, Clone)]
pub struct StringKeyCodec;

impl DbCodec<String> for StringKeyCodec {
    fn encode(obj: &String) -> Result<Vec<u8>, CodecError> {
        Ok(obj.as_bytes().to_vec())
    }

    fn decode(data: &[u8]) -> Result<String, CodecError> {
        String::from_utf8(data.to_vec())
            .map_err(|e| CodecError::DeserializationError(e.to_string()))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("Failed to serialize data: {0}")]
    SerializationError(String),
    #[error("Failed to deserialize data: {0}")]
    DeserializationError(String),
    #[error("Malformed key: {0}")]
    MalformedKey(String),
}
