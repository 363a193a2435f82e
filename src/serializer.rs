//! Payload serialization for the typed facade helpers
//!
//! The core stores opaque bytes; these helpers are the only place a value's
//! shape matters.

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::Result;

/// Encodes typed values to the opaque payloads the tiers store
pub trait Serializer: Send + Sync {
    fn encode<T: Serialize>(&self, value: &T) -> Result<Bytes>;
    fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T>;
}

/// JSON serializer backed by serde_json
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonSerializer;

impl Serializer for JsonSerializer {
    fn encode<T: Serialize>(&self, value: &T) -> Result<Bytes> {
        Ok(Bytes::from(serde_json::to_vec(value)?))
    }

    fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Profile {
        id: u64,
        name: String,
    }

    #[test]
    fn test_json_round_trip() {
        let serializer = JsonSerializer;
        let profile = Profile {
            id: 42,
            name: "ada".into(),
        };

        let bytes = serializer.encode(&profile).unwrap();
        let decoded: Profile = serializer.decode(&bytes).unwrap();
        assert_eq!(decoded, profile);
    }

    #[test]
    fn test_decode_garbage_is_serialization_error() {
        let serializer = JsonSerializer;
        let err = serializer.decode::<Profile>(b"not json").unwrap_err();
        assert!(matches!(err, Error::Serialization(_)));
    }
}
