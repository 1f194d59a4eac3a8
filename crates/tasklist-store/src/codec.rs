//! JSON codec between typed values and the backend's string records.
//!
//! Records are JSON text. Timestamps are integer milliseconds in the
//! domain types themselves, so nothing host-specific ever reaches storage.
//! Owned serde values cannot form cycles, so there is no cycle check here;
//! what can still go wrong is a value the serializer refuses, or one that
//! does not survive the trip back (non-finite floats become `null`).

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::error::{DeserializationError, SerializationError};

/// Encode `value` as a JSON record.
///
/// The produced text is decoded back into `T` before it is returned, so a
/// successful encode is always readable by [`decode`].
pub fn encode<T>(value: &T) -> Result<String, SerializationError>
where
    T: Serialize + DeserializeOwned,
{
    let raw = serde_json::to_string(value).map_err(|e| SerializationError::Encode(e.to_string()))?;
    serde_json::from_str::<T>(&raw).map_err(|e| SerializationError::Lossy(e.to_string()))?;
    Ok(raw)
}

/// Decode a JSON record into `T`.
pub fn decode<T: DeserializeOwned>(raw: &str) -> Result<T, DeserializationError> {
    serde_json::from_str(raw).map_err(|e| DeserializationError {
        message: e.to_string(),
    })
}

/// Decode a JSON record without committing to a type.
pub fn decode_value(raw: &str) -> Result<Value, DeserializationError> {
    decode(raw)
}

/// Convert an already-decoded (and validated) value into `T`.
pub fn from_value<T: DeserializeOwned>(value: Value) -> Result<T, DeserializationError> {
    serde_json::from_value(value).map_err(|e| DeserializationError {
        message: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Reading {
        value: f64,
        at: u64,
        ok: bool,
    }

    #[test]
    fn numbers_and_booleans_round_trip_exactly() {
        let reading = Reading {
            value: 0.1 + 0.2,
            at: 1_700_000_000_123,
            ok: true,
        };
        let raw = encode(&reading).unwrap();
        assert_eq!(decode::<Reading>(&raw).unwrap(), reading);
    }

    #[test]
    fn non_finite_floats_are_rejected() {
        let reading = Reading {
            value: f64::NAN,
            at: 0,
            ok: false,
        };
        assert!(matches!(encode(&reading), Err(SerializationError::Lossy(_))));
    }

    #[test]
    fn non_string_map_keys_are_rejected() {
        let mut map = std::collections::BTreeMap::new();
        map.insert(vec![1u8], 1u8);
        assert!(matches!(encode(&map), Err(SerializationError::Encode(_))));
    }

    #[test]
    fn malformed_text_fails_to_decode() {
        let err = decode_value("[{\"id\": \"1\",").unwrap_err();
        assert!(err.message.contains("EOF"));
    }
}
