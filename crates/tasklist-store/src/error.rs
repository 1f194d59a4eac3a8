use thiserror::Error;

use crate::config::ConfigError;

/// A value could not be turned into a storable record.
///
/// This is the only persistence failure surfaced to callers of
/// [`save`](crate::PersistentStore::save): silently dropping it would let
/// the caller's state diverge from storage.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SerializationError {
    /// The serializer rejected the value.
    #[error("value cannot be encoded: {0}")]
    Encode(String),
    /// The value encoded, but the text does not decode back into the same
    /// type (non-finite floats, for instance, have no JSON literal).
    #[error("encoded value does not decode back: {0}")]
    Lossy(String),
}

/// A stored record is not valid encoded data.
///
/// Recovered locally on load; never surfaced through the facade.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("stored record cannot be decoded: {message}")]
pub struct DeserializationError {
    /// Parser message, including line and column.
    pub message: String,
}

/// Errors returned by [`PersistentStore`](crate::PersistentStore).
#[derive(Debug, Error)]
pub enum StoreError {
    /// A value passed to `save` could not be encoded.
    #[error(transparent)]
    Serialization(#[from] SerializationError),
    /// The store configuration is invalid.
    #[error(transparent)]
    Config(#[from] ConfigError),
}
