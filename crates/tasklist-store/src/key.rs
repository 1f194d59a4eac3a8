//! Namespaced storage keys.
//!
//! Every record the application writes lives under a key of the form
//! `"<namespace>-<logical-name>"`, so unrelated data sharing the same
//! backend is never touched.

use std::fmt;

/// The application namespace all keys are prefixed with.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Namespace(String);

impl Namespace {
    /// Create a namespace from its bare name (without the trailing `-`).
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// The bare namespace name.
    pub fn name(&self) -> &str {
        &self.0
    }

    /// The prefix shared by every key in this namespace, e.g. `"app-"`.
    pub fn prefix(&self) -> String {
        format!("{}-", self.0)
    }

    /// Build the storage key for a logical collection name.
    pub fn key(&self, logical: &str) -> StorageKey {
        StorageKey(format!("{}-{}", self.0, logical))
    }

    /// Whether a raw backend key belongs to this namespace.
    pub fn contains(&self, raw: &str) -> bool {
        raw.strip_prefix(self.0.as_str())
            .map_or(false, |rest| rest.starts_with('-'))
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A fully-qualified key identifying one logical collection.
///
/// Obtained from [`Namespace::key`]; the namespace prefix is part of the
/// key itself.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StorageKey(String);

impl StorageKey {
    pub(crate) fn from_raw(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    /// The raw key as written to the backend.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for StorageKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StorageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
