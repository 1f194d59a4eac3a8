//! The storage primitive the persistence layer is built on.
//!
//! A [`KeyValueBackend`] is a synchronous, string-keyed, string-valued store
//! in the shape of a browser's `localStorage`. It does not interpret values,
//! and callers must assume any operation can fail.

use std::rc::Rc;

use thiserror::Error;

/// Sentinel key written and removed by [`KeyValueBackend::probe`].
pub const PROBE_KEY: &str = "__tasklist_storage_probe__";

/// Failure reported by a backend operation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BackendError {
    /// The write was rejected because the storage area is full.
    #[error("storage quota exceeded")]
    QuotaExceeded,
    /// The host refused access (e.g. a restricted browsing context).
    #[error("storage access denied: {0}")]
    AccessDenied(String),
    /// The storage area cannot be reached at all.
    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

/// A mutation made to the shared storage area by *another* execution
/// context.
///
/// `key` is `None` when the other context cleared the whole area.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageChange {
    /// The raw key that changed.
    pub key: Option<String>,
    /// Value before the change.
    pub old_value: Option<String>,
    /// Value after the change; `None` when removed.
    pub new_value: Option<String>,
}

/// Callback receiving cross-context change notifications.
pub type ChangeListener = Rc<dyn Fn(&StorageChange)>;

/// Handle identifying a listener registered with [`KeyValueBackend::watch`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(pub(crate) u64);

/// Core trait for the host storage primitive.
///
/// Implementations are used from a single thread. Writes are atomic per key;
/// nothing spans keys.
pub trait KeyValueBackend {
    /// Read the value stored under `key`.
    fn get(&self, key: &str) -> Result<Option<String>, BackendError>;

    /// Store `value` under `key`, replacing any previous value.
    fn set(&mut self, key: &str, value: &str) -> Result<(), BackendError>;

    /// Remove `key`. Removing a missing key is not an error.
    fn remove(&mut self, key: &str) -> Result<(), BackendError>;

    /// List every key in the storage area, including foreign ones.
    fn keys(&self) -> Result<Vec<String>, BackendError>;

    /// Check that the backend is usable by writing, reading back and
    /// deleting a sentinel key. Never fails; any error yields `false`.
    fn probe(&mut self) -> bool {
        let written = self.set(PROBE_KEY, PROBE_KEY).is_ok();
        let read_back = matches!(self.get(PROBE_KEY), Ok(Some(ref v)) if v == PROBE_KEY);
        let removed = self.remove(PROBE_KEY).is_ok();
        written && read_back && removed
    }

    /// Remove every key starting with `prefix`, leaving all others alone.
    /// Returns the number of keys removed.
    fn clear(&mut self, prefix: &str) -> Result<usize, BackendError> {
        let doomed: Vec<String> = self
            .keys()?
            .into_iter()
            .filter(|k| k.starts_with(prefix))
            .collect();
        for key in &doomed {
            self.remove(key)?;
        }
        Ok(doomed.len())
    }

    /// Every `(key, value)` pair whose key starts with `prefix`.
    fn entries(&self, prefix: &str) -> Result<Vec<(String, String)>, BackendError> {
        let mut out = Vec::new();
        for key in self.keys()? {
            if !key.starts_with(prefix) {
                continue;
            }
            if let Some(value) = self.get(&key)? {
                out.push((key, value));
            }
        }
        Ok(out)
    }

    /// Register for changes made by other execution contexts sharing this
    /// storage area. Changes made through `self` are never delivered.
    ///
    /// Returns `None` when the backend has no cross-context channel.
    fn watch(&mut self, listener: ChangeListener) -> Option<ListenerId> {
        let _ = listener;
        None
    }

    /// Remove a listener registered with [`watch`](Self::watch).
    fn unwatch(&mut self, id: ListenerId) {
        let _ = id;
    }
}
