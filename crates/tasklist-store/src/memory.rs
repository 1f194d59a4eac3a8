use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

use crate::backend::{BackendError, ChangeListener, KeyValueBackend, ListenerId, StorageChange};
use crate::quota::utf16_len;

/// In-memory storage backend.
///
/// All data lives in a `BTreeMap` shared by every handle opened on the same
/// storage area. [`Clone`] yields another handle in the *same* execution
/// context; [`open_context`](Self::open_context) yields a handle in a new
/// one, the way a second browser tab sees the same `localStorage`. Changes
/// are announced to watchers in every context except the writer's.
///
/// Also used as the fallback store while the real backend is unavailable,
/// and by tests to inject failures.
///
/// # Example
///
/// ```
/// use tasklist_store::{KeyValueBackend, MemoryBackend};
///
/// let mut tab_a = MemoryBackend::new();
/// let tab_b = tab_a.open_context();
///
/// tab_a.set("app-tasks", "[]").unwrap();
/// assert_eq!(tab_b.get("app-tasks").unwrap().as_deref(), Some("[]"));
/// ```
#[derive(Clone)]
pub struct MemoryBackend {
    area: Rc<RefCell<StorageArea>>,
    context: u64,
}

struct StorageArea {
    entries: BTreeMap<String, String>,
    /// Maximum stored size in UTF-16 code units (keys plus values).
    capacity: Option<usize>,
    /// Error returned by every operation while set.
    failure: Option<BackendError>,
    watchers: Vec<Watcher>,
    writes: Vec<(String, String)>,
    next_context: u64,
    next_listener: u64,
}

struct Watcher {
    id: ListenerId,
    context: u64,
    listener: ChangeListener,
}

impl MemoryBackend {
    /// Create a new empty storage area and a handle on it.
    pub fn new() -> Self {
        Self {
            area: Rc::new(RefCell::new(StorageArea {
                entries: BTreeMap::new(),
                capacity: None,
                failure: None,
                watchers: Vec::new(),
                writes: Vec::new(),
                next_context: 1,
                next_listener: 1,
            })),
            context: 0,
        }
    }

    /// Open a handle on the same storage area from a new execution context.
    pub fn open_context(&self) -> Self {
        let mut area = self.area.borrow_mut();
        let context = area.next_context;
        area.next_context += 1;
        Self {
            area: Rc::clone(&self.area),
            context,
        }
    }

    /// Make every operation fail with `failure` (or succeed again with
    /// `None`). Affects all contexts on this storage area.
    pub fn set_failure(&self, failure: Option<BackendError>) {
        self.area.borrow_mut().failure = failure;
    }

    /// Cap the stored size, in UTF-16 code units. Writes that would exceed
    /// it fail with [`BackendError::QuotaExceeded`].
    pub fn set_capacity(&self, capacity: Option<usize>) {
        self.area.borrow_mut().capacity = capacity;
    }

    /// Number of stored entries, including foreign keys.
    pub fn len(&self) -> usize {
        self.area.borrow().entries.len()
    }

    /// Whether the storage area is empty.
    pub fn is_empty(&self) -> bool {
        self.area.borrow().entries.is_empty()
    }

    /// Every successful `set` so far, in order, from all contexts.
    pub fn write_log(&self) -> Vec<(String, String)> {
        self.area.borrow().writes.clone()
    }

    /// The values written to `key` so far, in order.
    pub fn writes_to(&self, key: &str) -> Vec<String> {
        self.area
            .borrow()
            .writes
            .iter()
            .filter(|(k, _)| k == key)
            .map(|(_, v)| v.clone())
            .collect()
    }

    fn check(&self) -> Result<(), BackendError> {
        match &self.area.borrow().failure {
            Some(failure) => Err(failure.clone()),
            None => Ok(()),
        }
    }

    fn announce(&self, change: StorageChange) {
        // Listeners may read this area again; release the borrow first.
        let targets: Vec<ChangeListener> = self
            .area
            .borrow()
            .watchers
            .iter()
            .filter(|w| w.context != self.context)
            .map(|w| Rc::clone(&w.listener))
            .collect();
        for listener in targets {
            listener(&change);
        }
    }
}

impl fmt::Debug for MemoryBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryBackend")
            .field("context", &self.context)
            .field("entries", &self.len())
            .finish()
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl KeyValueBackend for MemoryBackend {
    fn get(&self, key: &str) -> Result<Option<String>, BackendError> {
        self.check()?;
        Ok(self.area.borrow().entries.get(key).cloned())
    }

    fn set(&mut self, key: &str, value: &str) -> Result<(), BackendError> {
        self.check()?;
        let old_value = {
            let mut area = self.area.borrow_mut();
            if let Some(capacity) = area.capacity {
                let used: usize = area
                    .entries
                    .iter()
                    .filter(|(k, _)| k.as_str() != key)
                    .map(|(k, v)| utf16_len(k) + utf16_len(v))
                    .sum();
                if used + utf16_len(key) + utf16_len(value) > capacity {
                    return Err(BackendError::QuotaExceeded);
                }
            }
            area.writes.push((key.to_string(), value.to_string()));
            area.entries.insert(key.to_string(), value.to_string())
        };
        if old_value.as_deref() != Some(value) {
            self.announce(StorageChange {
                key: Some(key.to_string()),
                old_value,
                new_value: Some(value.to_string()),
            });
        }
        Ok(())
    }

    fn remove(&mut self, key: &str) -> Result<(), BackendError> {
        self.check()?;
        let old_value = self.area.borrow_mut().entries.remove(key);
        if old_value.is_some() {
            self.announce(StorageChange {
                key: Some(key.to_string()),
                old_value,
                new_value: None,
            });
        }
        Ok(())
    }

    fn keys(&self) -> Result<Vec<String>, BackendError> {
        self.check()?;
        Ok(self.area.borrow().entries.keys().cloned().collect())
    }

    fn watch(&mut self, listener: ChangeListener) -> Option<ListenerId> {
        let mut area = self.area.borrow_mut();
        let id = ListenerId(area.next_listener);
        area.next_listener += 1;
        area.watchers.push(Watcher {
            id,
            context: self.context,
            listener,
        });
        Some(id)
    }

    fn unwatch(&mut self, id: ListenerId) {
        self.area.borrow_mut().watchers.retain(|w| w.id != id);
    }
}
