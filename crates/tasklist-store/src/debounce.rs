//! Per-key write coalescing.
//!
//! Each key moves `Idle → Pending → Flushing → Idle`. Scheduling a write
//! for a key that is already pending replaces its value and restarts its
//! window, so only the last value of a burst is ever written. Pending
//! values double as the read-your-own-write mirror.

use std::collections::{BTreeMap, BTreeSet};

use crate::key::StorageKey;
use crate::scheduler::CancelToken;

/// Lifecycle state of one key in the writer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteState {
    Idle,
    /// A value is waiting for its timer.
    Pending,
    /// The value is being handed to the backend.
    Flushing,
}

/// A scheduled write. Superseded, never queued, by a later write to the
/// same key.
#[derive(Debug)]
pub struct PendingWrite {
    pub key: StorageKey,
    /// Encoded record.
    pub value: String,
    /// When the current debounce window started.
    pub scheduled_at: u64,
    timer: CancelToken,
}

/// Holds pending writes and their timers.
///
/// The writer owns the timers but not the clock: the caller registers a
/// callback with its [`Scheduler`](crate::Scheduler) and passes the token in.
#[derive(Debug, Default)]
pub struct DebouncedWriter {
    pending: BTreeMap<StorageKey, PendingWrite>,
    flushing: BTreeSet<StorageKey>,
}

impl DebouncedWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `value` as the pending write for `key`, guarded by `timer`.
    ///
    /// A value already pending for `key` is dropped and its timer cancelled;
    /// it will never reach the backend.
    pub fn schedule(&mut self, key: StorageKey, value: String, scheduled_at: u64, timer: CancelToken) {
        let write = PendingWrite {
            key: key.clone(),
            value,
            scheduled_at,
            timer,
        };
        if let Some(superseded) = self.pending.insert(key, write) {
            superseded.timer.cancel();
        }
    }

    /// The value waiting to be written for `key`, if any.
    pub fn pending_value(&self, key: &StorageKey) -> Option<&str> {
        self.pending.get(key).map(|w| w.value.as_str())
    }

    pub fn state(&self, key: &StorageKey) -> WriteState {
        if self.flushing.contains(key) {
            WriteState::Flushing
        } else if self.pending.contains_key(key) {
            WriteState::Pending
        } else {
            WriteState::Idle
        }
    }

    /// Take the pending write for `key` and mark it as flushing. Cancels its
    /// timer, so a forced flush and an expiring timer cannot both write.
    pub fn begin_flush(&mut self, key: &StorageKey) -> Option<PendingWrite> {
        let write = self.pending.remove(key)?;
        write.timer.cancel();
        self.flushing.insert(key.clone());
        Some(write)
    }

    /// Return `key` to idle after its write was handed off.
    pub fn finish_flush(&mut self, key: &StorageKey) {
        self.flushing.remove(key);
    }

    /// Keys with a pending write, in key order.
    pub fn pending_keys(&self) -> Vec<StorageKey> {
        self.pending.keys().cloned().collect()
    }

    pub fn pending(&self) -> impl Iterator<Item = &PendingWrite> {
        self.pending.values()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Drop every pending write whose key satisfies `doomed`, cancelling
    /// the timers. Returns how many were dropped.
    pub fn discard_where<F>(&mut self, mut doomed: F) -> usize
    where
        F: FnMut(&StorageKey) -> bool,
    {
        let before = self.pending.len();
        self.pending.retain(|key, write| {
            if doomed(key) {
                write.timer.cancel();
                false
            } else {
                true
            }
        });
        before - self.pending.len()
    }

    /// Cancel every timer without writing anything.
    pub fn abandon(&mut self) {
        for write in self.pending.values() {
            write.timer.cancel();
        }
        self.pending.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::Namespace;

    #[test]
    fn later_schedule_supersedes_and_cancels() {
        let key = Namespace::new("app").key("tasks");
        let mut writer = DebouncedWriter::new();

        let first = CancelToken::new();
        writer.schedule(key.clone(), "v1".into(), 0, first.clone());
        let second = CancelToken::new();
        writer.schedule(key.clone(), "v2".into(), 100, second.clone());

        assert!(first.is_cancelled());
        assert!(!second.is_cancelled());
        assert_eq!(writer.pending_value(&key), Some("v2"));
        assert_eq!(writer.len(), 1);
    }

    #[test]
    fn state_machine_transitions() {
        let key = Namespace::new("app").key("tasks");
        let mut writer = DebouncedWriter::new();
        assert_eq!(writer.state(&key), WriteState::Idle);

        let timer = CancelToken::new();
        writer.schedule(key.clone(), "v".into(), 0, timer.clone());
        assert_eq!(writer.state(&key), WriteState::Pending);

        let write = writer.begin_flush(&key).unwrap();
        assert_eq!(write.value, "v");
        assert!(timer.is_cancelled());
        assert_eq!(writer.state(&key), WriteState::Flushing);
        assert!(writer.pending_value(&key).is_none());

        writer.finish_flush(&key);
        assert_eq!(writer.state(&key), WriteState::Idle);
        assert!(writer.begin_flush(&key).is_none());
    }

    #[test]
    fn discard_where_only_drops_matching_keys() {
        let app = Namespace::new("app");
        let other = Namespace::new("other");
        let mut writer = DebouncedWriter::new();
        let dropped = CancelToken::new();

        writer.schedule(app.key("tasks"), "a".into(), 0, dropped.clone());
        writer.schedule(other.key("tasks"), "b".into(), 0, CancelToken::new());

        assert_eq!(writer.discard_where(|k| app.contains(k.as_str())), 1);
        assert!(dropped.is_cancelled());
        assert_eq!(writer.pending_keys(), vec![other.key("tasks")]);
    }
}
