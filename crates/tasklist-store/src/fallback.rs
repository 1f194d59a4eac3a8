//! Memory-only operation while the durable backend is unreachable.
//!
//! The controller owns the availability flag every read and write path
//! consults before touching the real backend. While the backend is down,
//! writes land in an in-memory [`MemoryBackend`]; once a periodic probe
//! succeeds, that memory is written back once and normal operation resumes.

use std::collections::BTreeSet;

use tracing::warn;

use crate::backend::KeyValueBackend;
use crate::memory::MemoryBackend;
use crate::scheduler::CancelToken;

/// Default interval between availability probes while in fallback mode.
pub const DEFAULT_REPROBE_INTERVAL_MS: u64 = 30_000;

/// Whether the durable backend is in use, and since when.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FallbackState {
    pub backend_available: bool,
    /// Time of the last transition, in scheduler milliseconds.
    pub since: u64,
}

/// Outcome of [`FallbackController::try_restore`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Restore {
    /// The backend is usable again; `rewritten` records were written back.
    Restored { rewritten: usize },
    /// The probe or the write-back failed.
    StillUnavailable,
}

/// Tracks backend availability and holds the in-memory fallback store.
///
/// Constructed explicitly and injected into the store, so tests can run
/// isolated instances.
#[derive(Debug)]
pub struct FallbackController {
    state: FallbackState,
    memory: MemoryBackend,
    reprobe_interval_ms: u64,
    reprobe: Option<CancelToken>,
    /// Prefixes cleared while unavailable, replayed on the backend at restore.
    deferred_clears: BTreeSet<String>,
}

impl FallbackController {
    pub fn new(reprobe_interval_ms: u64) -> Self {
        Self {
            state: FallbackState {
                backend_available: true,
                since: 0,
            },
            memory: MemoryBackend::new(),
            reprobe_interval_ms,
            reprobe: None,
            deferred_clears: BTreeSet::new(),
        }
    }

    /// Cached availability; never probes.
    pub fn is_available(&self) -> bool {
        self.state.backend_available
    }

    pub fn state(&self) -> FallbackState {
        self.state
    }

    pub fn reprobe_interval_ms(&self) -> u64 {
        self.reprobe_interval_ms
    }

    /// Switch to memory-only mode. Returns `true` only on the transition,
    /// so callers notify once per outage.
    pub fn mark_unavailable(&mut self, now: u64) -> bool {
        if !self.state.backend_available {
            return false;
        }
        self.state = FallbackState {
            backend_available: false,
            since: now,
        };
        true
    }

    /// Whether a re-probe is currently scheduled.
    pub fn reprobe_scheduled(&self) -> bool {
        self.reprobe.as_ref().map_or(false, |t| !t.is_cancelled())
    }

    pub fn set_reprobe(&mut self, token: CancelToken) {
        if let Some(previous) = self.reprobe.replace(token) {
            previous.cancel();
        }
    }

    /// Forget the scheduled re-probe (it is running now).
    pub fn take_reprobe(&mut self) -> Option<CancelToken> {
        self.reprobe.take()
    }

    /// The in-memory store reads are served from while unavailable.
    pub fn memory(&self) -> &MemoryBackend {
        &self.memory
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.memory.get(key).ok().flatten()
    }

    /// Write to the in-memory store. Never fails the caller.
    pub fn store(&mut self, key: &str, value: &str) {
        if let Err(err) = self.memory.set(key, value) {
            warn!(key, error = %err, "in-memory fallback rejected a write");
        }
    }

    /// Drop in-memory entries under `prefix`. While unavailable, the clear
    /// is also remembered and applied to the backend on restore.
    pub fn clear(&mut self, prefix: &str) -> usize {
        if !self.state.backend_available {
            self.deferred_clears.insert(prefix.to_string());
        }
        self.memory.clear(prefix).unwrap_or(0)
    }

    /// Prefixes waiting to be cleared on the backend.
    pub fn deferred_clears(&self) -> impl Iterator<Item = &str> {
        self.deferred_clears.iter().map(String::as_str)
    }

    /// Probe `backend`; if it answers, write the in-memory contents back
    /// once and return to normal operation.
    ///
    /// On a failed write-back the in-memory contents are kept intact, so the
    /// next attempt rewrites everything.
    pub fn try_restore<B>(&mut self, backend: &mut B, now: u64) -> Restore
    where
        B: KeyValueBackend + ?Sized,
    {
        if self.state.backend_available {
            return Restore::Restored { rewritten: 0 };
        }
        if !backend.probe() {
            return Restore::StillUnavailable;
        }

        for prefix in &self.deferred_clears {
            if let Err(err) = backend.clear(prefix) {
                warn!(prefix = prefix.as_str(), error = %err, "deferred clear after re-probe failed");
                return Restore::StillUnavailable;
            }
        }

        let entries = match self.memory.entries("") {
            Ok(entries) => entries,
            Err(_) => return Restore::StillUnavailable,
        };
        for (key, value) in &entries {
            if let Err(err) = backend.set(key, value) {
                warn!(key = key.as_str(), error = %err, "write-back after re-probe failed");
                return Restore::StillUnavailable;
            }
        }

        self.memory = MemoryBackend::new();
        self.deferred_clears.clear();
        self.state = FallbackState {
            backend_available: true,
            since: now,
        };
        Restore::Restored {
            rewritten: entries.len(),
        }
    }
}

impl Default for FallbackController {
    fn default() -> Self {
        Self::new(DEFAULT_REPROBE_INTERVAL_MS)
    }
}
