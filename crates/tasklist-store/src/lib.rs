//! # tasklist-store
//!
//! Durable local persistence for a task-list application.
//!
//! Sits between the UI and a string key-value storage area (browser
//! `localStorage`, a SQLite file, or memory) and keeps the UI's state safe
//! across reloads, crashes, quota pressure and storage outages:
//!
//! - every record is validated on load and repaired rather than rejected,
//! - saves are debounced per key, with reads served from the pending value,
//! - usage is estimated and old completed tasks are pruned before the
//!   storage area fills up,
//! - an unreachable backend degrades to memory-only operation and is written
//!   back once it recovers,
//! - changes made by other tabs are republished to subscribers.
//!
//! ## Quick Start
//!
//! ```
//! use tasklist_store::{ManualScheduler, MemoryBackend, PersistentStore, StoreConfig, Task};
//!
//! let config = StoreConfig {
//!     namespace: "todo".into(),
//!     ..StoreConfig::default()
//! };
//! let clock = ManualScheduler::new();
//! let store = PersistentStore::builder(MemoryBackend::new(), clock.clone())
//!     .config(config)
//!     .on_notice(|notice| eprintln!("{notice}"))
//!     .build()
//!     .unwrap();
//!
//! let key = store.key("tasks");
//! let tasks = vec![Task::new("1", "buy milk", 0)];
//! let saved = store.save_collection(&key, tasks).unwrap();
//! clock.advance(300);
//!
//! let loaded = store.load(&key, Vec::<Task>::new(), &Task::shape());
//! assert_eq!(loaded.value, saved);
//! assert!(!loaded.repaired);
//! ```
//!
//! ## Backends
//!
//! | Backend | Feature flag | Use case |
//! |---------|-------------|----------|
//! | [`MemoryBackend`] | *(always available)* | Testing, fallback store |
//! | `SqliteBackend` | `sqlite` | Desktop and CLI |
//! | `LocalStorageBackend` | `web` | Browser `localStorage` |
//!
//! ## Schedulers
//!
//! | Scheduler | Feature flag |
//! |-----------|-------------|
//! | [`ManualScheduler`] | *(always available)* |
//! | `TokioScheduler` | `tokio` |
//! | `TimeoutScheduler` | `web` |

mod backend;
mod codec;
mod config;
mod debounce;
mod error;
mod fallback;
mod key;
mod memory;
mod notice;
mod prune;
mod quota;
mod scheduler;
mod shape;
#[cfg(feature = "sqlite")]
mod sqlite;
mod store;
mod sync;
mod task;
#[cfg(feature = "web")]
mod web;

pub use backend::{BackendError, ChangeListener, KeyValueBackend, ListenerId, StorageChange, PROBE_KEY};
pub use codec::{decode, decode_value, encode, from_value};
pub use config::{ConfigError, StoreConfig, DEFAULT_NAMESPACE};
pub use debounce::{DebouncedWriter, PendingWrite, WriteState};
pub use error::{DeserializationError, SerializationError, StoreError};
pub use fallback::{FallbackController, FallbackState, Restore, DEFAULT_REPROBE_INTERVAL_MS};
pub use key::{Namespace, StorageKey};
pub use memory::MemoryBackend;
pub use notice::Notice;
pub use prune::{prune, prune_count, Entity, Prunable, Pruned};
pub use quota::{
    is_approaching_limit, utf16_len, QuotaEstimate, QuotaMonitor, DEFAULT_BYTES_PER_CHAR,
    DEFAULT_QUOTA_CEILING_BYTES,
};
#[cfg(feature = "tokio")]
pub use scheduler::TokioScheduler;
pub use scheduler::{CancelToken, ManualScheduler, Scheduler, Task as ScheduledTask};
pub use shape::{validate, FieldSpec, RecordShape, Shape, ShapeViolation, Validated, ValueKind};
#[cfg(feature = "sqlite")]
pub use sqlite::{JournalMode, SqliteBackend, SqliteConfig};
pub use store::{Loaded, NoticeHandler, PersistentStore, StoreBuilder};
pub use sync::{CrossTabSync, KeyChange, Subscriber, Subscription};
pub use task::Task;
#[cfg(feature = "web")]
pub use web::{LocalStorageBackend, TimeoutScheduler};
