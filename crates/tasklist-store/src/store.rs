//! The persistence facade consumed by the UI layer.
//!
//! `PersistentStore` wraps a [`KeyValueBackend`] with typed, validated
//! load/save. Saves are debounced and served back from memory until they
//! are flushed. Backend failures switch the store to an in-memory fallback
//! rather than failing the caller.
//!
//! # Example
//!
//! ```
//! use tasklist_store::{KeyValueBackend, ManualScheduler, MemoryBackend, PersistentStore, Task};
//!
//! let backend = MemoryBackend::new();
//! let clock = ManualScheduler::new();
//! let store = PersistentStore::builder(backend.clone(), clock.clone()).build().unwrap();
//!
//! let key = store.key("tasks");
//! store.save(&key, &vec![Task::new("1", "write docs", 0)]).unwrap();
//!
//! // Served from memory before the debounce window closes.
//! let loaded = store.load(&key, Vec::<Task>::new(), &Task::shape());
//! assert_eq!(loaded.value.len(), 1);
//! assert!(backend.get(key.as_str()).unwrap().is_none());
//!
//! clock.advance(300);
//! assert!(backend.get(key.as_str()).unwrap().is_some());
//! ```

use std::cell::{Ref, RefCell};
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::backend::{BackendError, KeyValueBackend, ListenerId};
use crate::codec;
use crate::config::StoreConfig;
use crate::debounce::{DebouncedWriter, WriteState};
use crate::error::{DeserializationError, StoreError};
use crate::fallback::{FallbackController, FallbackState, Restore};
use crate::key::{Namespace, StorageKey};
use crate::notice::Notice;
use crate::prune::{prune, Prunable};
use crate::quota::{is_approaching_limit, QuotaEstimate, QuotaMonitor};
use crate::scheduler::{CancelToken, Scheduler};
use crate::shape::{validate, Shape};
use crate::sync::{CrossTabSync, KeyChange, Subscriber, Subscription};

/// Result of [`PersistentStore::load`].
#[derive(Debug, Clone, PartialEq)]
pub struct Loaded<T> {
    pub value: T,
    /// Stored data was invalid and has been replaced by a cleaned value (or
    /// the default).
    pub repaired: bool,
    /// Collection entries discarded during repair.
    pub dropped: usize,
}

impl<T> Loaded<T> {
    fn clean(value: T) -> Self {
        Self {
            value,
            repaired: false,
            dropped: 0,
        }
    }
}

/// Receives [`Notice`]s.
pub type NoticeHandler = Rc<dyn Fn(&Notice)>;

/// Builder for constructing a [`PersistentStore`].
pub struct StoreBuilder<B> {
    backend: B,
    scheduler: Rc<dyn Scheduler>,
    config: StoreConfig,
    fallback: Option<FallbackController>,
    notice: Option<NoticeHandler>,
}

impl<B: KeyValueBackend + 'static> StoreBuilder<B> {
    pub fn config(mut self, config: StoreConfig) -> Self {
        self.config = config;
        self
    }

    /// Use an explicitly constructed fallback controller instead of one
    /// derived from the config.
    pub fn fallback(mut self, fallback: FallbackController) -> Self {
        self.fallback = Some(fallback);
        self
    }

    /// Route notices to `handler` (the UI's notification channel).
    pub fn on_notice<F: Fn(&Notice) + 'static>(mut self, handler: F) -> Self {
        self.notice = Some(Rc::new(handler));
        self
    }

    /// Validate the config, probe the backend once and build the store.
    pub fn build(self) -> Result<PersistentStore<B>, StoreError> {
        self.config.validate()?;

        let namespace = self.config.namespace();
        let fallback = self
            .fallback
            .unwrap_or_else(|| FallbackController::new(self.config.reprobe_interval_ms));
        let sync = CrossTabSync::new(namespace.clone());
        let mut backend = self.backend;
        let watch = backend.watch(sync.listener());

        let shared = Rc::new(Shared {
            core: RefCell::new(Core {
                backend,
                writer: DebouncedWriter::new(),
                fallback,
                outbox: Vec::new(),
                watch,
            }),
            scheduler: self.scheduler,
            notice: self.notice,
            monitor: QuotaMonitor::from_config(&self.config),
            config: self.config,
            namespace,
        });
        shared.initial_probe();
        shared.dispatch();

        Ok(PersistentStore { shared, sync })
    }
}

/// Typed, validated, debounced persistence over a [`KeyValueBackend`].
///
/// Single-threaded: timer callbacks run on the same thread through the
/// [`Scheduler`]. Dropping the store does not flush pending writes; call
/// [`flush_all`](Self::flush_all) first if they matter.
pub struct PersistentStore<B: KeyValueBackend> {
    shared: Rc<Shared<B>>,
    sync: CrossTabSync,
}

impl<B: KeyValueBackend + 'static> PersistentStore<B> {
    /// Start building a store over `backend`, driven by `scheduler`.
    pub fn builder<S: Scheduler + 'static>(backend: B, scheduler: S) -> StoreBuilder<B> {
        StoreBuilder {
            backend,
            scheduler: Rc::new(scheduler),
            config: StoreConfig::default(),
            fallback: None,
            notice: None,
        }
    }

    pub fn namespace(&self) -> &Namespace {
        &self.shared.namespace
    }

    /// The storage key for a logical collection in this store's namespace.
    pub fn key(&self, logical: &str) -> StorageKey {
        self.shared.namespace.key(logical)
    }

    pub fn config(&self) -> &StoreConfig {
        &self.shared.config
    }

    /// Load the value under `key`.
    ///
    /// Never fails. A missing record yields `default`. Undecodable or
    /// wrongly shaped data yields `default` too, with `repaired` set. A
    /// collection with some invalid entries yields the valid ones. Whenever
    /// `repaired` is set, the returned value has already been written back.
    pub fn load<T>(&self, key: &StorageKey, default: T, shape: &Shape) -> Loaded<T>
    where
        T: Serialize + DeserializeOwned,
    {
        let loaded = self.shared.load(key, default, shape);
        self.shared.dispatch();
        loaded
    }

    /// Schedule `value` to be written under `key` after the debounce window.
    ///
    /// Subsequent loads see `value` immediately. Only an encoding failure is
    /// reported; backend trouble is handled by the fallback.
    pub fn save<T>(&self, key: &StorageKey, value: &T) -> Result<(), StoreError>
    where
        T: Serialize + DeserializeOwned,
    {
        let raw = codec::encode(value)?;
        self.shared.schedule_write(key, raw);
        self.shared.dispatch();
        Ok(())
    }

    /// Save a collection, pruning it first if the namespace would reach the
    /// quota warning threshold.
    ///
    /// Returns the collection actually saved, which the caller should adopt.
    /// Protected entries are never pruned; if that leaves usage at the
    /// critical threshold a [`Notice::CapacityPressure`] is sent instead.
    pub fn save_collection<E>(&self, key: &StorageKey, items: Vec<E>) -> Result<Vec<E>, StoreError>
    where
        E: Prunable + Serialize + DeserializeOwned,
    {
        let config = &self.shared.config;
        let raw = codec::encode(&items)?;
        let projected = self.shared.estimate(Some((key, &raw)));
        if !is_approaching_limit(&projected, config.quota_warn_percent) {
            self.shared.schedule_write(key, raw);
            self.shared.dispatch();
            return Ok(items);
        }

        warn!(key = %key, percent = projected.percent_used, "storage nearing its limit; pruning");
        self.shared.notify(Notice::QuotaWarning {
            estimate: projected,
        });

        let pruned = prune(items, config.prune_fraction);
        let raw = codec::encode(&pruned.kept)?;
        let after = self.shared.estimate(Some((key, &raw)));
        if pruned.exhausted() || is_approaching_limit(&after, config.quota_critical_percent) {
            warn!(
                key = %key,
                percent = after.percent_used,
                pruned = pruned.removed,
                "pruning cannot free enough space without touching protected entries"
            );
            self.shared.notify(Notice::CapacityPressure {
                estimate: after,
                pruned: pruned.removed,
            });
        } else {
            debug!(key = %key, pruned = pruned.removed, percent = after.percent_used, "pruned collection");
        }

        self.shared.schedule_write(key, raw);
        self.shared.dispatch();
        Ok(pruned.kept)
    }

    /// Call `callback` whenever another execution context changes `key`.
    /// Changes made through this store are not delivered.
    pub fn subscribe<F>(&self, key: &StorageKey, callback: F) -> Subscription
    where
        F: Fn(&KeyChange) + 'static,
    {
        let subscriber: Subscriber = Rc::new(callback);
        self.sync.subscribe(key.clone(), subscriber)
    }

    /// Current usage of the namespace, including writes not yet flushed.
    pub fn quota_status(&self) -> QuotaEstimate {
        let estimate = self.shared.estimate(None);
        self.shared.dispatch();
        estimate
    }

    /// Remove every record in this store's namespace, including pending
    /// writes and fallback data. Keys outside the namespace are untouched.
    /// During an outage the backend is cleared once it is reachable again.
    ///
    /// Returns the number of stored records removed.
    pub fn clear_namespace(&self) -> usize {
        let shared = &self.shared;
        let removed = {
            let mut guard = shared.core.borrow_mut();
            let core = &mut *guard;
            let prefix = shared.namespace.prefix();

            let discarded = core
                .writer
                .discard_where(|k| shared.namespace.contains(k.as_str()));
            let in_memory = core.fallback.clear(&prefix);
            let on_backend = if core.fallback.is_available() {
                match core.backend.clear(&prefix) {
                    Ok(n) => n,
                    Err(err) => {
                        shared.enter_fallback(core, err);
                        // Now unavailable, so the clear is replayed on restore.
                        core.fallback.clear(&prefix);
                        0
                    }
                }
            } else {
                0
            };
            info!(namespace = %shared.namespace, discarded, in_memory, on_backend, "namespace cleared");
            in_memory + on_backend
        };
        shared.dispatch();
        removed
    }

    /// Write the pending value for `key` now, cancelling its timer.
    pub fn flush(&self, key: &StorageKey) {
        self.shared.flush(key);
    }

    /// Write every pending value now.
    pub fn flush_all(&self) {
        self.shared.flush_all();
    }

    /// Cached backend availability.
    pub fn is_backend_available(&self) -> bool {
        self.shared.core.borrow().fallback.is_available()
    }

    pub fn fallback_state(&self) -> FallbackState {
        self.shared.core.borrow().fallback.state()
    }

    pub fn write_state(&self, key: &StorageKey) -> WriteState {
        self.shared.core.borrow().writer.state(key)
    }

    /// Number of writes waiting for their debounce window.
    pub fn pending_writes(&self) -> usize {
        self.shared.core.borrow().writer.len()
    }

    /// Borrow the underlying backend.
    pub fn backend(&self) -> Ref<'_, B> {
        Ref::map(self.shared.core.borrow(), |core| &core.backend)
    }
}

impl<B: KeyValueBackend> fmt::Debug for PersistentStore<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let core = self.shared.core.borrow();
        f.debug_struct("PersistentStore")
            .field("namespace", &self.shared.namespace)
            .field("fallback", &core.fallback.state())
            .field("pending_writes", &core.writer.len())
            .finish()
    }
}

// ── Internals ───────────────────────────────────────────────────────

/// Convert a validated value into `T`. If a collection does not convert as
/// a whole, elements that do not fit the element type are dropped one by
/// one; returns how many.
fn convert<T: DeserializeOwned>(
    key: &StorageKey,
    clean: Value,
    shape: &Shape,
) -> Result<(T, usize), DeserializationError> {
    let whole = codec::from_value(clean.clone());
    let items = match (whole, shape, clean) {
        (Ok(value), _, _) => return Ok((value, 0)),
        (Err(_), Shape::Collection(_), Value::Array(items)) => items,
        (Err(err), _, _) => return Err(err),
    };

    let total = items.len();
    let mut fitting = Vec::with_capacity(total);
    for item in items {
        // A one-element sequence of `T` converts exactly when the element does.
        match codec::from_value::<T>(Value::Array(vec![item.clone()])) {
            Ok(_) => fitting.push(item),
            Err(err) => debug!(key = %key, error = %err, "stored entry does not fit its type"),
        }
    }
    let unfit = total - fitting.len();
    codec::from_value(Value::Array(fitting)).map(|value| (value, unfit))
}

/// State shared between the facade and its timer callbacks. Callbacks hold
/// it weakly, so a dropped store never writes again.
struct Shared<B: KeyValueBackend> {
    core: RefCell<Core<B>>,
    scheduler: Rc<dyn Scheduler>,
    notice: Option<NoticeHandler>,
    monitor: QuotaMonitor,
    config: StoreConfig,
    namespace: Namespace,
}

struct Core<B: KeyValueBackend> {
    backend: B,
    writer: DebouncedWriter,
    fallback: FallbackController,
    /// Notices are queued while `core` is borrowed and dispatched after, so
    /// handlers may call back into the store.
    outbox: Vec<Notice>,
    watch: Option<ListenerId>,
}

impl<B: KeyValueBackend> Drop for Core<B> {
    fn drop(&mut self) {
        self.writer.abandon();
        if let Some(token) = self.fallback.take_reprobe() {
            token.cancel();
        }
        if let Some(id) = self.watch.take() {
            self.backend.unwatch(id);
        }
    }
}

impl<B: KeyValueBackend + 'static> Shared<B> {
    fn now(&self) -> u64 {
        self.scheduler.now_ms()
    }

    fn notify(&self, notice: Notice) {
        self.core.borrow_mut().outbox.push(notice);
    }

    fn dispatch(&self) {
        let notices = std::mem::take(&mut self.core.borrow_mut().outbox);
        if let Some(handler) = &self.notice {
            for notice in &notices {
                handler(notice);
            }
        }
    }

    fn initial_probe(self: &Rc<Self>) {
        let mut guard = self.core.borrow_mut();
        let core = &mut *guard;
        if !core.fallback.is_available() {
            if !core.fallback.reprobe_scheduled() {
                self.schedule_reprobe(core);
            }
        } else if !core.backend.probe() {
            self.enter_fallback(
                core,
                BackendError::Unavailable("availability probe failed".to_string()),
            );
        }
    }

    fn enter_fallback(self: &Rc<Self>, core: &mut Core<B>, reason: BackendError) {
        if core.fallback.mark_unavailable(self.now()) {
            warn!(error = %reason, "storage backend unavailable; switching to in-memory fallback");
            core.outbox.push(Notice::BackendUnavailable { reason });
        }
        if !core.fallback.reprobe_scheduled() {
            self.schedule_reprobe(core);
        }
    }

    fn schedule_reprobe(self: &Rc<Self>, core: &mut Core<B>) {
        let weak = Rc::downgrade(self);
        let token = self.scheduler.after(
            core.fallback.reprobe_interval_ms(),
            Box::new(move || {
                if let Some(shared) = weak.upgrade() {
                    shared.reprobe();
                }
            }),
        );
        if token.is_cancelled() {
            warn!("re-probe timer unavailable; staying on the in-memory fallback");
        }
        core.fallback.set_reprobe(token);
    }

    fn reprobe(self: &Rc<Self>) {
        {
            let mut guard = self.core.borrow_mut();
            let core = &mut *guard;
            core.fallback.take_reprobe();
            if core.fallback.is_available() {
                return;
            }
            match core.fallback.try_restore(&mut core.backend, self.now()) {
                Restore::Restored { rewritten } => {
                    info!(rewritten, "storage backend available again");
                    core.outbox.push(Notice::BackendRestored { rewritten });
                }
                Restore::StillUnavailable => {
                    debug!("storage backend still unavailable");
                    self.schedule_reprobe(core);
                }
            }
        }
        self.dispatch();
    }

    /// Pending value, else backend (or fallback memory while unavailable).
    fn read_raw(self: &Rc<Self>, key: &StorageKey) -> Option<String> {
        let mut guard = self.core.borrow_mut();
        let core = &mut *guard;
        if let Some(pending) = core.writer.pending_value(key) {
            return Some(pending.to_string());
        }
        if core.fallback.is_available() {
            match core.backend.get(key.as_str()) {
                Ok(raw) => return raw,
                Err(err) => self.enter_fallback(core, err),
            }
        }
        core.fallback.get(key.as_str())
    }

    fn load<T>(self: &Rc<Self>, key: &StorageKey, default: T, shape: &Shape) -> Loaded<T>
    where
        T: Serialize + DeserializeOwned,
    {
        let Some(raw) = self.read_raw(key) else {
            return Loaded::clean(default);
        };

        let decoded = match codec::decode_value(&raw) {
            Ok(decoded) => decoded,
            Err(err) => {
                warn!(key = %key, error = %err, "discarding undecodable record");
                return self.reset(key, default, 0);
            }
        };

        let validated = validate(&decoded, shape);
        for violation in &validated.violations {
            debug!(key = %key, %violation, "invalid stored entry");
        }
        let Some(clean) = validated.value else {
            warn!(key = %key, "stored value has the wrong shape; using the default");
            return self.reset(key, default, validated.dropped);
        };

        let (value, unfit): (T, usize) = match convert(key, clean, shape) {
            Ok(converted) => converted,
            Err(err) => {
                warn!(key = %key, error = %err, "stored value does not fit its type; using the default");
                return self.reset(key, default, validated.dropped);
            }
        };

        let dropped = validated.dropped + unfit;
        if dropped == 0 {
            return Loaded::clean(value);
        }

        warn!(key = %key, dropped, "dropped invalid entries; persisting the repaired value");
        self.persist_repaired(key, &value, dropped);
        Loaded {
            value,
            repaired: true,
            dropped,
        }
    }

    fn reset<T>(self: &Rc<Self>, key: &StorageKey, default: T, dropped: usize) -> Loaded<T>
    where
        T: Serialize + DeserializeOwned,
    {
        self.persist_repaired(key, &default, dropped);
        Loaded {
            value: default,
            repaired: true,
            dropped,
        }
    }

    fn persist_repaired<T>(self: &Rc<Self>, key: &StorageKey, value: &T, dropped: usize)
    where
        T: Serialize + DeserializeOwned,
    {
        match codec::encode(value) {
            Ok(raw) => self.write_through(key, raw),
            Err(err) => warn!(key = %key, error = %err, "repaired value cannot be encoded; record left as is"),
        }
        self.notify(Notice::Repaired {
            key: key.clone(),
            dropped,
        });
    }

    fn schedule_write(self: &Rc<Self>, key: &StorageKey, raw: String) {
        let delay = self.config.debounce_ms;
        if delay == 0 {
            self.write_through(key, raw);
            return;
        }

        let weak = Rc::downgrade(self);
        let timer_key = key.clone();
        let timer = self.scheduler.after(
            delay,
            Box::new(move || {
                if let Some(shared) = weak.upgrade() {
                    shared.flush(&timer_key);
                }
            }),
        );
        if timer.is_cancelled() {
            warn!(key = %key, "debounce timer unavailable; writing through");
            self.write_through(key, raw);
            return;
        }
        debug!(key = %key, delay_ms = delay, "write scheduled");
        let now = self.now();
        self.core.borrow_mut().writer.schedule(key.clone(), raw, now, timer);
    }

    fn write_through(self: &Rc<Self>, key: &StorageKey, raw: String) {
        let now = self.now();
        self.core
            .borrow_mut()
            .writer
            .schedule(key.clone(), raw, now, CancelToken::new());
        self.flush(key);
    }

    fn flush(self: &Rc<Self>, key: &StorageKey) {
        {
            let mut guard = self.core.borrow_mut();
            self.flush_locked(&mut guard, key);
        }
        self.dispatch();
    }

    fn flush_all(self: &Rc<Self>) {
        {
            let mut guard = self.core.borrow_mut();
            for key in guard.writer.pending_keys() {
                self.flush_locked(&mut guard, &key);
            }
        }
        self.dispatch();
    }

    fn flush_locked(self: &Rc<Self>, core: &mut Core<B>, key: &StorageKey) {
        let Some(write) = core.writer.begin_flush(key) else {
            return;
        };
        if core.fallback.is_available() {
            match core.backend.set(key.as_str(), &write.value) {
                Ok(()) => debug!(key = %key, chars = write.value.len(), "write flushed"),
                Err(err) => {
                    warn!(key = %key, error = %err, "write failed; keeping the value in memory");
                    if err == BackendError::QuotaExceeded {
                        core.outbox.push(Notice::QuotaExceeded { key: key.clone() });
                    }
                    self.enter_fallback(core, err);
                    core.fallback.store(key.as_str(), &write.value);
                }
            }
        } else {
            core.fallback.store(key.as_str(), &write.value);
        }
        core.writer.finish_flush(key);
    }

    /// Backend (or fallback) contents of the namespace, overlaid with
    /// pending writes and, if given, one more prospective write.
    fn estimate(self: &Rc<Self>, overlay: Option<(&StorageKey, &str)>) -> QuotaEstimate {
        let prefix = self.namespace.prefix();
        let mut view: BTreeMap<String, String> = BTreeMap::new();
        {
            let mut guard = self.core.borrow_mut();
            let core = &mut *guard;
            if core.fallback.is_available() {
                match core.backend.entries(&prefix) {
                    Ok(entries) => view.extend(entries),
                    Err(err) => self.enter_fallback(core, err),
                }
            }
            if !core.fallback.is_available() {
                if let Ok(entries) = core.fallback.memory().entries(&prefix) {
                    view.extend(entries);
                }
            }
            for write in core.writer.pending() {
                view.insert(write.key.as_str().to_string(), write.value.clone());
            }
        }
        if let Some((key, raw)) = overlay {
            view.insert(key.as_str().to_string(), raw.to_string());
        }
        self.monitor
            .estimate(view.iter().map(|(k, v)| (k.as_str(), v.as_str())))
    }
}
