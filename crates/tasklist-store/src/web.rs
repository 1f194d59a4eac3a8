//! Browser `localStorage` backend and `setTimeout` scheduler.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use js_sys::Object;
use tracing::warn;
use wasm_bindgen::closure::Closure;
use wasm_bindgen::{JsCast, JsValue};
use web_sys::{DomException, Storage, StorageEvent, Window};

use crate::backend::{BackendError, ChangeListener, KeyValueBackend, ListenerId, StorageChange};
use crate::scheduler::{CancelToken, Scheduler, Task};

fn map_js_error(err: JsValue) -> BackendError {
    match err.dyn_ref::<DomException>() {
        Some(dom) => match dom.name().as_str() {
            "QuotaExceededError" | "NS_ERROR_DOM_QUOTA_REACHED" => BackendError::QuotaExceeded,
            "SecurityError" | "InvalidAccessError" => BackendError::AccessDenied(dom.message()),
            name => BackendError::Unavailable(format!("{name}: {}", dom.message())),
        },
        None => BackendError::Unavailable(format!("{err:?}")),
    }
}

type Listeners = Rc<RefCell<Vec<(ListenerId, ChangeListener)>>>;

/// `window.localStorage` as a [`KeyValueBackend`].
///
/// Changes made by other tabs arrive through the window's `storage` event;
/// the browser never fires it in the tab that made the change.
pub struct LocalStorageBackend {
    window: Window,
    storage: Storage,
    listeners: Listeners,
    next_listener: u64,
    handler: Option<Closure<dyn FnMut(StorageEvent)>>,
}

impl LocalStorageBackend {
    /// Open the current window's `localStorage`.
    ///
    /// Fails with [`BackendError::AccessDenied`] where storage is blocked
    /// (private browsing, disabled cookies) and with
    /// [`BackendError::Unavailable`] outside a window context.
    pub fn open() -> Result<Self, BackendError> {
        let window = web_sys::window()
            .ok_or_else(|| BackendError::Unavailable("no window".to_string()))?;
        let storage = window
            .local_storage()
            .map_err(map_js_error)?
            .ok_or_else(|| BackendError::Unavailable("localStorage is not supported".to_string()))?;
        Ok(Self {
            window,
            storage,
            listeners: Rc::new(RefCell::new(Vec::new())),
            next_listener: 1,
            handler: None,
        })
    }

    fn install_handler(&mut self) {
        if self.handler.is_some() {
            return;
        }
        let storage = self.storage.clone();
        let listeners = Rc::clone(&self.listeners);
        let handler = Closure::<dyn FnMut(StorageEvent)>::new(move |event: StorageEvent| {
            // Events for sessionStorage arrive on the same channel.
            let ours = event
                .storage_area()
                .map_or(false, |area| Object::is(area.as_ref(), storage.as_ref()));
            if !ours {
                return;
            }
            let change = StorageChange {
                key: event.key(),
                old_value: event.old_value(),
                new_value: event.new_value(),
            };
            let targets: Vec<ChangeListener> = listeners
                .borrow()
                .iter()
                .map(|(_, l)| Rc::clone(l))
                .collect();
            for listener in targets {
                listener(&change);
            }
        });
        if let Err(err) = self
            .window
            .add_event_listener_with_callback("storage", handler.as_ref().unchecked_ref())
        {
            warn!(error = ?err, "could not listen for storage events");
            return;
        }
        self.handler = Some(handler);
    }
}

impl fmt::Debug for LocalStorageBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalStorageBackend")
            .field("listeners", &self.listeners.borrow().len())
            .finish()
    }
}

impl Drop for LocalStorageBackend {
    fn drop(&mut self) {
        if let Some(handler) = self.handler.take() {
            let _ = self
                .window
                .remove_event_listener_with_callback("storage", handler.as_ref().unchecked_ref());
        }
    }
}

impl KeyValueBackend for LocalStorageBackend {
    fn get(&self, key: &str) -> Result<Option<String>, BackendError> {
        self.storage.get_item(key).map_err(map_js_error)
    }

    fn set(&mut self, key: &str, value: &str) -> Result<(), BackendError> {
        self.storage.set_item(key, value).map_err(map_js_error)
    }

    fn remove(&mut self, key: &str) -> Result<(), BackendError> {
        self.storage.remove_item(key).map_err(map_js_error)
    }

    fn keys(&self) -> Result<Vec<String>, BackendError> {
        let len = self.storage.length().map_err(map_js_error)?;
        let mut keys = Vec::with_capacity(len as usize);
        for index in 0..len {
            if let Some(key) = self.storage.key(index).map_err(map_js_error)? {
                keys.push(key);
            }
        }
        Ok(keys)
    }

    fn watch(&mut self, listener: ChangeListener) -> Option<ListenerId> {
        self.install_handler();
        self.handler.as_ref()?;
        let id = ListenerId(self.next_listener);
        self.next_listener += 1;
        self.listeners.borrow_mut().push((id, listener));
        Some(id)
    }

    fn unwatch(&mut self, id: ListenerId) {
        self.listeners.borrow_mut().retain(|(l, _)| *l != id);
    }
}

/// Scheduler backed by `window.setTimeout` and `Date.now()`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TimeoutScheduler;

impl TimeoutScheduler {
    pub fn new() -> Self {
        Self
    }
}

impl Scheduler for TimeoutScheduler {
    fn now_ms(&self) -> u64 {
        js_sys::Date::now() as u64
    }

    fn after(&self, delay_ms: u64, task: Task) -> CancelToken {
        let token = CancelToken::new();
        let guard = token.clone();
        let callback = Closure::once_into_js(move || {
            if !guard.is_cancelled() {
                task();
            }
        });
        let delay = delay_ms.min(i32::MAX as u64) as i32;
        let scheduled = web_sys::window()
            .ok_or_else(|| JsValue::from_str("no window"))
            .and_then(|window| {
                window.set_timeout_with_callback_and_timeout_and_arguments_0(
                    callback.unchecked_ref(),
                    delay,
                )
            });
        if let Err(err) = scheduled {
            warn!(error = ?err, delay_ms, "could not schedule timer");
            token.cancel();
        }
        token
    }
}
