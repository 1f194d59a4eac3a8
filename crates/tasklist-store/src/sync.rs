//! Propagation of changes made by other execution contexts.
//!
//! The backend's own notification channel already excludes changes made by
//! this context, so anything arriving here came from elsewhere. It is
//! republished as is, without any extra dedup filtering.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fmt;
use std::rc::{Rc, Weak};

use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, warn};

use crate::backend::{ChangeListener, StorageChange};
use crate::codec;
use crate::key::{Namespace, StorageKey};

/// A key's new value, as written by another context.
#[derive(Debug, Clone, PartialEq)]
pub struct KeyChange {
    pub key: StorageKey,
    /// Decoded new value; `None` when the key was removed.
    pub value: Option<Value>,
}

impl KeyChange {
    /// Convert the new value into `T`, if present and well-typed.
    pub fn decode<T: DeserializeOwned>(&self) -> Option<T> {
        self.value
            .clone()
            .and_then(|v| codec::from_value(v).ok())
    }
}

/// Callback registered with [`CrossTabSync::subscribe`].
pub type Subscriber = Rc<dyn Fn(&KeyChange)>;

#[derive(Default)]
struct Registry {
    subscribers: BTreeMap<StorageKey, Vec<(u64, Subscriber)>>,
    next_id: u64,
}

/// Subscriber registry fed by the backend's cross-context channel.
#[derive(Clone)]
pub struct CrossTabSync {
    namespace: Namespace,
    registry: Rc<RefCell<Registry>>,
}

impl CrossTabSync {
    pub fn new(namespace: Namespace) -> Self {
        Self {
            namespace,
            registry: Rc::new(RefCell::new(Registry::default())),
        }
    }

    /// Call `subscriber` whenever another context changes `key`.
    pub fn subscribe(&self, key: StorageKey, subscriber: Subscriber) -> Subscription {
        let mut registry = self.registry.borrow_mut();
        let id = registry.next_id;
        registry.next_id += 1;
        registry
            .subscribers
            .entry(key.clone())
            .or_default()
            .push((id, subscriber));
        Subscription {
            registry: Rc::downgrade(&self.registry),
            key,
            id,
        }
    }

    pub fn subscriber_count(&self, key: &StorageKey) -> usize {
        self.registry
            .borrow()
            .subscribers
            .get(key)
            .map_or(0, Vec::len)
    }

    /// A listener to register with the backend. Holds the registry weakly,
    /// so it goes quiet once the store is gone.
    pub fn listener(&self) -> ChangeListener {
        let namespace = self.namespace.clone();
        let registry = Rc::downgrade(&self.registry);
        Rc::new(move |change: &StorageChange| {
            if let Some(registry) = registry.upgrade() {
                deliver(&namespace, &registry, change);
            }
        })
    }

    /// Republish `change` to local subscribers.
    pub fn deliver(&self, change: &StorageChange) {
        deliver(&self.namespace, &self.registry, change);
    }
}

impl fmt::Debug for CrossTabSync {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CrossTabSync")
            .field("namespace", &self.namespace)
            .field("keys", &self.registry.borrow().subscribers.len())
            .finish()
    }
}

fn deliver(namespace: &Namespace, registry: &RefCell<Registry>, change: &StorageChange) {
    let changes = match &change.key {
        Some(raw) if namespace.contains(raw) => {
            let value = match change.new_value.as_deref().map(codec::decode_value).transpose() {
                Ok(value) => value,
                Err(err) => {
                    warn!(key = raw.as_str(), error = %err, "ignoring undecodable cross-tab change");
                    return;
                }
            };
            vec![KeyChange {
                key: StorageKey::from_raw(raw.clone()),
                value,
            }]
        }
        Some(_) => return,
        // The other context cleared the whole storage area.
        None => registry
            .borrow()
            .subscribers
            .keys()
            .map(|key| KeyChange {
                key: key.clone(),
                value: None,
            })
            .collect(),
    };

    for change in changes {
        // Subscribers may (un)subscribe; release the registry first.
        let targets: Vec<Subscriber> = registry
            .borrow()
            .subscribers
            .get(&change.key)
            .map(|subs| subs.iter().map(|(_, s)| Rc::clone(s)).collect())
            .unwrap_or_default();
        if !targets.is_empty() {
            debug!(key = %change.key, subscribers = targets.len(), "republishing cross-tab change");
        }
        for subscriber in targets {
            subscriber(&change);
        }
    }
}

/// Dispose handle for a subscription. Dropping it unsubscribes.
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
    registry: Weak<RefCell<Registry>>,
    key: StorageKey,
    id: u64,
}

impl Subscription {
    pub fn key(&self) -> &StorageKey {
        &self.key
    }

    /// Stop receiving changes. Same as dropping the handle.
    pub fn unsubscribe(self) {}
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("key", &self.key)
            .field("id", &self.id)
            .finish()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        let Some(registry) = self.registry.upgrade() else {
            return;
        };
        let mut registry = registry.borrow_mut();
        if let Some(subs) = registry.subscribers.get_mut(&self.key) {
            subs.retain(|(id, _)| *id != self.id);
            if subs.is_empty() {
                registry.subscribers.remove(&self.key);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn change(key: Option<&str>, new_value: Option<&str>) -> StorageChange {
        StorageChange {
            key: key.map(str::to_string),
            old_value: None,
            new_value: new_value.map(str::to_string),
        }
    }

    fn collecting(sync: &CrossTabSync, key: StorageKey) -> (Rc<RefCell<Vec<KeyChange>>>, Subscription) {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&seen);
        let sub = sync.subscribe(key, Rc::new(move |c: &KeyChange| sink.borrow_mut().push(c.clone())));
        (seen, sub)
    }

    #[test]
    fn delivers_decoded_values_for_watched_keys() {
        let ns = Namespace::new("app");
        let sync = CrossTabSync::new(ns.clone());
        let (seen, _sub) = collecting(&sync, ns.key("filter"));

        sync.deliver(&change(Some("app-filter"), Some("\"active\"")));
        sync.deliver(&change(Some("app-tasks"), Some("[]")));
        sync.deliver(&change(Some("other-filter"), Some("\"all\"")));

        let seen = seen.borrow();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].decode::<String>().as_deref(), Some("active"));
    }

    #[test]
    fn removal_and_clear_deliver_none() {
        let ns = Namespace::new("app");
        let sync = CrossTabSync::new(ns.clone());
        let (seen, _sub) = collecting(&sync, ns.key("tasks"));

        sync.deliver(&change(Some("app-tasks"), None));
        sync.deliver(&change(None, None));

        assert_eq!(seen.borrow().len(), 2);
        assert!(seen.borrow().iter().all(|c| c.value.is_none()));
    }

    #[test]
    fn undecodable_values_are_skipped() {
        let ns = Namespace::new("app");
        let sync = CrossTabSync::new(ns.clone());
        let (seen, _sub) = collecting(&sync, ns.key("tasks"));

        sync.deliver(&change(Some("app-tasks"), Some("{not json")));
        assert!(seen.borrow().is_empty());
    }

    #[test]
    fn dropping_the_handle_unsubscribes() {
        let ns = Namespace::new("app");
        let sync = CrossTabSync::new(ns.clone());
        let (seen, sub) = collecting(&sync, ns.key("tasks"));
        assert_eq!(sync.subscriber_count(&ns.key("tasks")), 1);

        sub.unsubscribe();
        assert_eq!(sync.subscriber_count(&ns.key("tasks")), 0);

        sync.deliver(&change(Some("app-tasks"), Some("[]")));
        assert!(seen.borrow().is_empty());
    }

    #[test]
    fn listener_goes_quiet_after_sync_is_dropped() {
        let ns = Namespace::new("app");
        let sync = CrossTabSync::new(ns);
        let listener = sync.listener();
        drop(sync);
        listener(&change(Some("app-tasks"), Some("[]")));
    }
}
