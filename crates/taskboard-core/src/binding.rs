//! Binds an in-memory value to a storage key.
//!
//! A [`PersistedCell`] loads its value once on construction and writes it
//! back after every mutation that goes through [`PersistedCell::update`],
//! [`PersistedCell::try_update`] or [`PersistedCell::replace`]. Values that
//! arrive from another context are installed with
//! [`PersistedCell::replace_from_external`], which does not write back.

use std::rc::Rc;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, error, warn};

use crate::notifications::{NotificationSink, Severity};
use crate::storage::{ListenerId, LocalStore, StorageEventBus, StorageError};

pub const QUOTA_EXCEEDED_MESSAGE: &str =
    "Your browser storage is full. Please clear some data or use a different browser.";

pub struct PersistedCell<T> {
    key: String,
    value: T,
    store: Rc<LocalStore>,
    sink: Option<Rc<dyn NotificationSink>>,
    active: bool,
}

impl<T> PersistedCell<T>
where
    T: Serialize + DeserializeOwned,
{
    /// Reads `key`; falls back to `default` when it is absent or does not
    /// decode.
    #[tracing::instrument(skip(store, default), fields(key = %key.as_ref()))]
    pub fn load(store: Rc<LocalStore>, key: impl AsRef<str>, default: T) -> Self {
        let key = key.as_ref().to_string();
        let value = match store.get_json::<T>(&key) {
            Ok(Some(value)) => value,
            Ok(None) => default,
            Err(err) => {
                warn!(key = %key, error = %err, "stored value unreadable; using default");
                default
            }
        };

        Self {
            key,
            value,
            store,
            sink: None,
            active: true,
        }
    }

    pub fn with_sink(mut self, sink: Rc<dyn NotificationSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn get(&self) -> &T {
        &self.value
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Mutate, then persist.
    pub fn update<R>(&mut self, mutate: impl FnOnce(&mut T) -> R) -> R {
        let out = mutate(&mut self.value);
        self.persist();
        out
    }

    /// Like [`update`](Self::update), but only persists when the closure
    /// reports a change by returning `Some`.
    pub fn try_update<R>(&mut self, mutate: impl FnOnce(&mut T) -> Option<R>) -> Option<R> {
        let out = mutate(&mut self.value)?;
        self.persist();
        Some(out)
    }

    pub fn replace(&mut self, value: T) {
        self.value = value;
        self.persist();
    }

    /// Installs a value another context already stored.
    pub fn replace_from_external(&mut self, value: T) {
        self.value = value;
    }

    /// Re-reads the key. Keeps the current value when the stored one is
    /// missing or unreadable; returns whether a value was loaded.
    pub fn reload(&mut self) -> bool {
        match self.store.get_json::<T>(&self.key) {
            Ok(Some(value)) => {
                self.value = value;
                true
            }
            Ok(None) => false,
            Err(err) => {
                warn!(key = %self.key, error = %err, "failed to reload stored value");
                false
            }
        }
    }

    /// Stops write-through. The value stays usable in memory.
    pub fn teardown(&mut self) {
        if self.active {
            debug!(key = %self.key, "persisted cell torn down");
        }
        self.active = false;
    }

    /// Writes the current value. Failures are reported, never propagated;
    /// returns whether the write landed.
    pub fn persist(&self) -> bool {
        if !self.active {
            return false;
        }

        match self.store.set_json(&self.key, &self.value) {
            Ok(()) => true,
            Err(err) => {
                self.report(&err);
                false
            }
        }
    }

    fn report(&self, err: &StorageError) {
        error!(key = %self.key, error = %err, "failed to save value to storage");
        if err.is_quota_exceeded()
            && let Some(sink) = &self.sink
        {
            sink.add_notification(QUOTA_EXCEEDED_MESSAGE, Severity::Error);
        }
    }
}

impl<T> PersistedCell<Vec<T>>
where
    T: Serialize + DeserializeOwned,
{
    /// Reads a stored array one entry at a time. `prepare` runs on each raw
    /// entry first; entries that still do not decode are dropped with a
    /// warning and the rest are kept.
    #[tracing::instrument(skip(store, prepare), fields(key = %key.as_ref()))]
    pub fn load_entries(
        store: Rc<LocalStore>,
        key: impl AsRef<str>,
        prepare: impl FnMut(&mut Value),
    ) -> Self {
        let key = key.as_ref().to_string();
        let value = match store.get_json::<Vec<Value>>(&key) {
            Ok(Some(entries)) => decode_entries(&key, entries, prepare),
            Ok(None) => Vec::new(),
            Err(err) => {
                warn!(key = %key, error = %err, "stored collection unreadable; starting empty");
                Vec::new()
            }
        };

        Self {
            key,
            value,
            store,
            sink: None,
            active: true,
        }
    }
}

fn decode_entries<T: DeserializeOwned>(
    key: &str,
    entries: Vec<Value>,
    mut prepare: impl FnMut(&mut Value),
) -> Vec<T> {
    let total = entries.len();
    let kept: Vec<T> = entries
        .into_iter()
        .enumerate()
        .filter_map(|(index, mut entry)| {
            prepare(&mut entry);
            serde_json::from_value(entry)
                .inspect_err(|err| {
                    warn!(key, index, error = %err, "dropping unreadable stored entry");
                })
                .ok()
        })
        .collect();
    if kept.len() < total {
        warn!(key, kept = kept.len(), dropped = total - kept.len(), "stored collection partially read");
    }
    kept
}

/// Listener registration for changes made to one key by other contexts.
/// Must be released with [`cleanup`](Self::cleanup).
pub struct SyncSubscription {
    key: String,
    events: Rc<StorageEventBus>,
    listener: Option<ListenerId>,
}

impl SyncSubscription {
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn is_active(&self) -> bool {
        self.listener.is_some()
    }

    pub fn cleanup(&mut self) -> bool {
        match self.listener.take() {
            Some(id) => self.events.unlisten(id),
            None => false,
        }
    }
}

/// Calls `callback` with the decoded value whenever another context stores
/// a new value under `key`. Removals and undecodable payloads are dropped.
pub fn subscribe_external<T, F>(store: &LocalStore, key: &str, callback: F) -> SyncSubscription
where
    T: DeserializeOwned,
    F: Fn(T) + 'static,
{
    let watched = key.to_string();
    let listener = store.events().listen(move |event| {
        if event.key.as_deref() != Some(watched.as_str()) {
            return;
        }
        let Some(raw) = event.new_value.as_deref() else {
            return;
        };
        match serde_json::from_str::<T>(raw) {
            Ok(value) => callback(value),
            Err(err) => {
                warn!(key = %watched, error = %err, "dropping unreadable storage event");
            }
        }
    });

    SyncSubscription {
        key: key.to_string(),
        events: store.events().clone(),
        listener: Some(listener),
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;

    use super::*;
    use crate::storage::{MemoryArea, StorageEvent};

    #[derive(Default)]
    struct RecordingSink {
        messages: RefCell<Vec<(String, Severity)>>,
    }

    impl NotificationSink for RecordingSink {
        fn add_notification(&self, message: &str, severity: Severity) -> String {
            self.messages.borrow_mut().push((message.to_string(), severity));
            format!("n-{}", self.messages.borrow().len())
        }
    }

    #[test]
    fn loads_stored_value_or_default() {
        let store = Rc::new(LocalStore::in_memory());
        store.set("counts", "[4,5]").expect("set");
        store.set("broken", "[4,").expect("set");

        let stored = PersistedCell::load(store.clone(), "counts", vec![1_u32]);
        let broken = PersistedCell::load(store.clone(), "broken", vec![1_u32]);
        let absent = PersistedCell::load(store, "absent", vec![1_u32]);

        assert_eq!(stored.get(), &vec![4, 5]);
        assert_eq!(broken.get(), &vec![1]);
        assert_eq!(absent.get(), &vec![1]);
    }

    #[test]
    fn unreadable_entries_are_dropped_one_by_one() {
        let store = Rc::new(LocalStore::in_memory());
        store.set("counts", r#"[1,"two",3,null]"#).expect("set");
        store.set("scalar", "7").expect("set");

        let mut cell = PersistedCell::<Vec<u32>>::load_entries(store.clone(), "counts", |_| {});
        let scalar = PersistedCell::<Vec<u32>>::load_entries(store.clone(), "scalar", |_| {});
        assert_eq!(cell.get(), &vec![1, 3]);
        assert!(scalar.get().is_empty());

        cell.update(|v| v.push(4));
        assert_eq!(store.get("counts").as_deref(), Some("[1,3,4]"));
    }

    #[test]
    fn entries_are_prepared_before_decoding() {
        let store = Rc::new(LocalStore::in_memory());
        store.set("counts", r#"[1,"2"]"#).expect("set");

        let cell = PersistedCell::<Vec<u32>>::load_entries(store, "counts", |entry| {
            if let Some(parsed) = entry.as_str().and_then(|raw| raw.parse::<u32>().ok()) {
                *entry = Value::from(parsed);
            }
        });
        assert_eq!(cell.get(), &vec![1, 2]);
    }

    #[test]
    fn mutations_write_through_until_teardown() {
        let store = Rc::new(LocalStore::in_memory());
        let mut cell = PersistedCell::load(store.clone(), "counts", Vec::<u32>::new());

        cell.update(|v| v.push(1));
        assert_eq!(store.get("counts").as_deref(), Some("[1]"));

        assert_eq!(cell.try_update(|_| None::<()>), None);
        cell.try_update(|v| {
            v.push(2);
            Some(())
        });
        assert_eq!(store.get("counts").as_deref(), Some("[1,2]"));

        cell.teardown();
        cell.update(|v| v.push(3));
        assert_eq!(cell.get(), &vec![1, 2, 3]);
        assert_eq!(store.get("counts").as_deref(), Some("[1,2]"));
    }

    #[test]
    fn quota_failure_notifies_and_keeps_memory() {
        let store = Rc::new(MemoryArea::with_quota(40).open_context());
        let sink = Rc::new(RecordingSink::default());
        let mut cell =
            PersistedCell::load(store.clone(), "notes", String::new()).with_sink(sink.clone());

        cell.replace("short".to_string());
        assert!(sink.messages.borrow().is_empty());

        cell.replace("x".repeat(40));
        assert_eq!(cell.get().len(), 40);
        assert_eq!(store.get("notes").as_deref(), Some("\"short\""));
        assert_eq!(
            *sink.messages.borrow(),
            vec![(QUOTA_EXCEEDED_MESSAGE.to_string(), Severity::Error)]
        );
    }

    #[test]
    fn external_replacement_does_not_write_back() {
        let store = Rc::new(LocalStore::in_memory());
        let mut cell = PersistedCell::load(store.clone(), "counts", vec![1_u32]);
        cell.replace_from_external(vec![9]);
        assert_eq!(cell.get(), &vec![9]);
        assert_eq!(store.get("counts"), None);
    }

    #[test]
    fn external_changes_reach_subscribers_until_cleanup() {
        let area = MemoryArea::new();
        let here = area.open_context();
        let there = area.open_context();

        let received = Rc::new(RefCell::new(Vec::<Vec<u32>>::new()));
        let sink = received.clone();
        let mut subscription =
            subscribe_external::<Vec<u32>, _>(&here, "counts", move |v| sink.borrow_mut().push(v));

        there.set("counts", "[1]").expect("set");
        there.set("other", "[2]").expect("set");
        there.set("counts", "not json").expect("set");
        there.remove("counts");
        assert_eq!(*received.borrow(), vec![vec![1]]);

        assert!(subscription.cleanup());
        assert!(!subscription.is_active());
        there.set("counts", "[3]").expect("set");
        assert_eq!(received.borrow().len(), 1);
    }

    #[test]
    fn host_dispatched_events_are_filtered_by_key() {
        let store = LocalStore::in_memory();
        let received = Rc::new(RefCell::new(Vec::<String>::new()));
        let sink = received.clone();
        let _subscription =
            subscribe_external::<String, _>(&store, "name", move |v| sink.borrow_mut().push(v));

        store
            .events()
            .dispatch(&StorageEvent::changed("name", Some("\"ada\"".to_string())));
        store.events().dispatch(&StorageEvent {
            key: None,
            new_value: None,
        });
        assert_eq!(*received.borrow(), vec!["ada".to_string()]);
    }
}
