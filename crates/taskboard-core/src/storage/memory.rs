use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::{Rc, Weak};

use tracing::debug;

use super::{LocalStore, StorageBackend, StorageError, StorageEvent, StorageEventBus, entry_size};

#[derive(Default)]
struct AreaInner {
    entries: BTreeMap<String, String>,
    quota: Option<usize>,
    contexts: Vec<(u64, Weak<StorageEventBus>)>,
    next_context: u64,
}

impl AreaInner {
    fn used_bytes(&self) -> usize {
        self.entries
            .iter()
            .map(|(key, value)| entry_size(key, value))
            .sum()
    }
}

/// An in-memory storage area shared by any number of contexts. A write made
/// through one context is announced to every other open context, the way a
/// browser fires `storage` events in the other tabs of an origin.
#[derive(Clone, Default)]
pub struct MemoryArea {
    inner: Rc<RefCell<AreaInner>>,
}

impl MemoryArea {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_quota(bytes: usize) -> Self {
        let area = Self::default();
        area.inner.borrow_mut().quota = Some(bytes);
        area
    }

    pub fn open_context(&self) -> LocalStore {
        let bus = Rc::new(StorageEventBus::new());
        let context = {
            let mut inner = self.inner.borrow_mut();
            let id = inner.next_context;
            inner.next_context += 1;
            inner.contexts.push((id, Rc::downgrade(&bus)));
            id
        };
        debug!(context, "opened memory storage context");

        let backend = MemoryBackend {
            area: self.inner.clone(),
            context,
        };
        LocalStore::with_events(Rc::new(backend), bus)
    }

    pub fn used_bytes(&self) -> usize {
        self.inner.borrow().used_bytes()
    }
}

pub struct MemoryBackend {
    area: Rc<RefCell<AreaInner>>,
    context: u64,
}

impl MemoryBackend {
    fn broadcast(&self, event: StorageEvent) {
        let peers: Vec<Rc<StorageEventBus>> = {
            let mut inner = self.area.borrow_mut();
            inner.contexts.retain(|(_, bus)| bus.strong_count() > 0);
            inner
                .contexts
                .iter()
                .filter(|(id, _)| *id != self.context)
                .filter_map(|(_, bus)| bus.upgrade())
                .collect()
        };
        for bus in peers {
            bus.dispatch(&event);
        }
    }
}

impl StorageBackend for MemoryBackend {
    fn get_item(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.area.borrow().entries.get(key).cloned())
    }

    fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let changed = {
            let mut inner = self.area.borrow_mut();
            let previous = inner.entries.get(key).cloned();
            let incoming = entry_size(key, value);

            if let Some(quota) = inner.quota {
                let replaced = previous
                    .as_deref()
                    .map(|old| entry_size(key, old))
                    .unwrap_or(0);
                let projected = inner.used_bytes() - replaced + incoming;
                if projected > quota {
                    return Err(StorageError::QuotaExceeded {
                        key: key.to_string(),
                        bytes: incoming,
                    });
                }
            }

            inner.entries.insert(key.to_string(), value.to_string());
            previous.as_deref() != Some(value)
        };

        if changed {
            self.broadcast(StorageEvent::changed(key, Some(value.to_string())));
        }
        Ok(())
    }

    fn remove_item(&self, key: &str) -> Result<(), StorageError> {
        let existed = self.area.borrow_mut().entries.remove(key).is_some();
        if existed {
            self.broadcast(StorageEvent::changed(key, None));
        }
        Ok(())
    }

    fn keys(&self) -> Result<Vec<String>, StorageError> {
        Ok(self.area.borrow().entries.keys().cloned().collect())
    }
}
