use std::cell::{Cell, RefCell};
use std::rc::Rc;

use tracing::trace;

/// Change notification from another context sharing the same storage area.
/// `key == None` means the whole area was cleared; `new_value == None` means
/// the key was removed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageEvent {
    pub key: Option<String>,
    pub new_value: Option<String>,
}

impl StorageEvent {
    pub fn changed(key: impl Into<String>, new_value: Option<String>) -> Self {
        Self {
            key: Some(key.into()),
            new_value,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

type Listener = Rc<dyn Fn(&StorageEvent)>;

#[derive(Default)]
pub struct StorageEventBus {
    listeners: RefCell<Vec<(ListenerId, Listener)>>,
    next_id: Cell<u64>,
}

impl StorageEventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn listen(&self, listener: impl Fn(&StorageEvent) + 'static) -> ListenerId {
        let id = ListenerId(self.next_id.get());
        self.next_id.set(id.0 + 1);
        self.listeners.borrow_mut().push((id, Rc::new(listener)));
        id
    }

    pub fn unlisten(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.borrow_mut();
        let before = listeners.len();
        listeners.retain(|(existing, _)| *existing != id);
        listeners.len() != before
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.borrow().len()
    }

    pub fn dispatch(&self, event: &StorageEvent) {
        let snapshot: Vec<Listener> = self
            .listeners
            .borrow()
            .iter()
            .map(|(_, listener)| listener.clone())
            .collect();
        trace!(key = ?event.key, listeners = snapshot.len(), "dispatching storage event");
        for listener in snapshot {
            listener(event);
        }
    }
}
