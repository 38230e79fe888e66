use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

use tracing::debug;

pub type SchemeListener = Rc<dyn Fn(bool)>;

/// Presentation-side effects the UI store triggers but does not own.
pub trait DisplayAdapter {
    /// Toggles the document's dark styling.
    fn apply_dark_mode(&self, dark: bool);

    /// Current platform color-scheme preference.
    fn prefers_dark(&self) -> bool;

    /// Calls `listener` with the new preference whenever it changes, until
    /// the returned watch is cancelled.
    fn watch_color_scheme(&self, listener: SchemeListener) -> ColorSchemeWatch;
}

/// Handle for an active color-scheme subscription.
pub struct ColorSchemeWatch {
    cancel: Option<Box<dyn FnOnce()>>,
}

impl ColorSchemeWatch {
    pub fn new(cancel: impl FnOnce() + 'static) -> Self {
        Self {
            cancel: Some(Box::new(cancel)),
        }
    }

    pub fn is_active(&self) -> bool {
        self.cancel.is_some()
    }

    pub fn cancel(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

/// Display without a document: records what was applied and lets callers
/// flip the platform preference.
pub struct HeadlessDisplay {
    dark: Cell<bool>,
    prefers_dark: Cell<bool>,
    watchers: RefCell<Vec<(u64, SchemeListener)>>,
    next_watch: Cell<u64>,
    this: Weak<HeadlessDisplay>,
}

impl HeadlessDisplay {
    pub fn new(prefers_dark: bool) -> Rc<Self> {
        Rc::new_cyclic(|this| Self {
            dark: Cell::new(false),
            prefers_dark: Cell::new(prefers_dark),
            watchers: RefCell::new(Vec::new()),
            next_watch: Cell::new(0),
            this: this.clone(),
        })
    }

    /// Whether dark styling is currently applied.
    pub fn is_dark(&self) -> bool {
        self.dark.get()
    }

    pub fn watcher_count(&self) -> usize {
        self.watchers.borrow().len()
    }

    pub fn set_prefers_dark(&self, dark: bool) {
        if self.prefers_dark.replace(dark) == dark {
            return;
        }
        let listeners: Vec<SchemeListener> = self
            .watchers
            .borrow()
            .iter()
            .map(|(_, listener)| listener.clone())
            .collect();
        for listener in listeners {
            listener(dark);
        }
    }
}

impl DisplayAdapter for HeadlessDisplay {
    fn apply_dark_mode(&self, dark: bool) {
        debug!(dark, "applying color scheme");
        self.dark.set(dark);
    }

    fn prefers_dark(&self) -> bool {
        self.prefers_dark.get()
    }

    fn watch_color_scheme(&self, listener: SchemeListener) -> ColorSchemeWatch {
        let id = self.next_watch.get();
        self.next_watch.set(id + 1);
        self.watchers.borrow_mut().push((id, listener));

        let display = self.this.clone();
        ColorSchemeWatch::new(move || {
            if let Some(display) = display.upgrade() {
                display.watchers.borrow_mut().retain(|(existing, _)| *existing != id);
            }
        })
    }
}
