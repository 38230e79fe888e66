//! Application root: one storage adapter, the three stores built over it,
//! and the subscriptions that keep them in step with other contexts.

use std::cell::RefCell;
use std::rc::{Rc, Weak};

use chrono_tz::Tz;
use serde::de::DeserializeOwned;
use tracing::{info, warn};

use crate::binding::{SyncSubscription, subscribe_external};
use crate::filter::{FILTERS_KEY, FilterState, TaskFilter};
use crate::notifications::{NotificationCenter, NotificationSink};
use crate::runtime::{Clock, Scheduler};
use crate::storage::LocalStore;
use crate::task::Task;
use crate::tasks::{TASKS_KEY, TaskStore};
use crate::ui::{DisplayAdapter, UI_STATE_KEY, UiState, UiStore};

/// Collaborators supplied by whoever hosts the stores.
pub struct Host {
    pub storage: Rc<LocalStore>,
    pub clock: Rc<dyn Clock>,
    pub scheduler: Rc<dyn Scheduler>,
    pub display: Rc<dyn DisplayAdapter>,
    pub timezone: Tz,
}

pub struct App {
    pub tasks: Rc<RefCell<TaskStore>>,
    pub ui: Rc<RefCell<UiStore>>,
    pub filters: Rc<RefCell<FilterState>>,
    pub notifications: Rc<NotificationCenter>,
    storage: Rc<LocalStore>,
    subscriptions: Vec<SyncSubscription>,
}

impl App {
    #[tracing::instrument(skip_all, fields(timezone = %host.timezone))]
    pub fn new(host: Host) -> Self {
        let notifications = NotificationCenter::new(host.clock.clone(), host.scheduler);
        let sink: Rc<dyn NotificationSink> = notifications.clone();

        let tasks = TaskStore::new(
            host.storage.clone(),
            sink.clone(),
            host.clock,
            host.timezone,
        );
        let ui = UiStore::new(host.storage.clone(), notifications.clone(), host.display);
        let filters = FilterState::new(host.storage.clone(), sink);

        info!(tasks = tasks.len(), "application state loaded");

        Self {
            tasks: Rc::new(RefCell::new(tasks)),
            ui: Rc::new(RefCell::new(ui)),
            filters: Rc::new(RefCell::new(filters)),
            notifications,
            storage: host.storage,
            subscriptions: Vec::new(),
        }
    }

    pub fn storage(&self) -> &Rc<LocalStore> {
        &self.storage
    }

    /// Applies the persisted theme and starts listening for writes made by
    /// other contexts.
    pub fn start(&mut self) {
        self.ui.borrow_mut().init_theme();
        self.connect_sync();
    }

    pub fn is_syncing(&self) -> bool {
        self.subscriptions.iter().any(SyncSubscription::is_active)
    }

    fn connect_sync(&mut self) {
        if self.is_syncing() {
            return;
        }

        let tasks = self.subscribe(
            TASKS_KEY,
            Rc::downgrade(&self.tasks),
            |store, value: Vec<Task>| store.apply_external(value),
        );
        let ui = self.subscribe(
            UI_STATE_KEY,
            Rc::downgrade(&self.ui),
            |store, value: UiState| store.apply_external(value),
        );
        let filters = self.subscribe(
            FILTERS_KEY,
            Rc::downgrade(&self.filters),
            |store, value: TaskFilter| store.apply_external(value),
        );
        self.subscriptions = vec![tasks, ui, filters];
        info!(keys = self.subscriptions.len(), "cross-context sync connected");
    }

    fn subscribe<S, T>(
        &self,
        key: &'static str,
        target: Weak<RefCell<S>>,
        apply: impl Fn(&mut S, T) + 'static,
    ) -> SyncSubscription
    where
        S: 'static,
        T: DeserializeOwned + 'static,
    {
        subscribe_external(&self.storage, key, move |value: T| {
            let Some(target) = target.upgrade() else {
                return;
            };
            match target.try_borrow_mut() {
                Ok(mut store) => apply(&mut *store, value),
                Err(_) => warn!(key, "store busy; dropping external change"),
            }
        })
    }

    /// Stops write-through and sync. Stores stay readable.
    pub fn teardown(&mut self) {
        for subscription in &mut self.subscriptions {
            subscription.cleanup();
        }
        self.subscriptions.clear();
        self.tasks.borrow_mut().teardown();
        self.ui.borrow_mut().teardown();
        self.filters.borrow_mut().teardown();
        info!("application torn down");
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::*;
    use crate::runtime::{ManualClock, ManualScheduler};
    use crate::storage::MemoryArea;
    use crate::task::TaskDraft;
    use crate::ui::HeadlessDisplay;

    fn app_on(area: &MemoryArea) -> App {
        let clock = Rc::new(ManualClock::starting_at(
            Utc.with_ymd_and_hms(2026, 10, 16, 9, 0, 0)
                .single()
                .expect("valid time"),
        ));
        let scheduler = Rc::new(ManualScheduler::new(clock.clone()));
        let mut app = App::new(Host {
            storage: Rc::new(area.open_context()),
            clock,
            scheduler,
            display: HeadlessDisplay::new(false),
            timezone: Tz::UTC,
        });
        app.start();
        app
    }

    #[test]
    fn teardown_disconnects_everything() {
        let area = MemoryArea::new();
        let mut here = app_on(&area);
        let there = app_on(&area);
        assert_eq!(here.storage().events().listener_count(), 3);

        here.teardown();
        assert!(!here.is_syncing());
        assert_eq!(here.storage().events().listener_count(), 0);

        there.tasks.borrow_mut().create(TaskDraft::titled("unseen"));
        assert!(here.tasks.borrow().is_empty());

        here.tasks.borrow_mut().create(TaskDraft::titled("local only"));
        assert_eq!(there.tasks.borrow().len(), 1);
    }

    #[test]
    fn start_is_idempotent() {
        let area = MemoryArea::new();
        let mut app = app_on(&area);
        app.start();
        assert_eq!(app.storage().events().listener_count(), 3);
    }
}
