use std::cell::RefCell;
use std::rc::{Rc, Weak};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::runtime::{Clock, Scheduler};
use crate::task::generate_id;

/// How long a notification stays visible before it removes itself.
pub const NOTIFICATION_TTL: Duration = Duration::from_millis(5000);

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Success,
    Error,
    #[default]
    Info,
    Warning,
}

crate::task::labelled_enum!(Severity, "severity", {
    Success => "success",
    Error => "error",
    Info => "info",
    Warning => "warning",
});

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct Notification {
    pub id: String,
    pub message: String,
    #[serde(rename = "type")]
    pub severity: Severity,
    /// Creation time in unix milliseconds.
    pub timestamp: i64,
}

/// Where the persistence layer reports user-facing problems.
pub trait NotificationSink {
    fn add_notification(&self, message: &str, severity: Severity) -> String;
}

/// Transient notification list. Never persisted; each entry schedules its
/// own removal [`NOTIFICATION_TTL`] after creation.
pub struct NotificationCenter {
    entries: RefCell<Vec<Notification>>,
    clock: Rc<dyn Clock>,
    scheduler: Rc<dyn Scheduler>,
    this: Weak<NotificationCenter>,
}

impl NotificationCenter {
    pub fn new(clock: Rc<dyn Clock>, scheduler: Rc<dyn Scheduler>) -> Rc<Self> {
        Rc::new_cyclic(|this| Self {
            entries: RefCell::new(Vec::new()),
            clock,
            scheduler,
            this: this.clone(),
        })
    }

    pub fn push(&self, message: &str, severity: Severity) -> String {
        let now = self.clock.now();
        let id = generate_id("notification", now);
        self.entries.borrow_mut().push(Notification {
            id: id.clone(),
            message: message.to_string(),
            severity,
            timestamp: now.timestamp_millis(),
        });
        info!(%id, %severity, message, "notification added");

        let center = self.this.clone();
        let expiring = id.clone();
        self.scheduler.schedule_once(
            NOTIFICATION_TTL,
            Box::new(move || {
                if let Some(center) = center.upgrade() {
                    center.remove(&expiring);
                }
            }),
        );

        id
    }

    /// Idempotent: removing an unknown id is a no-op returning `false`.
    pub fn remove(&self, id: &str) -> bool {
        let mut entries = self.entries.borrow_mut();
        let Some(index) = entries.iter().position(|n| n.id == id) else {
            return false;
        };
        entries.remove(index);
        debug!(id, "notification removed");
        true
    }

    pub fn clear(&self) {
        self.entries.borrow_mut().clear();
    }

    pub fn all(&self) -> Vec<Notification> {
        self.entries.borrow().clone()
    }

    /// Entries younger than the TTL, in creation order.
    pub fn active(&self) -> Vec<Notification> {
        let now = self.clock.now_millis();
        let ttl = NOTIFICATION_TTL.as_millis() as i64;
        self.entries
            .borrow()
            .iter()
            .filter(|n| now - n.timestamp < ttl)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.borrow().is_empty()
    }
}

impl NotificationSink for NotificationCenter {
    fn add_notification(&self, message: &str, severity: Severity) -> String {
        self.push(message, severity)
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::*;
    use crate::runtime::{ManualClock, ManualScheduler};

    fn fixture() -> (Rc<ManualClock>, Rc<ManualScheduler>, Rc<NotificationCenter>) {
        let clock = Rc::new(ManualClock::starting_at(
            Utc.with_ymd_and_hms(2026, 10, 16, 9, 0, 0)
                .single()
                .expect("valid time"),
        ));
        let scheduler = Rc::new(ManualScheduler::new(clock.clone()));
        let center = NotificationCenter::new(clock.clone(), scheduler.clone());
        (clock, scheduler, center)
    }

    #[test]
    fn notifications_expire_after_five_seconds() {
        let (clock, scheduler, center) = fixture();
        let first = center.push("Saved", Severity::Success);
        clock.advance(Duration::from_millis(2000));
        center.push("Heads up", Severity::Warning);

        clock.advance(Duration::from_millis(2999));
        scheduler.run_due();
        assert_eq!(center.len(), 2);

        clock.advance(Duration::from_millis(1));
        scheduler.run_due();
        let remaining = center.all();
        assert_eq!(remaining.len(), 1);
        assert_ne!(remaining[0].id, first);
        assert_eq!(remaining[0].severity, Severity::Warning);

        clock.advance(Duration::from_millis(2000));
        scheduler.run_due();
        assert!(center.is_empty());
    }

    #[test]
    fn removal_is_idempotent() {
        let (clock, scheduler, center) = fixture();
        let id = center.push("Gone soon", Severity::Info);
        assert!(center.remove(&id));
        assert!(!center.remove(&id));

        clock.advance(NOTIFICATION_TTL);
        assert_eq!(scheduler.run_due(), 1);
        assert!(center.is_empty());
    }

    #[test]
    fn active_hides_entries_past_ttl_before_timer_fires() {
        let (clock, _scheduler, center) = fixture();
        center.push("Stale", Severity::Error);
        assert_eq!(center.active().len(), 1);

        clock.advance(NOTIFICATION_TTL);
        assert!(center.active().is_empty());
        assert_eq!(center.len(), 1);
    }
}
