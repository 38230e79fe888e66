//! Task collection store: CRUD, selection, nested subtask/tag edits,
//! import/export and the derived board views.

pub mod import;
pub mod views;

use std::collections::{BTreeMap, HashSet};
use std::rc::Rc;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use tracing::{debug, info, warn};

use crate::binding::PersistedCell;
use crate::notifications::NotificationSink;
use crate::runtime::Clock;
use crate::storage::LocalStore;
use crate::task::{
    COPY_SUFFIX, Status, Subtask, Task, TaskDraft, TaskPatch, Zone, dedupe_tags,
    fill_missing_timestamps, generate_id,
};
use crate::ui::DropOutcome;

pub use import::ImportReport;
pub use views::TaskStats;

pub const TASKS_KEY: &str = "tasks";

pub struct TaskStore {
    tasks: PersistedCell<Vec<Task>>,
    selected_task_id: Option<String>,
    last_sync_time: Option<DateTime<Utc>>,
    clock: Rc<dyn Clock>,
    timezone: Tz,
}

impl TaskStore {
    pub fn new(
        store: Rc<LocalStore>,
        sink: Rc<dyn NotificationSink>,
        clock: Rc<dyn Clock>,
        timezone: Tz,
    ) -> Self {
        let now = clock.now();
        let tasks = PersistedCell::<Vec<Task>>::load_entries(store, TASKS_KEY, |entry| {
            fill_missing_timestamps(entry, now)
        })
        .with_sink(sink);
        debug!(count = tasks.get().len(), "loaded tasks");

        Self {
            tasks,
            selected_task_id: None,
            last_sync_time: None,
            clock,
            timezone,
        }
    }

    pub fn tasks(&self) -> &[Task] {
        self.tasks.get()
    }

    pub fn get(&self, id: &str) -> Option<&Task> {
        self.tasks().iter().find(|t| t.id == id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.get(id).is_some()
    }

    pub fn len(&self) -> usize {
        self.tasks().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks().is_empty()
    }

    pub fn timezone(&self) -> &Tz {
        &self.timezone
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub fn last_sync_time(&self) -> Option<DateTime<Utc>> {
        self.last_sync_time
    }

    // Selection

    pub fn selected_task_id(&self) -> Option<&str> {
        self.selected_task_id.as_deref()
    }

    /// Resolved on every call; a dangling id resolves to nothing.
    pub fn selected_task(&self) -> Option<&Task> {
        self.selected_task_id.as_deref().and_then(|id| self.get(id))
    }

    pub fn select(&mut self, id: Option<&str>) {
        self.selected_task_id = id.map(str::to_string);
    }

    pub fn clear_selection(&mut self) {
        self.selected_task_id = None;
    }

    // CRUD

    #[tracing::instrument(skip(self, draft))]
    pub fn create(&mut self, draft: TaskDraft) -> Task {
        let now = self.now();
        let id = self.fresh_id(now);
        let task = draft.into_task(id, now);
        info!(id = %task.id, title = %task.title, "task created");

        let created = task.clone();
        self.tasks.update(|tasks| tasks.push(task));
        created
    }

    #[tracing::instrument(skip(self, patch))]
    pub fn update(&mut self, id: &str, patch: TaskPatch) -> bool {
        let now = self.now();
        let updated = self.tasks.try_update(|tasks| {
            let task = tasks.iter_mut().find(|t| t.id == id)?;
            task.apply_patch(patch, now);
            Some(())
        });
        if updated.is_none() {
            debug!(id, "update skipped; no such task");
        }
        updated.is_some()
    }

    #[tracing::instrument(skip(self))]
    pub fn delete(&mut self, id: &str) -> bool {
        let removed = self.tasks.try_update(|tasks| {
            let index = tasks.iter().position(|t| t.id == id)?;
            Some(tasks.remove(index))
        });
        if removed.is_none() {
            return false;
        }

        if self.selected_task_id.as_deref() == Some(id) {
            self.selected_task_id = None;
        }
        info!(id, "task deleted");
        true
    }

    pub fn move_task(&mut self, id: &str, status: Status) -> bool {
        self.update(id, TaskPatch::status(status))
    }

    pub fn archive(&mut self, id: &str) -> bool {
        self.update(id, TaskPatch::status(Status::Archived))
    }

    #[tracing::instrument(skip(self))]
    pub fn duplicate(&mut self, id: &str) -> Option<Task> {
        let now = self.now();
        let mut copy = self.get(id)?.clone();
        copy.id = self.fresh_id(now);
        copy.title.push_str(COPY_SUFFIX);
        copy.created_at = now;
        copy.updated_at = now;
        copy.completed_at = None;
        info!(source = id, id = %copy.id, "task duplicated");

        let created = copy.clone();
        self.tasks.update(|tasks| tasks.push(copy));
        Some(created)
    }

    /// Unknown ids are skipped. Returns how many tasks changed.
    pub fn bulk_update_status(&mut self, ids: &[String], status: Status) -> usize {
        ids.iter()
            .filter(|id| self.update(id, TaskPatch::status(status)))
            .count()
    }

    pub fn bulk_delete(&mut self, ids: &[String]) -> usize {
        ids.iter().filter(|id| self.delete(id)).count()
    }

    /// Moves the dragged task into the destination zone. Same-zone drops and
    /// unknown tasks are ignored.
    pub fn apply_drop(&mut self, outcome: &DropOutcome) -> bool {
        if !outcome.changes_zone() {
            return false;
        }
        self.move_task(&outcome.task_id, outcome.to_zone.status())
    }

    // Subtasks

    pub fn add_subtask(&mut self, task_id: &str, title: &str) -> Option<Subtask> {
        let now = self.now();
        self.tasks.try_update(|tasks| {
            let task = tasks.iter_mut().find(|t| t.id == task_id)?;
            let subtask = Subtask {
                id: generate_id("subtask", now),
                title: title.to_string(),
                completed: false,
                created_at: now,
            };
            task.subtasks.push(subtask.clone());
            task.touch(now);
            Some(subtask)
        })
    }

    pub fn toggle_subtask(&mut self, task_id: &str, subtask_id: &str) -> bool {
        let now = self.now();
        self.tasks
            .try_update(|tasks| {
                let task = tasks.iter_mut().find(|t| t.id == task_id)?;
                let subtask = task.subtask_mut(subtask_id)?;
                subtask.completed = !subtask.completed;
                task.touch(now);
                Some(())
            })
            .is_some()
    }

    pub fn delete_subtask(&mut self, task_id: &str, subtask_id: &str) -> bool {
        let now = self.now();
        self.tasks
            .try_update(|tasks| {
                let task = tasks.iter_mut().find(|t| t.id == task_id)?;
                let index = task.subtasks.iter().position(|s| s.id == subtask_id)?;
                task.subtasks.remove(index);
                task.touch(now);
                Some(())
            })
            .is_some()
    }

    // Tags

    /// False when the task is missing or already carries the tag.
    pub fn add_tag(&mut self, task_id: &str, tag: &str) -> bool {
        let now = self.now();
        self.tasks
            .try_update(|tasks| {
                let task = tasks.iter_mut().find(|t| t.id == task_id)?;
                if task.has_tag(tag) {
                    return None;
                }
                task.tags.push(tag.to_string());
                task.touch(now);
                Some(())
            })
            .is_some()
    }

    pub fn remove_tag(&mut self, task_id: &str, tag: &str) -> bool {
        let now = self.now();
        self.tasks
            .try_update(|tasks| {
                let task = tasks.iter_mut().find(|t| t.id == task_id)?;
                let index = task.tags.iter().position(|t| t == tag)?;
                task.tags.remove(index);
                task.touch(now);
                Some(())
            })
            .is_some()
    }

    // Import / export

    pub fn export_all(&self) -> String {
        serde_json::to_string_pretty(self.tasks()).unwrap_or_else(|err| {
            warn!(error = %err, "failed to serialize tasks");
            "[]".to_string()
        })
    }

    /// Imports an export document. Valid entries are committed one at a time;
    /// colliding ids are replaced with fresh ones.
    #[tracing::instrument(skip(self, text), fields(len = text.len()))]
    pub fn import_all(&mut self, text: &str) -> ImportReport {
        let entries = match import::parse_entries(text, self.now()) {
            Ok(entries) => entries,
            Err(reason) => {
                warn!(reason, "import rejected");
                return ImportReport::rejected(reason);
            }
        };

        let mut report = ImportReport {
            success: true,
            ..ImportReport::default()
        };
        for entry in entries {
            let mut task = match entry {
                Ok(task) => task,
                Err(error) => {
                    report.errors.push(error);
                    continue;
                }
            };

            if self.contains(&task.id) {
                let fresh = self.fresh_id(self.now());
                debug!(old = %task.id, new = %fresh, "import id collision");
                task.id = fresh;
            }
            task.tags = dedupe_tags(task.tags);
            self.tasks.update(|tasks| tasks.push(task));
            report.imported += 1;
        }

        info!(
            imported = report.imported,
            errors = report.errors.len(),
            "import finished"
        );
        report
    }

    // Derived views

    pub fn tasks_by_zone(&self) -> BTreeMap<Zone, Vec<&Task>> {
        views::by_zone(self.tasks())
    }

    pub fn tasks_by_priority(&self) -> Vec<&Task> {
        views::by_priority(self.tasks())
    }

    pub fn overdue_tasks(&self) -> Vec<&Task> {
        views::overdue(self.tasks(), self.now())
    }

    pub fn tasks_due_today(&self) -> Vec<&Task> {
        views::due_today(self.tasks(), self.now(), &self.timezone)
    }

    pub fn task_stats(&self) -> TaskStats {
        views::stats(self.tasks(), self.now())
    }

    // Lifecycle

    /// Installs the collection another context wrote.
    pub fn apply_external(&mut self, tasks: Vec<Task>) {
        info!(count = tasks.len(), "tasks replaced by another context");
        self.tasks.replace_from_external(tasks);
        self.last_sync_time = Some(self.now());
        if let Some(id) = self.selected_task_id.as_deref()
            && !self.contains(id)
        {
            debug!(id, "selection dropped after external change");
            self.selected_task_id = None;
        }
    }

    pub fn reload(&mut self) -> bool {
        self.tasks.reload()
    }

    pub fn teardown(&mut self) {
        self.tasks.teardown();
    }

    fn fresh_id(&self, now: DateTime<Utc>) -> String {
        let taken: HashSet<&str> = self.tasks().iter().map(|t| t.id.as_str()).collect();
        loop {
            let id = generate_id("task", now);
            if !taken.contains(id.as_str()) {
                return id;
            }
        }
    }
}
