use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::datetime::{format_timestamp, iso_timestamp_serde};

pub const UNTITLED_TASK: &str = "Untitled Task";
pub const COPY_SUFFIX: &str = " (Copy)";

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
#[error("unknown {kind}: {value}")]
pub struct ParseLabelError {
    kind: &'static str,
    value: String,
}

impl ParseLabelError {
    pub(crate) fn new(kind: &'static str, value: &str) -> Self {
        Self {
            kind,
            value: value.to_string(),
        }
    }
}

macro_rules! labelled_enum {
    ($name:ident, $kind:literal, { $($variant:ident => $label:literal),+ $(,)? }) => {
        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $label),+
                }
            }
        }

        impl ::std::fmt::Display for $name {
            fn fmt(&self, f: &mut ::std::fmt::Formatter<'_>) -> ::std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl ::std::str::FromStr for $name {
            type Err = $crate::task::ParseLabelError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let needle = s.trim().to_ascii_lowercase();
                $name::ALL
                    .iter()
                    .copied()
                    .find(|value| value.as_str() == needle)
                    .ok_or_else(|| $crate::task::ParseLabelError::new($kind, s))
            }
        }
    };
}

pub(crate) use labelled_enum;

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum Status {
    #[default]
    Backlog,
    Todo,
    InProgress,
    Review,
    Done,
    Archived,
}

labelled_enum!(Status, "status", {
    Backlog => "backlog",
    Todo => "todo",
    InProgress => "in-progress",
    Review => "review",
    Done => "done",
    Archived => "archived",
});

impl Status {
    /// Board zone for this status; archived tasks live outside the board.
    pub fn zone(self) -> Option<Zone> {
        match self {
            Status::Backlog => Some(Zone::Backlog),
            Status::Todo => Some(Zone::Todo),
            Status::InProgress => Some(Zone::InProgress),
            Status::Review => Some(Zone::Review),
            Status::Done => Some(Zone::Done),
            Status::Archived => None,
        }
    }

    /// Neither done nor archived.
    pub fn is_open(self) -> bool {
        !matches!(self, Status::Done | Status::Archived)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "kebab-case")]
pub enum Zone {
    Backlog,
    Todo,
    InProgress,
    Review,
    Done,
}

labelled_enum!(Zone, "zone", {
    Backlog => "backlog",
    Todo => "todo",
    InProgress => "in-progress",
    Review => "review",
    Done => "done",
});

impl Zone {
    pub fn status(self) -> Status {
        match self {
            Zone::Backlog => Status::Backlog,
            Zone::Todo => Status::Todo,
            Zone::InProgress => Status::InProgress,
            Zone::Review => Status::Review,
            Zone::Done => Status::Done,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
    Critical,
}

labelled_enum!(Priority, "priority", {
    Low => "low",
    Medium => "medium",
    High => "high",
    Critical => "critical",
});

impl Priority {
    /// Sort rank, most urgent first.
    pub fn rank(self) -> u8 {
        match self {
            Priority::Critical => 0,
            Priority::High => 1,
            Priority::Medium => 2,
            Priority::Low => 3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Subtask {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub completed: bool,
    #[serde(with = "iso_timestamp_serde")]
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    pub id: String,
    pub name: String,
    pub url: String,
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub size: u64,
    #[serde(with = "iso_timestamp_serde")]
    pub uploaded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub status: Status,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub assignee: Option<String>,
    #[serde(default, with = "iso_timestamp_serde::option")]
    pub due_date: Option<DateTime<Utc>>,
    #[serde(with = "iso_timestamp_serde")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "iso_timestamp_serde")]
    pub updated_at: DateTime<Utc>,
    #[serde(default, with = "iso_timestamp_serde::option")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub estimated_hours: Option<f64>,
    #[serde(default)]
    pub actual_hours: Option<f64>,
    #[serde(default)]
    pub subtasks: Vec<Subtask>,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
}

/// Stamps `now` into timestamps a stored or imported entry left out, on the
/// task itself and on its subtasks and attachments.
pub fn fill_missing_timestamps(entry: &mut Value, now: DateTime<Utc>) {
    let Some(task) = entry.as_object_mut() else {
        return;
    };
    let stamp = Value::String(format_timestamp(now));
    let fill = |object: &mut serde_json::Map<String, Value>, field: &str| {
        if object.get(field).is_none_or(Value::is_null) {
            object.insert(field.to_string(), stamp.clone());
        }
    };

    fill(task, "createdAt");
    fill(task, "updatedAt");
    for (list, field) in [("subtasks", "createdAt"), ("attachments", "uploadedAt")] {
        if let Some(Value::Array(items)) = task.get_mut(list) {
            for item in items.iter_mut().filter_map(Value::as_object_mut) {
                fill(item, field);
            }
        }
    }
}

/// `<prefix>-<unix millis>-<9 random chars>`.
pub fn generate_id(prefix: &str, now: DateTime<Utc>) -> String {
    let entropy = Uuid::new_v4().simple().to_string();
    format!("{prefix}-{}-{}", now.timestamp_millis(), &entropy[..9])
}

/// Drops repeated tags, keeping the first occurrence of each.
pub fn dedupe_tags(tags: Vec<String>) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(tags.len());
    for tag in tags {
        if !out.contains(&tag) {
            out.push(tag);
        }
    }
    out
}

impl Task {
    pub fn is_overdue(&self, now: DateTime<Utc>) -> bool {
        self.status.is_open() && self.due_date.is_some_and(|due| due < now)
    }

    pub fn is_due_within(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> bool {
        self.status.is_open() && self.due_date.is_some_and(|due| due >= start && due < end)
    }

    /// Merges `patch` over this task, refreshes `updated_at`, and stamps
    /// `completed_at` when the patch moves the task into done.
    pub fn apply_patch(&mut self, patch: TaskPatch, now: DateTime<Utc>) {
        let was_done = self.status == Status::Done;
        let entering_done = patch.status == Some(Status::Done) && !was_done;

        patch.merge_into(self);
        self.updated_at = now;
        if entering_done {
            self.completed_at = Some(now);
        }
    }

    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.updated_at = now;
    }

    pub fn subtask_mut(&mut self, subtask_id: &str) -> Option<&mut Subtask> {
        self.subtasks.iter_mut().find(|s| s.id == subtask_id)
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t == tag)
    }

    pub fn completed_subtasks(&self) -> usize {
        self.subtasks.iter().filter(|s| s.completed).count()
    }
}

/// Fields for a new task. Anything left unset gets the store defaults.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaskDraft {
    pub title: Option<String>,
    pub description: Option<String>,
    pub status: Option<Status>,
    pub priority: Option<Priority>,
    pub assignee: Option<String>,
    pub due_date: Option<DateTime<Utc>>,
    pub tags: Vec<String>,
    pub estimated_hours: Option<f64>,
    pub actual_hours: Option<f64>,
    pub subtasks: Vec<Subtask>,
    pub attachments: Vec<Attachment>,
}

impl TaskDraft {
    pub fn titled(title: impl Into<String>) -> Self {
        Self {
            title: Some(title.into()),
            ..Self::default()
        }
    }

    pub fn with_status(mut self, status: Status) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn with_due_date(mut self, due: DateTime<Utc>) -> Self {
        self.due_date = Some(due);
        self
    }

    pub fn with_assignee(mut self, assignee: impl Into<String>) -> Self {
        self.assignee = Some(assignee.into());
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    pub fn into_task(self, id: String, now: DateTime<Utc>) -> Task {
        let title = self
            .title
            .filter(|title| !title.trim().is_empty())
            .unwrap_or_else(|| UNTITLED_TASK.to_string());

        Task {
            id,
            title,
            description: self.description.unwrap_or_default(),
            status: self.status.unwrap_or_default(),
            priority: self.priority.unwrap_or_default(),
            assignee: self.assignee.filter(|a| !a.is_empty()),
            due_date: self.due_date,
            created_at: now,
            updated_at: now,
            completed_at: None,
            tags: dedupe_tags(self.tags),
            estimated_hours: self.estimated_hours,
            actual_hours: self.actual_hours,
            subtasks: self.subtasks,
            attachments: self.attachments,
        }
    }
}

/// Partial update. `None` leaves a field alone; for nullable fields
/// `Some(None)` clears it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaskPatch {
    pub title: Option<String>,
    pub description: Option<String>,
    pub status: Option<Status>,
    pub priority: Option<Priority>,
    pub assignee: Option<Option<String>>,
    pub due_date: Option<Option<DateTime<Utc>>>,
    pub tags: Option<Vec<String>>,
    pub estimated_hours: Option<Option<f64>>,
    pub actual_hours: Option<Option<f64>>,
    pub subtasks: Option<Vec<Subtask>>,
    pub attachments: Option<Vec<Attachment>>,
}

impl TaskPatch {
    pub fn status(status: Status) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    pub fn title(title: impl Into<String>) -> Self {
        Self {
            title: Some(title.into()),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    fn merge_into(self, task: &mut Task) {
        if let Some(title) = self.title {
            task.title = title;
        }
        if let Some(description) = self.description {
            task.description = description;
        }
        if let Some(status) = self.status {
            task.status = status;
        }
        if let Some(priority) = self.priority {
            task.priority = priority;
        }
        if let Some(assignee) = self.assignee {
            task.assignee = assignee;
        }
        if let Some(due_date) = self.due_date {
            task.due_date = due_date;
        }
        if let Some(tags) = self.tags {
            task.tags = dedupe_tags(tags);
        }
        if let Some(estimated) = self.estimated_hours {
            task.estimated_hours = estimated;
        }
        if let Some(actual) = self.actual_hours {
            task.actual_hours = actual;
        }
        if let Some(subtasks) = self.subtasks {
            task.subtasks = subtasks;
        }
        if let Some(attachments) = self.attachments {
            task.attachments = attachments;
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone, Utc};

    use super::*;

    fn at(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 16, hour, 0, 0)
            .single()
            .expect("valid time")
    }

    #[test]
    fn draft_fills_defaults() {
        let task = TaskDraft::default().into_task("task-1".to_string(), at(9));
        assert_eq!(task.title, UNTITLED_TASK);
        assert_eq!(task.status, Status::Backlog);
        assert_eq!(task.priority, Priority::Medium);
        assert_eq!(task.created_at, at(9));
        assert_eq!(task.updated_at, at(9));
        assert!(task.completed_at.is_none());
        assert!(task.tags.is_empty());
        assert!(task.subtasks.is_empty());
    }

    #[test]
    fn draft_dedupes_tags_in_order() {
        let task = TaskDraft::titled("x")
            .with_tag("b")
            .with_tag("a")
            .with_tag("b")
            .into_task("task-1".to_string(), at(9));
        assert_eq!(task.tags, vec!["b".to_string(), "a".to_string()]);
    }

    #[test]
    fn patch_stamps_completion_only_on_entering_done() {
        let mut task = TaskDraft::titled("x").into_task("task-1".to_string(), at(9));

        task.apply_patch(TaskPatch::status(Status::Done), at(10));
        assert_eq!(task.completed_at, Some(at(10)));

        task.apply_patch(TaskPatch::status(Status::Done), at(11));
        assert_eq!(task.completed_at, Some(at(10)));
        assert_eq!(task.updated_at, at(11));

        task.apply_patch(TaskPatch::status(Status::Todo), at(12));
        assert_eq!(task.completed_at, Some(at(10)));
    }

    #[test]
    fn patch_clears_nullable_fields() {
        let mut task = TaskDraft::titled("x")
            .with_assignee("sam")
            .with_due_date(at(18))
            .into_task("task-1".to_string(), at(9));

        let patch = TaskPatch {
            assignee: Some(None),
            due_date: Some(None),
            ..TaskPatch::default()
        };
        task.apply_patch(patch, at(10));
        assert!(task.assignee.is_none());
        assert!(task.due_date.is_none());
        assert_eq!(task.title, "x");
    }

    #[test]
    fn serializes_with_camel_case_and_kebab_status() {
        let task = TaskDraft::titled("Ship it")
            .with_status(Status::InProgress)
            .into_task("task-1".to_string(), at(9));
        let json = serde_json::to_value(&task).expect("serialize");
        assert_eq!(json["status"], "in-progress");
        assert_eq!(json["createdAt"], "2026-10-16T09:00:00.000Z");
        assert!(json["completedAt"].is_null());
        assert!(json["estimatedHours"].is_null());
    }

    #[test]
    fn deserializes_sparse_entries() {
        let mut entry: Value = serde_json::from_str(
            r#"{"id":"task-9","title":"Sparse","status":"review","dueDate":"2026-10-20",
                "subtasks":[{"id":"s1","title":"step"}]}"#,
        )
        .expect("json");
        assert!(serde_json::from_value::<Task>(entry.clone()).is_err());

        fill_missing_timestamps(&mut entry, at(9));
        let task: Task = serde_json::from_value(entry).expect("deserialize");
        assert_eq!(task.status, Status::Review);
        assert_eq!(task.priority, Priority::Medium);
        assert!(task.attachments.is_empty());
        assert_eq!(task.created_at, at(9));
        assert_eq!(task.updated_at, at(9));
        assert_eq!(task.subtasks[0].created_at, at(9));
        assert_eq!(
            task.due_date.map(format_timestamp).as_deref(),
            Some("2026-10-20T00:00:00.000Z")
        );
    }

    #[test]
    fn filling_keeps_timestamps_that_are_present() {
        let mut entry = serde_json::json!({
            "id": "task-1",
            "title": "x",
            "createdAt": "2026-10-01T00:00:00.000Z",
            "updatedAt": null
        });
        fill_missing_timestamps(&mut entry, at(9));
        assert_eq!(entry["createdAt"], "2026-10-01T00:00:00.000Z");
        assert_eq!(entry["updatedAt"], "2026-10-16T09:00:00.000Z");
    }

    #[test]
    fn overdue_ignores_closed_tasks() {
        let mut task = TaskDraft::titled("x")
            .with_due_date(at(8))
            .into_task("task-1".to_string(), at(7));
        assert!(task.is_overdue(at(9)));
        assert!(!task.is_overdue(at(8)));

        task.status = Status::Done;
        assert!(!task.is_overdue(at(9)));
        task.status = Status::Archived;
        assert!(!task.is_overdue(at(9) + Duration::days(1)));
    }

    #[test]
    fn labels_parse_case_insensitively() {
        assert_eq!("In-Progress".parse::<Status>(), Ok(Status::InProgress));
        assert_eq!("CRITICAL".parse::<Priority>(), Ok(Priority::Critical));
        assert!("archived".parse::<Zone>().is_err());
        assert_eq!(Zone::Review.status(), Status::Review);
        assert_eq!(Status::Archived.zone(), None);
    }

    #[test]
    fn generated_ids_carry_prefix_and_differ() {
        let a = generate_id("task", at(9));
        let b = generate_id("task", at(9));
        assert!(a.starts_with("task-"));
        assert_ne!(a, b);
    }
}
