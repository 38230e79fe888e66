use std::rc::Rc;

use chrono::{
  DateTime,
  Utc
};
use chrono_tz::Tz;
use serde::{
  Deserialize,
  Serialize
};
use tracing::trace;

use crate::binding::PersistedCell;
use crate::datetime::{
  today_window,
  window_from_today
};
use crate::notifications::NotificationSink;
use crate::storage::LocalStore;
use crate::task::{
  Priority,
  Status,
  Task,
  labelled_enum
};

pub const FILTERS_KEY: &str =
  "task-filters";

const WEEK_DAYS: u64 = 7;
const MONTH_DAYS: u64 = 30;

#[derive(
  Debug,
  Clone,
  Copy,
  Default,
  Serialize,
  Deserialize,
  PartialEq,
  Eq
)]
#[serde(rename_all = "lowercase")]
pub enum StatusFilter {
  #[default]
  All,
  Active,
  Completed,
  Archived
}

labelled_enum!(StatusFilter, "status filter", {
  All => "all",
  Active => "active",
  Completed => "completed",
  Archived => "archived",
});

#[derive(
  Debug,
  Clone,
  Copy,
  Default,
  Serialize,
  Deserialize,
  PartialEq,
  Eq
)]
#[serde(rename_all = "lowercase")]
pub enum PriorityFilter {
  #[default]
  All,
  High,
  Medium,
  Low
}

labelled_enum!(PriorityFilter, "priority filter", {
  All => "all",
  High => "high",
  Medium => "medium",
  Low => "low",
});

#[derive(
  Debug,
  Clone,
  Copy,
  Default,
  Serialize,
  Deserialize,
  PartialEq,
  Eq
)]
#[serde(rename_all = "lowercase")]
pub enum DueFilter {
  #[default]
  All,
  Overdue,
  Today,
  Week,
  Month
}

labelled_enum!(DueFilter, "due filter", {
  All => "all",
  Overdue => "overdue",
  Today => "today",
  Week => "week",
  Month => "month",
});

#[derive(
  Debug,
  Clone,
  Default,
  Serialize,
  Deserialize,
  PartialEq,
  Eq
)]
#[serde(
  rename_all = "camelCase",
  default
)]
pub struct TaskFilter {
  pub status:       StatusFilter,
  pub priority:     PriorityFilter,
  pub assignee:     Option<String>,
  pub due_date:     DueFilter,
  pub search_query: String
}

impl TaskFilter {
  /// Each field away from its default
  /// counts once. Empty assignee and
  /// query count as unset.
  pub fn active_count(&self) -> usize {
    [
      self.status != StatusFilter::All,
      self.priority
        != PriorityFilter::All,
      self
        .assignee
        .as_deref()
        .is_some_and(|a| !a.is_empty()),
      self.due_date != DueFilter::All,
      !self.search_query.is_empty()
    ]
    .into_iter()
    .filter(|set| *set)
    .count()
  }

  pub fn matches(
    &self,
    task: &Task,
    now: DateTime<Utc>,
    tz: &Tz
  ) -> bool {
    let ok = status_matches(
      self.status,
      task.status
    ) && priority_matches(
      self.priority,
      task.priority
    ) && assignee_matches(
      self.assignee.as_deref(),
      task
    ) && due_matches(
      self.due_date,
      task,
      now,
      tz
    ) && search_matches(
      &self.search_query,
      task
    );

    trace!(
      task = %task.id,
      matched = ok,
      "evaluated task filter"
    );
    ok
  }
}

fn status_matches(
  filter: StatusFilter,
  status: Status
) -> bool {
  match filter {
    | StatusFilter::All => true,
    | StatusFilter::Active => {
      status.is_open()
    }
    | StatusFilter::Completed => {
      status == Status::Done
    }
    | StatusFilter::Archived => {
      status == Status::Archived
    }
  }
}

fn priority_matches(
  filter: PriorityFilter,
  priority: Priority
) -> bool {
  match filter {
    | PriorityFilter::All => true,
    | PriorityFilter::High => {
      priority == Priority::High
    }
    | PriorityFilter::Medium => {
      priority == Priority::Medium
    }
    | PriorityFilter::Low => {
      priority == Priority::Low
    }
  }
}

fn assignee_matches(
  filter: Option<&str>,
  task: &Task
) -> bool {
  match filter {
    | None | Some("") => true,
    | Some(wanted) => {
      task.assignee.as_deref()
        == Some(wanted)
    }
  }
}

fn due_matches(
  filter: DueFilter,
  task: &Task,
  now: DateTime<Utc>,
  tz: &Tz
) -> bool {
  match filter {
    | DueFilter::All => true,
    | DueFilter::Overdue => {
      task.is_overdue(now)
    }
    | DueFilter::Today => {
      let (start, end) =
        today_window(now, tz);
      task.is_due_within(start, end)
    }
    | DueFilter::Week => {
      let (start, end) =
        window_from_today(
          now, tz, WEEK_DAYS
        );
      task.is_due_within(start, end)
    }
    | DueFilter::Month => {
      let (start, end) =
        window_from_today(
          now, tz, MONTH_DAYS
        );
      task.is_due_within(start, end)
    }
  }
}

fn search_matches(
  query: &str,
  task: &Task
) -> bool {
  let needle =
    query.trim().to_lowercase();
  if needle.is_empty() {
    return true;
  }

  task.title.to_lowercase().contains(&needle)
    || task
      .description
      .to_lowercase()
      .contains(&needle)
    || task.tags.iter().any(|tag| {
      tag.to_lowercase().contains(&needle)
    })
}

/// Filter criteria with their own
/// persistence key.
pub struct FilterState {
  filters: PersistedCell<TaskFilter>
}

impl FilterState {
  pub fn new(
    store: Rc<LocalStore>,
    sink: Rc<dyn NotificationSink>
  ) -> Self {
    let filters = PersistedCell::load(
      store,
      FILTERS_KEY,
      TaskFilter::default()
    )
    .with_sink(sink);

    Self {
      filters
    }
  }

  pub fn filters(&self) -> &TaskFilter {
    self.filters.get()
  }

  pub fn active_filters_count(
    &self
  ) -> usize {
    self.filters().active_count()
  }

  pub fn has_active_filters(
    &self
  ) -> bool {
    self.active_filters_count() > 0
  }

  pub fn set_status(
    &mut self,
    status: StatusFilter
  ) {
    self.filters.update(|f| {
      f.status = status
    });
  }

  pub fn set_priority(
    &mut self,
    priority: PriorityFilter
  ) {
    self.filters.update(|f| {
      f.priority = priority
    });
  }

  pub fn set_assignee(
    &mut self,
    assignee: Option<String>
  ) {
    self.filters.update(|f| {
      f.assignee = assignee
    });
  }

  pub fn set_due_date(
    &mut self,
    due: DueFilter
  ) {
    self.filters.update(|f| {
      f.due_date = due
    });
  }

  pub fn set_search_query(
    &mut self,
    query: impl Into<String>
  ) {
    let query = query.into();
    self.filters.update(|f| {
      f.search_query = query
    });
  }

  pub fn clear_search(&mut self) {
    self.filters.update(|f| {
      f.search_query.clear()
    });
  }

  pub fn reset(&mut self) {
    self
      .filters
      .replace(TaskFilter::default());
  }

  /// Re-reads the stored criteria; keeps
  /// the current ones when the stored
  /// value does not decode.
  pub fn reload(&mut self) -> bool {
    self.filters.reload()
  }

  pub fn apply_external(
    &mut self,
    filters: TaskFilter
  ) {
    self
      .filters
      .replace_from_external(filters);
  }

  pub fn teardown(&mut self) {
    self.filters.teardown();
  }

  /// Matching tasks in input order.
  #[tracing::instrument(skip(
    self, tasks, now, tz
  ))]
  pub fn apply<'a>(
    &self,
    tasks: &'a [Task],
    now: DateTime<Utc>,
    tz: &Tz
  ) -> Vec<&'a Task> {
    let filter = self.filters();
    tasks
      .iter()
      .filter(|task| {
        filter.matches(task, now, tz)
      })
      .collect()
  }
}
