use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use serde::Serialize;

use crate::datetime::today_window;
use crate::task::{Status, Task, Zone};

#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TaskStats {
    pub total: usize,
    pub completed: usize,
    pub in_progress: usize,
    pub overdue: usize,
    /// Whole percent of non-archived tasks that are done.
    pub completion_rate: u32,
}

/// Non-archived tasks bucketed by zone. Every zone has a bucket, possibly
/// empty; order inside a bucket is collection order.
pub fn by_zone(tasks: &[Task]) -> BTreeMap<Zone, Vec<&Task>> {
    let mut zones: BTreeMap<Zone, Vec<&Task>> =
        Zone::ALL.iter().map(|zone| (*zone, Vec::new())).collect();
    for task in tasks {
        if let Some(zone) = task.status.zone()
            && let Some(bucket) = zones.get_mut(&zone)
        {
            bucket.push(task);
        }
    }
    zones
}

/// Most urgent first; ties keep collection order.
pub fn by_priority(tasks: &[Task]) -> Vec<&Task> {
    let mut sorted: Vec<&Task> = tasks.iter().collect();
    sorted.sort_by_key(|task| task.priority.rank());
    sorted
}

pub fn overdue(tasks: &[Task], now: DateTime<Utc>) -> Vec<&Task> {
    tasks.iter().filter(|task| task.is_overdue(now)).collect()
}

pub fn due_today<'a>(tasks: &'a [Task], now: DateTime<Utc>, tz: &Tz) -> Vec<&'a Task> {
    let (start, end) = today_window(now, tz);
    tasks
        .iter()
        .filter(|task| task.is_due_within(start, end))
        .collect()
}

pub fn stats(tasks: &[Task], now: DateTime<Utc>) -> TaskStats {
    let total = tasks
        .iter()
        .filter(|t| t.status != Status::Archived)
        .count();
    let completed = tasks.iter().filter(|t| t.status == Status::Done).count();
    let in_progress = tasks
        .iter()
        .filter(|t| t.status == Status::InProgress)
        .count();
    let overdue = tasks.iter().filter(|t| t.is_overdue(now)).count();

    let completion_rate = if total == 0 {
        0
    } else {
        (completed as f64 / total as f64 * 100.0).round() as u32
    };

    TaskStats {
        total,
        completed,
        in_progress,
        overdue,
        completion_rate,
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone};

    use super::*;
    use crate::task::{Priority, TaskDraft};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 16, 15, 0, 0)
            .single()
            .expect("valid time")
    }

    fn task(id: &str, draft: TaskDraft) -> Task {
        draft.into_task(id.to_string(), now())
    }

    #[test]
    fn stats_match_the_board() {
        let now = now();
        let tasks = vec![
            task("a", TaskDraft::titled("a").with_status(Status::Done)),
            task("b", TaskDraft::titled("b").with_status(Status::Done)),
            task("c", TaskDraft::titled("c").with_status(Status::InProgress)),
            task(
                "d",
                TaskDraft::titled("d").with_due_date(now - Duration::days(1)),
            ),
            task("e", TaskDraft::titled("e").with_status(Status::Archived)),
        ];

        assert_eq!(
            stats(&tasks, now),
            TaskStats {
                total: 4,
                completed: 2,
                in_progress: 1,
                overdue: 1,
                completion_rate: 50,
            }
        );
        assert_eq!(stats(&[], now), TaskStats::default());
    }

    #[test]
    fn completion_rate_rounds() {
        let tasks = vec![
            task("a", TaskDraft::titled("a").with_status(Status::Done)),
            task("b", TaskDraft::titled("b").with_status(Status::Done)),
            task("c", TaskDraft::titled("c")),
        ];
        assert_eq!(stats(&tasks, now()).completion_rate, 67);
    }

    #[test]
    fn priority_sort_is_stable() {
        let tasks = vec![
            task("low", TaskDraft::titled("low").with_priority(Priority::Low)),
            task("c1", TaskDraft::titled("c1").with_priority(Priority::Critical)),
            task("med", TaskDraft::titled("med").with_priority(Priority::Medium)),
            task("c2", TaskDraft::titled("c2").with_priority(Priority::Critical)),
        ];
        let ids: Vec<&str> = by_priority(&tasks).iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, vec!["c1", "c2", "med", "low"]);
    }

    #[test]
    fn zones_skip_archived_and_always_exist() {
        let tasks = vec![
            task("a", TaskDraft::titled("a").with_status(Status::Review)),
            task("b", TaskDraft::titled("b").with_status(Status::Archived)),
            task("c", TaskDraft::titled("c").with_status(Status::Review)),
        ];
        let zones = by_zone(&tasks);
        assert_eq!(zones.len(), 5);
        assert!(zones[&Zone::Backlog].is_empty());
        let review: Vec<&str> = zones[&Zone::Review].iter().map(|t| t.id.as_str()).collect();
        assert_eq!(review, vec!["a", "c"]);
    }

    #[test]
    fn due_today_uses_the_local_day() {
        let tz: Tz = "America/New_York".parse().expect("tz");
        // 15:00 UTC is 11:00 in New York; local day ends at 04:00 UTC.
        let now = now();
        let tonight = Utc.with_ymd_and_hms(2026, 10, 17, 3, 30, 0).single().expect("time");
        let tomorrow = Utc.with_ymd_and_hms(2026, 10, 17, 4, 0, 0).single().expect("time");
        let earlier = Utc.with_ymd_and_hms(2026, 10, 16, 4, 0, 0).single().expect("time");

        let tasks = vec![
            task("tonight", TaskDraft::titled("t").with_due_date(tonight)),
            task("tomorrow", TaskDraft::titled("t").with_due_date(tomorrow)),
            task("morning", TaskDraft::titled("t").with_due_date(earlier)),
            task(
                "done",
                TaskDraft::titled("t")
                    .with_due_date(tonight)
                    .with_status(Status::Done),
            ),
        ];
        let ids: Vec<&str> = due_today(&tasks, now, &tz)
            .iter()
            .map(|t| t.id.as_str())
            .collect();
        assert_eq!(ids, vec!["tonight", "morning"]);

        let late: Vec<&str> = overdue(&tasks, now).iter().map(|t| t.id.as_str()).collect();
        assert_eq!(late, vec!["morning"]);
    }
}
