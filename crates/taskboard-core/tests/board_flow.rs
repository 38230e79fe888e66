use std::rc::Rc;
use std::time::Duration;

use chrono::{TimeZone, Utc};
use chrono_tz::Tz;
use taskboard_core::app::{App, Host};
use taskboard_core::binding::QUOTA_EXCEEDED_MESSAGE;
use taskboard_core::filter::{DueFilter, StatusFilter};
use taskboard_core::notifications::Severity;
use taskboard_core::runtime::{Clock, ManualClock, ManualScheduler};
use taskboard_core::storage::{FileBackend, LocalStore, MemoryArea, StorageError};
use taskboard_core::task::{Priority, Status, TaskDraft, TaskPatch, Zone};
use taskboard_core::tasks::TASKS_KEY;
use taskboard_core::ui::{HeadlessDisplay, Theme};
use tempfile::tempdir;

struct Board {
    app: App,
    clock: Rc<ManualClock>,
    scheduler: Rc<ManualScheduler>,
}

fn board_on(storage: LocalStore) -> Board {
    let clock = Rc::new(ManualClock::starting_at(
        Utc.with_ymd_and_hms(2026, 10, 16, 9, 0, 0)
            .single()
            .expect("valid time"),
    ));
    let scheduler = Rc::new(ManualScheduler::new(clock.clone()));
    let mut app = App::new(Host {
        storage: Rc::new(storage),
        clock: clock.clone(),
        scheduler: scheduler.clone(),
        display: HeadlessDisplay::new(true),
        timezone: Tz::UTC,
    });
    app.start();
    Board {
        app,
        clock,
        scheduler,
    }
}

#[test]
fn completed_at_is_stamped_once() {
    let board = board_on(LocalStore::in_memory());
    let mut tasks = board.app.tasks.borrow_mut();
    let id = tasks.create(TaskDraft::titled("Ship release")).id;
    assert!(tasks.get(&id).expect("task").completed_at.is_none());

    assert!(tasks.update(&id, TaskPatch::status(Status::Done)));
    let first = tasks.get(&id).expect("task").completed_at;
    assert!(first.is_some());

    board.clock.advance(Duration::from_secs(60));
    assert!(tasks.update(&id, TaskPatch::status(Status::Done)));
    let task = tasks.get(&id).expect("task");
    assert_eq!(task.completed_at, first);
    assert!(task.updated_at > first.expect("stamped"));

    // Leaving done keeps the old stamp.
    assert!(tasks.move_task(&id, Status::Review));
    assert_eq!(tasks.get(&id).expect("task").completed_at, first);
}

#[test]
fn deleting_the_selection_clears_it() {
    let board = board_on(LocalStore::in_memory());
    let mut tasks = board.app.tasks.borrow_mut();
    let keep = tasks.create(TaskDraft::titled("keep")).id;
    let doomed = tasks.create(TaskDraft::titled("doomed")).id;

    tasks.select(Some(doomed.as_str()));
    assert!(tasks.delete(&doomed));
    assert!(tasks.selected_task_id().is_none());

    tasks.select(Some(keep.as_str()));
    let before = tasks.tasks().to_vec();
    assert!(!tasks.delete("task-0-missing"));
    assert_eq!(tasks.tasks(), before.as_slice());
    assert_eq!(tasks.selected_task_id(), Some(keep.as_str()));
}

#[test]
fn duplicate_copies_everything_but_identity() {
    let board = board_on(LocalStore::in_memory());
    let mut tasks = board.app.tasks.borrow_mut();
    let source = tasks.create(
        TaskDraft::titled("Write changelog")
            .with_priority(Priority::High)
            .with_assignee("ana")
            .with_tag("docs"),
    );
    tasks.add_subtask(&source.id, "draft");
    tasks.move_task(&source.id, Status::Done);
    let source = tasks.get(&source.id).expect("source").clone();

    board.clock.advance(Duration::from_secs(3600));
    let copy = tasks.duplicate(&source.id).expect("duplicate");

    assert_ne!(copy.id, source.id);
    assert_eq!(copy.title, "Write changelog (Copy)");
    assert_eq!(copy.status, source.status);
    assert_eq!(copy.priority, source.priority);
    assert_eq!(copy.assignee, source.assignee);
    assert_eq!(copy.tags, source.tags);
    assert_eq!(copy.subtasks, source.subtasks);
    assert!(copy.created_at > source.created_at);
    assert_eq!(copy.created_at, copy.updated_at);
    assert!(copy.completed_at.is_none());
    assert_eq!(tasks.len(), 2);
}

#[test]
fn bulk_delete_counts_only_existing_tasks() {
    let board = board_on(LocalStore::in_memory());
    let mut tasks = board.app.tasks.borrow_mut();
    let a = tasks.create(TaskDraft::titled("a")).id;
    let b = tasks.create(TaskDraft::titled("b")).id;
    let c = tasks.create(TaskDraft::titled("c")).id;

    let removed = tasks.bulk_delete(&[a, b, "task-0-nope".to_string()]);
    assert_eq!(removed, 2);
    assert_eq!(tasks.len(), 1);
    assert!(tasks.contains(&c));
}

#[test]
fn ids_stay_unique_at_the_same_instant() {
    let board = board_on(LocalStore::in_memory());
    let mut tasks = board.app.tasks.borrow_mut();
    for n in 0..50 {
        tasks.create(TaskDraft::titled(format!("task {n}")));
    }
    let mut ids: Vec<&str> = tasks.tasks().iter().map(|t| t.id.as_str()).collect();
    ids.sort_unstable();
    ids.dedup();
    assert_eq!(ids.len(), 50);
}

#[test]
fn export_then_import_round_trips_and_renames_collisions() {
    let source = board_on(LocalStore::in_memory());
    {
        let mut tasks = source.app.tasks.borrow_mut();
        tasks.create(TaskDraft::titled("one").with_tag("x"));
        let two = tasks.create(TaskDraft::titled("two")).id;
        tasks.add_subtask(&two, "step");
    }
    let export = source.app.tasks.borrow().export_all();

    let target = board_on(LocalStore::in_memory());
    let mut tasks = target.app.tasks.borrow_mut();
    let report = tasks.import_all(&export);
    assert!(report.success);
    assert_eq!(report.imported, 2);
    assert!(report.errors.is_empty());

    let original = source.app.tasks.borrow();
    let pairs = |store: &[taskboard_core::task::Task]| {
        let mut out: Vec<(String, String)> = store
            .iter()
            .map(|t| (t.id.clone(), t.title.clone()))
            .collect();
        out.sort();
        out
    };
    assert_eq!(pairs(tasks.tasks()), pairs(original.tasks()));

    let again = tasks.import_all(&export);
    assert_eq!(again.imported, 2);
    assert_eq!(tasks.len(), 4);
    let mut ids: Vec<&str> = tasks.tasks().iter().map(|t| t.id.as_str()).collect();
    ids.sort_unstable();
    ids.dedup();
    assert_eq!(ids.len(), 4);
}

#[test]
fn one_unreadable_stored_task_does_not_wipe_the_rest() {
    let area = MemoryArea::new();
    let seed = area.open_context();
    seed.set(
        TASKS_KEY,
        r#"[{"id":"a","title":"keep me","status":"todo","dueDate":"2026-10-20"},
            {"id":"b","title":"and me","status":"todo"},
            {"id":"c","title":"from the future","status":"someday"}]"#,
    )
    .expect("seed");

    let board = board_on(area.open_context());
    let mut tasks = board.app.tasks.borrow_mut();
    let titles: Vec<&str> = tasks.tasks().iter().map(|t| t.title.as_str()).collect();
    assert_eq!(titles, vec!["keep me", "and me"]);
    let b = tasks.get("b").expect("sparse task kept");
    assert_eq!(b.created_at, board.clock.now());

    tasks.create(TaskDraft::titled("new"));
    let stored = seed.get(TASKS_KEY).expect("persisted");
    assert!(stored.contains("keep me"));
    assert!(stored.contains("and me"));
    assert!(stored.contains(r#""dueDate":"2026-10-20T00:00:00.000Z""#));
    assert!(stored.contains(r#""title":"new""#));
}

#[test]
fn imported_entries_without_timestamps_use_the_board_clock() {
    let board = board_on(LocalStore::in_memory());
    board.clock.advance(Duration::from_secs(3600));
    let mut tasks = board.app.tasks.borrow_mut();

    let report = tasks.import_all(
        r#"[{"id":"x","title":"bare","subtasks":[{"id":"s","title":"step"}],
             "attachments":[{"id":"f","name":"notes.pdf","url":"blob:1"}]}]"#,
    );
    assert_eq!(report.imported, 1);
    let task = tasks.get("x").expect("imported");
    let now = board.clock.now();
    assert_eq!(task.created_at, now);
    assert_eq!(task.updated_at, now);
    assert_eq!(task.subtasks[0].created_at, now);
    assert_eq!(task.attachments[0].uploaded_at, now);
}

#[test]
fn import_rejects_bad_documents_without_touching_state() {
    let board = board_on(LocalStore::in_memory());
    let mut tasks = board.app.tasks.borrow_mut();
    tasks.create(TaskDraft::titled("existing"));

    let report = tasks.import_all("{not json");
    assert!(!report.success);
    assert_eq!(tasks.len(), 1);

    let report = tasks.import_all(r#"{"id":"x","title":"y"}"#);
    assert!(!report.success);
    assert_eq!(tasks.len(), 1);

    let report = tasks.import_all(r#"[{"title":"no id"}]"#);
    assert!(report.success);
    assert_eq!(report.imported, 0);
    assert_eq!(report.errors.len(), 1);
}

#[test]
fn quota_failure_keeps_memory_and_stored_value_apart() {
    let area = MemoryArea::with_quota(2000);
    let board = board_on(area.open_context());

    let first = board
        .app
        .tasks
        .borrow_mut()
        .create(TaskDraft::titled("fits"))
        .id;
    let stored_before = board.app.storage().get(TASKS_KEY).expect("stored");
    assert!(stored_before.contains(&first));

    board
        .app
        .tasks
        .borrow_mut()
        .create(TaskDraft::titled("x".repeat(800)));

    assert_eq!(board.app.tasks.borrow().len(), 2);
    assert_eq!(
        board.app.storage().get(TASKS_KEY).as_deref(),
        Some(stored_before.as_str())
    );
    let notes = board.app.notifications.all();
    assert!(
        notes
            .iter()
            .any(|n| n.message == QUOTA_EXCEEDED_MESSAGE && n.severity == Severity::Error)
    );

    let direct = board.app.storage().set(TASKS_KEY, &"y".repeat(1200));
    assert!(matches!(direct, Err(StorageError::QuotaExceeded { .. })));
    assert_eq!(
        board.app.storage().get(TASKS_KEY).as_deref(),
        Some(stored_before.as_str())
    );
}

#[test]
fn notifications_expire_after_five_seconds() {
    let board = board_on(LocalStore::in_memory());
    board
        .app
        .ui
        .borrow()
        .add_notification("Saved", Severity::Success);
    assert_eq!(board.app.notifications.len(), 1);

    board.clock.advance(Duration::from_millis(4999));
    board.scheduler.run_due();
    assert_eq!(board.app.notifications.len(), 1);

    board.clock.advance(Duration::from_millis(1));
    board.scheduler.run_due();
    assert!(board.app.notifications.is_empty());
}

#[test]
fn other_contexts_see_every_persisted_store() {
    let area = MemoryArea::new();
    let here = board_on(area.open_context());
    let there = board_on(area.open_context());

    let id = here
        .app
        .tasks
        .borrow_mut()
        .create(TaskDraft::titled("shared"))
        .id;
    {
        let theirs = there.app.tasks.borrow();
        assert!(theirs.contains(&id));
        assert!(theirs.last_sync_time().is_some());
    }

    here.app.ui.borrow_mut().set_theme(Theme::Light);
    assert_eq!(there.app.ui.borrow().state().theme, Theme::Light);
    assert!(!there.app.ui.borrow().is_dark_mode());

    here.app.filters.borrow_mut().set_due_date(DueFilter::Overdue);
    here.app
        .filters
        .borrow_mut()
        .set_status(StatusFilter::Completed);
    assert_eq!(
        there.app.filters.borrow().filters(),
        here.app.filters.borrow().filters()
    );

    // Selection is local and drops when the task disappears elsewhere.
    there.app.tasks.borrow_mut().select(Some(id.as_str()));
    here.app.tasks.borrow_mut().delete(&id);
    assert!(there.app.tasks.borrow().selected_task_id().is_none());
}

#[test]
fn drag_and_drop_moves_between_zones() {
    let board = board_on(LocalStore::in_memory());
    let id = board
        .app
        .tasks
        .borrow_mut()
        .create(TaskDraft::titled("drag me").with_status(Status::Todo))
        .id;

    let outcome = {
        let mut ui = board.app.ui.borrow_mut();
        ui.start_drag(&id, Zone::Todo);
        ui.drag_over(Zone::Review);
        ui.drop_on(Zone::Review).expect("drop outcome")
    };
    assert!(board.app.tasks.borrow_mut().apply_drop(&outcome));
    assert_eq!(
        board.app.tasks.borrow().get(&id).expect("task").status,
        Status::Review
    );
    assert!(!board.app.ui.borrow().drag().dragging);
    assert!(board.app.ui.borrow().state().dragged_task_id.is_none());
}

#[test]
fn file_storage_survives_a_restart() {
    let temp = tempdir().expect("tempdir");

    let id = {
        let backend = FileBackend::open(temp.path(), None).expect("open storage");
        let mut board = board_on(LocalStore::new(Rc::new(backend)));
        let id = board
            .app
            .tasks
            .borrow_mut()
            .create(TaskDraft::titled("persist me").with_tag("disk"))
            .id;
        board.app.ui.borrow_mut().set_theme(Theme::Auto);
        board.app.teardown();
        id
    };

    let backend = FileBackend::open(temp.path(), None).expect("reopen storage");
    let board = board_on(LocalStore::new(Rc::new(backend)));
    let tasks = board.app.tasks.borrow();
    let task = tasks.get(&id).expect("task survived");
    assert_eq!(task.title, "persist me");
    assert_eq!(task.tags, vec!["disk".to_string()]);
    assert_eq!(board.app.ui.borrow().state().theme, Theme::Auto);
    assert!(board.app.ui.borrow().is_watching_color_scheme());
}
