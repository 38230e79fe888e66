use std::fs;
use std::io::{self, Read};
use std::path::Path;

use anyhow::{Context, anyhow};
use regex::Regex;
use tracing::{debug, info, instrument, warn};

use crate::app::App;
use crate::cli::{
    AddArgs, Command, FilterCommand, FilterSetArgs, ListArgs, StorageCommand, SubtaskCommand,
    TagCommand, UiCommand, UpdateArgs,
};
use crate::config::Config;
use crate::datetime::parse_due;
use crate::filter::{FilterState, TaskFilter};
use crate::render::{Renderer, short_id};
use crate::task::{Status, TaskDraft, TaskPatch};
use crate::tasks::TaskStore;

#[instrument(skip(app, cfg, renderer, command))]
pub fn dispatch(
    app: &App,
    cfg: &Config,
    renderer: &Renderer,
    command: Command,
) -> anyhow::Result<()> {
    debug!(?command, "dispatching command");

    match command {
        Command::Add(args) => cmd_add(app, args),
        Command::List(args) => cmd_list(app, renderer, args),
        Command::Show { id } => cmd_show(app, renderer, &id),
        Command::Update(args) => cmd_update(app, args),
        Command::Move { id, status } => cmd_move(app, &id, status),
        Command::Delete { ids } => cmd_delete(app, &ids),
        Command::Duplicate { id } => cmd_duplicate(app, &id),
        Command::Archive { ids } => cmd_status(app, Status::Archived, &ids),
        Command::Status { status, ids } => cmd_status(app, status, &ids),
        Command::Subtask(sub) => cmd_subtask(app, sub),
        Command::Tag(sub) => cmd_tag(app, sub),
        Command::Board => {
            info!("command board");
            let tasks = app.tasks.borrow();
            renderer.print_board(&tasks.tasks_by_zone(), tasks.now())
        }
        Command::Overdue => {
            info!("command overdue");
            let tasks = app.tasks.borrow();
            renderer.print_task_table(&tasks.overdue_tasks(), tasks.now())
        }
        Command::Today => {
            info!("command today");
            let tasks = app.tasks.borrow();
            renderer.print_task_table(&tasks.tasks_due_today(), tasks.now())
        }
        Command::Stats => {
            info!("command stats");
            renderer.print_stats(&app.tasks.borrow().task_stats())
        }
        Command::Export { output } => cmd_export(app, output.as_deref()),
        Command::Import { source } => cmd_import(app, &source),
        Command::Filter(sub) => cmd_filter(app, renderer, sub),
        Command::Ui(sub) => cmd_ui(app, renderer, sub),
        Command::Storage(sub) => cmd_storage(app, cfg, sub),
    }
}

#[instrument(skip(app, args))]
fn cmd_add(app: &App, args: AddArgs) -> anyhow::Result<()> {
    info!("command add");

    let mut tasks = app.tasks.borrow_mut();
    let due_date = args
        .due
        .as_deref()
        .map(|raw| parse_due(raw, tasks.now(), tasks.timezone()))
        .transpose()?;

    let draft = TaskDraft {
        title: Some(args.title.join(" ")),
        description: args.description,
        status: args.status,
        priority: args.priority,
        assignee: args.assignee,
        due_date,
        tags: args.tags,
        estimated_hours: args.estimate,
        ..TaskDraft::default()
    };

    let task = tasks.create(draft);
    println!("Created task {} ({}).", short_id(&task.id), task.title);
    Ok(())
}

#[instrument(skip(app, renderer, args))]
fn cmd_list(app: &App, renderer: &Renderer, args: ListArgs) -> anyhow::Result<()> {
    info!("command list");

    let tasks = app.tasks.borrow();
    let filter = list_filter(app.filters.borrow().filters(), args.clone());
    debug!(active = filter.active_count(), "effective list filter");

    let now = tasks.now();
    let mut shown: Vec<_> = tasks
        .tasks()
        .iter()
        .filter(|task| filter.matches(task, now, tasks.timezone()))
        .collect();
    if args.by_priority {
        shown.sort_by_key(|task| task.priority.rank());
    }

    renderer.print_task_table(&shown, now)
}

/// Saved filters with one-off command line overrides on top. Nothing here
/// is written back.
fn list_filter(saved: &TaskFilter, args: ListArgs) -> TaskFilter {
    let mut filter = saved.clone();
    if let Some(status) = args.status {
        filter.status = status;
    }
    if let Some(priority) = args.priority {
        filter.priority = priority;
    }
    if let Some(assignee) = args.assignee {
        filter.assignee = Some(assignee);
    }
    if let Some(due) = args.due {
        filter.due_date = due;
    }
    if let Some(search) = args.search {
        filter.search_query = search;
    }
    filter
}

#[instrument(skip(app, renderer))]
fn cmd_show(app: &App, renderer: &Renderer, token: &str) -> anyhow::Result<()> {
    info!("command show");

    let mut tasks = app.tasks.borrow_mut();
    let id = resolve_task_id(&tasks, token)?;
    tasks.select(Some(id.as_str()));
    let task = tasks
        .selected_task()
        .ok_or_else(|| anyhow!("task {token} vanished"))?;
    renderer.print_task_info(task)
}

#[instrument(skip(app, args))]
fn cmd_update(app: &App, args: UpdateArgs) -> anyhow::Result<()> {
    info!("command update");

    let mut tasks = app.tasks.borrow_mut();
    let id = resolve_task_id(&tasks, &args.id)?;

    let due_date = if args.no_due {
        Some(None)
    } else {
        args.due
            .as_deref()
            .map(|raw| parse_due(raw, tasks.now(), tasks.timezone()))
            .transpose()?
            .map(Some)
    };
    let assignee = if args.no_assignee {
        Some(None)
    } else {
        args.assignee.map(Some)
    };

    let patch = TaskPatch {
        title: args.title,
        description: args.description,
        status: args.status,
        priority: args.priority,
        assignee,
        due_date,
        estimated_hours: args.estimate.map(Some),
        actual_hours: args.actual.map(Some),
        ..TaskPatch::default()
    };
    if patch.is_empty() {
        return Err(anyhow!("nothing to update; pass at least one field"));
    }

    tasks.update(&id, patch);
    println!("Updated task {}.", short_id(&id));
    Ok(())
}

#[instrument(skip(app))]
fn cmd_move(app: &App, token: &str, status: Status) -> anyhow::Result<()> {
    info!("command move");

    let mut tasks = app.tasks.borrow_mut();
    let id = resolve_task_id(&tasks, token)?;
    tasks.move_task(&id, status);
    println!("Moved task {} to {status}.", short_id(&id));
    Ok(())
}

#[instrument(skip(app, tokens))]
fn cmd_delete(app: &App, tokens: &[String]) -> anyhow::Result<()> {
    info!("command delete");

    let mut tasks = app.tasks.borrow_mut();
    let ids = resolve_task_ids(&tasks, tokens)?;
    let removed = tasks.bulk_delete(&ids);
    println!("Deleted {removed} task(s).");
    Ok(())
}

#[instrument(skip(app))]
fn cmd_duplicate(app: &App, token: &str) -> anyhow::Result<()> {
    info!("command duplicate");

    let mut tasks = app.tasks.borrow_mut();
    let id = resolve_task_id(&tasks, token)?;
    let copy = tasks
        .duplicate(&id)
        .ok_or_else(|| anyhow!("task {token} vanished"))?;
    println!("Created task {} ({}).", short_id(&copy.id), copy.title);
    Ok(())
}

#[instrument(skip(app, tokens))]
fn cmd_status(app: &App, status: Status, tokens: &[String]) -> anyhow::Result<()> {
    info!("command status");

    let mut tasks = app.tasks.borrow_mut();
    let ids = resolve_task_ids(&tasks, tokens)?;
    let changed = tasks.bulk_update_status(&ids, status);
    println!("Set {changed} task(s) to {status}.");
    Ok(())
}

#[instrument(skip(app, command))]
fn cmd_subtask(app: &App, command: SubtaskCommand) -> anyhow::Result<()> {
    info!("command subtask");

    let mut tasks = app.tasks.borrow_mut();
    match command {
        SubtaskCommand::Add { id, title } => {
            let id = resolve_task_id(&tasks, &id)?;
            let subtask = tasks
                .add_subtask(&id, &title.join(" "))
                .ok_or_else(|| anyhow!("task {id} vanished"))?;
            println!("Added subtask {}.", short_id(&subtask.id));
        }
        SubtaskCommand::Toggle { id, subtask } => {
            let id = resolve_task_id(&tasks, &id)?;
            let subtask_id = resolve_subtask_id(&tasks, &id, &subtask)?;
            tasks.toggle_subtask(&id, &subtask_id);
            println!("Toggled subtask {}.", short_id(&subtask_id));
        }
        SubtaskCommand::Delete { id, subtask } => {
            let id = resolve_task_id(&tasks, &id)?;
            let subtask_id = resolve_subtask_id(&tasks, &id, &subtask)?;
            tasks.delete_subtask(&id, &subtask_id);
            println!("Deleted subtask {}.", short_id(&subtask_id));
        }
    }
    Ok(())
}

#[instrument(skip(app, command))]
fn cmd_tag(app: &App, command: TagCommand) -> anyhow::Result<()> {
    info!("command tag");

    let mut tasks = app.tasks.borrow_mut();
    match command {
        TagCommand::Add { id, tag } => {
            let id = resolve_task_id(&tasks, &id)?;
            if tasks.add_tag(&id, &tag) {
                println!("Tagged {} with #{tag}.", short_id(&id));
            } else {
                println!("Task {} already has #{tag}.", short_id(&id));
            }
        }
        TagCommand::Remove { id, tag } => {
            let id = resolve_task_id(&tasks, &id)?;
            if tasks.remove_tag(&id, &tag) {
                println!("Removed #{tag} from {}.", short_id(&id));
            } else {
                println!("Task {} has no #{tag}.", short_id(&id));
            }
        }
    }
    Ok(())
}

#[instrument(skip(app, output))]
fn cmd_export(app: &App, output: Option<&Path>) -> anyhow::Result<()> {
    info!("command export");

    let text = app.tasks.borrow().export_all();
    match output {
        Some(path) => {
            fs::write(path, format!("{text}\n"))
                .with_context(|| format!("failed to write {}", path.display()))?;
            println!("Exported tasks to {}.", path.display());
        }
        None => println!("{text}"),
    }
    Ok(())
}

#[instrument(skip(app))]
fn cmd_import(app: &App, source: &str) -> anyhow::Result<()> {
    info!("command import");

    let mut text = String::new();
    if source == "-" {
        io::stdin()
            .read_to_string(&mut text)
            .context("failed to read import document from stdin")?;
    } else {
        text = fs::read_to_string(source).with_context(|| format!("failed to read {source}"))?;
    }

    let report = app.tasks.borrow_mut().import_all(&text);
    for error in &report.errors {
        warn!(error = %error, "import entry skipped");
        eprintln!("skipped: {error}");
    }
    if !report.success {
        return Err(anyhow!("import failed: {}", report.errors.join("; ")));
    }

    println!("Imported {} task(s).", report.imported);
    Ok(())
}

#[instrument(skip(app, renderer, command))]
fn cmd_filter(app: &App, renderer: &Renderer, command: FilterCommand) -> anyhow::Result<()> {
    info!("command filter");

    let mut filters = app.filters.borrow_mut();
    match command {
        FilterCommand::Show => {}
        FilterCommand::Set(args) => apply_filter_args(&mut filters, args),
        FilterCommand::Reset => filters.reset(),
    }
    renderer.print_filters(filters.filters(), filters.active_filters_count())
}

fn apply_filter_args(filters: &mut FilterState, args: FilterSetArgs) {
    if let Some(status) = args.status {
        filters.set_status(status);
    }
    if let Some(priority) = args.priority {
        filters.set_priority(priority);
    }
    if args.no_assignee {
        filters.set_assignee(None);
    } else if let Some(assignee) = args.assignee {
        filters.set_assignee(Some(assignee));
    }
    if let Some(due) = args.due {
        filters.set_due_date(due);
    }
    if let Some(search) = args.search {
        if search.is_empty() {
            filters.clear_search();
        } else {
            filters.set_search_query(search);
        }
    }
}

#[instrument(skip(app, renderer, command))]
fn cmd_ui(app: &App, renderer: &Renderer, command: UiCommand) -> anyhow::Result<()> {
    info!("command ui");

    let mut ui = app.ui.borrow_mut();
    match command {
        UiCommand::Show => {}
        UiCommand::Theme { theme } => ui.set_theme(theme),
        UiCommand::View { mode } => ui.set_view_mode(mode),
        UiCommand::Density { density } => ui.set_density(density),
        UiCommand::Sidebar { state } => ui.set_sidebar_state(state),
        UiCommand::Zone { zone } => ui.set_selected_zone(zone),
    }
    renderer.print_ui_state(ui.state(), ui.is_dark_mode())
}

#[instrument(skip(app, cfg, command))]
fn cmd_storage(app: &App, cfg: &Config, command: StorageCommand) -> anyhow::Result<()> {
    info!("command storage");

    let storage = app.storage();
    match command {
        StorageCommand::Info { probe_quota } => {
            println!("available   {}", storage.is_available());
            println!("keys        {}", storage.keys().len());
            println!("used        {} bytes", storage.estimate_total_size());
            match cfg.storage_quota()? {
                Some(bytes) => println!("quota       {bytes} bytes"),
                None => println!("quota       unlimited"),
            }
            if probe_quota {
                println!("probed      {} bytes", storage.estimate_quota());
            }
        }
        StorageCommand::Clear { pattern } => {
            let regex =
                Regex::new(&pattern).with_context(|| format!("invalid pattern: {pattern}"))?;
            let removed = storage.remove_matching(&regex);
            println!("Removed {removed} key(s).");
        }
    }
    Ok(())
}

/// Exact id, or a unique id suffix (the short id printed in tables).
fn resolve_task_id(tasks: &TaskStore, token: &str) -> anyhow::Result<String> {
    let token = token.trim();
    if tasks.contains(token) {
        return Ok(token.to_string());
    }
    if token.is_empty() {
        return Err(anyhow!("empty task id"));
    }

    unique_match(
        tasks.tasks().iter().map(|task| task.id.as_str()),
        token,
        "task",
    )
}

fn resolve_task_ids(tasks: &TaskStore, tokens: &[String]) -> anyhow::Result<Vec<String>> {
    tokens
        .iter()
        .map(|token| resolve_task_id(tasks, token))
        .collect()
}

fn resolve_subtask_id(tasks: &TaskStore, task_id: &str, token: &str) -> anyhow::Result<String> {
    let task = tasks
        .get(task_id)
        .ok_or_else(|| anyhow!("no task with id {task_id}"))?;
    let token = token.trim();
    if let Some(subtask) = task.subtasks.iter().find(|s| s.id == token) {
        return Ok(subtask.id.clone());
    }
    if token.is_empty() {
        return Err(anyhow!("empty subtask id"));
    }

    unique_match(task.subtasks.iter().map(|s| s.id.as_str()), token, "subtask")
}

fn unique_match<'a>(
    ids: impl Iterator<Item = &'a str>,
    token: &str,
    what: &str,
) -> anyhow::Result<String> {
    let matches: Vec<&str> = ids.filter(|id| id.ends_with(token)).collect();
    match matches.as_slice() {
        [] => Err(anyhow!("no {what} matches '{token}'")),
        [only] => Ok((*only).to_string()),
        many => Err(anyhow!(
            "'{token}' is ambiguous; matches {} {what}s",
            many.len()
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn suffix_matching_requires_a_unique_hit() {
        let ids = ["task-1-abc", "task-2-abd", "task-3-xyz"];
        assert_eq!(
            unique_match(ids.into_iter(), "xyz", "task").expect("unique"),
            "task-3-xyz"
        );
        assert!(unique_match(ids.into_iter(), "zzz", "task").is_err());

        let ids = ["task-1-aaa", "task-2-baa"];
        let err = unique_match(ids.into_iter(), "aa", "task").expect_err("ambiguous");
        assert!(err.to_string().contains("ambiguous"));
    }

    #[test]
    fn list_overrides_do_not_touch_saved_filters() {
        let saved = TaskFilter {
            search_query: "deploy".to_string(),
            ..TaskFilter::default()
        };
        let filter = list_filter(
            &saved,
            ListArgs {
                assignee: Some("ana".to_string()),
                ..ListArgs::default()
            },
        );
        assert_eq!(filter.search_query, "deploy");
        assert_eq!(filter.assignee.as_deref(), Some("ana"));
        assert_eq!(saved.assignee, None);
    }
}
