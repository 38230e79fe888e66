use std::ffi::OsString;
use std::io::IsTerminal;
use std::path::PathBuf;

use anyhow::anyhow;
use clap::{ArgAction, Args, Parser, Subcommand};
use tracing::debug;
use tracing_subscriber::EnvFilter;

use crate::filter::{DueFilter, PriorityFilter, StatusFilter};
use crate::task::{Priority, Status, Zone};
use crate::ui::{Density, SidebarState, Theme, ViewMode};

#[derive(Debug, Clone)]
pub struct PreprocessedArgs {
    pub cleaned_args: Vec<OsString>,
    pub rc_overrides: Vec<(String, String)>,
}

#[derive(Debug, Clone)]
pub struct KeyVal {
    pub key: String,
    pub value: String,
}

impl std::str::FromStr for KeyVal {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (k, v) = s
            .split_once('=')
            .ok_or_else(|| anyhow!("expected KEY=VALUE, got: {s}"))?;
        Ok(Self {
            key: k.trim().to_string(),
            value: v.trim().to_string(),
        })
    }
}

#[derive(Parser, Debug, Clone)]
#[command(
    name = "taskboard",
    version,
    about = "Taskboard: a local-first kanban task board",
    disable_help_subcommand = true
)]
pub struct GlobalCli {
    #[arg(short = 'v', long = "verbose", action = ArgAction::Count, global = true)]
    pub verbose: u8,

    #[arg(short = 'q', long = "quiet", action = ArgAction::Count, global = true)]
    pub quiet: u8,

    #[arg(
        long = "rc",
        value_parser = clap::builder::ValueParser::new(|s: &str| s.parse::<KeyVal>()),
        action = ArgAction::Append,
        global = true
    )]
    pub rc_overrides: Vec<KeyVal>,

    #[arg(long = "config", global = true)]
    pub config: Option<PathBuf>,

    #[arg(long = "data", global = true)]
    pub data: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Create a task
    Add(AddArgs),
    /// List tasks through the saved filters
    List(ListArgs),
    /// Show one task in full
    Show { id: String },
    /// Change fields of a task
    Update(UpdateArgs),
    /// Move a task to another status
    Move { id: String, status: Status },
    /// Delete tasks
    Delete {
        #[arg(required = true)]
        ids: Vec<String>,
    },
    /// Copy a task
    Duplicate { id: String },
    /// Archive tasks
    Archive {
        #[arg(required = true)]
        ids: Vec<String>,
    },
    /// Set the status of several tasks
    Status {
        status: Status,
        #[arg(required = true)]
        ids: Vec<String>,
    },
    #[command(subcommand)]
    Subtask(SubtaskCommand),
    #[command(subcommand)]
    Tag(TagCommand),
    /// Tasks grouped by zone
    Board,
    /// Open tasks past their due date
    Overdue,
    /// Open tasks due today
    Today,
    /// Board statistics
    Stats,
    /// Write all tasks as JSON
    Export {
        #[arg(short = 'o', long = "output")]
        output: Option<PathBuf>,
    },
    /// Import tasks from a JSON export (`-` reads stdin)
    Import { source: String },
    #[command(subcommand)]
    Filter(FilterCommand),
    #[command(subcommand)]
    Ui(UiCommand),
    #[command(subcommand)]
    Storage(StorageCommand),
}

#[derive(Args, Debug, Clone)]
pub struct AddArgs {
    #[arg(required = true, num_args = 1..)]
    pub title: Vec<String>,
    #[arg(short = 'd', long)]
    pub description: Option<String>,
    #[arg(short = 's', long)]
    pub status: Option<Status>,
    #[arg(short = 'p', long)]
    pub priority: Option<Priority>,
    #[arg(short = 'a', long)]
    pub assignee: Option<String>,
    #[arg(long)]
    pub due: Option<String>,
    #[arg(short = 't', long = "tag")]
    pub tags: Vec<String>,
    #[arg(long)]
    pub estimate: Option<f64>,
}

#[derive(Args, Debug, Clone, Default)]
pub struct ListArgs {
    #[arg(long)]
    pub status: Option<StatusFilter>,
    #[arg(long)]
    pub priority: Option<PriorityFilter>,
    #[arg(long)]
    pub assignee: Option<String>,
    #[arg(long)]
    pub due: Option<DueFilter>,
    #[arg(long)]
    pub search: Option<String>,
    #[arg(long = "by-priority")]
    pub by_priority: bool,
}

#[derive(Args, Debug, Clone)]
pub struct UpdateArgs {
    pub id: String,
    #[arg(long)]
    pub title: Option<String>,
    #[arg(short = 'd', long)]
    pub description: Option<String>,
    #[arg(short = 's', long)]
    pub status: Option<Status>,
    #[arg(short = 'p', long)]
    pub priority: Option<Priority>,
    #[arg(short = 'a', long, conflicts_with = "no_assignee")]
    pub assignee: Option<String>,
    #[arg(long = "no-assignee")]
    pub no_assignee: bool,
    #[arg(long, conflicts_with = "no_due")]
    pub due: Option<String>,
    #[arg(long = "no-due")]
    pub no_due: bool,
    #[arg(long)]
    pub estimate: Option<f64>,
    #[arg(long)]
    pub actual: Option<f64>,
}

#[derive(Subcommand, Debug, Clone)]
pub enum SubtaskCommand {
    /// Append a subtask
    Add {
        id: String,
        #[arg(required = true)]
        title: Vec<String>,
    },
    /// Flip a subtask's completed flag
    Toggle { id: String, subtask: String },
    /// Remove a subtask
    Delete { id: String, subtask: String },
}

#[derive(Subcommand, Debug, Clone)]
pub enum TagCommand {
    Add { id: String, tag: String },
    Remove { id: String, tag: String },
}

#[derive(Subcommand, Debug, Clone)]
pub enum FilterCommand {
    /// Print the saved filters
    Show,
    /// Change saved filters
    Set(FilterSetArgs),
    /// Restore every filter to "all"
    Reset,
}

#[derive(Args, Debug, Clone)]
pub struct FilterSetArgs {
    #[arg(long)]
    pub status: Option<StatusFilter>,
    #[arg(long)]
    pub priority: Option<PriorityFilter>,
    #[arg(long, conflicts_with = "no_assignee")]
    pub assignee: Option<String>,
    #[arg(long = "no-assignee")]
    pub no_assignee: bool,
    #[arg(long)]
    pub due: Option<DueFilter>,
    #[arg(long)]
    pub search: Option<String>,
}

#[derive(Subcommand, Debug, Clone)]
pub enum UiCommand {
    /// Print the saved UI preferences
    Show,
    Theme { theme: Theme },
    View { mode: ViewMode },
    Density { density: Density },
    Sidebar { state: SidebarState },
    /// Select a zone, or clear the selection when omitted
    Zone { zone: Option<Zone> },
}

#[derive(Subcommand, Debug, Clone)]
pub enum StorageCommand {
    /// Usage and availability of the storage file
    Info {
        /// Also probe the quota by writing growing payloads
        #[arg(long = "probe-quota")]
        probe_quota: bool,
    },
    /// Remove every key matching a regular expression
    Clear { pattern: String },
}

pub fn init_tracing(verbose: u8, quiet: u8) -> anyhow::Result<()> {
    let default_level = if quiet >= 2 {
        "error"
    } else if quiet == 1 {
        "warn"
    } else if verbose >= 3 {
        "trace"
    } else if verbose == 2 {
        "debug"
    } else if verbose == 1 {
        "info"
    } else {
        "warn"
    };

    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_level))
        .map_err(|e| anyhow!("invalid RUST_LOG / log filter: {e}"))?;

    let init_result = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .with_level(true)
        .with_writer(std::io::stderr)
        .with_ansi(std::io::stderr().is_terminal())
        .try_init();

    if let Err(err) = init_result {
        debug!(error = %err, "tracing subscriber already set, continuing");
    }

    Ok(())
}

/// Pulls positional `rc.key=value` (or `rc.key:value`) overrides out of the
/// argument list before clap sees it.
#[tracing::instrument(skip_all)]
pub fn preprocess_args(raw: &[OsString]) -> PreprocessedArgs {
    let mut cleaned = Vec::with_capacity(raw.len());
    let mut overrides: Vec<(String, String)> = Vec::new();

    let mut iter = raw.iter().cloned();
    if let Some(bin) = iter.next() {
        cleaned.push(bin);
    }

    for arg in iter {
        let s = arg.to_string_lossy();
        if let Some(rest) = s.strip_prefix("rc.") {
            let parsed = rest.split_once('=').or_else(|| rest.split_once(':'));
            if let Some((k, v)) = parsed {
                debug!(key = %k, value = %v, "captured positional rc override");
                overrides.push((format!("rc.{k}"), v.to_string()));
                continue;
            }
        }

        cleaned.push(arg);
    }

    PreprocessedArgs {
        cleaned_args: cleaned,
        rc_overrides: overrides,
    }
}
