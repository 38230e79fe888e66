use std::collections::BTreeMap;
use std::io::{self, IsTerminal, Write};

use anyhow::anyhow;
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use unicode_width::UnicodeWidthStr;

use crate::config::Config;
use crate::datetime::{format_local_date, format_timestamp};
use crate::filter::TaskFilter;
use crate::notifications::{Notification, Severity};
use crate::task::{Priority, Task, Zone};
use crate::tasks::TaskStats;
use crate::ui::UiState;

#[derive(Debug, Clone)]
pub struct Renderer {
    color: bool,
    tz: Tz,
}

/// Last dash-separated segment of an id; what the tables show.
pub fn short_id(id: &str) -> &str {
    id.rsplit('-').next().unwrap_or(id)
}

impl Renderer {
    pub fn new(cfg: &Config) -> anyhow::Result<Self> {
        let color_cfg = cfg.get("color").unwrap_or_else(|| "on".to_string());
        let color = match color_cfg.to_ascii_lowercase().as_str() {
            "on" | "yes" | "true" | "1" => true,
            "off" | "no" | "false" | "0" => false,
            other => return Err(anyhow!("invalid color setting: {other}")),
        };

        Ok(Self {
            color,
            tz: cfg.timezone(),
        })
    }

    #[tracing::instrument(skip(self, tasks, now))]
    pub fn print_task_table(&self, tasks: &[&Task], now: DateTime<Utc>) -> anyhow::Result<()> {
        if tasks.is_empty() {
            println!("No matching tasks.");
            return Ok(());
        }

        let headers = ["ID", "Status", "Pri", "Due", "Assignee", "Title", "Tags"]
            .map(str::to_string)
            .to_vec();
        let rows = tasks.iter().map(|task| self.task_row(task, now)).collect();

        write_table(io::stdout().lock(), headers, rows)
    }

    fn task_row(&self, task: &Task, now: DateTime<Utc>) -> Vec<String> {
        let due = task
            .due_date
            .map(|date| format_local_date(date, &self.tz))
            .unwrap_or_default();
        let due = if task.is_overdue(now) {
            self.paint(&due, "31")
        } else {
            due
        };

        let title = if task.subtasks.is_empty() {
            task.title.clone()
        } else {
            format!(
                "{} [{}/{}]",
                task.title,
                task.completed_subtasks(),
                task.subtasks.len()
            )
        };

        vec![
            self.paint(short_id(&task.id), "33"),
            task.status.to_string(),
            self.priority_label(task.priority),
            due,
            task.assignee.clone().unwrap_or_default(),
            title,
            task.tags
                .iter()
                .map(|tag| format!("#{tag}"))
                .collect::<Vec<_>>()
                .join(" "),
        ]
    }

    #[tracing::instrument(skip(self, task))]
    pub fn print_task_info(&self, task: &Task) -> anyhow::Result<()> {
        let mut out = io::stdout().lock();

        writeln!(out, "id          {}", task.id)?;
        writeln!(out, "title       {}", task.title)?;
        if !task.description.is_empty() {
            writeln!(out, "description {}", task.description)?;
        }
        writeln!(out, "status      {}", task.status)?;
        writeln!(out, "priority    {}", task.priority)?;
        if let Some(assignee) = &task.assignee {
            writeln!(out, "assignee    {assignee}")?;
        }
        if let Some(due) = task.due_date {
            writeln!(out, "due         {}", self.local_time(due))?;
        }
        if !task.tags.is_empty() {
            writeln!(out, "tags        {}", task.tags.join(", "))?;
        }
        if let Some(hours) = task.estimated_hours {
            writeln!(out, "estimated   {hours}h")?;
        }
        if let Some(hours) = task.actual_hours {
            writeln!(out, "actual      {hours}h")?;
        }
        writeln!(out, "created     {}", self.local_time(task.created_at))?;
        writeln!(out, "updated     {}", self.local_time(task.updated_at))?;
        if let Some(completed) = task.completed_at {
            writeln!(out, "completed   {}", self.local_time(completed))?;
        }

        for subtask in &task.subtasks {
            let mark = if subtask.completed { "x" } else { " " };
            writeln!(
                out,
                "  [{mark}] {} {}",
                self.paint(short_id(&subtask.id), "33"),
                subtask.title
            )?;
        }
        for attachment in &task.attachments {
            writeln!(
                out,
                "  @ {} ({}, {} bytes) {}",
                attachment.name, attachment.kind, attachment.size, attachment.url
            )?;
        }

        Ok(())
    }

    #[tracing::instrument(skip(self, zones, now))]
    pub fn print_board(
        &self,
        zones: &BTreeMap<Zone, Vec<&Task>>,
        now: DateTime<Utc>,
    ) -> anyhow::Result<()> {
        let mut out = io::stdout().lock();
        for (zone, tasks) in zones {
            let heading = format!("{} ({})", zone.as_str().to_uppercase(), tasks.len());
            writeln!(out, "{}", self.paint(&heading, "1"))?;
            for task in tasks {
                let overdue = if task.is_overdue(now) {
                    self.paint(" overdue", "31")
                } else {
                    String::new()
                };
                writeln!(
                    out,
                    "  {} {} {}{}",
                    self.paint(short_id(&task.id), "33"),
                    self.priority_label(task.priority),
                    task.title,
                    overdue
                )?;
            }
        }
        Ok(())
    }

    pub fn print_stats(&self, stats: &TaskStats) -> anyhow::Result<()> {
        let mut out = io::stdout().lock();
        writeln!(out, "total       {}", stats.total)?;
        writeln!(out, "completed   {}", stats.completed)?;
        writeln!(out, "in progress {}", stats.in_progress)?;
        writeln!(out, "overdue     {}", stats.overdue)?;
        writeln!(out, "completion  {}%", stats.completion_rate)?;
        Ok(())
    }

    pub fn print_filters(&self, filters: &TaskFilter, active: usize) -> anyhow::Result<()> {
        let mut out = io::stdout().lock();
        writeln!(out, "status      {}", filters.status)?;
        writeln!(out, "priority    {}", filters.priority)?;
        writeln!(
            out,
            "assignee    {}",
            filters.assignee.as_deref().unwrap_or("-")
        )?;
        writeln!(out, "due         {}", filters.due_date)?;
        writeln!(out, "search      {}", filters.search_query)?;
        writeln!(out, "active      {active}")?;
        Ok(())
    }

    pub fn print_ui_state(&self, state: &UiState, dark: bool) -> anyhow::Result<()> {
        let mut out = io::stdout().lock();
        let mode = if dark { "dark" } else { "light" };
        writeln!(out, "view        {}", state.view_mode)?;
        writeln!(out, "theme       {} ({mode})", state.theme)?;
        writeln!(out, "density     {}", state.density)?;
        writeln!(out, "sidebar     {}", state.sidebar)?;
        writeln!(
            out,
            "zone        {}",
            state.selected_zone.map(|z| z.as_str()).unwrap_or("-")
        )?;
        let filters = &state.active_filters;
        writeln!(
            out,
            "filters     status={} priority={} assignee={}",
            filters.status,
            filters.priority,
            filters.assignee.as_deref().unwrap_or("-")
        )?;
        Ok(())
    }

    /// Notifications go to stderr so command output stays pipeable.
    pub fn print_notifications(&self, notifications: &[Notification]) -> anyhow::Result<()> {
        let mut err = io::stderr().lock();
        for notification in notifications {
            let label = match notification.severity {
                Severity::Error => self.paint("error", "31"),
                Severity::Warning => self.paint("warning", "33"),
                Severity::Success => self.paint("ok", "32"),
                Severity::Info => "info".to_string(),
            };
            writeln!(err, "{label}: {}", notification.message)?;
        }
        Ok(())
    }

    fn priority_label(&self, priority: Priority) -> String {
        match priority {
            Priority::Critical => self.paint("crit", "31;1"),
            Priority::High => self.paint("high", "31"),
            Priority::Medium => "med".to_string(),
            Priority::Low => self.paint("low", "2"),
        }
    }

    fn local_time(&self, dt: DateTime<Utc>) -> String {
        format!(
            "{} ({})",
            dt.with_timezone(&self.tz).format("%Y-%m-%d %H:%M"),
            format_timestamp(dt)
        )
    }

    fn paint(&self, text: &str, code: &str) -> String {
        if !self.color || !io::stdout().is_terminal() {
            return text.to_string();
        }
        format!("\x1b[{code}m{text}\x1b[0m")
    }
}

fn write_table<W: Write>(
    mut writer: W,
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
) -> anyhow::Result<()> {
    let column_count = headers.len();
    let mut widths = vec![0usize; column_count];

    for (idx, header) in headers.iter().enumerate() {
        widths[idx] = widths[idx].max(UnicodeWidthStr::width(header.as_str()));
    }

    for row in &rows {
        for (idx, cell) in row.iter().enumerate() {
            widths[idx] = widths[idx].max(UnicodeWidthStr::width(strip_ansi(cell).as_str()));
        }
    }

    for (header, width) in headers.iter().zip(&widths) {
        write!(writer, "{header:width$} ", width = *width)?;
    }
    writeln!(writer)?;

    for width in &widths {
        write!(writer, "{:-<width$} ", "", width = *width)?;
    }
    writeln!(writer)?;

    for row in rows {
        for (cell, width) in row.iter().zip(&widths) {
            let visible_width = UnicodeWidthStr::width(strip_ansi(cell).as_str());
            let padding = width.saturating_sub(visible_width);
            write!(writer, "{}{} ", cell, " ".repeat(padding))?;
        }
        writeln!(writer)?;
    }

    Ok(())
}

fn strip_ansi(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut escaped = false;

    for ch in s.chars() {
        if escaped {
            if ch == 'm' {
                escaped = false;
            }
            continue;
        }

        if ch == '\x1b' {
            escaped = true;
            continue;
        }

        out.push(ch);
    }

    out
}
