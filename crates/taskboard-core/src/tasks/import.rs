use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

use crate::task::{Task, fill_missing_timestamps};

pub const PARSE_FAILED: &str = "Failed to parse JSON";
pub const NOT_AN_ARRAY: &str = "Invalid format: expected array";
pub const MISSING_ID_OR_TITLE: &str = "Invalid task: missing id or title";

#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct ImportReport {
    pub success: bool,
    pub imported: usize,
    pub errors: Vec<String>,
}

impl ImportReport {
    pub(super) fn rejected(reason: &str) -> Self {
        Self {
            success: false,
            imported: 0,
            errors: vec![reason.to_string()],
        }
    }
}

/// Splits an export document into per-entry results. The outer error is
/// returned when nothing may be imported at all. Missing timestamps are
/// stamped with `now`.
pub(super) fn parse_entries(
    text: &str,
    now: DateTime<Utc>,
) -> Result<Vec<Result<Task, String>>, &'static str> {
    let document: Value = serde_json::from_str(text).map_err(|_| PARSE_FAILED)?;
    let Value::Array(entries) = document else {
        return Err(NOT_AN_ARRAY);
    };

    Ok(entries
        .into_iter()
        .enumerate()
        .map(|(index, entry)| parse_entry(index, entry, now))
        .collect())
}

fn parse_entry(index: usize, mut entry: Value, now: DateTime<Utc>) -> Result<Task, String> {
    if !has_text(&entry, "id") || !has_text(&entry, "title") {
        return Err(MISSING_ID_OR_TITLE.to_string());
    }
    fill_missing_timestamps(&mut entry, now);
    serde_json::from_value(entry).map_err(|err| format!("Invalid task at index {index}: {err}"))
}

fn has_text(entry: &Value, field: &str) -> bool {
    entry
        .get(field)
        .and_then(Value::as_str)
        .is_some_and(|text| !text.is_empty())
}
