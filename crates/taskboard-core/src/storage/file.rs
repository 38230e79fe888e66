use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, anyhow};
use tempfile::NamedTempFile;
use tracing::{debug, info};

use super::{StorageBackend, StorageError, entry_size};

pub const STORAGE_FILE: &str = "storage.json";

/// Key-value area kept as a single JSON object on disk. Every write rewrites
/// the file through a temp file so a failed write never leaves a torn file.
#[derive(Debug)]
pub struct FileBackend {
    path: PathBuf,
    quota: Option<usize>,
    entries: RefCell<BTreeMap<String, String>>,
}

impl FileBackend {
    #[tracing::instrument(skip(data_dir))]
    pub fn open(data_dir: &Path, quota: Option<usize>) -> anyhow::Result<Self> {
        fs::create_dir_all(data_dir)
            .with_context(|| format!("failed to create {}", data_dir.display()))?;

        let path = data_dir.join(STORAGE_FILE);
        let entries = if path.exists() {
            load_entries(&path)?
        } else {
            BTreeMap::new()
        };

        info!(
            file = %path.display(),
            keys = entries.len(),
            quota = ?quota,
            "opened file storage"
        );

        Ok(Self {
            path,
            quota,
            entries: RefCell::new(entries),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl StorageBackend for FileBackend {
    fn get_item(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.entries.borrow().get(key).cloned())
    }

    fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let mut next = self.entries.borrow().clone();
        next.insert(key.to_string(), value.to_string());

        if let Some(quota) = self.quota {
            let used: usize = next.iter().map(|(k, v)| entry_size(k, v)).sum();
            if used > quota {
                return Err(StorageError::QuotaExceeded {
                    key: key.to_string(),
                    bytes: entry_size(key, value),
                });
            }
        }

        save_entries_atomic(&self.path, &next)
            .map_err(|err| StorageError::Backend(format!("{err:#}")))?;
        *self.entries.borrow_mut() = next;
        Ok(())
    }

    fn remove_item(&self, key: &str) -> Result<(), StorageError> {
        if !self.entries.borrow().contains_key(key) {
            return Ok(());
        }
        let mut next = self.entries.borrow().clone();
        next.remove(key);
        save_entries_atomic(&self.path, &next)
            .map_err(|err| StorageError::Backend(format!("{err:#}")))?;
        *self.entries.borrow_mut() = next;
        Ok(())
    }

    fn keys(&self) -> Result<Vec<String>, StorageError> {
        Ok(self.entries.borrow().keys().cloned().collect())
    }
}

#[tracing::instrument(skip(path))]
fn load_entries(path: &Path) -> anyhow::Result<BTreeMap<String, String>> {
    debug!(file = %path.display(), "loading storage file");
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed reading {}", path.display()))?;
    if raw.trim().is_empty() {
        return Ok(BTreeMap::new());
    }
    serde_json::from_str(&raw).with_context(|| format!("failed parsing {}", path.display()))
}

#[tracing::instrument(skip(path, entries))]
fn save_entries_atomic(path: &Path, entries: &BTreeMap<String, String>) -> anyhow::Result<()> {
    debug!(file = %path.display(), keys = entries.len(), "saving storage file atomically");

    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut temp = NamedTempFile::new_in(dir)?;
    serde_json::to_writer_pretty(&mut temp, entries)?;
    writeln!(temp)?;
    temp.flush()?;

    temp.persist(path)
        .map_err(|err| anyhow!("failed to persist {}: {}", path.display(), err))?;

    Ok(())
}
