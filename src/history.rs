//! Append-only build history with write-through persistence.
//!
//! The log never changes in memory unless the same array has already been written
//! through its [`HistoryStore`], so a reload always reproduces what was last shown.

use crate::errors::HistoryError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Outcome recorded for a build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BuildStatus {
    Completed,
    Failed,
    Pending,
}

impl fmt::Display for BuildStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BuildStatus::Completed => write!(f, "Completed"),
            BuildStatus::Failed => write!(f, "Failed"),
            BuildStatus::Pending => write!(f, "Pending"),
        }
    }
}

impl std::str::FromStr for BuildStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "completed" => Ok(BuildStatus::Completed),
            "failed" => Ok(BuildStatus::Failed),
            "pending" => Ok(BuildStatus::Pending),
            _ => anyhow::bail!(
                "Invalid build status '{}'. Valid values: completed, failed, pending",
                s
            ),
        }
    }
}

/// One finished build.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildHistoryEntry {
    /// When the build started
    pub timestamp: DateTime<Utc>,
    pub component: String,
    pub level: u32,
    pub branch: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
    pub status: BuildStatus,
    /// Elapsed build time, stored as milliseconds
    #[serde(with = "duration_millis")]
    pub duration: Duration,
}

impl BuildHistoryEntry {
    /// Duration rendered as seconds with two decimals, e.g. `5.23s`.
    pub fn duration_display(&self) -> String {
        format!("{:.2}s", self.duration.as_secs_f64())
    }

    fn matches_search(&self, needle: &str) -> bool {
        self.component.to_lowercase().contains(needle)
            || self.branch.to_lowercase().contains(needle)
            || self
                .tag
                .as_deref()
                .is_some_and(|t| t.to_lowercase().contains(needle))
    }
}

/// Read-side filter over the history.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HistoryFilter {
    /// Case-insensitive substring matched against component, branch and tag
    pub search: Option<String>,
    pub status: Option<BuildStatus>,
}

impl HistoryFilter {
    pub fn matches(&self, entry: &BuildHistoryEntry) -> bool {
        let search_ok = match self.search.as_deref().map(str::trim) {
            None | Some("") => true,
            Some(needle) => entry.matches_search(&needle.to_lowercase()),
        };
        search_ok && self.status.is_none_or(|s| s == entry.status)
    }
}

/// Persistence port for the history log.
pub trait HistoryStore: Send {
    /// Load the persisted entries. A store that has never been written is empty.
    fn load(&self) -> Result<Vec<BuildHistoryEntry>, HistoryError>;

    /// Replace the persisted entries with `entries`.
    fn save(&self, entries: &[BuildHistoryEntry]) -> Result<(), HistoryError>;
}

/// Keeps the history as a single JSON array in one file.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl HistoryStore for JsonFileStore {
    fn load(&self) -> Result<Vec<BuildHistoryEntry>, HistoryError> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => {
                return Err(HistoryError::ReadFailed {
                    path: self.path.clone(),
                    source,
                });
            }
        };
        if content.trim().is_empty() {
            return Ok(Vec::new());
        }
        serde_json::from_str(&content).map_err(HistoryError::Corrupt)
    }

    fn save(&self, entries: &[BuildHistoryEntry]) -> Result<(), HistoryError> {
        let write_failed = |source: std::io::Error| HistoryError::WriteFailed {
            path: self.path.clone(),
            source,
        };
        let json = serde_json::to_string_pretty(entries).map_err(HistoryError::Corrupt)?;

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(write_failed)?;
        }
        // Write beside the target and rename so readers never see a partial array.
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, json).map_err(write_failed)?;
        std::fs::rename(&tmp, &self.path).map_err(write_failed)?;
        Ok(())
    }
}

/// Process-local store. Clones share the same backing array.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    entries: Arc<Mutex<Vec<BuildHistoryEntry>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of what has been persisted so far.
    pub fn persisted(&self) -> Vec<BuildHistoryEntry> {
        self.entries
            .lock()
            .map(|entries| entries.clone())
            .unwrap_or_default()
    }
}

impl HistoryStore for MemoryStore {
    fn load(&self) -> Result<Vec<BuildHistoryEntry>, HistoryError> {
        self.entries
            .lock()
            .map(|entries| entries.clone())
            .map_err(|_| HistoryError::LockPoisoned)
    }

    fn save(&self, entries: &[BuildHistoryEntry]) -> Result<(), HistoryError> {
        let mut guard = self.entries.lock().map_err(|_| HistoryError::LockPoisoned)?;
        *guard = entries.to_vec();
        Ok(())
    }
}

/// The build history log.
pub struct BuildHistory {
    entries: Vec<BuildHistoryEntry>,
    store: Box<dyn HistoryStore>,
}

impl fmt::Debug for BuildHistory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BuildHistory")
            .field("entries", &self.entries.len())
            .finish_non_exhaustive()
    }
}

impl BuildHistory {
    /// Load the log from its store.
    pub fn open(store: impl HistoryStore + 'static) -> Result<Self, HistoryError> {
        let entries = store.load()?;
        tracing::debug!(count = entries.len(), "build history loaded");
        Ok(Self {
            entries,
            store: Box::new(store),
        })
    }

    pub fn entries(&self) -> &[BuildHistoryEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Append an entry, persisting before it becomes visible.
    ///
    /// The duration is truncated to whole milliseconds, the precision it is stored
    /// with.
    pub fn add_entry(&mut self, mut entry: BuildHistoryEntry) -> Result<(), HistoryError> {
        entry.duration = whole_millis(entry.duration);
        tracing::info!(
            component = %entry.component,
            level = entry.level,
            status = %entry.status,
            duration = %entry.duration_display(),
            "recording build"
        );
        let mut next = Vec::with_capacity(self.entries.len() + 1);
        next.extend_from_slice(&self.entries);
        next.push(entry);

        self.store.save(&next)?;
        self.entries = next;
        Ok(())
    }

    pub fn filter(&self, filter: &HistoryFilter) -> Vec<&BuildHistoryEntry> {
        self.entries.iter().filter(|e| filter.matches(e)).collect()
    }
}

/// `duration` truncated to whole milliseconds.
pub fn whole_millis(duration: Duration) -> Duration {
    Duration::from_millis(duration.as_millis() as u64)
}

/// Serde helpers for millisecond Duration serialization.
mod duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        (duration.as_millis() as u64).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
