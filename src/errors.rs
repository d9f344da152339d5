//! Typed error hierarchy for branchyard.
//!
//! Four enums cover the four core subsystems:
//! - `TagError`: stable tag resolution
//! - `StoryError`: issue parsing, story creation and per-branch edits
//! - `QueueError`: build queue admission and retry
//! - `HistoryError`: build history persistence

use thiserror::Error;
use uuid::Uuid;

/// Errors from resolving a stable tag for a base branch.
#[derive(Debug, Error)]
pub enum TagError {
    #[error("Base branch \"{base}\" not found")]
    UnknownBaseBranch { base: String },

    #[error("Unable to determine the most stable tag for \"{base}\"")]
    NoStableTag { base: String },

    #[error("Invalid tag '{tag}': expected vMAJOR.MINOR.PATCH")]
    InvalidTag { tag: String },
}

/// Errors from the story store. None of these leave the store mutated.
#[derive(Debug, Error)]
pub enum StoryError {
    #[error("Format must be: newbranch_basebranch (got '{input}')")]
    MalformedIssue { input: String },

    #[error("Issue description '{description}' yields an empty branch name")]
    EmptySlug { description: String },

    #[error("At least one selection is required")]
    NoSelections,

    #[error("Level {level} / feature {feature} is not in the catalog")]
    UnknownSelection { level: u32, feature: u32 },

    #[error("Story {id} not found")]
    StoryNotFound { id: Uuid },

    #[error("Story {id} has no branch at index {index}")]
    BranchIndexOutOfRange { id: Uuid, index: usize },

    #[error("Branch name '{name}' is already in use")]
    BranchNameTaken { name: String },

    #[error("Branch name must not be empty")]
    EmptyBranchName,

    #[error(transparent)]
    Tag(#[from] TagError),
}

/// Errors from the build queue.
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("Level {level} is locked until a level {} build completes", .level.saturating_sub(1))]
    LevelLocked { level: u32 },

    #[error("No queue item at index {index}")]
    NoSuchItem { index: usize },

    #[error("Queue item {index} is {status} and cannot be retried")]
    NotRetryable { index: usize, status: String },

    #[error(transparent)]
    History(#[from] HistoryError),
}

/// Errors from the build history persistence port.
#[derive(Debug, Error)]
pub enum HistoryError {
    #[error("Failed to read history at {path}: {source}")]
    ReadFailed {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write history at {path}: {source}")]
    WriteFailed {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Corrupt history data: {0}")]
    Corrupt(#[source] serde_json::Error),

    #[error("History store lock poisoned")]
    LockPoisoned,
}
