//! Story snapshot in `.branchyard/stories.json`.
//!
//! The story store itself lives in memory; the CLI loads this snapshot at the start of
//! each command and writes it back after any mutation.

use anyhow::{Context, Result};
use std::path::Path;

use crate::story::{LevelCatalog, Story, StoryStore};
use crate::tag::TagCatalog;

/// Read saved stories. A missing or empty file holds no stories.
pub fn load_stories(path: &Path) -> Result<Vec<Story>> {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => {
            return Err(e).with_context(|| format!("Failed to read stories: {}", path.display()));
        }
    };
    if content.trim().is_empty() {
        return Ok(Vec::new());
    }
    serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse stories: {}", path.display()))
}

/// Write the stories, replacing the file atomically.
pub fn save_stories(path: &Path, stories: &[Story]) -> Result<()> {
    let json = serde_json::to_string_pretty(stories).context("Failed to serialize stories")?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
    }
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, json)
        .with_context(|| format!("Failed to write stories: {}", tmp.display()))?;
    std::fs::rename(&tmp, path)
        .with_context(|| format!("Failed to replace stories: {}", path.display()))?;
    tracing::debug!(count = stories.len(), path = %path.display(), "stories saved");
    Ok(())
}

/// Open a story store seeded from the snapshot at `path`.
pub fn open_store(path: &Path, tags: TagCatalog, levels: LevelCatalog) -> Result<StoryStore> {
    let stories = load_stories(path)?;
    Ok(StoryStore::new(tags, levels).with_stories(stories))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::story::{Component, IssueRef, Selection};
    use tempfile::tempdir;

    #[test]
    fn test_missing_file_is_empty() {
        let dir = tempdir().unwrap();
        assert!(load_stories(&dir.path().join("stories.json")).unwrap().is_empty());
    }

    #[test]
    fn test_save_and_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("stories.json");

        let mut store = StoryStore::new(TagCatalog::default(), LevelCatalog::default());
        store
            .add_story(
                IssueRef::new("bug: login fails", "dev"),
                vec![
                    Selection::new(1, 1, Component::Client),
                    Selection::new(2, 5, Component::Agent),
                ],
            )
            .unwrap();
        save_stories(&path, store.stories()).unwrap();
        assert!(!path.with_extension("json.tmp").exists());

        let reopened = open_store(&path, TagCatalog::default(), LevelCatalog::default()).unwrap();
        assert_eq!(reopened.stories(), store.stories());
        assert_eq!(reopened.stories()[0].topic, "bug/login-fails");
        assert_eq!(reopened.stories()[0].stable_tag, "v0.1.0");
    }

    #[test]
    fn test_corrupt_file_is_an_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("stories.json");
        std::fs::write(&path, "{not json").unwrap();
        let err = load_stories(&path).unwrap_err();
        assert!(err.to_string().contains("Failed to parse stories"));
    }
}
