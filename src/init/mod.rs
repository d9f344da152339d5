//! `branchyard init`: create the `.branchyard/` directory in a project.
//!
//! ```text
//! .branchyard/
//! ├── branchyard.toml  # Catalogs and queue timing
//! ├── stories.json     # Story snapshot
//! └── history.json     # Build history log
//! ```

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

use crate::config::{BranchyardToml, CONFIG_FILE, STATE_DIR, STORIES_FILE};

/// Result of initializing a project.
#[derive(Debug)]
pub struct InitResult {
    /// Path to the `.branchyard` directory
    pub state_dir: PathBuf,
    /// Whether the directory was newly created (false if it already existed)
    pub created: bool,
}

/// Initialize branchyard in `project_dir`.
///
/// Re-running on an initialized project fills in whatever is missing and never
/// overwrites existing files.
pub fn init_project(project_dir: &Path) -> Result<InitResult> {
    let state_dir = get_state_dir(project_dir);
    let created = !state_dir.exists();

    std::fs::create_dir_all(&state_dir)
        .with_context(|| format!("Failed to create directory: {}", state_dir.display()))?;

    let config_file = state_dir.join(CONFIG_FILE);
    if !config_file.exists() {
        BranchyardToml::default().save(&config_file)?;
    }

    let toml = BranchyardToml::load(&config_file)?;
    let history_file = if toml.history.file.is_absolute() {
        toml.history.file.clone()
    } else {
        state_dir.join(&toml.history.file)
    };
    for file in [state_dir.join(STORIES_FILE), history_file] {
        if !file.exists() {
            std::fs::write(&file, "[]\n")
                .with_context(|| format!("Failed to create {}", file.display()))?;
        }
    }

    if created {
        tracing::info!(dir = %state_dir.display(), "project initialized");
    }
    Ok(InitResult { state_dir, created })
}

/// Check if a project is already initialized.
pub fn is_initialized(project_dir: &Path) -> bool {
    project_dir.join(STATE_DIR).exists()
}

pub fn get_state_dir(project_dir: &Path) -> PathBuf {
    project_dir.join(STATE_DIR)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_init_project_creates_state_directory() {
        let dir = tempdir().unwrap();
        let result = init_project(dir.path()).unwrap();

        assert!(result.state_dir.is_dir());
        assert!(result.created);
        assert_eq!(result.state_dir, dir.path().join(".branchyard"));
    }

    #[test]
    fn test_init_project_creates_files() {
        let dir = tempdir().unwrap();
        init_project(dir.path()).unwrap();

        let state_dir = dir.path().join(".branchyard");
        let toml = BranchyardToml::load(&state_dir.join("branchyard.toml")).unwrap();
        assert_eq!(toml, BranchyardToml::default());
        assert_eq!(
            std::fs::read_to_string(state_dir.join("history.json")).unwrap(),
            "[]\n"
        );
        assert!(state_dir.join("stories.json").is_file());
    }

    #[test]
    fn test_init_project_twice_returns_created_false() {
        let dir = tempdir().unwrap();
        assert!(init_project(dir.path()).unwrap().created);
        assert!(!init_project(dir.path()).unwrap().created);
    }

    #[test]
    fn test_init_project_keeps_existing_files() {
        let dir = tempdir().unwrap();
        let state_dir = dir.path().join(".branchyard");
        std::fs::create_dir_all(&state_dir).unwrap();
        std::fs::write(
            state_dir.join("branchyard.toml"),
            "[queue]\ntick_ms = 7\n\n[history]\nfile = \"builds.json\"\n",
        )
        .unwrap();

        init_project(dir.path()).unwrap();

        let content = std::fs::read_to_string(state_dir.join("branchyard.toml")).unwrap();
        assert!(content.contains("tick_ms = 7"));
        assert!(state_dir.join("builds.json").is_file());
        assert!(!state_dir.join("history.json").exists());
    }

    #[test]
    fn test_is_initialized() {
        let dir = tempdir().unwrap();
        assert!(!is_initialized(dir.path()));
        init_project(dir.path()).unwrap();
        assert!(is_initialized(dir.path()));
    }

    #[test]
    fn test_get_state_dir() {
        let dir = tempdir().unwrap();
        assert_eq!(get_state_dir(dir.path()), dir.path().join(".branchyard"));
    }
}
