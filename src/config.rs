//! Configuration for branchyard.
//!
//! Settings are read from `.branchyard/branchyard.toml` and layered as
//! file → environment → CLI. A missing file means defaults.
//!
//! # Configuration File Format
//!
//! ```toml
//! [[catalog.levels]]
//! level = 1
//! features = 1
//!
//! [[catalog.levels]]
//! level = 2
//! features = 7
//!
//! [tags]
//! main = ["v1.0.0", "v1.0.1", "v2.0.0", "v2.0.1"]
//! dev = ["v0.1.0", "v0.2.0"]
//!
//! [queue]
//! tick_ms = 500
//! progress_step = 10
//! max_build_secs = 120
//!
//! [history]
//! file = "history.json"
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::queue::QueueConfig;
use crate::story::LevelCatalog;
use crate::tag::TagCatalog;

/// Name of the state directory inside a project.
pub const STATE_DIR: &str = ".branchyard";

/// Name of the config file inside the state directory.
pub const CONFIG_FILE: &str = "branchyard.toml";

/// Name of the story snapshot inside the state directory.
pub const STORIES_FILE: &str = "stories.json";

/// Environment override for the queue tick interval.
pub const TICK_MS_ENV: &str = "BRANCHYARD_TICK_MS";

/// Queue timing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueSection {
    /// Milliseconds between queue ticks
    #[serde(default = "default_tick_ms")]
    pub tick_ms: u64,
    /// Percent of progress per tick
    #[serde(default = "default_progress_step")]
    pub progress_step: u8,
    /// Watchdog limit for a single build, in seconds
    #[serde(default = "default_max_build_secs")]
    pub max_build_secs: u64,
}

fn default_tick_ms() -> u64 {
    500
}

fn default_progress_step() -> u8 {
    10
}

fn default_max_build_secs() -> u64 {
    120
}

impl Default for QueueSection {
    fn default() -> Self {
        Self {
            tick_ms: default_tick_ms(),
            progress_step: default_progress_step(),
            max_build_secs: default_max_build_secs(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistorySection {
    /// History file, relative to the state directory unless absolute
    #[serde(default = "default_history_file")]
    pub file: PathBuf,
}

fn default_history_file() -> PathBuf {
    PathBuf::from("history.json")
}

impl Default for HistorySection {
    fn default() -> Self {
        Self {
            file: default_history_file(),
        }
    }
}

/// Contents of `branchyard.toml`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BranchyardToml {
    #[serde(default)]
    pub catalog: LevelCatalog,
    #[serde(default)]
    pub tags: TagCatalog,
    #[serde(default)]
    pub queue: QueueSection,
    #[serde(default)]
    pub history: HistorySection,
}

impl BranchyardToml {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::parse(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse branchyard.toml")
    }

    /// Load `branchyard.toml` from the state directory, or defaults if it is absent.
    pub fn load_or_default(state_dir: &Path) -> Result<Self> {
        let config_path = state_dir.join(CONFIG_FILE);
        if config_path.exists() {
            Self::load(&config_path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content =
            toml::to_string_pretty(self).context("Failed to serialize branchyard.toml")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;
        Ok(())
    }

    /// Check the configuration and return warnings.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        if self.queue.tick_ms == 0 {
            warnings.push("queue.tick_ms must be greater than 0".to_string());
        }
        if self.queue.progress_step == 0 || self.queue.progress_step > 100 {
            warnings.push(format!(
                "queue.progress_step {} is outside 1..=100 and will be clamped",
                self.queue.progress_step
            ));
        }
        if self.queue.max_build_secs == 0 {
            warnings.push("queue.max_build_secs of 0 fails every build".to_string());
        }

        // Level N can only build after N-1, so levels must run 1, 2, 3, ...
        let levels: BTreeSet<u32> = self.catalog.levels.iter().map(|l| l.level).collect();
        if levels.is_empty() {
            warnings.push("catalog defines no levels".to_string());
        } else if levels.len() != self.catalog.levels.len() {
            warnings.push("catalog defines the same level more than once".to_string());
        }
        for (expected, level) in (1..).zip(&levels) {
            if *level != expected {
                warnings.push(format!(
                    "catalog level {} follows a gap; level {} is missing",
                    level, expected
                ));
                break;
            }
        }
        for spec in &self.catalog.levels {
            if spec.features == 0 {
                warnings.push(format!("catalog level {} has no features", spec.level));
            }
        }

        for (base, bad) in self.tags.malformed() {
            warnings.push(format!(
                "tag '{}' for base branch '{}' is not vMAJOR.MINOR.PATCH and is ignored",
                bad, base
            ));
        }
        for base in self.tags.base_branches() {
            if self.tags.resolve(base).is_err() {
                warnings.push(format!("base branch '{}' has no stable tag", base));
            }
        }

        if self.history.file.as_os_str().is_empty() {
            warnings.push("history.file is empty".to_string());
        }

        warnings
    }
}

/// Resolved runtime configuration: project paths plus CLI overrides.
#[derive(Debug, Clone)]
pub struct Config {
    pub project_dir: PathBuf,
    /// Path to the `.branchyard` directory
    pub state_dir: PathBuf,
    pub toml: BranchyardToml,
    pub verbose: bool,
    /// CLI override for the tick interval
    pub cli_tick_ms: Option<u64>,
}

impl Config {
    pub fn new(project_dir: PathBuf) -> Result<Self> {
        let project_dir = project_dir
            .canonicalize()
            .context("Failed to resolve project directory")?;
        let state_dir = project_dir.join(STATE_DIR);
        let toml = BranchyardToml::load_or_default(&state_dir)?;

        Ok(Self {
            project_dir,
            state_dir,
            toml,
            verbose: false,
            cli_tick_ms: None,
        })
    }

    pub fn with_cli_args(project_dir: PathBuf, verbose: bool, tick_ms: Option<u64>) -> Result<Self> {
        let mut config = Self::new(project_dir)?;
        config.verbose = verbose;
        config.cli_tick_ms = tick_ms;
        Ok(config)
    }

    pub fn is_initialized(&self) -> bool {
        self.state_dir.is_dir()
    }

    pub fn config_file(&self) -> PathBuf {
        self.state_dir.join(CONFIG_FILE)
    }

    pub fn stories_file(&self) -> PathBuf {
        self.state_dir.join(STORIES_FILE)
    }

    pub fn history_file(&self) -> PathBuf {
        if self.toml.history.file.is_absolute() {
            self.toml.history.file.clone()
        } else {
            self.state_dir.join(&self.toml.history.file)
        }
    }

    /// Tick interval (CLI → env → file). Never zero.
    pub fn tick_interval(&self) -> Duration {
        let ms = self
            .cli_tick_ms
            .or_else(|| {
                std::env::var(TICK_MS_ENV)
                    .ok()
                    .and_then(|v| v.trim().parse().ok())
            })
            .unwrap_or(self.toml.queue.tick_ms);
        Duration::from_millis(ms.max(1))
    }

    pub fn queue_config(&self) -> QueueConfig {
        QueueConfig::default()
            .with_progress_step(self.toml.queue.progress_step)
            .with_max_build_duration(Duration::from_secs(self.toml.queue.max_build_secs))
    }

    pub fn tag_catalog(&self) -> TagCatalog {
        self.toml.tags.clone()
    }

    pub fn level_catalog(&self) -> LevelCatalog {
        self.toml.catalog.clone()
    }

    pub fn validate(&self) -> Vec<String> {
        self.toml.validate()
    }
}
