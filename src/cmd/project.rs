//! Project initialization and shared project loading.

use anyhow::Result;
use std::path::Path;

use super::super::Cli;
use branchyard::config::Config;
use branchyard::story::StoryStore;

pub fn cmd_init(project_dir: &Path) -> Result<()> {
    use branchyard::init::{init_project, is_initialized};

    let was_initialized = is_initialized(project_dir);
    let result = init_project(project_dir)?;

    if result.created {
        println!(
            "Initialized branchyard project at {}",
            result.state_dir.display()
        );
        println!();
        println!("Created directory structure:");
        println!("  .branchyard/");
        println!("  ├── branchyard.toml  # Level catalog, tags and queue timing");
        println!("  ├── stories.json     # Stories (use `branchyard story new`)");
        println!("  └── history.json     # Build history (use `branchyard history`)");
        println!();
        println!("Next steps:");
        println!("  1. Run `branchyard story new \"<issue>\" --base main -s 1:1:server`");
        println!("  2. Run `branchyard build <topic>` to build its branches");
    } else if was_initialized {
        println!(
            "branchyard project already initialized at {}",
            result.state_dir.display()
        );
        println!("Directory structure verified.");
    }

    Ok(())
}

/// Load the runtime config for an initialized project.
pub fn load_config(project_dir: &Path, cli: &Cli) -> Result<Config> {
    let config = Config::with_cli_args(project_dir.to_path_buf(), cli.verbose, cli.tick_ms)?;
    if !config.is_initialized() {
        anyhow::bail!(
            "No branchyard project at {}. Run 'branchyard init' first.",
            config.project_dir.display()
        );
    }
    Ok(config)
}

/// Open the story store from the project's snapshot.
pub fn open_stories(config: &Config) -> Result<StoryStore> {
    branchyard::snapshot::open_store(
        &config.stories_file(),
        config.tag_catalog(),
        config.level_catalog(),
    )
}
