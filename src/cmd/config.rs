//! Configuration view and validation commands: `branchyard config`.

use anyhow::Result;
use std::path::Path;

use super::super::{Cli, ConfigCommands};
use branchyard::config::{BranchyardToml, Config};

pub fn cmd_config(project_dir: &Path, cli: &Cli, command: Option<ConfigCommands>) -> Result<()> {
    let config = Config::with_cli_args(project_dir.to_path_buf(), cli.verbose, cli.tick_ms)?;
    let config_path = config.config_file();

    match command {
        None | Some(ConfigCommands::Show) => {
            println!();
            println!("branchyard configuration");
            println!("========================");
            println!();

            if config_path.exists() {
                println!("Config file: {}", config_path.display());
            } else {
                println!("No branchyard.toml found at {}", config_path.display());
                println!("Using default configuration:");
            }
            println!();

            println!("[catalog]");
            for spec in &config.toml.catalog.levels {
                println!("  level {} = {} feature(s)", spec.level, spec.features);
            }
            println!();

            println!("[tags]");
            for base in config.toml.tags.base_branches() {
                let tags = config.toml.tags.tags(base).unwrap_or_default();
                println!("  {} = [{}]", base, tags.join(", "));
            }
            println!();

            println!("[queue]");
            println!("  tick_ms = {}", config.toml.queue.tick_ms);
            println!("  progress_step = {}", config.toml.queue.progress_step);
            println!("  max_build_secs = {}", config.toml.queue.max_build_secs);
            println!();

            println!("[history]");
            println!("  file = \"{}\"", config.toml.history.file.display());
            println!();

            println!("Effective values (with env/CLI overrides):");
            println!("  tick = {}ms", config.tick_interval().as_millis());
            println!("  history = {}", config.history_file().display());
            println!("  stories = {}", config.stories_file().display());
            println!();
        }
        Some(ConfigCommands::Validate) => {
            println!();
            println!("Validating configuration...");
            println!();

            if !config_path.exists() {
                println!("No branchyard.toml found. Using defaults (valid).");
                return Ok(());
            }

            let toml = BranchyardToml::load(&config_path)?;
            let warnings = toml.validate();

            if warnings.is_empty() {
                println!("Configuration is valid.");
            } else {
                println!("Configuration warnings:");
                for warning in warnings {
                    println!("  - {}", warning);
                }
            }
            println!();
        }
    }

    Ok(())
}
