//! `branchyard history`: list recorded builds.

use anyhow::{Context, Result};
use console::style;
use std::path::Path;

use super::super::Cli;
use super::project::load_config;
use branchyard::history::{BuildHistory, BuildStatus, HistoryFilter, JsonFileStore};

pub fn cmd_history(
    project_dir: &Path,
    cli: &Cli,
    search: Option<&str>,
    status: Option<&str>,
    json: bool,
) -> Result<()> {
    let config = load_config(project_dir, cli)?;
    let history = BuildHistory::open(JsonFileStore::new(config.history_file()))
        .context("Failed to open build history")?;

    let filter = HistoryFilter {
        search: search.map(str::to_string),
        status: status.map(str::parse::<BuildStatus>).transpose()?,
    };
    let entries = history.filter(&filter);

    if json {
        println!("{}", serde_json::to_string_pretty(&entries)?);
        return Ok(());
    }

    if entries.is_empty() {
        if history.is_empty() {
            println!("No builds recorded yet.");
        } else {
            println!("No builds match the filter.");
        }
        return Ok(());
    }

    println!(
        "{:<20} {:<9} {:<5} {:<50} {:<8} {:<10} {:>8}",
        "Time", "Component", "Level", "Branch", "Tag", "Status", "Duration"
    );
    for entry in &entries {
        let status = match entry.status {
            BuildStatus::Completed => style(entry.status.to_string()).green(),
            BuildStatus::Failed => style(entry.status.to_string()).red(),
            BuildStatus::Pending => style(entry.status.to_string()).dim(),
        };
        println!(
            "{:<20} {:<9} {:<5} {:<50} {:<8} {:<10} {:>8}",
            entry.timestamp.format("%Y-%m-%d %H:%M:%S"),
            entry.component,
            entry.level,
            entry.branch,
            entry.tag.as_deref().unwrap_or("-"),
            status,
            entry.duration_display()
        );
    }
    println!();
    println!("{} of {} builds shown", entries.len(), history.len());
    Ok(())
}
