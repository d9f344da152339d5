//! `branchyard tags <base>`: show candidate tags and the most stable one.

use anyhow::Result;
use console::style;
use std::path::Path;

use super::super::Cli;
use branchyard::config::Config;
use branchyard::tag::Version;
use branchyard::ui::icons::TAG;

pub fn cmd_tags(project_dir: &Path, cli: &Cli, base: &str) -> Result<()> {
    // Works without `init`; the default catalog applies.
    let config = Config::with_cli_args(project_dir.to_path_buf(), cli.verbose, cli.tick_ms)?;
    let catalog = config.tag_catalog();

    let Some(tags) = catalog.tags(base) else {
        let known: Vec<&str> = catalog.base_branches().collect();
        anyhow::bail!(
            "Base branch \"{}\" not found. Known base branches: {}",
            base,
            known.join(", ")
        );
    };
    let stable = catalog.resolve(base)?;

    println!("{}Tags for {}", TAG, style(base).yellow());
    for tag in tags {
        let note = if *tag == stable {
            style("most stable").green().to_string()
        } else if Version::parse(tag).is_none() {
            style("ignored").dim().to_string()
        } else {
            String::new()
        };
        println!("  {:<12} {}", tag, note);
    }
    Ok(())
}
