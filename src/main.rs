use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod cmd;

#[derive(Parser)]
#[command(name = "branchyard")]
#[command(version, about = "Release branch planner and build queue simulator")]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[arg(long, global = true)]
    pub project_dir: Option<PathBuf>,

    /// Milliseconds between build queue ticks. Overrides branchyard.toml.
    #[arg(long, global = true)]
    pub tick_ms: Option<u64>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Initialize a new branchyard project
    Init,
    /// Create, inspect and edit stories
    Story {
        #[command(subcommand)]
        command: StoryCommands,
    },
    /// Build a story's branches through the level-gated queue
    Build {
        /// Story id, id prefix, or topic
        story: String,

        /// Print the build plan without building
        #[arg(long)]
        plan: bool,

        /// UI output mode: full, minimal, json (default: full on a terminal)
        #[arg(long)]
        ui: Option<String>,

        /// Retry canceled or failed builds without asking
        #[arg(long)]
        retry: bool,
    },
    /// Show the build history
    History {
        /// Case-insensitive match on component, branch or tag
        #[arg(short, long)]
        search: Option<String>,

        /// Only entries with this status: completed, failed, pending
        #[arg(long)]
        status: Option<String>,

        /// Print entries as JSON
        #[arg(long)]
        json: bool,
    },
    /// List the tags of a base branch and the most stable one
    Tags {
        /// Base branch name
        base: String,
    },
    /// View or validate configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Subcommand, Clone)]
pub enum StoryCommands {
    /// Create a story
    New {
        /// Issue description, or `newbranch_basebranch` when --base is omitted
        issue: String,

        /// Base branch to cut from
        #[arg(short, long)]
        base: Option<String>,

        /// Selection as LEVEL:FEATURE:COMPONENT (repeatable; toggles)
        #[arg(short, long = "select", value_name = "L:F:COMPONENT")]
        selections: Vec<String>,
    },
    /// List stories
    List {
        /// Filter by topic
        #[arg(short, long)]
        search: Option<String>,
    },
    /// Show a story and its branches
    Show { story: String },
    /// Delete a story
    Rm {
        story: String,
        /// Skip confirmation prompt
        #[arg(long)]
        force: bool,
    },
    /// Edit one of a story's branches
    Edit {
        story: String,
        /// Branch index as shown by `story show`
        index: usize,
        #[arg(long)]
        tag: Option<String>,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        base: Option<String>,
        #[arg(long)]
        created: Option<bool>,
    },
    /// Soft-delete one of a story's branches
    DropBranch { story: String, index: usize },
}

#[derive(Subcommand, Clone)]
pub enum ConfigCommands {
    /// Show current configuration
    Show,
    /// Validate configuration and show any warnings
    Validate,
}

fn log_filter(verbose: bool) -> tracing_subscriber::EnvFilter {
    let level = std::env::var("RUST_LOG").unwrap_or_else(|_| {
        if verbose {
            "branchyard=debug".to_string()
        } else {
            "warn".to_string()
        }
    });
    tracing_subscriber::EnvFilter::try_new(level)
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(log_filter(cli.verbose))
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    let project_dir = match cli.project_dir.clone() {
        Some(dir) => dir,
        None => std::env::current_dir().context("Failed to get current directory")?,
    };

    match &cli.command {
        Commands::Init => cmd::cmd_init(&project_dir)?,
        Commands::Story { command } => cmd::cmd_story(&project_dir, &cli, command.clone())?,
        Commands::Build {
            story,
            plan,
            ui,
            retry,
        } => {
            if *plan {
                cmd::cmd_plan(&project_dir, &cli, story)?;
            } else {
                cmd::cmd_build(&project_dir, &cli, story, ui.as_deref(), *retry).await?;
            }
        }
        Commands::History {
            search,
            status,
            json,
        } => cmd::cmd_history(
            &project_dir,
            &cli,
            search.as_deref(),
            status.as_deref(),
            *json,
        )?,
        Commands::Tags { base } => cmd::cmd_tags(&project_dir, &cli, base)?,
        Commands::Config { command } => cmd::cmd_config(&project_dir, &cli, command.clone())?,
    }

    Ok(())
}
