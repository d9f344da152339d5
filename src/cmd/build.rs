//! Build commands: `branchyard build <story> [--plan]`.

use anyhow::{Context, Result};
use console::{Term, style};
use std::path::Path;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::super::Cli;
use super::project::{load_config, open_stories};
use branchyard::history::{BuildHistory, JsonFileStore};
use branchyard::queue::{
    BuildQueue, BuildRunner, Enqueued, ItemStatus, QueueEvent, RunOutcome,
};
use branchyard::ui::icons::{CLOCK, RETRY};
use branchyard::ui::{BuildUI, UiMode};

/// Print the targets a build would enqueue.
pub fn cmd_plan(project_dir: &Path, cli: &Cli, key: &str) -> Result<()> {
    let config = load_config(project_dir, cli)?;
    let store = open_stories(&config)?;
    let story = store
        .find(key)
        .with_context(|| format!("No story matches '{}'", key))?;

    let plan = story.build_plan();
    if plan.is_empty() {
        println!("Story {} has no branches to build.", story.topic);
        return Ok(());
    }

    println!();
    println!("Build plan for {}", style(&story.topic).yellow());
    println!();
    println!(
        "{:>3}  {:<5} {:<7} {:<9} {:<8} Branch",
        "#", "Level", "Feature", "Component", "Tag"
    );
    for (i, target) in plan.iter().enumerate() {
        let note = if target.autogenerated {
            style(" (placeholder)").dim().to_string()
        } else {
            String::new()
        };
        println!(
            "{:>3}  {:<5} {:<7} {:<9} {:<8} {}{}",
            i,
            target.level,
            target.feature,
            target.component,
            target.tag.as_deref().unwrap_or("-"),
            target.branch,
            note
        );
    }
    println!();
    Ok(())
}

pub async fn cmd_build(
    project_dir: &Path,
    cli: &Cli,
    key: &str,
    ui_mode: Option<&str>,
    auto_retry: bool,
) -> Result<()> {
    use dialoguer::Confirm;

    let config = load_config(project_dir, cli)?;
    let store = open_stories(&config)?;
    let story = store
        .find(key)
        .with_context(|| format!("No story matches '{}'", key))?;

    let plan = story.build_plan();
    if plan.is_empty() {
        println!("Story {} has no branches to build.", story.topic);
        return Ok(());
    }

    let mode = match ui_mode {
        Some(mode) => mode.parse()?,
        None if Term::stdout().is_term() => UiMode::Full,
        None => UiMode::Minimal,
    };

    let history = BuildHistory::open(JsonFileStore::new(config.history_file()))
        .context("Failed to open build history")?;
    let (tx, mut rx) = mpsc::channel(64);
    let mut runner = BuildRunner::new(
        BuildQueue::new(config.queue_config()),
        history,
        config.tick_interval(),
    )
    .with_event_channel(tx);

    for target in plan {
        if let Enqueued::Duplicate(index) = runner.enqueue(target)? {
            tracing::debug!(index, "target already queued");
        }
    }

    if mode != UiMode::Json {
        println!(
            "{}Building {} ({} items, tick {}ms)",
            CLOCK,
            style(&story.topic).yellow(),
            runner.queue().items().len(),
            config.tick_interval().as_millis()
        );
    }

    let mut retried = false;
    loop {
        let done = runner
            .queue()
            .items()
            .iter()
            .filter(|i| i.status == ItemStatus::Completed)
            .count();
        let mut ui = BuildUI::new(runner.queue().items().len(), mode, config.verbose);
        ui.set_done(done);

        let cancel = CancellationToken::new();
        let interrupt = cancel_on_ctrl_c(cancel.clone());
        let outcome = drive(&mut runner, &cancel, &mut rx, &mut ui).await;
        interrupt.abort();
        let outcome = outcome?;
        ui.finish(&outcome);

        let retryable = runner
            .queue()
            .items()
            .iter()
            .any(|i| i.status.is_retryable());
        if !retryable {
            break;
        }

        let again = if auto_retry {
            !std::mem::replace(&mut retried, true)
        } else {
            mode == UiMode::Full
                && console::user_attended()
                && Confirm::new()
                    .with_prompt("Retry canceled or failed builds?")
                    .default(false)
                    .interact()
                    .unwrap_or(false)
        };
        if !again {
            break;
        }

        let indices = runner.retry_all();
        if mode != UiMode::Json {
            println!("{}Retrying {} build(s)", RETRY, indices.len());
        }
    }

    if mode != UiMode::Json {
        print_summary(&runner);
    }
    Ok(())
}

/// Run the queue once, rendering events as they arrive.
async fn drive(
    runner: &mut BuildRunner,
    cancel: &CancellationToken,
    rx: &mut mpsc::Receiver<QueueEvent>,
    ui: &mut BuildUI,
) -> Result<RunOutcome> {
    let run = runner.run(cancel);
    tokio::pin!(run);

    let outcome = loop {
        tokio::select! {
            outcome = &mut run => break outcome?,
            Some(event) = rx.recv() => ui.handle_event(&event),
        }
    };
    while let Ok(event) = rx.try_recv() {
        ui.handle_event(&event);
    }
    Ok(outcome)
}

fn cancel_on_ctrl_c(token: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received, canceling builds");
            token.cancel();
        }
    })
}

fn print_summary(runner: &BuildRunner) {
    println!();
    println!(
        "{:>3}  {:<5} {:<9} {:<10} Branch",
        "#", "Level", "Component", "Status"
    );
    for (i, item) in runner.queue().items().iter().enumerate() {
        let status = match item.status {
            ItemStatus::Completed => style(item.status.to_string()).green(),
            ItemStatus::Failed => style(item.status.to_string()).red(),
            ItemStatus::Canceled => style(item.status.to_string()).yellow(),
            _ => style(item.status.to_string()).dim(),
        };
        println!(
            "{:>3}  {:<5} {:<9} {:<10} {}",
            i,
            item.target.level,
            item.target.component,
            status,
            item.target.branch
        );
    }
    println!();
    println!(
        "{} history entries (see {})",
        runner.history().len(),
        style("branchyard history").cyan()
    );
}
