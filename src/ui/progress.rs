//! Build queue progress UI.
//!
//! Renders [`QueueEvent`]s in one of three modes:
//! - `full`: one `indicatif` bar per queue item under an overall header bar
//! - `minimal`: one line per state change, suitable for logs and pipes
//! - `json`: one JSON object per event

use crate::queue::{QueueEvent, RunOutcome};
use crate::ui::icons::{BLOCKER, CHECK, CROSS, RUNNING, SPARKLE, STOP};
use console::{Term, style};
use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::collections::HashMap;
use std::io::Write;
use std::time::Duration;

/// Output mode for the build UI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UiMode {
    /// Progress bars
    #[default]
    Full,
    /// Single-line status updates
    Minimal,
    /// JSON-formatted events
    Json,
}

impl std::str::FromStr for UiMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "full" => Ok(Self::Full),
            "minimal" => Ok(Self::Minimal),
            "json" => Ok(Self::Json),
            _ => anyhow::bail!("Invalid output mode '{}'. Valid values: full, minimal, json", s),
        }
    }
}

/// Terminal UI for a build run.
pub struct BuildUI {
    mode: UiMode,
    multi: MultiProgress,
    header_bar: ProgressBar,
    /// Bars of items that are building or have finished, by queue index
    item_bars: HashMap<usize, ProgressBar>,
    verbose: bool,
    term: Term,
}

impl BuildUI {
    /// Create the UI for a run over `total_items` queue items.
    pub fn new(total_items: usize, mode: UiMode, verbose: bool) -> Self {
        let multi = if mode == UiMode::Full {
            MultiProgress::new()
        } else {
            MultiProgress::with_draw_target(ProgressDrawTarget::hidden())
        };
        let header_bar = multi.add(ProgressBar::new(total_items as u64));
        header_bar.set_style(
            ProgressStyle::default_bar()
                .template("{prefix:.bold} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
                .expect("progress bar template is a valid static string")
                .progress_chars("█▓▒░"),
        );
        header_bar.set_prefix("Queue");

        Self {
            mode,
            multi,
            header_bar,
            item_bars: HashMap::new(),
            verbose,
            term: Term::stdout(),
        }
    }

    /// Mark items that were already finished before this run started.
    pub fn set_done(&self, done: usize) {
        self.header_bar.set_position(done as u64);
    }

    fn print_line(&self, msg: impl AsRef<str>) {
        match self.mode {
            UiMode::Full => {
                if self.multi.println(msg.as_ref()).is_err() {
                    eprintln!("{}", msg.as_ref());
                }
            }
            _ => {
                let _ = writeln!(&self.term, "{}", msg.as_ref());
            }
        }
    }

    pub fn handle_event(&mut self, event: &QueueEvent) {
        match self.mode {
            UiMode::Json => self.handle_json(event),
            UiMode::Minimal => self.handle_minimal(event),
            UiMode::Full => self.handle_full(event),
        }
    }

    fn handle_json(&self, event: &QueueEvent) {
        if let Ok(json) = serde_json::to_string(event) {
            let _ = writeln!(&self.term, "{}", json);
        }
    }

    fn handle_minimal(&self, event: &QueueEvent) {
        match event {
            QueueEvent::Started {
                index,
                level,
                component,
                branch,
            } => {
                self.print_line(format!("[{}] building L{} {} {}", index, level, component, branch));
            }
            QueueEvent::Progress { index, progress } if self.verbose => {
                self.print_line(format!("[{}] {}%", index, progress));
            }
            QueueEvent::Completed { index, entry } => {
                self.print_line(format!(
                    "[{}] completed {} in {}",
                    index,
                    entry.branch,
                    entry.duration_display()
                ));
            }
            QueueEvent::Failed { index, entry } => {
                self.print_line(format!(
                    "[{}] failed {} after {}",
                    index,
                    entry.branch,
                    entry.duration_display()
                ));
            }
            QueueEvent::Canceled { indices } => {
                self.print_line(format!("canceled {}", join_indices(indices)));
            }
            QueueEvent::Blocked { index, level } => {
                self.print_line(format!(
                    "[{}] blocked: level {} needs a completed level {} build",
                    index,
                    level,
                    level.saturating_sub(1)
                ));
            }
            QueueEvent::Idle => self.print_line("queue idle"),
            _ => {}
        }
    }

    fn handle_full(&mut self, event: &QueueEvent) {
        match event {
            QueueEvent::Started {
                index,
                level,
                component,
                branch,
            } => self.on_started(*index, *level, component, branch),
            QueueEvent::Progress { index, progress } => {
                if let Some(bar) = self.item_bars.get(index) {
                    bar.set_position(u64::from(*progress));
                }
            }
            QueueEvent::Completed { index, entry } => {
                if let Some(bar) = self.item_bars.get(index) {
                    bar.set_style(finished_style("green/green"));
                    bar.finish_with_message(format!(
                        "{}{}",
                        CHECK,
                        style(entry.duration_display()).dim()
                    ));
                }
                self.header_bar.inc(1);
            }
            QueueEvent::Failed { index, entry } => {
                if let Some(bar) = self.item_bars.get(index) {
                    bar.set_style(finished_style("red/white"));
                    bar.abandon_with_message(format!(
                        "{}{}",
                        CROSS,
                        style(format!("timed out after {}", entry.duration_display())).red()
                    ));
                }
            }
            QueueEvent::Canceled { indices } => {
                for index in indices {
                    if let Some(bar) = self.item_bars.get(index) {
                        bar.set_position(0);
                        bar.abandon_with_message(format!("{}{}", STOP, style("canceled").yellow()));
                    }
                }
                self.print_line(format!(
                    "{}Canceled {}",
                    STOP,
                    style(join_indices(indices)).yellow()
                ));
            }
            QueueEvent::Blocked { index, level } => {
                self.print_line(format!(
                    "{}Item {} is waiting for a completed level {} build",
                    BLOCKER,
                    index,
                    level.saturating_sub(1)
                ));
            }
            QueueEvent::Idle => {}
        }
    }

    fn on_started(&mut self, index: usize, level: u32, component: &str, branch: &str) {
        let bar = self.multi.add(ProgressBar::new(100));
        bar.set_style(
            ProgressStyle::default_bar()
                .template("  {prefix:.bold} [{bar:30.green/white}] {pos:>3}% {msg}")
                .expect("progress bar template is a valid static string")
                .progress_chars("█▓░"),
        );
        bar.set_prefix(format!("L{} {:<6}", level, component));
        bar.set_message(format!("{}{}", RUNNING, style(branch).dim()));
        bar.enable_steady_tick(Duration::from_millis(100));
        if let Some(old) = self.item_bars.insert(index, bar) {
            // A retried item gets a fresh bar.
            old.finish_and_clear();
        }
        self.header_bar
            .set_message(format!("building {}", style(branch).yellow()));
    }

    /// Close the UI and print a one-line summary.
    pub fn finish(&self, outcome: &RunOutcome) {
        self.header_bar.finish_and_clear();
        match (self.mode, outcome) {
            (UiMode::Json, _) => {}
            (_, RunOutcome::Drained) => {
                self.print_line(format!("{}{}", SPARKLE, style("Queue drained").green().bold()));
            }
            (_, RunOutcome::Blocked { index, level }) => {
                self.print_line(format!(
                    "{}Stopped: item {} at level {} is blocked",
                    BLOCKER, index, level
                ));
            }
            (_, RunOutcome::Canceled { indices }) => {
                self.print_line(format!(
                    "{}Stopped: {} build(s) canceled",
                    STOP,
                    indices.len()
                ));
            }
        }
    }
}

fn finished_style(colors: &str) -> ProgressStyle {
    ProgressStyle::default_bar()
        .template(&format!(
            "  {{prefix:.bold}} [{{bar:30.{}}}] {{pos:>3}}% {{msg}}",
            colors
        ))
        .expect("progress bar template is valid")
        .progress_chars("███")
}

fn join_indices(indices: &[usize]) -> String {
    if indices.is_empty() {
        return "nothing".to_string();
    }
    let list: Vec<String> = indices.iter().map(|i| i.to_string()).collect();
    format!("item(s) {}", list.join(", "))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ui_mode_from_str() {
        assert_eq!("json".parse::<UiMode>().unwrap(), UiMode::Json);
        assert_eq!("MINIMAL".parse::<UiMode>().unwrap(), UiMode::Minimal);
        assert_eq!("full".parse::<UiMode>().unwrap(), UiMode::Full);
        assert!("fancy".parse::<UiMode>().is_err());
    }

    #[test]
    fn test_join_indices() {
        assert_eq!(join_indices(&[]), "nothing");
        assert_eq!(join_indices(&[0, 1]), "item(s) 0, 1");
    }

    #[test]
    fn test_queue_event_json_serialization() {
        let event = QueueEvent::Progress {
            index: 2,
            progress: 40,
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"type\":\"progress\""));
        assert!(json.contains("\"progress\":40"));
    }

    #[test]
    fn test_full_mode_tracks_item_bars() {
        let mut ui = BuildUI::new(2, UiMode::Full, false);
        ui.multi.set_draw_target(ProgressDrawTarget::hidden());
        ui.handle_event(&QueueEvent::Started {
            index: 0,
            level: 1,
            component: "server".to_string(),
            branch: "feature/x/l1-f1-server".to_string(),
        });
        ui.handle_event(&QueueEvent::Progress {
            index: 0,
            progress: 30,
        });
        assert_eq!(ui.item_bars[&0].position(), 30);

        ui.handle_event(&QueueEvent::Canceled { indices: vec![0, 1] });
        assert_eq!(ui.item_bars[&0].position(), 0);
        assert!(ui.item_bars[&0].is_finished());
    }
}
