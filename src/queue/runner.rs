//! Timer-driven execution of a build queue.
//!
//! The runner is the single owner of the queue and the history log. It ticks the
//! queue on a fixed interval, checks the cancellation token once per tick, and writes
//! every finished build through to the history.

use crate::errors::QueueError;
use crate::history::{BuildHistory, BuildHistoryEntry};
use crate::queue::engine::{BuildQueue, Enqueued, TickOutcome};
use crate::queue::state::BuildTarget;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// Events emitted while the queue runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum QueueEvent {
    Started {
        index: usize,
        level: u32,
        component: String,
        branch: String,
    },
    Progress {
        index: usize,
        progress: u8,
    },
    Completed {
        index: usize,
        entry: BuildHistoryEntry,
    },
    Failed {
        index: usize,
        entry: BuildHistoryEntry,
    },
    Canceled {
        indices: Vec<usize>,
    },
    Blocked {
        index: usize,
        level: u32,
    },
    /// Nothing left to build.
    Idle,
}

/// Why a run stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// Every item reached a terminal state
    Drained,
    /// The next pending item waits on a level gate nobody is building
    Blocked { index: usize, level: u32 },
    /// The token was canceled; these items were stopped
    Canceled { indices: Vec<usize> },
}

/// Drives a [`BuildQueue`] and records finished builds.
#[derive(Debug)]
pub struct BuildRunner {
    queue: BuildQueue,
    history: BuildHistory,
    tick_interval: Duration,
    event_tx: Option<mpsc::Sender<QueueEvent>>,
}

impl BuildRunner {
    pub fn new(queue: BuildQueue, history: BuildHistory, tick_interval: Duration) -> Self {
        Self {
            queue,
            history,
            tick_interval,
            event_tx: None,
        }
    }

    /// Set the event channel for progress updates.
    pub fn with_event_channel(mut self, tx: mpsc::Sender<QueueEvent>) -> Self {
        self.event_tx = Some(tx);
        self
    }

    pub fn queue(&self) -> &BuildQueue {
        &self.queue
    }

    pub fn history(&self) -> &BuildHistory {
        &self.history
    }

    pub fn enqueue(&mut self, target: BuildTarget) -> Result<Enqueued, QueueError> {
        self.queue.enqueue(target)
    }

    /// Retry a canceled or failed item. Takes effect on the next [`run`](Self::run).
    pub fn retry(&mut self, index: usize) -> Result<bool, QueueError> {
        self.queue.retry(index)
    }

    /// Retry every canceled or failed item, in index order.
    pub fn retry_all(&mut self) -> Vec<usize> {
        let retryable: Vec<usize> = self
            .queue
            .items()
            .iter()
            .enumerate()
            .filter(|(_, item)| item.status.is_retryable())
            .map(|(i, _)| i)
            .collect();
        for &index in &retryable {
            // Indices come from the queue itself and are retryable.
            let _ = self.queue.retry(index);
        }
        retryable
    }

    /// Tick the queue until it drains, blocks, or `cancel` fires.
    ///
    /// Cancellation is observed once per tick, never in the middle of one.
    pub async fn run(&mut self, cancel: &CancellationToken) -> Result<RunOutcome, QueueError> {
        let mut interval = tokio::time::interval(self.tick_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            interval.tick().await;

            if cancel.is_cancelled() {
                let indices = self.queue.cancel();
                self.emit(QueueEvent::Canceled {
                    indices: indices.clone(),
                })
                .await;
                return Ok(RunOutcome::Canceled { indices });
            }

            let history = &mut self.history;
            let outcome = self
                .queue
                .tick_recorded(Instant::now(), |entry| history.add_entry(entry.clone()))?;
            match outcome {
                TickOutcome::Idle => {
                    self.emit(QueueEvent::Idle).await;
                    return Ok(RunOutcome::Drained);
                }
                TickOutcome::Blocked { index, level } => {
                    tracing::warn!(index, level, "queue blocked on level gate");
                    self.emit(QueueEvent::Blocked { index, level }).await;
                    return Ok(RunOutcome::Blocked { index, level });
                }
                TickOutcome::Started { index } => {
                    let event = match self.queue.item(index) {
                        Some(item) => QueueEvent::Started {
                            index,
                            level: item.target.level,
                            component: item.target.component.to_string(),
                            branch: item.target.branch.clone(),
                        },
                        None => continue,
                    };
                    self.emit(event).await;
                }
                TickOutcome::Progressed { index, progress } => {
                    self.emit(QueueEvent::Progress { index, progress }).await;
                }
                TickOutcome::Completed { index, entry } => {
                    self.emit(QueueEvent::Completed { index, entry }).await;
                }
                TickOutcome::Failed { index, entry } => {
                    self.emit(QueueEvent::Failed { index, entry }).await;
                }
            }
        }
    }

    async fn emit(&self, event: QueueEvent) {
        if let Some(ref tx) = self.event_tx {
            tx.send(event).await.ok();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::HistoryError;
    use crate::history::{BuildStatus, HistoryStore, MemoryStore};
    use crate::queue::engine::QueueConfig;
    use crate::queue::state::ItemStatus;
    use crate::story::{Component, IssueRef, LevelCatalog, Selection, StoryStore};
    use crate::tag::TagCatalog;
    use std::path::PathBuf;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};

    const TICK: Duration = Duration::from_millis(500);

    fn runner(store: MemoryStore) -> BuildRunner {
        BuildRunner::new(
            BuildQueue::new(QueueConfig::default()),
            BuildHistory::open(store).unwrap(),
            TICK,
        )
    }

    fn target(level: u32, component: Component) -> BuildTarget {
        BuildTarget {
            level,
            feature: 1,
            component,
            tag: Some("v2.0.0".to_string()),
            branch: format!("feature/x/l{}-f1-{}", level, component),
            autogenerated: false,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_story_to_history_end_to_end() {
        let mut stories = StoryStore::new(TagCatalog::default(), LevelCatalog::default());
        let story = stories
            .add_story(
                IssueRef::new("checkout flow", "main"),
                vec![Selection::new(1, 1, Component::Server)],
            )
            .unwrap()
            .clone();

        let store = MemoryStore::new();
        let mut runner = runner(store.clone());
        for target in story.build_plan() {
            runner.enqueue(target).unwrap();
        }

        let outcome = runner.run(&CancellationToken::new()).await.unwrap();
        assert_eq!(outcome, RunOutcome::Drained);

        let item = &runner.queue().items()[0];
        assert_eq!(item.status, ItemStatus::Completed);
        assert_eq!(item.progress, 100);

        let history = runner.history().entries();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].component, "server");
        assert_eq!(history[0].level, 1);
        assert_eq!(history[0].status, BuildStatus::Completed);
        assert_eq!(history[0].branch, "feature/checkout-flow/l1-f1-server");
        assert_eq!(history[0].tag.as_deref(), Some("v2.0.0"));
        assert_eq!(history[0].duration, TICK * 10);
        assert_eq!(store.load().unwrap(), history);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_at_forty_percent_then_retry() {
        let store = MemoryStore::new();
        let (tx, mut rx) = mpsc::channel(100);
        let mut runner = runner(store.clone()).with_event_channel(tx);
        runner.enqueue(target(1, Component::Server)).unwrap();
        runner.enqueue(target(2, Component::Agent)).unwrap();

        let token = CancellationToken::new();
        let watcher = {
            let token = token.clone();
            tokio::spawn(async move {
                let mut seen = Vec::new();
                while let Some(event) = rx.recv().await {
                    if matches!(event, QueueEvent::Progress { index: 0, progress: 40 }) {
                        token.cancel();
                    }
                    seen.push(event);
                }
                seen
            })
        };

        let outcome = runner.run(&token).await.unwrap();
        assert_eq!(outcome, RunOutcome::Canceled { indices: vec![0, 1] });
        for item in runner.queue().items() {
            assert_eq!(item.status, ItemStatus::Canceled);
            assert_eq!(item.progress, 0);
        }
        assert!(runner.history().is_empty());

        assert!(runner.retry(0).unwrap());
        let outcome = runner.run(&CancellationToken::new()).await.unwrap();
        assert_eq!(outcome, RunOutcome::Drained);
        assert_eq!(runner.queue().items()[0].status, ItemStatus::Completed);
        assert_eq!(runner.queue().items()[1].status, ItemStatus::Canceled);
        assert_eq!(runner.history().len(), 1);

        assert_eq!(runner.retry_all(), vec![1]);
        runner.run(&CancellationToken::new()).await.unwrap();
        assert_eq!(runner.queue().items()[1].status, ItemStatus::Completed);
        assert_eq!(store.persisted().len(), 2);

        drop(runner);
        let events = watcher.await.unwrap();
        assert!(matches!(events.first(), Some(QueueEvent::Started { index: 0, .. })));
        assert!(
            events
                .iter()
                .any(|e| matches!(e, QueueEvent::Canceled { indices } if indices == &vec![0, 1]))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_blocked_run_stops() {
        let mut runner = runner(MemoryStore::new());
        runner.enqueue(target(1, Component::Server)).unwrap();
        runner.enqueue(target(2, Component::Agent)).unwrap();

        let token = CancellationToken::new();
        token.cancel();
        runner.run(&token).await.unwrap();

        runner.retry(1).unwrap();
        let outcome = runner.run(&CancellationToken::new()).await.unwrap();
        assert_eq!(outcome, RunOutcome::Blocked { index: 1, level: 2 });
    }

    /// Memory store whose writes fail while `failing` is set.
    #[derive(Clone, Default)]
    struct FlakyStore {
        failing: Arc<AtomicBool>,
        inner: MemoryStore,
    }

    impl HistoryStore for FlakyStore {
        fn load(&self) -> Result<Vec<BuildHistoryEntry>, HistoryError> {
            self.inner.load()
        }

        fn save(&self, entries: &[BuildHistoryEntry]) -> Result<(), HistoryError> {
            if self.failing.load(Ordering::SeqCst) {
                return Err(HistoryError::WriteFailed {
                    path: PathBuf::from("history.json"),
                    source: std::io::Error::other("disk full"),
                });
            }
            self.inner.save(entries)
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_history_write_leaves_build_retryable() {
        let store = FlakyStore::default();
        store.failing.store(true, Ordering::SeqCst);
        let mut runner = BuildRunner::new(
            BuildQueue::new(QueueConfig::default()),
            BuildHistory::open(store.clone()).unwrap(),
            TICK,
        );
        runner.enqueue(target(1, Component::Server)).unwrap();

        let err = runner.run(&CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, QueueError::History(HistoryError::WriteFailed { .. })));
        assert_eq!(runner.queue().items()[0].status, ItemStatus::Failed);
        assert!(runner.queue().built_levels().is_empty());
        assert!(runner.history().is_empty());

        store.failing.store(false, Ordering::SeqCst);
        assert_eq!(runner.retry_all(), vec![0]);
        let outcome = runner.run(&CancellationToken::new()).await.unwrap();
        assert_eq!(outcome, RunOutcome::Drained);
        assert_eq!(runner.queue().items()[0].status, ItemStatus::Completed);
        assert_eq!(runner.history().len(), 1);
        assert_eq!(store.inner.persisted().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_history_reload_matches_after_run() {
        let store = MemoryStore::new();
        let mut runner = runner(store.clone());
        runner.enqueue(target(1, Component::Client)).unwrap();
        runner.enqueue(target(2, Component::Server)).unwrap();
        runner.run(&CancellationToken::new()).await.unwrap();

        let reloaded = BuildHistory::open(store).unwrap();
        assert_eq!(reloaded.entries(), runner.history().entries());
        assert_eq!(reloaded.len(), 2);
    }
}
