//! The build queue state machine.
//!
//! `BuildQueue` is synchronous and clock-agnostic: every call to [`BuildQueue::tick`]
//! advances the simulation by one step at the instant passed in. The async
//! [`BuildRunner`](super::BuildRunner) drives it from a timer.

use crate::errors::QueueError;
use crate::history::{BuildHistoryEntry, BuildStatus, whole_millis};
use crate::queue::state::{BuildTarget, ItemStatus, QueueItem};
use chrono::Utc;
use std::collections::BTreeSet;
use std::convert::Infallible;
use std::time::Duration;
use tokio::time::Instant;

/// Tuning for the simulated builds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueConfig {
    /// Percent added to the building item per tick
    pub progress_step: u8,
    /// Watchdog: a build running longer than this fails
    pub max_build_duration: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            progress_step: 10,
            max_build_duration: Duration::from_secs(120),
        }
    }
}

impl QueueConfig {
    pub fn with_progress_step(mut self, step: u8) -> Self {
        self.progress_step = step.clamp(1, 100);
        self
    }

    pub fn with_max_build_duration(mut self, max: Duration) -> Self {
        self.max_build_duration = max;
        self
    }
}

/// Result of [`BuildQueue::enqueue`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Enqueued {
    /// A new item was appended at this index
    Added(usize),
    /// An item with the same (level, component) already sits at this index
    Duplicate(usize),
}

impl Enqueued {
    pub fn index(&self) -> usize {
        match self {
            Self::Added(i) | Self::Duplicate(i) => *i,
        }
    }
}

/// What one tick did.
#[derive(Debug, Clone, PartialEq)]
pub enum TickOutcome {
    /// Nothing is building and nothing is pending
    Idle,
    /// The next pending item waits on a level gate
    Blocked { index: usize, level: u32 },
    Started { index: usize },
    Progressed { index: usize, progress: u8 },
    Completed { index: usize, entry: BuildHistoryEntry },
    /// The watchdog stopped the build
    Failed { index: usize, entry: BuildHistoryEntry },
}

/// Sequential, level-gated build queue.
///
/// Items build one at a time in enqueue order. An item at level N may only start
/// once some item at level N-1 has completed; completion of any component unlocks
/// the whole next level.
#[derive(Debug, Clone, Default)]
pub struct BuildQueue {
    items: Vec<QueueItem>,
    building: Option<usize>,
    built_levels: BTreeSet<u32>,
    config: QueueConfig,
}

impl BuildQueue {
    pub fn new(config: QueueConfig) -> Self {
        Self {
            config,
            ..Default::default()
        }
    }

    pub fn items(&self) -> &[QueueItem] {
        &self.items
    }

    pub fn item(&self, index: usize) -> Option<&QueueItem> {
        self.items.get(index)
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    /// Index of the item currently building.
    pub fn building(&self) -> Option<usize> {
        self.building
    }

    /// Levels with at least one completed build.
    pub fn built_levels(&self) -> &BTreeSet<u32> {
        &self.built_levels
    }

    pub fn has_pending(&self) -> bool {
        self.items.iter().any(|i| i.status == ItemStatus::Pending)
    }

    /// True when no item is building or waiting.
    pub fn is_idle(&self) -> bool {
        self.building.is_none() && !self.has_pending()
    }

    /// Whether a build at `level` may start now.
    pub fn gate_open(&self, level: u32) -> bool {
        level <= 1 || self.built_levels.contains(&(level - 1))
    }

    /// Append a build.
    ///
    /// Enqueuing a (level, component) that is already queued is a no-op. A level
    /// whose gate can never open (nothing at the level below is completed or still
    /// active) is rejected.
    pub fn enqueue(&mut self, target: BuildTarget) -> Result<Enqueued, QueueError> {
        if let Some(index) = self.items.iter().position(|i| i.target.key() == target.key()) {
            tracing::debug!(index, level = target.level, component = %target.component, "duplicate enqueue ignored");
            return Ok(Enqueued::Duplicate(index));
        }

        let level = target.level;
        let reachable = self.gate_open(level)
            || self
                .items
                .iter()
                .any(|i| i.target.level == level - 1 && i.status.is_active());
        if !reachable {
            return Err(QueueError::LevelLocked { level });
        }

        let index = self.items.len();
        tracing::info!(index, level, component = %target.component, branch = %target.branch, "build enqueued");
        self.items.push(QueueItem::new(target));
        Ok(Enqueued::Added(index))
    }

    /// Advance the queue by one step.
    pub fn tick(&mut self, now: Instant) -> TickOutcome {
        match self.tick_recorded(now, |_| Ok::<(), Infallible>(())) {
            Ok(outcome) => outcome,
            Err(never) => match never {},
        }
    }

    /// Advance the queue by one step, handing a finished build's entry to `record`
    /// before the build is committed.
    ///
    /// When `record` fails the build is marked `Failed` without unlocking its level,
    /// so it can be retried, and the error is returned.
    pub fn tick_recorded<E>(
        &mut self,
        now: Instant,
        record: impl FnOnce(&BuildHistoryEntry) -> Result<(), E>,
    ) -> Result<TickOutcome, E> {
        let Some(index) = self.building else {
            return Ok(self.start_next(now));
        };

        let step = self.config.progress_step.max(1);
        let max = self.config.max_build_duration;
        let item = &mut self.items[index];
        let elapsed = item
            .started_at
            .map(|t| now.saturating_duration_since(t))
            .unwrap_or_default();

        let timed_out = elapsed > max;
        if !timed_out {
            item.progress = item.progress.saturating_add(step).min(100);
            if item.progress < 100 {
                tracing::debug!(index, progress = item.progress, "build progressed");
                return Ok(TickOutcome::Progressed {
                    index,
                    progress: item.progress,
                });
            }
        }

        let status = if timed_out {
            BuildStatus::Failed
        } else {
            BuildStatus::Completed
        };
        let entry = history_entry(item, status, elapsed);
        self.building = None;

        if let Err(err) = record(&entry) {
            self.items[index].reset(ItemStatus::Failed);
            tracing::warn!(index, "build result could not be recorded, marked failed");
            return Err(err);
        }

        let item = &mut self.items[index];
        if timed_out {
            item.transition(ItemStatus::Failed);
            tracing::warn!(index, elapsed_ms = elapsed.as_millis() as u64, "build exceeded watchdog limit");
            return Ok(TickOutcome::Failed { index, entry });
        }

        item.transition(ItemStatus::Completed);
        let level = item.target.level;
        self.built_levels.insert(level);
        tracing::info!(index, level, "build completed");
        Ok(TickOutcome::Completed { index, entry })
    }

    fn start_next(&mut self, now: Instant) -> TickOutcome {
        let Some(index) = self
            .items
            .iter()
            .position(|i| i.status == ItemStatus::Pending)
        else {
            return TickOutcome::Idle;
        };

        let level = self.items[index].target.level;
        if !self.gate_open(level) {
            tracing::debug!(index, level, "next build blocked on level gate");
            return TickOutcome::Blocked { index, level };
        }

        let item = &mut self.items[index];
        item.transition(ItemStatus::Building);
        item.progress = 0;
        item.started_at = Some(now);
        item.started_wall = Some(Utc::now());
        self.building = Some(index);
        tracing::info!(index, level, component = %item.target.component, "build started");
        TickOutcome::Started { index }
    }

    /// Cancel the running build, or the next pending one, and everything after it.
    ///
    /// Returns the indices that were canceled.
    pub fn cancel(&mut self) -> Vec<usize> {
        let from = self.building.or_else(|| {
            self.items
                .iter()
                .position(|i| i.status == ItemStatus::Pending)
        });
        match from {
            Some(index) => self.cancel_from(index),
            None => Vec::new(),
        }
    }

    /// Cancel every item at `index` or later that has not completed.
    /// Items before `index` are untouched.
    pub fn cancel_from(&mut self, index: usize) -> Vec<usize> {
        let mut canceled = Vec::new();
        for (i, item) in self.items.iter_mut().enumerate().skip(index) {
            if matches!(item.status, ItemStatus::Completed | ItemStatus::Canceled) {
                continue;
            }
            item.reset(ItemStatus::Canceled);
            canceled.push(i);
        }
        if self.building.is_some_and(|b| b >= index) {
            self.building = None;
        }
        if !canceled.is_empty() {
            tracing::warn!(from = index, count = canceled.len(), "builds canceled");
        }
        canceled
    }

    /// Put a canceled or failed item back in line.
    ///
    /// Returns `true` when nothing is building, so the item is eligible on the next
    /// tick; otherwise it waits for the current build and then runs in index order.
    pub fn retry(&mut self, index: usize) -> Result<bool, QueueError> {
        let item = self
            .items
            .get_mut(index)
            .ok_or(QueueError::NoSuchItem { index })?;
        if !item.status.is_retryable() {
            return Err(QueueError::NotRetryable {
                index,
                status: item.status.to_string(),
            });
        }
        item.reset(ItemStatus::Pending);
        tracing::info!(index, "build retried");
        Ok(self.building.is_none())
    }
}

fn history_entry(item: &QueueItem, status: BuildStatus, elapsed: Duration) -> BuildHistoryEntry {
    BuildHistoryEntry {
        timestamp: item.started_wall.unwrap_or_else(Utc::now),
        component: item.target.component.to_string(),
        level: item.target.level,
        branch: item.target.branch.clone(),
        tag: item.target.tag.clone(),
        status,
        duration: whole_millis(elapsed),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::story::Component;

    const TICK: Duration = Duration::from_millis(500);

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

    /// Drives a queue with a synthetic clock.
    struct Harness {
        queue: BuildQueue,
        now: Instant,
    }

    impl Harness {
        fn new() -> Self {
            Self {
                queue: BuildQueue::new(QueueConfig::default()),
                now: Instant::now(),
            }
        }

        fn tick(&mut self) -> TickOutcome {
            self.now += TICK;
            let outcome = self.queue.tick(self.now);
            assert!(
                self.queue
                    .items()
                    .iter()
                    .filter(|i| i.status == ItemStatus::Building)
                    .count()
                    <= 1
            );
            outcome
        }

        fn status(&self, index: usize) -> ItemStatus {
            self.queue.items()[index].status
        }

        fn run_until_idle(&mut self) -> Vec<TickOutcome> {
            let mut outcomes = Vec::new();
            for _ in 0..1000 {
                let outcome = self.tick();
                if matches!(outcome, TickOutcome::Idle | TickOutcome::Blocked { .. }) {
                    outcomes.push(outcome);
                    return outcomes;
                }
                outcomes.push(outcome);
            }
            panic!("queue did not settle");
        }
    }

    #[test]
    fn test_single_build_completes_with_history_entry() {
        let mut h = Harness::new();
        h.queue.enqueue(target(1, Component::Server)).unwrap();

        assert_eq!(h.tick(), TickOutcome::Started { index: 0 });
        assert_eq!(h.status(0), ItemStatus::Building);

        let outcomes = h.run_until_idle();
        let completed: Vec<&BuildHistoryEntry> = outcomes
            .iter()
            .filter_map(|o| match o {
                TickOutcome::Completed { entry, .. } => Some(entry),
                _ => None,
            })
            .collect();

        assert_eq!(completed.len(), 1);
        assert_eq!(completed[0].component, "server");
        assert_eq!(completed[0].level, 1);
        assert_eq!(completed[0].status, BuildStatus::Completed);
        assert_eq!(completed[0].duration, TICK * 10);
        assert_eq!(h.status(0), ItemStatus::Completed);
        assert_eq!(h.queue.items()[0].progress, 100);
        assert!(h.queue.built_levels().contains(&1));
    }

    #[test]
    fn test_never_jumps_from_pending_to_completed() {
        let mut h = Harness::new();
        h.queue = BuildQueue::new(QueueConfig::default().with_progress_step(100));
        h.queue.enqueue(target(1, Component::Server)).unwrap();

        assert_eq!(h.tick(), TickOutcome::Started { index: 0 });
        assert_eq!(h.status(0), ItemStatus::Building);
        assert!(matches!(h.tick(), TickOutcome::Completed { index: 0, .. }));
    }

    #[test]
    fn test_fifo_one_at_a_time() {
        let mut h = Harness::new();
        h.queue.enqueue(target(1, Component::Server)).unwrap();
        h.queue.enqueue(target(1, Component::Agent)).unwrap();
        h.queue.enqueue(target(1, Component::Client)).unwrap();

        let outcomes = h.run_until_idle();
        let starts: Vec<usize> = outcomes
            .iter()
            .filter_map(|o| match o {
                TickOutcome::Started { index } => Some(*index),
                _ => None,
            })
            .collect();
        assert_eq!(starts, vec![0, 1, 2]);
        assert!(h.queue.is_idle());
    }

    #[test]
    fn test_duplicate_enqueue_is_noop() {
        let mut queue = BuildQueue::default();
        assert_eq!(
            queue.enqueue(target(1, Component::Server)).unwrap(),
            Enqueued::Added(0)
        );
        let mut other_feature = target(1, Component::Server);
        other_feature.feature = 4;
        assert_eq!(queue.enqueue(other_feature).unwrap(), Enqueued::Duplicate(0));
        assert_eq!(queue.items().len(), 1);
    }

    #[test]
    fn test_enqueue_rejects_unreachable_level() {
        let mut queue = BuildQueue::default();
        assert!(matches!(
            queue.enqueue(target(2, Component::Agent)),
            Err(QueueError::LevelLocked { level: 2 })
        ));
        queue.enqueue(target(1, Component::Server)).unwrap();
        // Level 1 is queued, so level 2 can eventually run.
        assert_eq!(
            queue.enqueue(target(2, Component::Agent)).unwrap(),
            Enqueued::Added(1)
        );
        assert!(queue.enqueue(target(3, Component::Client)).is_ok());
    }

    #[test]
    fn test_level_gate_opens_only_after_completion() {
        let mut h = Harness::new();
        h.queue.enqueue(target(1, Component::Server)).unwrap();
        h.queue.enqueue(target(2, Component::Agent)).unwrap();

        h.tick(); // start level 1
        assert!(!h.queue.gate_open(2));
        for _ in 0..9 {
            h.tick();
            assert_eq!(h.status(1), ItemStatus::Pending);
        }
        assert!(matches!(h.tick(), TickOutcome::Completed { index: 0, .. }));
        assert!(h.queue.gate_open(2));
        assert_eq!(h.tick(), TickOutcome::Started { index: 1 });
    }

    #[test]
    fn test_any_component_unlocks_next_level() {
        let mut h = Harness::new();
        h.queue.enqueue(target(1, Component::Client)).unwrap();
        h.queue.enqueue(target(2, Component::Server)).unwrap();
        h.queue.enqueue(target(2, Component::Agent)).unwrap();
        h.run_until_idle();
        assert!((0..3).all(|i| h.status(i) == ItemStatus::Completed));
    }

    #[test]
    fn test_cancel_at_index_leaves_earlier_items() {
        let mut h = Harness::new();
        for c in Component::ALL {
            h.queue.enqueue(target(1, c)).unwrap();
        }
        h.queue.enqueue(target(2, Component::Server)).unwrap();

        // Finish item 0, start item 1 and get it partway.
        while h.status(0) != ItemStatus::Completed {
            h.tick();
        }
        h.tick();
        h.tick();
        assert_eq!(h.status(1), ItemStatus::Building);

        let canceled = h.queue.cancel();
        assert_eq!(canceled, vec![1, 2, 3]);
        assert_eq!(h.status(0), ItemStatus::Completed);
        for i in 1..4 {
            assert_eq!(h.status(i), ItemStatus::Canceled);
            assert_eq!(h.queue.items()[i].progress, 0);
        }
        assert_eq!(h.queue.building(), None);
        assert_eq!(h.tick(), TickOutcome::Idle);
    }

    #[test]
    fn test_cancel_at_forty_percent_then_retry_first() {
        let mut h = Harness::new();
        h.queue.enqueue(target(1, Component::Server)).unwrap();
        h.queue.enqueue(target(2, Component::Agent)).unwrap();

        h.tick();
        for _ in 0..4 {
            h.tick();
        }
        assert_eq!(h.queue.items()[0].progress, 40);

        h.queue.cancel();
        assert_eq!(h.status(0), ItemStatus::Canceled);
        assert_eq!(h.status(1), ItemStatus::Canceled);

        assert!(h.queue.retry(0).unwrap());
        assert_eq!(h.status(0), ItemStatus::Pending);
        assert_eq!(h.queue.items()[0].progress, 0);

        let outcomes = h.run_until_idle();
        assert!(matches!(outcomes.last(), Some(TickOutcome::Idle)));
        assert_eq!(h.status(0), ItemStatus::Completed);
        assert_eq!(h.status(1), ItemStatus::Canceled);

        h.queue.retry(1).unwrap();
        h.run_until_idle();
        assert_eq!(h.status(1), ItemStatus::Completed);
    }

    #[test]
    fn test_retry_while_building_waits_its_turn() {
        let mut h = Harness::new();
        h.queue.enqueue(target(1, Component::Server)).unwrap();
        h.queue.enqueue(target(1, Component::Agent)).unwrap();
        h.queue.cancel_from(1);
        h.tick();
        assert_eq!(h.queue.building(), Some(0));

        assert!(!h.queue.retry(1).unwrap());
        assert_eq!(h.status(1), ItemStatus::Pending);
        h.run_until_idle();
        assert_eq!(h.status(1), ItemStatus::Completed);
    }

    #[test]
    fn test_retry_rejects_non_retryable() {
        let mut queue = BuildQueue::default();
        queue.enqueue(target(1, Component::Server)).unwrap();
        assert!(matches!(
            queue.retry(0),
            Err(QueueError::NotRetryable { index: 0, .. })
        ));
        assert!(matches!(queue.retry(7), Err(QueueError::NoSuchItem { index: 7 })));
    }

    #[test]
    fn test_retry_of_gated_item_blocks_until_lower_level_retried() {
        let mut h = Harness::new();
        h.queue.enqueue(target(1, Component::Server)).unwrap();
        h.queue.enqueue(target(2, Component::Agent)).unwrap();
        h.queue.cancel();

        h.queue.retry(1).unwrap();
        assert_eq!(h.tick(), TickOutcome::Blocked { index: 1, level: 2 });

        h.queue.retry(0).unwrap();
        h.run_until_idle();
        assert_eq!(h.status(0), ItemStatus::Completed);
        assert_eq!(h.status(1), ItemStatus::Completed);
    }

    #[test]
    fn test_watchdog_fails_stalled_build() {
        let mut queue = BuildQueue::new(
            QueueConfig::default().with_max_build_duration(Duration::from_secs(1)),
        );
        queue.enqueue(target(1, Component::Server)).unwrap();
        queue.enqueue(target(1, Component::Agent)).unwrap();

        let t0 = Instant::now();
        assert_eq!(queue.tick(t0), TickOutcome::Started { index: 0 });
        // The next tick arrives late, past the watchdog limit.
        match queue.tick(t0 + Duration::from_secs(5)) {
            TickOutcome::Failed { index, entry } => {
                assert_eq!(index, 0);
                assert_eq!(entry.status, BuildStatus::Failed);
                assert_eq!(entry.duration, Duration::from_secs(5));
            }
            other => panic!("expected Failed, got {:?}", other),
        }
        assert_eq!(queue.items()[0].status, ItemStatus::Failed);
        assert!(!queue.built_levels().contains(&1));

        // The queue moves on, and the failed item can be retried.
        assert_eq!(
            queue.tick(t0 + Duration::from_secs(6)),
            TickOutcome::Started { index: 1 }
        );
        assert!(!queue.retry(0).unwrap());
    }

    #[test]
    fn test_unrecorded_completion_stays_retryable() {
        let mut queue = BuildQueue::new(QueueConfig::default().with_progress_step(100));
        queue.enqueue(target(1, Component::Server)).unwrap();

        let t0 = Instant::now();
        assert_eq!(queue.tick(t0), TickOutcome::Started { index: 0 });
        let result = queue.tick_recorded(t0 + TICK, |entry| {
            assert_eq!(entry.status, BuildStatus::Completed);
            Err("disk full")
        });
        assert_eq!(result, Err("disk full"));
        assert_eq!(queue.items()[0].status, ItemStatus::Failed);
        assert_eq!(queue.items()[0].progress, 0);
        assert_eq!(queue.building(), None);
        assert!(!queue.built_levels().contains(&1));

        assert!(queue.retry(0).unwrap());
        assert_eq!(queue.tick(t0 + TICK * 2), TickOutcome::Started { index: 0 });
        let recorded = queue.tick_recorded(t0 + TICK * 3, |_| Ok::<(), &str>(()));
        assert!(matches!(recorded, Ok(TickOutcome::Completed { index: 0, .. })));
        assert!(queue.built_levels().contains(&1));
    }
}
