//! Level-gated build queue.
//!
//! Builds run strictly one at a time. An item at level N may start only after some
//! item at level N-1 has completed.
//!
//! ## Architecture
//!
//! 1. **State** - Queue items and their allowed status transitions
//! 2. **Engine** - [`BuildQueue`], a synchronous state machine advanced by `tick`
//! 3. **Runner** - [`BuildRunner`], which ticks the engine on a timer, honours a
//!    cancellation token and writes finished builds to the history log
//!
//! ## Example
//!
//! ```no_run
//! use branchyard::history::{BuildHistory, MemoryStore};
//! use branchyard::queue::{BuildQueue, BuildRunner, QueueConfig};
//! use std::time::Duration;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example(targets: Vec<branchyard::queue::BuildTarget>) -> anyhow::Result<()> {
//! let history = BuildHistory::open(MemoryStore::new())?;
//! let mut runner = BuildRunner::new(
//!     BuildQueue::new(QueueConfig::default()),
//!     history,
//!     Duration::from_millis(500),
//! );
//! for target in targets {
//!     runner.enqueue(target)?;
//! }
//! let outcome = runner.run(&CancellationToken::new()).await?;
//! # Ok(())
//! # }
//! ```

pub mod engine;
pub mod runner;
pub mod state;

pub use engine::{BuildQueue, Enqueued, QueueConfig, TickOutcome};
pub use runner::{BuildRunner, QueueEvent, RunOutcome};
pub use state::{BuildTarget, ItemStatus, QueueItem, is_valid_transition};
