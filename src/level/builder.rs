//! Level construction.
//!
//! The [`LevelBuilder`] fans the pairs of one level out over a bounded set of
//! blocking workers, then joins them all before reporting. Each worker reads
//! its two source slices, runs the engine, checks the output shape and writes
//! the result through the sink. At most `workers` pairs are in flight, so at
//! most three slices per worker are resident at any time.
//!
//! ```text
//!            source level k (n slices)
//!   ┌──────┬──────┬──────┬──────┬──────┐
//!   │ 0  1 │ 2  3 │ 4  5 │ ...  │ n-1  │   pairs (last may self-pair)
//!   └──┬───┴──┬───┴──┬───┴──────┴──┬───┘
//!      ▼      ▼      ▼             ▼
//!   [worker][worker][worker]  ...        bounded by a semaphore
//!      │      │      │             │
//!      ▼      ▼      ▼             ▼
//!   000000 000001 000002  ...  ceil(n/2)-1   level k+1
//! ```

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::{Id, JoinError, JoinSet};
use tracing::{debug, info, warn};

use crate::engine::Downsampler;
use crate::error::{LevelError, PairFailure, PairFailureReason};
use crate::slice::{LevelSource, SliceShape};

use super::progress::{BuildProgress, CancelToken};
use super::sink::SliceSink;

/// Result of a fully written level.
#[derive(Debug, Clone, PartialEq)]
pub struct LevelSummary {
    pub level: usize,
    pub shape: SliceShape,
    pub count: usize,
    pub engine: &'static str,
}

/// Builds one level from the previous one with a given engine.
pub struct LevelBuilder {
    engine: Arc<dyn Downsampler>,
    workers: usize,
    resume: bool,
}

impl LevelBuilder {
    /// Create a builder running at most `workers` pairs concurrently.
    pub fn new(engine: Arc<dyn Downsampler>, workers: usize) -> Self {
        Self {
            engine,
            workers: workers.max(1),
            resume: false,
        }
    }

    /// Keep the slices an interrupted run already wrote for this level and
    /// compute only the missing pairs.
    pub fn resuming(mut self, resume: bool) -> Self {
        self.resume = resume;
        self
    }

    /// Build level `source.level() + 1`.
    ///
    /// Returns a summary only when every pair was written. Pair failures do
    /// not stop sibling pairs; they are collected and reported together as
    /// [`LevelError::PartiallyFailed`].
    ///
    /// On cancellation no new pair is started and the level is reported as
    /// [`LevelError::Cancelled`]. Running pairs finish computing and are
    /// written only if they passed their last cancellation check before the
    /// request. If cancellation is requested after the N-th write, at most
    /// `N + workers - 1` slices of the level end up on disk; with one worker
    /// that is exactly N.
    pub async fn build_level(
        &self,
        source: Arc<LevelSource>,
        sink: Arc<dyn SliceSink>,
        progress: Arc<BuildProgress>,
        cancel: CancelToken,
    ) -> Result<LevelSummary, LevelError> {
        let level = source.level() + 1;
        let expected = source.shape().halved();
        let total = source.pair_count();
        let engine_name = self.engine.name();

        self.engine
            .initialize()
            .map_err(LevelError::EngineUnavailable)?;

        let finished = if self.resume {
            sink.resume_level(level, expected, total)?
        } else {
            sink.prepare_level(level)?;
            Vec::new()
        };
        let mut pending = vec![true; total];
        for &position in &finished {
            if let Some(slot) = pending.get_mut(position) {
                *slot = false;
            }
        }
        let kept = total - pending.iter().filter(|p| **p).count();

        progress.start_level(level, total);
        progress.resume_pairs(kept);
        if kept > 0 {
            info!(
                "Level {}: {}/{} slice(s) kept from an earlier run",
                level, kept, total
            );
        }

        info!(
            "Building level {} with '{}' engine: {} pair(s), {} -> {}",
            level,
            engine_name,
            total,
            source.shape(),
            expected
        );

        let semaphore = Arc::new(Semaphore::new(self.workers));
        let mut tasks = JoinSet::new();
        let mut pairs_by_task = HashMap::new();

        for pair in (0..total).filter(|&pair| pending[pair]) {
            if cancel.is_cancelled() {
                debug!("Cancellation requested, not dispatching pair {}", pair);
                break;
            }
            let Ok(permit) = Arc::clone(&semaphore).acquire_owned().await else {
                break;
            };
            if cancel.is_cancelled() {
                break;
            }

            let job = PairJob {
                pair,
                level,
                expected,
                source: Arc::clone(&source),
                sink: Arc::clone(&sink),
                engine: Arc::clone(&self.engine),
                progress: Arc::clone(&progress),
                cancel: cancel.clone(),
            };

            let task = tasks.spawn_blocking(move || {
                let _permit = permit;
                let status = catch_unwind(AssertUnwindSafe(|| job.run()))
                    .unwrap_or_else(|panic| Err(PairFailureReason::Panicked(panic_message(panic))));
                (pair, status)
            });
            pairs_by_task.insert(task.id(), pair);
        }

        let mut written = 0usize;
        let mut failures = Vec::new();
        while let Some(joined) = tasks.join_next_with_id().await {
            match joined {
                Ok((_, (_, Ok(PairStatus::Written)))) => written += 1,
                Ok((_, (_, Ok(PairStatus::Skipped)))) => {}
                Ok((_, (pair, Err(reason)))) => {
                    warn!("Level {} pair {} failed: {}", level, pair, reason);
                    failures.push(PairFailure { pair, reason });
                }
                Err(e) => {
                    let failure = lost_worker(&pairs_by_task, e);
                    warn!(
                        "Level {} worker for pair {} lost: {}",
                        level, failure.pair, failure.reason
                    );
                    failures.push(failure);
                }
            }
        }

        let done = kept + written;
        if done < total && cancel.is_cancelled() {
            info!(
                "Level {} cancelled with {}/{} slice(s) on disk",
                level, done, total
            );
            return Err(LevelError::Cancelled { level, written });
        }

        if !failures.is_empty() {
            failures.sort_by_key(|f| f.pair);
            return Err(LevelError::PartiallyFailed {
                level,
                engine: engine_name,
                failures,
            });
        }

        info!("Level {} complete: {} slice(s) of {}", level, done, expected);
        Ok(LevelSummary {
            level,
            shape: expected,
            count: done,
            engine: engine_name,
        })
    }
}

// =============================================================================
// Pair Job
// =============================================================================

enum PairStatus {
    Written,
    /// Cancelled before the result was written.
    Skipped,
}

struct PairJob {
    pair: usize,
    level: usize,
    expected: SliceShape,
    source: Arc<LevelSource>,
    sink: Arc<dyn SliceSink>,
    engine: Arc<dyn Downsampler>,
    progress: Arc<BuildProgress>,
    cancel: CancelToken,
}

impl PairJob {
    fn run(&self) -> Result<PairStatus, PairFailureReason> {
        if self.cancel.is_cancelled() {
            return Ok(PairStatus::Skipped);
        }

        let (first, second) = self.source.pair_indices(self.pair);
        let a = self.source.read(first).map_err(PairFailureReason::Read)?;
        let b = match second {
            Some(index) => Some(self.source.read(index).map_err(PairFailureReason::Read)?),
            None => None,
        };

        let out = self
            .engine
            .combine(&a, b.as_ref().unwrap_or(&a))
            .map_err(PairFailureReason::Compute)?;
        drop(a);
        drop(b);

        if out.shape() != self.expected {
            return Err(PairFailureReason::UnexpectedShape {
                expected: self.expected,
                found: out.shape(),
            });
        }

        if self.cancel.is_cancelled() {
            return Ok(PairStatus::Skipped);
        }

        self.sink
            .write_slice(self.level, self.pair, &out)
            .map_err(PairFailureReason::Write)?;

        let done = self.progress.pair_completed();
        debug!(
            "Level {} pair {} written ({} done)",
            self.level, self.pair, done
        );
        Ok(PairStatus::Written)
    }
}

/// Failure record for a worker task that ended without reporting back.
fn lost_worker(pairs_by_task: &HashMap<Id, usize>, error: JoinError) -> PairFailure {
    let pair = pairs_by_task.get(&error.id()).copied().unwrap_or(usize::MAX);
    let reason = if error.is_panic() {
        PairFailureReason::Panicked(panic_message(error.into_panic()))
    } else {
        PairFailureReason::Panicked(error.to_string())
    };
    PairFailure { pair, reason }
}

fn panic_message(panic: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

// =============================================================================
// Tests
// =============================================================================
