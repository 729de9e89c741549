//! Progress reporting and cooperative cancellation.
//!
//! Both types are cheap to clone and safe to share between the workers of a
//! level and whatever is watching the build (a CLI, a UI thread).

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::{Duration, Instant};

use serde::Serialize;

// =============================================================================
// Cancellation
// =============================================================================

/// Cooperative cancellation flag.
///
/// Workers check it between pairs; a pair that has started is allowed to
/// finish computing but is not written unless it already passed its last
/// check. With several workers a few such writes can land after the request.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Idempotent.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

// =============================================================================
// Progress
// =============================================================================

/// Point-in-time view of a build's progress.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ProgressSnapshot {
    /// Level currently being built (0 before the first level starts)
    pub level: usize,

    /// Pairs written so far in the current level
    pub pairs_done: usize,

    /// Pairs in the current level
    pub pairs_total: usize,

    /// Overall completion in percent, weighted by the work of each level
    pub percent: f64,

    /// Time since the build started
    pub elapsed: Duration,

    /// Estimated time left; `None` until some work has been done
    pub eta: Option<Duration>,
}

/// Shared progress counters for one build.
///
/// Workers only ever increment `pairs_done`; everything else is written by the
/// orchestrating task. Readers may poll from any thread.
#[derive(Debug, Default)]
pub struct BuildProgress {
    level: AtomicUsize,
    pairs_done: AtomicUsize,
    pairs_total: AtomicUsize,
    /// Relative work of each planned level, indexed by `level - 1`.
    weights: RwLock<Vec<f64>>,
    clock: Mutex<Option<Clock>>,
}

/// Timing state behind the ETA.
///
/// The rate is measured from `baseline`, which moves forward whenever work is
/// taken over from disk instead of computed.
#[derive(Debug, Clone, Copy)]
struct Clock {
    started: Instant,
    baseline: Instant,
    baseline_percent: f64,
}

impl BuildProgress {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the relative weight of every level that will be built and
    /// start the clock.
    pub fn set_plan(&self, weights: Vec<f64>) {
        match self.weights.write() {
            Ok(mut guard) => *guard = weights,
            Err(poisoned) => *poisoned.into_inner() = weights,
        }

        let now = Instant::now();
        *self.clock.lock().unwrap_or_else(PoisonError::into_inner) = Some(Clock {
            started: now,
            baseline: now,
            baseline_percent: 0.0,
        });
    }

    /// Reset the pair counters for a new level (or a new attempt at one).
    pub fn start_level(&self, level: usize, pairs_total: usize) {
        self.pairs_done.store(0, Ordering::SeqCst);
        self.pairs_total.store(pairs_total, Ordering::SeqCst);
        self.level.store(level, Ordering::SeqCst);
    }

    /// Mark the current level as fully done, e.g. when it was reused from disk.
    pub fn complete_level(&self) {
        self.pairs_done
            .store(self.pairs_total.load(Ordering::SeqCst), Ordering::SeqCst);
        self.rebase_clock();
    }

    /// Count pairs of the current level that an earlier run already wrote.
    pub fn resume_pairs(&self, pairs: usize) {
        if pairs == 0 {
            return;
        }
        self.pairs_done.fetch_add(pairs, Ordering::SeqCst);
        self.rebase_clock();
    }

    /// Restart rate measurement so work found on disk does not count as speed.
    fn rebase_clock(&self) {
        let percent = self.percent();
        let mut guard = self.clock.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(clock) = guard.as_mut() {
            clock.baseline = Instant::now();
            clock.baseline_percent = percent;
        }
    }

    /// Count one written pair and return the new total for the level.
    pub fn pair_completed(&self) -> usize {
        self.pairs_done.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn level(&self) -> usize {
        self.level.load(Ordering::SeqCst)
    }

    pub fn pairs_done(&self) -> usize {
        self.pairs_done.load(Ordering::SeqCst)
    }

    pub fn pairs_total(&self) -> usize {
        self.pairs_total.load(Ordering::SeqCst)
    }

    fn percent(&self) -> f64 {
        let level = self.level();
        let done = self.pairs_done();
        let total = self.pairs_total();
        match self.weights.read() {
            Ok(weights) => weighted_percent(&weights, level, done, total),
            Err(poisoned) => weighted_percent(&poisoned.into_inner(), level, done, total),
        }
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        let level = self.level();
        let pairs_done = self.pairs_done();
        let pairs_total = self.pairs_total();
        let percent = self.percent();

        let clock = *self.clock.lock().unwrap_or_else(PoisonError::into_inner);
        let (elapsed, eta) = match clock {
            Some(clock) => (clock.started.elapsed(), estimate_remaining(&clock, percent)),
            None => (Duration::ZERO, None),
        };

        ProgressSnapshot {
            level,
            pairs_done,
            pairs_total,
            percent,
            elapsed,
            eta,
        }
    }
}

/// Extrapolate the time left from the rate since the clock's baseline.
fn estimate_remaining(clock: &Clock, percent: f64) -> Option<Duration> {
    if percent >= 100.0 - 1e-9 {
        return Some(Duration::ZERO);
    }
    let gained = percent - clock.baseline_percent;
    if gained <= 0.0 {
        return None;
    }

    let secs = clock.baseline.elapsed().as_secs_f64() * (100.0 - percent) / gained;
    secs.is_finite().then(|| Duration::from_secs_f64(secs.max(0.0)))
}

fn weighted_percent(weights: &[f64], level: usize, done: usize, total: usize) -> f64 {
    let total_weight: f64 = weights.iter().sum();
    if total_weight <= 0.0 {
        return 100.0;
    }
    if level == 0 {
        return 0.0;
    }

    let finished: f64 = weights.iter().take(level - 1).sum();
    let fraction = if total == 0 {
        1.0
    } else {
        done as f64 / total as f64
    };
    let current = weights.get(level - 1).copied().unwrap_or(0.0) * fraction;

    ((finished + current) / total_weight * 100.0).min(100.0)
}
