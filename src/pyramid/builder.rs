//! Pyramid orchestration.
//!
//! Levels are built strictly one after another. Each level is attempted with
//! the engines of the [`BackendSelector`] in priority order; the first engine
//! that writes every pair wins, and only then is the level committed to the
//! manifest and re-opened as the source of the next one.
//!
//! ```text
//!   level k ──► should_build(k+1)? ──no──► done
//!                     │ yes
//!                     ▼
//!          ┌── recorded & valid? ──yes──► reuse
//!          │          │ no
//!          │          ▼
//!          │   fast ──fail──► discard ──► reference ──fail──► LevelFailure
//!          │     │                           │
//!          │     ▼ ok                        ▼ ok
//!          └──────────► commit + re-open ◄───┘
//! ```
//!
//! When a build continues an earlier one, the first level that cannot be
//! reused keeps the slices the earlier run finished and only the missing pairs
//! are computed. If that attempt fails, the level is discarded as usual and the
//! next engine starts it from scratch.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::engine::{BackendSelector, EnginePreference};
use crate::error::{BuildError, BuildFailure, LevelError};
use crate::level::{
    BuildProgress, CancelToken, LevelBuilder, LevelSummary, ProgressSnapshot, SliceSink,
};
use crate::slice::{LevelSource, SliceShape};

use super::manifest::{LevelRecord, SourceRecord};
use super::policy::{plan_levels, StopPolicy};
use super::store::DirectoryStore;

// =============================================================================
// Configuration
// =============================================================================

/// Number of workers used when none is configured.
pub fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

/// Settings of a [`PyramidBuilder`].
#[derive(Debug, Clone)]
pub struct BuilderConfig {
    pub policy: StopPolicy,

    /// Whether the fast engine is attempted at all
    pub engine: EnginePreference,

    /// Maximum pairs in flight per level
    pub workers: usize,

    /// Reuse levels recorded in an existing manifest
    pub resume: bool,
}

impl Default for BuilderConfig {
    fn default() -> Self {
        Self {
            policy: StopPolicy::default(),
            engine: EnginePreference::default(),
            workers: default_workers(),
            resume: true,
        }
    }
}

/// Cancellation and progress handles for one build.
#[derive(Debug, Clone, Default)]
pub struct BuildJob {
    pub cancel: CancelToken,
    pub progress: Arc<BuildProgress>,
}

impl BuildJob {
    pub fn new() -> Self {
        Self::default()
    }
}

// =============================================================================
// Results
// =============================================================================

/// One complete level of a pyramid.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PyramidLevel {
    pub index: usize,
    pub shape: SliceShape,
    pub count: usize,
    pub directory: PathBuf,
    /// Engine that produced the level; `None` for level 0
    pub engine: Option<String>,
}

/// The complete levels of a pyramid, level 0 first.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Pyramid {
    pub root: PathBuf,
    pub levels: Vec<PyramidLevel>,
}

impl Pyramid {
    pub fn levels(&self) -> &[PyramidLevel] {
        &self.levels
    }

    pub fn level(&self, index: usize) -> Option<&PyramidLevel> {
        self.levels.get(index)
    }

    /// Index of the coarsest complete level.
    pub fn top_level(&self) -> usize {
        self.levels.len().saturating_sub(1)
    }

    fn push_generated(&mut self, store: &DirectoryStore, record: &LevelRecord) {
        self.levels.push(PyramidLevel {
            index: record.level,
            shape: record.shape(),
            count: record.count,
            directory: store.level_dir(record.level),
            engine: Some(record.engine.clone()),
        });
    }
}

/// Outcome of a build that produced a usable pyramid.
///
/// Levels `0..=pyramid.top_level()` are complete whether or not `failure` is
/// set; `failure` explains why the pyramid is not as tall as planned.
#[derive(Debug, Clone)]
pub struct BuildReport {
    pub pyramid: Pyramid,
    pub failure: Option<BuildFailure>,
}

impl BuildReport {
    pub fn is_complete(&self) -> bool {
        self.failure.is_none()
    }
}

// =============================================================================
// Pyramid Builder
// =============================================================================

/// Builds pyramid levels on top of a level-0 stack until the stop policy ends it.
pub struct PyramidBuilder {
    config: BuilderConfig,
    selector: BackendSelector,
}

impl PyramidBuilder {
    pub fn new(config: BuilderConfig) -> Self {
        let selector = BackendSelector::new(config.engine);
        Self::with_selector(config, selector)
    }

    /// Use a custom engine list instead of the one implied by `config.engine`.
    pub fn with_selector(config: BuilderConfig, selector: BackendSelector) -> Self {
        Self { config, selector }
    }

    pub fn config(&self) -> &BuilderConfig {
        &self.config
    }

    pub fn selector(&self) -> &BackendSelector {
        &self.selector
    }

    /// Open `input` as level 0 and build on top of it.
    ///
    /// Shape disagreements between input slices are reported as
    /// [`BuildError::InconsistentLevel`] before anything is written.
    pub async fn build_directory(
        &self,
        input: &Path,
        store: Arc<DirectoryStore>,
        job: &BuildJob,
    ) -> Result<BuildReport, BuildError> {
        let source = LevelSource::open_directory(input)?;
        self.build(source, store, job).await
    }

    /// Build every level the stop policy allows on top of `source`.
    ///
    /// Returns `Err` only when nothing usable could be produced. Level
    /// failures and cancellation end the build early with the completed levels
    /// in the report and the reason in [`BuildReport::failure`].
    pub async fn build(
        &self,
        source: LevelSource,
        store: Arc<DirectoryStore>,
        job: &BuildJob,
    ) -> Result<BuildReport, BuildError> {
        self.config.policy.validate().map_err(BuildError::InvalidPolicy)?;

        let plan = plan_levels(source.shape(), source.len(), &self.config.policy);
        job.progress
            .set_plan(plan.iter().map(|level| level.weight).collect());

        info!(
            "Building pyramid over {} slice(s) of {}: {} level(s) planned, engines {:?}",
            source.len(),
            source.shape(),
            plan.len(),
            self.selector.engine_names()
        );

        let resumed = store
            .begin(SourceRecord::new(source.shape(), source.len()), self.config.resume)
            .map_err(BuildError::Storage)?;
        let mut reuse = resumed.is_some();
        let reusable = resumed.unwrap_or_default();

        let mut pyramid = Pyramid {
            root: store.root().to_path_buf(),
            levels: vec![PyramidLevel {
                index: 0,
                shape: source.shape(),
                count: source.len(),
                directory: source
                    .path(0)
                    .and_then(Path::parent)
                    .map(Path::to_path_buf)
                    .unwrap_or_default(),
                engine: None,
            }],
        };

        let mut current = Arc::new(source);
        let mut failure = None;
        let mut level = 1;

        while self.config.policy.should_build(level, current.shape()) {
            if job.cancel.is_cancelled() {
                info!("Build cancelled before level {}", level);
                failure = Some(BuildFailure::Cancelled { level });
                break;
            }

            if reuse {
                if let Some((record, next)) = self.reuse_level(level, &current, &reusable, &store) {
                    job.progress.start_level(level, record.count);
                    job.progress.complete_level();
                    pyramid.push_generated(&store, &record);
                    current = Arc::new(next);
                    level += 1;
                    continue;
                }
            }

            // Only the level right above the reused ones can hold slices of
            // this source from an interrupted run.
            let resume = std::mem::take(&mut reuse);
            let summary = match self.build_level(level, &current, &store, job, resume).await {
                Ok(summary) => summary,
                Err(e) => {
                    warn!("{}", e);
                    failure = Some(e);
                    break;
                }
            };

            match commit(&store, &summary) {
                Ok((record, next)) => {
                    pyramid.push_generated(&store, &record);
                    current = Arc::new(next);
                    level += 1;
                }
                Err(e) => {
                    warn!("Level {} could not be committed: {}", level, e);
                    failure = Some(BuildFailure::LevelFailure {
                        level,
                        attempts: vec![e],
                    });
                    break;
                }
            }
        }

        if failure.is_none() {
            info!(
                "Pyramid complete: {} generated level(s) in {}",
                pyramid.top_level(),
                pyramid.root.display()
            );
        }

        Ok(BuildReport { pyramid, failure })
    }

    /// Re-open a level recorded by an earlier run, if it still fits this build.
    fn reuse_level(
        &self,
        level: usize,
        current: &LevelSource,
        reusable: &[LevelRecord],
        store: &DirectoryStore,
    ) -> Option<(LevelRecord, LevelSource)> {
        let record = reusable.iter().find(|r| r.level == level)?;
        if record.shape() != current.shape().halved() || record.count != current.pair_count() {
            return None;
        }

        match store.open_level(record) {
            Ok(next) => {
                info!(
                    "Reusing level {} ({} slice(s) of {})",
                    level,
                    record.count,
                    record.shape()
                );
                Some((record.clone(), next))
            }
            Err(e) => {
                warn!("Recorded level {} is unusable, rebuilding: {}", level, e);
                None
            }
        }
    }

    /// Attempt one level with each available engine until one succeeds.
    ///
    /// With `resume` set, the first attempt keeps slices already on disk.
    async fn build_level(
        &self,
        level: usize,
        current: &Arc<LevelSource>,
        store: &Arc<DirectoryStore>,
        job: &BuildJob,
        mut resume: bool,
    ) -> Result<LevelSummary, BuildFailure> {
        let mut attempts = Vec::new();

        for engine in self.selector.available() {
            if job.cancel.is_cancelled() {
                return Err(BuildFailure::Cancelled { level });
            }

            let name = engine.name();
            let sink: Arc<dyn SliceSink> = store.clone();
            let result = LevelBuilder::new(engine, self.config.workers)
                .resuming(resume)
                .build_level(
                    Arc::clone(current),
                    sink,
                    Arc::clone(&job.progress),
                    job.cancel.clone(),
                )
                .await;

            let err = match result {
                Ok(summary) => return Ok(summary),
                // Partial files of a cancelled level stay on disk but are never
                // recorded, so they are never read.
                Err(LevelError::Cancelled { .. }) => return Err(BuildFailure::Cancelled { level }),
                Err(err) => err,
            };

            warn!("Level {} failed with '{}' engine: {}", level, name, err);
            if let LevelError::EngineUnavailable(_) = &err {
                // Nothing was written, so earlier output is still intact.
                self.selector.mark_unavailable(name);
            } else {
                if let Err(e) = store.discard_level(level) {
                    warn!("Could not discard level {} output: {}", level, e);
                }
                resume = false;
            }
            attempts.push(err);
        }

        Err(BuildFailure::LevelFailure { level, attempts })
    }

    /// Run the build on the tokio runtime and return immediately.
    pub fn start(self, source: LevelSource, store: Arc<DirectoryStore>) -> BuildHandle {
        let job = BuildJob::new();
        let task_job = job.clone();
        let task = tokio::spawn(async move { self.build(source, store, &task_job).await });
        BuildHandle { job, task }
    }
}

/// Record a written level and re-open it as the next source.
fn commit(
    store: &DirectoryStore,
    summary: &LevelSummary,
) -> Result<(LevelRecord, LevelSource), LevelError> {
    let record = store.commit_level(summary)?;
    let next = store.open_level(&record)?;
    Ok((record, next))
}

// =============================================================================
// Background Handle
// =============================================================================

/// A build running in the background.
pub struct BuildHandle {
    job: BuildJob,
    task: JoinHandle<Result<BuildReport, BuildError>>,
}

impl BuildHandle {
    pub fn progress(&self) -> ProgressSnapshot {
        self.job.progress.snapshot()
    }

    /// Request cooperative cancellation.
    pub fn cancel(&self) {
        self.job.cancel.cancel();
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.job.cancel.clone()
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait for the build to end.
    pub async fn wait(self) -> Result<BuildReport, BuildError> {
        self.task
            .await
            .map_err(|e| BuildError::Aborted(e.to_string()))?
    }
}
