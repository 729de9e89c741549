//! # ct-pyramid
//!
//! Multi-resolution pyramids for CT slice stacks.
//!
//! This library turns a directory of full-resolution grayscale CT slices into a
//! pyramid of progressively smaller volumes: every generated level has half as
//! many slices as the one below it, each at half the width and height. Viewers
//! use the coarse levels to browse multi-gigabyte scans interactively.
//!
//! ## Features
//!
//! - **Two interchangeable engines**: a fused, row-parallel fast engine and a
//!   scalar reference engine that produce identical samples
//! - **Automatic fallback**: a level the fast engine cannot finish is rebuilt
//!   with the reference engine, never mixed
//! - **Bounded memory**: slices are read per pair, never per level
//! - **Progress and cancellation**: weighted progress and cooperative
//!   cancellation that never marks an incomplete level as done
//! - **Resume and verify**: completed levels are recorded in a manifest and
//!   reused by later runs
//!
//! ## Architecture
//!
//! - [`slice`] - Slice representation, file codec, naming and level sources
//! - [`engine`] - Downsample engines and backend selection
//! - [`level`] - Parallel construction of one level
//! - [`pyramid`] - Stop policy, orchestration, storage and manifest
//! - [`config`] - CLI and configuration types
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::path::Path;
//! use std::sync::Arc;
//!
//! use ct_pyramid::{BuilderConfig, DirectoryStore, LevelSource, PyramidBuilder, StopPolicy};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let source = LevelSource::open_directory(Path::new("/data/scan"))?;
//!     let store = Arc::new(DirectoryStore::open("/data/scan/.thumbnail")?);
//!
//!     let config = BuilderConfig {
//!         policy: StopPolicy {
//!             min_dimension: 2,
//!             ..Default::default()
//!         },
//!         ..Default::default()
//!     };
//!
//!     let handle = PyramidBuilder::new(config).start(source, store);
//!     println!("{:.1}%", handle.progress().percent);
//!
//!     let report = handle.wait().await?;
//!     println!("built {} level(s)", report.pyramid.top_level());
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod engine;
pub mod error;
pub mod level;
pub mod pyramid;
pub mod slice;

// Re-export commonly used types
pub use config::{BuildConfig, Cli, Command, PlanConfig, PolicyArgs, VerifyConfig};
pub use engine::{
    check_pair, BackendSelector, Downsampler, EnginePreference, FastDownsampler,
    ReferenceDownsampler, FAST_ENGINE, REFERENCE_ENGINE,
};
pub use error::{
    BuildError, BuildFailure, EngineError, LevelError, PairFailure, PairFailureReason, SliceError,
};
pub use level::{
    BuildProgress, CancelToken, LevelBuilder, LevelSummary, ProgressSnapshot, SliceSink,
};
pub use pyramid::{
    default_workers, plan_levels, BuildHandle, BuildJob, BuildReport, BuilderConfig,
    DirectoryStore, LevelRecord, PlannedLevel, Pyramid, PyramidBuilder, PyramidLevel,
    PyramidManifest, SourceRecord, StopPolicy, MANIFEST_FILE,
};
pub use slice::{
    discover_slices, BitDepth, LevelSource, NamingScheme, Slice, SliceData, SliceShape,
};
