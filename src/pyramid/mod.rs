//! Pyramid layer.
//!
//! Turns a level-0 stack into a pyramid on disk:
//!
//! - [`StopPolicy`] and [`plan_levels`] decide which levels get built
//! - [`PyramidBuilder`] builds them in order with per-level engine fallback
//! - [`DirectoryStore`] writes slices and records completed levels in a
//!   [`PyramidManifest`], which is what makes resume and verification possible
//!
//! # Example
//!
//! ```rust,no_run
//! use std::path::Path;
//! use std::sync::Arc;
//!
//! use ct_pyramid::{BuildJob, BuilderConfig, DirectoryStore, PyramidBuilder};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let store = Arc::new(DirectoryStore::open("/data/scan/.thumbnail")?);
//! let builder = PyramidBuilder::new(BuilderConfig::default());
//! let report = builder
//!     .build_directory(Path::new("/data/scan"), store, &BuildJob::new())
//!     .await?;
//!
//! println!("{} level(s) complete", report.pyramid.top_level());
//! if let Some(failure) = report.failure {
//!     println!("stopped early: {}", failure);
//! }
//! # Ok(())
//! # }
//! ```

mod builder;
mod manifest;
mod policy;
mod store;

pub use builder::{
    default_workers, BuildHandle, BuildJob, BuildReport, BuilderConfig, Pyramid, PyramidBuilder,
    PyramidLevel,
};
pub use manifest::{LevelRecord, PyramidManifest, SourceRecord, MANIFEST_FILE, MANIFEST_VERSION};
pub use policy::{plan_levels, PlannedLevel, StopPolicy, DEFAULT_MIN_DIMENSION};
pub use store::DirectoryStore;
