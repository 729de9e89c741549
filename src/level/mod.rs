//! Level layer.
//!
//! Builds one pyramid level from the level below it. The layer knows nothing
//! about stop policies, manifests or fallback: it takes an engine, a source
//! level and a sink, and either writes every slice of the next level or
//! reports exactly what went wrong.
//!
//! - [`LevelBuilder`]: bounded-concurrency pair fan-out with a join barrier
//! - [`SliceSink`]: where finished slices go
//! - [`BuildProgress`] / [`CancelToken`]: shared with observers of the build

mod builder;
mod progress;
mod sink;

pub use builder::{LevelBuilder, LevelSummary};
pub use progress::{BuildProgress, CancelToken, ProgressSnapshot};
pub use sink::SliceSink;
