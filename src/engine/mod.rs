//! Downsample engines.
//!
//! An engine turns a z-pair of same-shaped slices into one slice at half the
//! width and height. Two engines ship with the crate:
//!
//! - [`ReferenceDownsampler`]: scalar two-pass implementation, always available
//! - [`FastDownsampler`]: fused, row-parallel implementation on a rayon pool
//!
//! Both must produce identical samples for identical input. The numeric
//! contract (truncating depth average, truncating 2x2 box mean, trailing odd
//! row/column dropped) is documented on [`ReferenceDownsampler`].
//!
//! Engines perform no I/O. The [`BackendSelector`] decides which engine gets
//! to build a level and remembers engines that could not initialise.

mod fast;
mod reference;
mod selector;

pub use fast::{FastDownsampler, FAST_ENGINE};
pub use reference::{ReferenceDownsampler, REFERENCE_ENGINE};
pub use selector::{BackendSelector, EnginePreference};

use crate::error::EngineError;
use crate::slice::Slice;

/// A pure z-pair downsampler.
pub trait Downsampler: Send + Sync {
    /// Stable engine name, used in logs and in the pyramid manifest.
    fn name(&self) -> &'static str;

    /// Acquire whatever the engine needs before the first `combine`.
    ///
    /// A failure here is reported as [`EngineError::Unavailable`] and the
    /// engine is not attempted again during the same build.
    fn initialize(&self) -> Result<(), EngineError> {
        Ok(())
    }

    /// Combine two slices of one z-pair into one slice of the next level.
    ///
    /// For the unpaired last slice of an odd level, callers pass the same
    /// slice twice.
    fn combine(&self, a: &Slice, b: &Slice) -> Result<Slice, EngineError>;
}

/// Reject pairs whose slices differ in width, height or bit depth.
pub fn check_pair(a: &Slice, b: &Slice) -> Result<(), EngineError> {
    if a.shape() != b.shape() {
        return Err(EngineError::DimensionMismatch {
            left: a.shape(),
            right: b.shape(),
        });
    }
    Ok(())
}
