use crate::error::SliceError;
use crate::slice::{Slice, SliceShape};

/// Destination for the slices of a level under construction.
///
/// The sink owns naming: callers pass the level and the pair index, and the
/// sink stores the slice under the identifier the [`crate::slice::NamingScheme`]
/// assigns to that position. Completion order therefore never affects names.
pub trait SliceSink: Send + Sync {
    /// Create an empty output location for `level`, dropping anything left over
    /// from an earlier attempt.
    fn prepare_level(&self, level: usize) -> Result<(), SliceError>;

    /// Prepare `level` while keeping the slices an interrupted run already
    /// finished.
    ///
    /// Returns the positions below `count` that hold a complete slice of
    /// `shape`, in ascending order. Anything else in the level is dropped.
    /// Sinks that cannot keep earlier output start the level afresh.
    fn resume_level(
        &self,
        level: usize,
        shape: SliceShape,
        count: usize,
    ) -> Result<Vec<usize>, SliceError> {
        let _ = (shape, count);
        self.prepare_level(level)?;
        Ok(Vec::new())
    }

    /// Durably store one slice. Returns only after the data is flushed.
    fn write_slice(&self, level: usize, position: usize, slice: &Slice) -> Result<(), SliceError>;
}
