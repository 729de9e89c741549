use std::fmt;

use thiserror::Error;

use crate::slice::SliceShape;

/// Errors raised by a downsample engine.
#[derive(Debug, Clone, Error)]
pub enum EngineError {
    /// The two slices of a pair disagree in width, height or bit depth.
    ///
    /// This is a data or programming error and is never retried.
    #[error("Dimension mismatch: {left} vs {right}")]
    DimensionMismatch { left: SliceShape, right: SliceShape },

    /// The engine could not be initialised in this environment.
    #[error("Engine '{engine}' unavailable: {reason}")]
    Unavailable { engine: &'static str, reason: String },

    /// The engine failed while computing a slice.
    #[error("Engine '{engine}' failed: {message}")]
    Compute {
        engine: &'static str,
        message: String,
    },
}

/// Errors related to reading, writing and validating slices on storage.
#[derive(Debug, Clone, Error)]
pub enum SliceError {
    /// Filesystem error
    #[error("I/O error on {path}: {message}")]
    Io { path: String, message: String },

    /// The file exists but could not be decoded as an image
    #[error("Failed to decode {path}: {message}")]
    Decode { path: String, message: String },

    /// The slice could not be encoded for writing
    #[error("Failed to encode {path}: {message}")]
    Encode { path: String, message: String },

    /// Pixel layout that cannot be mapped to an 8- or 16-bit grayscale slice
    #[error("Unsupported color type {color} in {path}")]
    UnsupportedColor { path: String, color: String },

    /// The directory holds no usable slice files
    #[error("No slice images found in {dir}")]
    EmptyLevel { dir: String },

    /// A slice disagrees with the shape declared for its level
    #[error("Inconsistent level: {path} is {found}, expected {expected}")]
    InconsistentLevel {
        path: String,
        expected: SliceShape,
        found: SliceShape,
    },

    /// A slice the naming scheme expects is not present
    #[error("Level {level} is missing slice {position}")]
    MissingSlice { level: usize, position: usize },

    /// The pyramid manifest could not be read or written
    #[error("Manifest error: {0}")]
    Manifest(String),
}

impl SliceError {
    pub(crate) fn io(path: impl fmt::Display, err: std::io::Error) -> Self {
        SliceError::Io {
            path: path.to_string(),
            message: err.to_string(),
        }
    }
}

/// Why a single pair of a level could not be produced.
#[derive(Debug, Clone, Error)]
pub enum PairFailureReason {
    #[error("read failed: {0}")]
    Read(SliceError),

    #[error("compute failed: {0}")]
    Compute(EngineError),

    #[error("write failed: {0}")]
    Write(SliceError),

    /// The engine returned a slice that does not match the level's declared shape.
    #[error("engine produced {found}, expected {expected}")]
    UnexpectedShape {
        expected: SliceShape,
        found: SliceShape,
    },

    #[error("worker panicked: {0}")]
    Panicked(String),
}

/// A failed pair, recorded with its index in the source level.
#[derive(Debug, Clone, Error)]
#[error("pair {pair}: {reason}")]
pub struct PairFailure {
    pub pair: usize,
    pub reason: PairFailureReason,
}

/// Errors produced while building a single level.
#[derive(Debug, Clone, Error)]
pub enum LevelError {
    /// At least one pair failed; the level must not be used.
    #[error("Level {level} partially failed with engine '{engine}' ({} pair(s) failed)", failures.len())]
    PartiallyFailed {
        level: usize,
        engine: &'static str,
        failures: Vec<PairFailure>,
    },

    /// Cancellation was requested before every pair was written.
    #[error("Level {level} cancelled after {written} slice(s)")]
    Cancelled { level: usize, written: usize },

    /// The engine could not start.
    #[error(transparent)]
    EngineUnavailable(EngineError),

    /// The output location for the level could not be prepared.
    #[error("Storage error: {0}")]
    Storage(#[from] SliceError),
}

/// Diagnostic attached to a usable but not maximal pyramid.
///
/// Every level before `level` is complete and may be consumed.
#[derive(Debug, Clone, Error)]
pub enum BuildFailure {
    /// No engine could complete the level.
    #[error("Level {level} could not be built by any engine")]
    LevelFailure {
        level: usize,
        attempts: Vec<LevelError>,
    },

    #[error("Build cancelled at level {level}")]
    Cancelled { level: usize },
}

impl BuildFailure {
    /// Index of the level that was being built when the build stopped.
    pub fn level(&self) -> usize {
        match self {
            BuildFailure::LevelFailure { level, .. } | BuildFailure::Cancelled { level } => *level,
        }
    }
}

/// Fatal errors: no pyramid state is usable.
#[derive(Debug, Clone, Error)]
pub enum BuildError {
    /// The level-0 stack is not a single consistent shape.
    #[error("Inconsistent source: {0}")]
    InconsistentLevel(SliceError),

    /// The level-0 stack could not be opened.
    #[error("Source error: {0}")]
    Source(SliceError),

    /// The output location could not be prepared.
    #[error("Storage error: {0}")]
    Storage(SliceError),

    #[error("Invalid stop policy: {0}")]
    InvalidPolicy(String),

    #[error("Build task aborted: {0}")]
    Aborted(String),
}

impl From<SliceError> for BuildError {
    fn from(err: SliceError) -> Self {
        match err {
            SliceError::InconsistentLevel { .. } => BuildError::InconsistentLevel(err),
            other => BuildError::Source(other),
        }
    }
}
