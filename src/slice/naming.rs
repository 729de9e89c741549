//! Canonical identifiers for generated slices.
//!
//! Generated levels never reuse level-0 file names. Each level gets its own
//! directory named after the level index, and slices inside it are numbered
//! from zero with a fixed-width, zero-padded position:
//!
//! ```text
//! <root>/1/000000.tif
//! <root>/1/000001.tif
//! <root>/2/000000.tif
//! ```
//!
//! The mapping depends only on `(level, position)`, so any engine and any run
//! produce the same names.

use std::path::{Path, PathBuf};

/// Default zero-padding width for slice positions.
pub const DEFAULT_POSITION_DIGITS: usize = 6;

/// Extension of generated slice files.
pub const SLICE_EXTENSION: &str = "tif";

/// Mapping between `(level, position)` and slice identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NamingScheme {
    digits: usize,
}

impl Default for NamingScheme {
    fn default() -> Self {
        Self {
            digits: DEFAULT_POSITION_DIGITS,
        }
    }
}

impl NamingScheme {
    pub fn new() -> Self {
        Self::default()
    }

    /// Relative identifier of a slice, e.g. `2/000013.tif`.
    pub fn identifier_for(&self, level: usize, position: usize) -> String {
        format!("{}/{}", self.level_dir_name(level), self.file_name(position))
    }

    /// File name of a slice inside its level directory.
    pub fn file_name(&self, position: usize) -> String {
        format!(
            "{:0width$}.{}",
            position,
            SLICE_EXTENSION,
            width = self.digits
        )
    }

    pub fn level_dir_name(&self, level: usize) -> String {
        level.to_string()
    }

    pub fn level_dir(&self, root: &Path, level: usize) -> PathBuf {
        root.join(self.level_dir_name(level))
    }

    /// Absolute location of a slice: `root` joined with its identifier.
    pub fn slice_path(&self, root: &Path, level: usize, position: usize) -> PathBuf {
        root.join(self.identifier_for(level, position))
    }

    /// Recover the position from a generated file name.
    ///
    /// Returns `None` for names this scheme would not produce.
    pub fn parse_position(&self, file_name: &str) -> Option<usize> {
        let stem = file_name.strip_suffix(SLICE_EXTENSION)?.strip_suffix('.')?;
        if stem.len() < self.digits || !stem.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        let position: usize = stem.parse().ok()?;
        (self.file_name(position) == file_name).then_some(position)
    }
}
