//! Read-only view over one level of a slice stack.
//!
//! A [`LevelSource`] knows where every slice of a level lives and the shape
//! they all share. It never holds pixel data: slices are decoded on demand, one
//! at a time, so memory stays bounded regardless of the stack size.
//!
//! Level 0 is discovered from an arbitrary directory of images in natural
//! order. Generated levels are resolved through the [`NamingScheme`].

use std::cmp::Ordering;
use std::fs;
use std::path::{Path, PathBuf};

use natord::compare as natord_compare;
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::error::SliceError;

use super::codec::{is_partial, probe_shape, read_slice};
use super::naming::NamingScheme;
use super::pixels::{Slice, SliceShape};

/// File extensions accepted as level-0 slices (lowercase).
pub const SUPPORTED_EXTENSIONS: &[&str] = &["tif", "tiff", "bmp", "jpg", "jpeg", "png"];

/// Whether a path has one of the supported image extensions.
pub fn is_supported_image(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            let ext = ext.to_ascii_lowercase();
            SUPPORTED_EXTENSIONS.contains(&ext.as_str())
        })
        .unwrap_or(false)
}

fn natural_order(a: &Path, b: &Path) -> Ordering {
    let name = |p: &Path| {
        p.file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    };
    natord_compare(&name(a), &name(b))
}

/// List the slice images directly inside `dir`, in natural order.
///
/// Subdirectories (such as a previously generated pyramid) are not visited.
pub fn discover_slices(dir: &Path) -> Result<Vec<PathBuf>, SliceError> {
    if !dir.is_dir() {
        return Err(SliceError::Io {
            path: dir.display().to_string(),
            message: "not a directory".to_string(),
        });
    }

    let mut files: Vec<PathBuf> = WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
        .filter(|p| is_supported_image(p))
        .collect();

    files.sort_by(|a, b| natural_order(a, b));
    Ok(files)
}

// =============================================================================
// LevelSource
// =============================================================================

/// An ordered, validated set of same-shaped slices.
#[derive(Debug, Clone)]
pub struct LevelSource {
    level: usize,
    shape: SliceShape,
    paths: Vec<PathBuf>,
}

impl LevelSource {
    /// Open an external directory of slices as level 0.
    ///
    /// Fails with [`SliceError::EmptyLevel`] if no supported images are found
    /// and with [`SliceError::InconsistentLevel`] if they disagree in shape.
    pub fn open_directory(dir: &Path) -> Result<Self, SliceError> {
        let paths = discover_slices(dir)?;
        if paths.is_empty() {
            return Err(SliceError::EmptyLevel {
                dir: dir.display().to_string(),
            });
        }
        debug!("Discovered {} slice(s) in {}", paths.len(), dir.display());
        Self::from_paths(0, paths)
    }

    /// Build a level from explicit paths, validating every header against the first.
    pub fn from_paths(level: usize, paths: Vec<PathBuf>) -> Result<Self, SliceError> {
        let first = paths.first().ok_or_else(|| SliceError::EmptyLevel {
            dir: format!("level {}", level),
        })?;
        let shape = probe_shape(first)?;

        for path in &paths[1..] {
            let found = probe_shape(path)?;
            if found != shape {
                return Err(SliceError::InconsistentLevel {
                    path: path.display().to_string(),
                    expected: shape,
                    found,
                });
            }
        }

        Ok(Self {
            level,
            shape,
            paths,
        })
    }

    /// Open a generated level from its directory under `root`.
    ///
    /// Every position from zero to `count - 1` must be present under its
    /// canonical name and match `expected`. Leftover partial writes and
    /// foreign files are ignored.
    pub fn open_generated(
        root: &Path,
        level: usize,
        expected: SliceShape,
        count: usize,
        naming: &NamingScheme,
    ) -> Result<Self, SliceError> {
        let dir = naming.level_dir(root, level);
        let entries = fs::read_dir(&dir).map_err(|e| SliceError::io(dir.display(), e))?;

        let mut present = vec![false; count];
        for entry in entries {
            let entry = entry.map_err(|e| SliceError::io(dir.display(), e))?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if is_partial(&name) {
                continue;
            }
            match naming.parse_position(&name) {
                Some(position) if position < count => present[position] = true,
                _ => warn!("Ignoring unexpected file {} in level {}", name, level),
            }
        }

        if let Some(position) = present.iter().position(|p| !p) {
            return Err(SliceError::MissingSlice { level, position });
        }

        let paths: Vec<PathBuf> = (0..count)
            .map(|position| naming.slice_path(root, level, position))
            .collect();

        let source = Self::from_paths(level, paths)?;
        if source.shape != expected {
            return Err(SliceError::InconsistentLevel {
                path: dir.display().to_string(),
                expected,
                found: source.shape,
            });
        }
        Ok(source)
    }

    pub fn level(&self) -> usize {
        self.level
    }

    /// Shape shared by every slice of this level.
    pub fn shape(&self) -> SliceShape {
        self.shape
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    pub fn path(&self, index: usize) -> Option<&Path> {
        self.paths.get(index).map(PathBuf::as_path)
    }

    /// Number of output slices the next level will have: `ceil(len / 2)`.
    pub fn pair_count(&self) -> usize {
        self.paths.len().div_ceil(2)
    }

    /// Source indices of a pair.
    ///
    /// The second index is `None` for the final pair of an odd-sized level,
    /// whose first slice is averaged with itself.
    pub fn pair_indices(&self, pair: usize) -> (usize, Option<usize>) {
        let first = pair * 2;
        let second = first + 1;
        (first, (second < self.paths.len()).then_some(second))
    }

    /// Decode one slice and check it against the level's declared shape.
    pub fn read(&self, index: usize) -> Result<Slice, SliceError> {
        let path = self.path(index).ok_or(SliceError::MissingSlice {
            level: self.level,
            position: index,
        })?;

        let slice = read_slice(path)?;
        if slice.shape() != self.shape {
            return Err(SliceError::InconsistentLevel {
                path: path.display().to_string(),
                expected: self.shape,
                found: slice.shape(),
            });
        }
        Ok(slice)
    }
}

// =============================================================================
// Tests
// =============================================================================
