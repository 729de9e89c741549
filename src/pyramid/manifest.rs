//! Pyramid manifest.
//!
//! `pyramid.json` at the output root is the only record of which generated
//! levels are complete. A level directory without a manifest entry is never
//! read, whatever files it contains.
//!
//! ```json
//! {
//!   "version": 1,
//!   "source": { "width": 512, "height": 512, "depth": "16", "count": 300 },
//!   "levels": [
//!     { "level": 1, "width": 256, "height": 256, "depth": "16", "count": 150, "engine": "fast" }
//!   ]
//! }
//! ```

use std::fs::{self, File};
use std::io::{BufWriter, ErrorKind, Write};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::SliceError;
use crate::slice::codec::sync_dir;
use crate::slice::{BitDepth, SliceShape};

/// File name of the manifest inside the output root.
pub const MANIFEST_FILE: &str = "pyramid.json";

/// Current manifest format version.
pub const MANIFEST_VERSION: u32 = 1;

/// Shape and size of the level-0 stack a pyramid was built from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceRecord {
    pub width: u32,
    pub height: u32,
    pub depth: BitDepth,
    pub count: usize,
}

impl SourceRecord {
    pub fn new(shape: SliceShape, count: usize) -> Self {
        Self {
            width: shape.width,
            height: shape.height,
            depth: shape.depth,
            count,
        }
    }

    pub fn shape(&self) -> SliceShape {
        SliceShape::new(self.width, self.height, self.depth)
    }
}

/// A completed generated level.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LevelRecord {
    pub level: usize,
    pub width: u32,
    pub height: u32,
    pub depth: BitDepth,
    pub count: usize,
    /// Engine that produced the level
    pub engine: String,
}

impl LevelRecord {
    pub fn new(level: usize, shape: SliceShape, count: usize, engine: &str) -> Self {
        Self {
            level,
            width: shape.width,
            height: shape.height,
            depth: shape.depth,
            count,
            engine: engine.to_string(),
        }
    }

    pub fn shape(&self) -> SliceShape {
        SliceShape::new(self.width, self.height, self.depth)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PyramidManifest {
    pub version: u32,
    pub source: SourceRecord,
    /// Completed levels in ascending order, contiguous from level 1
    pub levels: Vec<LevelRecord>,
}

impl PyramidManifest {
    pub fn new(source: SourceRecord) -> Self {
        Self {
            version: MANIFEST_VERSION,
            source,
            levels: Vec::new(),
        }
    }

    /// Load the manifest from `path`. Returns `Ok(None)` if there is none.
    pub fn load(path: &Path) -> Result<Option<Self>, SliceError> {
        let bytes = match fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(SliceError::io(path.display(), e)),
        };

        let manifest: Self = serde_json::from_slice(&bytes)
            .map_err(|e| SliceError::Manifest(format!("{}: {}", path.display(), e)))?;

        if manifest.version != MANIFEST_VERSION {
            return Err(SliceError::Manifest(format!(
                "{}: unsupported version {}",
                path.display(),
                manifest.version
            )));
        }
        Ok(Some(manifest))
    }

    /// Write the manifest to `path`, replacing any previous one atomically.
    pub fn save(&self, path: &Path) -> Result<(), SliceError> {
        let tmp = path.with_extension("json.tmp");
        let file = File::create(&tmp).map_err(|e| SliceError::io(tmp.display(), e))?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut writer, self)
            .map_err(|e| SliceError::Manifest(e.to_string()))?;
        writer
            .flush()
            .map_err(|e| SliceError::io(tmp.display(), e))?;

        let file = writer
            .into_inner()
            .map_err(|e| SliceError::io(tmp.display(), e.into_error()))?;
        file.sync_all()
            .map_err(|e| SliceError::io(tmp.display(), e))?;
        drop(file);

        fs::rename(&tmp, path).map_err(|e| SliceError::io(path.display(), e))?;
        match path.parent() {
            Some(dir) => sync_dir(dir),
            None => Ok(()),
        }
    }

    pub fn level(&self, level: usize) -> Option<&LevelRecord> {
        self.levels.iter().find(|r| r.level == level)
    }

    /// Drop the records of `level` and everything above it.
    pub fn truncate_from(&mut self, level: usize) {
        self.levels.retain(|r| r.level < level);
    }

    /// Record a completed level, replacing any stale record at or above it.
    pub fn record(&mut self, record: LevelRecord) {
        self.truncate_from(record.level);
        self.levels.push(record);
    }
}
