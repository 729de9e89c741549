//! Directory-backed pyramid storage.
//!
//! ```text
//! <root>/
//! ├── pyramid.json        completed levels
//! ├── 1/000000.tif ...    level 1
//! └── 2/000000.tif ...    level 2
//! ```
//!
//! The store is the [`SliceSink`] of every level and owns the manifest. A level
//! only becomes visible to readers through [`DirectoryStore::commit_level`].

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use tracing::{debug, info};

use crate::error::SliceError;
use crate::level::{LevelSummary, SliceSink};
use crate::slice::codec::{is_partial, probe_shape, write_slice};
use crate::slice::{LevelSource, NamingScheme, Slice, SliceShape};

use super::manifest::{LevelRecord, PyramidManifest, SourceRecord, MANIFEST_FILE};

/// Output directory of one pyramid.
#[derive(Debug)]
pub struct DirectoryStore {
    root: PathBuf,
    naming: NamingScheme,
    manifest: Mutex<Option<PyramidManifest>>,
}

impl DirectoryStore {
    /// Open (creating if needed) the output root and load any existing manifest.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, SliceError> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|e| SliceError::io(root.display(), e))?;
        let manifest = PyramidManifest::load(&root.join(MANIFEST_FILE))?;

        Ok(Self {
            root,
            naming: NamingScheme::default(),
            manifest: Mutex::new(manifest),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn naming(&self) -> &NamingScheme {
        &self.naming
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.root.join(MANIFEST_FILE)
    }

    /// Snapshot of the current manifest.
    pub fn manifest(&self) -> Option<PyramidManifest> {
        self.lock().clone()
    }

    /// Directory holding the slices of `level`.
    pub fn level_dir(&self, level: usize) -> PathBuf {
        self.naming.level_dir(&self.root, level)
    }

    fn lock(&self) -> MutexGuard<'_, Option<PyramidManifest>> {
        self.manifest.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Start a build over a level-0 stack.
    ///
    /// With `resume` set and a manifest recorded for the same source shape and
    /// slice count, the pyramid is continued: the recorded levels are returned
    /// for reuse and the output of an interrupted level may be kept. Otherwise
    /// every level directory is dropped, an empty manifest is written and
    /// `None` is returned.
    pub fn begin(
        &self,
        source: SourceRecord,
        resume: bool,
    ) -> Result<Option<Vec<LevelRecord>>, SliceError> {
        let mut guard = self.lock();

        if let Some(existing) = guard.as_ref() {
            if resume && existing.source == source {
                info!(
                    "Resuming pyramid in {} with {} recorded level(s)",
                    self.root.display(),
                    existing.levels.len()
                );
                return Ok(Some(existing.levels.clone()));
            }

            if resume {
                info!(
                    "Existing pyramid in {} was built from {} x {}, rebuilding",
                    self.root.display(),
                    existing.source.shape(),
                    existing.source.count
                );
            }
            self.remove_level_dirs()?;
        }

        let manifest = PyramidManifest::new(source);
        manifest.save(&self.manifest_path())?;
        *guard = Some(manifest);
        Ok(None)
    }

    /// Remove every directory under the root named like a level, recorded or not.
    fn remove_level_dirs(&self) -> Result<(), SliceError> {
        let entries = fs::read_dir(&self.root).map_err(|e| SliceError::io(self.root.display(), e))?;
        for entry in entries {
            let entry = entry.map_err(|e| SliceError::io(self.root.display(), e))?;
            let name = entry.file_name().to_string_lossy().into_owned();
            let is_level = name
                .parse::<usize>()
                .is_ok_and(|level| self.naming.level_dir_name(level) == name);
            if is_level && entry.path().is_dir() {
                remove_dir_if_exists(&entry.path())?;
            }
        }
        Ok(())
    }

    /// Drop manifest records of `level` and above.
    fn forget_from(&self, level: usize) -> Result<(), SliceError> {
        let mut guard = self.lock();
        if let Some(manifest) = guard.as_mut() {
            if manifest.levels.iter().any(|r| r.level >= level) {
                manifest.truncate_from(level);
                manifest.save(&self.manifest_path())?;
            }
        }
        Ok(())
    }

    /// Open a recorded level as the source of the next one.
    pub fn open_level(&self, record: &LevelRecord) -> Result<LevelSource, SliceError> {
        LevelSource::open_generated(
            &self.root,
            record.level,
            record.shape(),
            record.count,
            &self.naming,
        )
    }

    /// Mark a fully written level as complete.
    pub fn commit_level(&self, summary: &LevelSummary) -> Result<LevelRecord, SliceError> {
        let mut guard = self.lock();
        let manifest = guard
            .as_mut()
            .ok_or_else(|| SliceError::Manifest("no build in progress".to_string()))?;

        let record = LevelRecord::new(summary.level, summary.shape, summary.count, summary.engine);
        manifest.record(record.clone());
        manifest.save(&self.manifest_path())?;
        debug!("Committed level {} to manifest", summary.level);
        Ok(record)
    }

    /// Remove the output of a failed attempt at `level`.
    pub fn discard_level(&self, level: usize) -> Result<(), SliceError> {
        debug!("Discarding output of level {}", level);
        remove_dir_if_exists(&self.level_dir(level))
    }

    /// Re-open every recorded level and check it against the manifest.
    ///
    /// Checks that levels are contiguous from 1, that each level halves the
    /// one below it, that every canonical file is present and that every slice
    /// header has the recorded shape.
    pub fn verify(&self) -> Result<Vec<LevelRecord>, SliceError> {
        let manifest = self.manifest().ok_or_else(|| {
            SliceError::Manifest(format!("no manifest in {}", self.root.display()))
        })?;

        let mut previous = manifest.source.shape();
        let mut previous_count = manifest.source.count;
        for (i, record) in manifest.levels.iter().enumerate() {
            if record.level != i + 1 {
                return Err(SliceError::Manifest(format!(
                    "expected level {}, found level {}",
                    i + 1,
                    record.level
                )));
            }
            if record.shape() != previous.halved() || record.count != previous_count.div_ceil(2) {
                return Err(SliceError::Manifest(format!(
                    "level {} is {} x {}, expected {} x {}",
                    record.level,
                    record.shape(),
                    record.count,
                    previous.halved(),
                    previous_count.div_ceil(2)
                )));
            }

            self.open_level(record)?;
            debug!("Verified level {}", record.level);
            previous = record.shape();
            previous_count = record.count;
        }

        Ok(manifest.levels)
    }
}

impl SliceSink for DirectoryStore {
    fn prepare_level(&self, level: usize) -> Result<(), SliceError> {
        self.forget_from(level)?;

        let dir = self.level_dir(level);
        remove_dir_if_exists(&dir)?;
        fs::create_dir_all(&dir).map_err(|e| SliceError::io(dir.display(), e))
    }

    /// Keep canonically named, fully written slices whose header matches
    /// `shape`. Partial writes, out-of-range positions and slices of the wrong
    /// shape are deleted; foreign files are left alone.
    fn resume_level(
        &self,
        level: usize,
        shape: SliceShape,
        count: usize,
    ) -> Result<Vec<usize>, SliceError> {
        self.forget_from(level)?;

        let dir = self.level_dir(level);
        fs::create_dir_all(&dir).map_err(|e| SliceError::io(dir.display(), e))?;
        let entries = fs::read_dir(&dir).map_err(|e| SliceError::io(dir.display(), e))?;

        let mut kept = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| SliceError::io(dir.display(), e))?;
            let name = entry.file_name().to_string_lossy().into_owned();
            let path = entry.path();

            let keep = match self.naming.parse_position(&name) {
                Some(position) if position < count => match probe_shape(&path) {
                    Ok(found) if found == shape => {
                        kept.push(position);
                        true
                    }
                    Ok(found) => {
                        debug!("Level {} slice {} is {}, expected {}", level, name, found, shape);
                        false
                    }
                    Err(e) => {
                        debug!("Level {} slice {} is unreadable: {}", level, name, e);
                        false
                    }
                },
                Some(_) => false,
                None => !is_partial(&name),
            };

            if !keep {
                fs::remove_file(&path).map_err(|e| SliceError::io(path.display(), e))?;
            }
        }

        kept.sort_unstable();
        Ok(kept)
    }

    fn write_slice(&self, level: usize, position: usize, slice: &Slice) -> Result<(), SliceError> {
        write_slice(&self.naming.slice_path(&self.root, level, position), slice)
    }
}

fn remove_dir_if_exists(dir: &Path) -> Result<(), SliceError> {
    match fs::remove_dir_all(dir) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(SliceError::io(dir.display(), e)),
    }
}
