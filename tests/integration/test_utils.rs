//! Test utilities for integration tests.
//!
//! This module provides fixture stacks written with the `image` crate and
//! scripted engines that fail, cancel or count calls on demand.

use image::{GrayImage, ImageBuffer, Luma};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use ct_pyramid::error::{BuildError, EngineError};
use ct_pyramid::slice::codec::read_slice;
use ct_pyramid::{
    BackendSelector, BuildJob, BuildReport, BuilderConfig, CancelToken, DirectoryStore,
    Downsampler, EnginePreference, NamingScheme, PyramidBuilder, ReferenceDownsampler, Slice,
    StopPolicy, FAST_ENGINE,
};

// =============================================================================
// Fixture Stacks
// =============================================================================

/// Write `count` 8-bit slices named `scan_<i>.tif`, pixel values from `f(i, x, y)`.
pub fn write_stack_u8<F>(dir: &Path, count: usize, width: u32, height: u32, f: F)
where
    F: Fn(usize, u32, u32) -> u8,
{
    fs::create_dir_all(dir).unwrap();
    for i in 0..count {
        let img = GrayImage::from_fn(width, height, |x, y| Luma([f(i, x, y)]));
        img.save(dir.join(format!("scan_{}.tif", i))).unwrap();
    }
}

/// Write `count` 16-bit slices named `scan_<i>.tif`, pixel values from `f(i, x, y)`.
pub fn write_stack_u16<F>(dir: &Path, count: usize, width: u32, height: u32, f: F)
where
    F: Fn(usize, u32, u32) -> u16,
{
    fs::create_dir_all(dir).unwrap();
    for i in 0..count {
        let img: ImageBuffer<Luma<u16>, Vec<u16>> =
            ImageBuffer::from_fn(width, height, |x, y| Luma([f(i, x, y)]));
        img.save(dir.join(format!("scan_{}.tif", i))).unwrap();
    }
}

/// A 16-bit stack with distinct values everywhere.
pub fn write_gradient_stack(dir: &Path, count: usize, width: u32, height: u32) {
    write_stack_u16(dir, count, width, height, |i, x, y| {
        ((x * 1009 + y * 37 + i as u32 * 4001) % 65536) as u16
    });
}

// =============================================================================
// Build Helpers
// =============================================================================

/// Builder settings with only a minimum dimension and four workers.
pub fn config(min_dimension: u32) -> BuilderConfig {
    BuilderConfig {
        policy: StopPolicy {
            min_dimension,
            max_levels: None,
            fit_within: None,
        },
        engine: EnginePreference::Auto,
        workers: 4,
        resume: true,
    }
}

/// Build `input` into `output` with an explicit engine list.
pub async fn build_with(
    input: &Path,
    output: &Path,
    config: BuilderConfig,
    engines: Vec<Arc<dyn Downsampler>>,
    job: &BuildJob,
) -> Result<BuildReport, BuildError> {
    let store = Arc::new(DirectoryStore::open(output).unwrap());
    let builder = PyramidBuilder::with_selector(config, BackendSelector::with_engines(engines));
    builder.build_directory(input, store, job).await
}

/// Build with the reference engine only.
pub async fn build_reference(
    input: &Path,
    output: &Path,
    config: BuilderConfig,
) -> Result<BuildReport, BuildError> {
    build_with(
        input,
        output,
        config,
        vec![Arc::new(ReferenceDownsampler::new())],
        &BuildJob::new(),
    )
    .await
}

// =============================================================================
// Output Inspection
// =============================================================================

/// Sorted file names inside a generated level directory.
pub fn level_files(root: &Path, level: usize) -> Vec<String> {
    let dir = NamingScheme::new().level_dir(root, level);
    let mut names: Vec<String> = match fs::read_dir(&dir) {
        Ok(entries) => entries
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect(),
        Err(_) => Vec::new(),
    };
    names.sort();
    names
}

/// Completed slice files of a level, ignoring partial writes.
pub fn complete_files(root: &Path, level: usize) -> Vec<String> {
    level_files(root, level)
        .into_iter()
        .filter(|name| name.ends_with(".tif"))
        .collect()
}

pub fn slice_path(root: &Path, level: usize, position: usize) -> PathBuf {
    NamingScheme::new().slice_path(root, level, position)
}

/// Decode every slice of a generated level in position order.
pub fn read_level(root: &Path, level: usize) -> Vec<Slice> {
    complete_files(root, level)
        .iter()
        .map(|name| read_slice(&NamingScheme::new().level_dir(root, level).join(name)).unwrap())
        .collect()
}

/// Assert that two pyramid roots hold byte-identical levels under identical names.
pub fn assert_same_levels(a: &Path, b: &Path, levels: usize) {
    for level in 1..=levels {
        let names_a = level_files(a, level);
        let names_b = level_files(b, level);
        assert!(!names_a.is_empty(), "level {} is empty", level);
        assert_eq!(names_a, names_b, "level {} names differ", level);

        for name in &names_a {
            let bytes_a = fs::read(NamingScheme::new().level_dir(a, level).join(name)).unwrap();
            let bytes_b = fs::read(NamingScheme::new().level_dir(b, level).join(name)).unwrap();
            assert!(bytes_a == bytes_b, "level {} slice {} differs", level, name);
        }
    }
}

// =============================================================================
// Scripted Engine
// =============================================================================

/// Reference engine wrapper with injectable faults.
///
/// Calls are counted from 1 across the whole build.
pub struct ScriptedEngine {
    name: &'static str,
    inner: ReferenceDownsampler,
    calls: AtomicUsize,
    unavailable: bool,
    fail_on_call: Option<usize>,
    fail_on_width: Option<u32>,
    cancel_on_call: Option<(usize, CancelToken)>,
    cancel_on_width: Option<(u32, CancelToken)>,
}

impl ScriptedEngine {
    /// An engine that reports itself as the fast engine.
    pub fn new() -> Self {
        Self::named(FAST_ENGINE)
    }

    pub fn named(name: &'static str) -> Self {
        Self {
            name,
            inner: ReferenceDownsampler::new(),
            calls: AtomicUsize::new(0),
            unavailable: false,
            fail_on_call: None,
            fail_on_width: None,
            cancel_on_call: None,
            cancel_on_width: None,
        }
    }

    /// Fail initialisation.
    pub fn unavailable(mut self) -> Self {
        self.unavailable = true;
        self
    }

    /// Fail the `n`-th combine call only.
    pub fn fail_on_call(mut self, n: usize) -> Self {
        self.fail_on_call = Some(n);
        self
    }

    /// Fail every combine whose input slices are `width` wide.
    pub fn fail_on_width(mut self, width: u32) -> Self {
        self.fail_on_width = Some(width);
        self
    }

    /// Cancel `token` during the `n`-th combine call.
    pub fn cancel_on_call(mut self, n: usize, token: CancelToken) -> Self {
        self.cancel_on_call = Some((n, token));
        self
    }

    /// Cancel `token` during the first combine whose inputs are `width` wide.
    pub fn cancel_on_width(mut self, width: u32, token: CancelToken) -> Self {
        self.cancel_on_width = Some((width, token));
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Downsampler for ScriptedEngine {
    fn name(&self) -> &'static str {
        self.name
    }

    fn initialize(&self) -> Result<(), EngineError> {
        if self.unavailable {
            return Err(EngineError::Unavailable {
                engine: self.name,
                reason: "scripted".to_string(),
            });
        }
        Ok(())
    }

    fn combine(&self, a: &Slice, b: &Slice) -> Result<Slice, EngineError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;

        if let Some((n, token)) = &self.cancel_on_call {
            if call == *n {
                token.cancel();
            }
        }
        if let Some((width, token)) = &self.cancel_on_width {
            if a.width() == *width {
                token.cancel();
            }
        }

        if self.fail_on_call == Some(call) || self.fail_on_width == Some(a.width()) {
            return Err(EngineError::Compute {
                engine: self.name,
                message: format!("scripted failure on call {}", call),
            });
        }

        self.inner.combine(a, b)
    }
}
