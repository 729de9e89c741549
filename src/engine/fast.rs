//! Fast downsample engine.
//!
//! Fuses the depth average and the 2x2 box filter into a single pass and
//! spreads output rows over a dedicated rayon thread pool. The arithmetic is
//! the same as [`super::ReferenceDownsampler`]: every `z` value is truncated
//! before it enters the box sum, so results are identical to the reference.
//!
//! The thread pool is created lazily by [`Downsampler::initialize`]. If it
//! cannot be built the engine reports [`EngineError::Unavailable`] and the
//! builder falls back to the reference engine for the rest of the run.

use std::sync::OnceLock;

use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};

use crate::error::EngineError;
use crate::slice::{Sample, Slice, SliceData};

use super::{check_pair, Downsampler};

pub const FAST_ENGINE: &str = "fast";

/// Row-parallel fused engine backed by a rayon pool.
pub struct FastDownsampler {
    /// Pool size; `0` lets rayon pick the number of logical CPUs.
    threads: usize,
    pool: OnceLock<Result<ThreadPool, String>>,
}

impl std::fmt::Debug for FastDownsampler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FastDownsampler")
            .field("threads", &self.threads)
            .field("initialized", &self.pool.get().is_some())
            .finish()
    }
}

impl Default for FastDownsampler {
    fn default() -> Self {
        Self::new()
    }
}

impl FastDownsampler {
    pub fn new() -> Self {
        Self::with_threads(0)
    }

    pub fn with_threads(threads: usize) -> Self {
        Self {
            threads,
            pool: OnceLock::new(),
        }
    }

    fn pool(&self) -> Result<&ThreadPool, EngineError> {
        let pool = self.pool.get_or_init(|| {
            ThreadPoolBuilder::new()
                .num_threads(self.threads)
                .thread_name(|i| format!("ct-pyramid-fast-{}", i))
                .build()
                .map_err(|e| e.to_string())
        });

        pool.as_ref().map_err(|reason| EngineError::Unavailable {
            engine: FAST_ENGINE,
            reason: reason.clone(),
        })
    }
}

impl Downsampler for FastDownsampler {
    fn name(&self) -> &'static str {
        FAST_ENGINE
    }

    fn initialize(&self) -> Result<(), EngineError> {
        self.pool().map(|_| ())
    }

    fn combine(&self, a: &Slice, b: &Slice) -> Result<Slice, EngineError> {
        check_pair(a, b)?;
        let pool = self.pool()?;

        let w = a.width() as usize;
        let (dw, dh) = (w / 2, a.height() as usize / 2);

        let data = pool.install(|| match (a.data(), b.data()) {
            (SliceData::U8(x), SliceData::U8(y)) => Some(SliceData::U8(fused(x, y, w, dw, dh))),
            (SliceData::U16(x), SliceData::U16(y)) => {
                Some(SliceData::U16(fused(x, y, w, dw, dh)))
            }
            _ => None,
        });

        let data = data.ok_or(EngineError::DimensionMismatch {
            left: a.shape(),
            right: b.shape(),
        })?;

        Slice::new(dw as u32, dh as u32, data).ok_or(EngineError::Compute {
            engine: FAST_ENGINE,
            message: "output buffer does not match halved dimensions".to_string(),
        })
    }
}

#[inline(always)]
fn z<T: Sample>(a: T, b: T) -> u32 {
    (a.widen() + b.widen()) >> 1
}

fn fused<T: Sample>(a: &[T], b: &[T], w: usize, dw: usize, dh: usize) -> Vec<T> {
    if dw == 0 || dh == 0 {
        return Vec::new();
    }

    let mut out = vec![T::narrow(0); dw * dh];
    out.par_chunks_mut(dw).enumerate().for_each(|(y, row)| {
        let r0 = 2 * y * w;
        let r1 = r0 + w;
        let (a0, a1) = (&a[r0..r0 + w], &a[r1..r1 + w]);
        let (b0, b1) = (&b[r0..r0 + w], &b[r1..r1 + w]);

        for (x, dst) in row.iter_mut().enumerate() {
            let c = x << 1;
            let sum = z(a0[c], b0[c])
                + z(a0[c + 1], b0[c + 1])
                + z(a1[c], b1[c])
                + z(a1[c + 1], b1[c + 1]);
            *dst = T::narrow(sum >> 2);
        }
    });
    out
}
