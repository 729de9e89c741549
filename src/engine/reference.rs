//! Reference downsample engine.
//!
//! Straightforward scalar implementation that defines the numeric contract
//! every other engine must reproduce bit for bit:
//!
//! 1. Depth average: `z = (a + b) / 2`, truncating, in a `u32` accumulator.
//! 2. Box filter: each output sample is the truncated mean of a 2x2 block of
//!    `z` values, `(z00 + z01 + z10 + z11) / 4`.
//! 3. Odd width or height: the trailing column or row has no complete block
//!    and is dropped, so the output is `floor(w / 2) x floor(h / 2)`.

use crate::error::EngineError;
use crate::slice::{Sample, Slice, SliceData};

use super::{check_pair, Downsampler};

pub const REFERENCE_ENGINE: &str = "reference";

/// Scalar two-pass engine. Always available.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReferenceDownsampler;

impl ReferenceDownsampler {
    pub fn new() -> Self {
        Self
    }
}

impl Downsampler for ReferenceDownsampler {
    fn name(&self) -> &'static str {
        REFERENCE_ENGINE
    }

    fn combine(&self, a: &Slice, b: &Slice) -> Result<Slice, EngineError> {
        check_pair(a, b)?;

        let (w, h) = (a.width() as usize, a.height() as usize);
        let data = match (a.data(), b.data()) {
            (SliceData::U8(x), SliceData::U8(y)) => {
                SliceData::U8(box_downsample(&depth_average(x, y), w, h))
            }
            (SliceData::U16(x), SliceData::U16(y)) => {
                SliceData::U16(box_downsample(&depth_average(x, y), w, h))
            }
            _ => {
                return Err(EngineError::DimensionMismatch {
                    left: a.shape(),
                    right: b.shape(),
                })
            }
        };

        Slice::new(a.width() / 2, a.height() / 2, data).ok_or(EngineError::Compute {
            engine: REFERENCE_ENGINE,
            message: "output buffer does not match halved dimensions".to_string(),
        })
    }
}

fn depth_average<T: Sample>(a: &[T], b: &[T]) -> Vec<u32> {
    a.iter()
        .zip(b)
        .map(|(&x, &y)| (x.widen() + y.widen()) / 2)
        .collect()
}

fn box_downsample<T: Sample>(z: &[u32], w: usize, h: usize) -> Vec<T> {
    let (dw, dh) = (w / 2, h / 2);
    let mut out = Vec::with_capacity(dw * dh);

    for y in 0..dh {
        let row0 = 2 * y * w;
        let row1 = row0 + w;
        for x in 0..dw {
            let c = 2 * x;
            let sum = z[row0 + c] + z[row0 + c + 1] + z[row1 + c] + z[row1 + c + 1];
            out.push(T::narrow(sum / 4));
        }
    }
    out
}
