//! In-memory slice representation.
//!
//! A slice is a 2D grid of unsigned samples stored row-major. The sample type
//! is fixed by the bit depth of the stack: `u8` for 8-bit, `u16` for 16-bit.

use std::fmt;

use serde::{Deserialize, Serialize};

// =============================================================================
// Bit Depth
// =============================================================================

/// Sample bit depth of a slice stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BitDepth {
    #[serde(rename = "8")]
    Eight,
    #[serde(rename = "16")]
    Sixteen,
}

impl BitDepth {
    /// Number of bits per sample.
    pub fn bits(self) -> u8 {
        match self {
            BitDepth::Eight => 8,
            BitDepth::Sixteen => 16,
        }
    }
}

impl fmt::Display for BitDepth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-bit", self.bits())
    }
}

// =============================================================================
// Shape
// =============================================================================

/// Width, height and bit depth shared by every slice of a level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SliceShape {
    pub width: u32,
    pub height: u32,
    pub depth: BitDepth,
}

impl SliceShape {
    pub fn new(width: u32, height: u32, depth: BitDepth) -> Self {
        Self {
            width,
            height,
            depth,
        }
    }

    /// Shape of the slices one level down: half width and height, rounding down.
    pub fn halved(&self) -> Self {
        Self {
            width: self.width / 2,
            height: self.height / 2,
            depth: self.depth,
        }
    }
}

impl fmt::Display for SliceShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{} {}", self.width, self.height, self.depth)
    }
}

// =============================================================================
// Samples
// =============================================================================

/// Unsigned sample type that can be widened for overflow-free accumulation.
pub trait Sample: Copy + Send + Sync + 'static {
    /// Widen to an accumulator that holds the sum of four samples.
    fn widen(self) -> u32;

    /// Narrow an accumulator value known to fit the sample range.
    fn narrow(value: u32) -> Self;
}

impl Sample for u8 {
    #[inline]
    fn widen(self) -> u32 {
        self as u32
    }

    #[inline]
    fn narrow(value: u32) -> Self {
        value as u8
    }
}

impl Sample for u16 {
    #[inline]
    fn widen(self) -> u32 {
        self as u32
    }

    #[inline]
    fn narrow(value: u32) -> Self {
        value as u16
    }
}

/// Sample storage for one slice.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SliceData {
    U8(Vec<u8>),
    U16(Vec<u16>),
}

impl SliceData {
    pub fn depth(&self) -> BitDepth {
        match self {
            SliceData::U8(_) => BitDepth::Eight,
            SliceData::U16(_) => BitDepth::Sixteen,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            SliceData::U8(v) => v.len(),
            SliceData::U16(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// =============================================================================
// Slice
// =============================================================================

/// An immutable grayscale slice.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Slice {
    width: u32,
    height: u32,
    data: SliceData,
}

impl Slice {
    /// Wrap row-major samples.
    ///
    /// Returns `None` if the sample count does not match `width * height`.
    pub fn new(width: u32, height: u32, data: SliceData) -> Option<Self> {
        if data.len() != width as usize * height as usize {
            return None;
        }
        Some(Self {
            width,
            height,
            data,
        })
    }

    /// Create an 8-bit slice filled with a single value.
    pub fn filled_u8(width: u32, height: u32, value: u8) -> Self {
        Self {
            width,
            height,
            data: SliceData::U8(vec![value; width as usize * height as usize]),
        }
    }

    /// Create a 16-bit slice filled with a single value.
    pub fn filled_u16(width: u32, height: u32, value: u16) -> Self {
        Self {
            width,
            height,
            data: SliceData::U16(vec![value; width as usize * height as usize]),
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn depth(&self) -> BitDepth {
        self.data.depth()
    }

    pub fn shape(&self) -> SliceShape {
        SliceShape::new(self.width, self.height, self.depth())
    }

    pub fn data(&self) -> &SliceData {
        &self.data
    }

    /// Sample at `(x, y)` widened to `u32`, or `None` if out of bounds.
    pub fn get(&self, x: u32, y: u32) -> Option<u32> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let idx = y as usize * self.width as usize + x as usize;
        Some(match &self.data {
            SliceData::U8(v) => v[idx] as u32,
            SliceData::U16(v) => v[idx] as u32,
        })
    }
}

// =============================================================================
// Tests
// =============================================================================
