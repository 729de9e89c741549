//! Stop policy and level planning.
//!
//! The stop condition is evaluated against the level about to be generated,
//! computed from the source level's shape, so a level that would be discarded
//! is never built.

use serde::Serialize;

use crate::slice::SliceShape;

/// Default minimum width and height of a generated level.
pub const DEFAULT_MIN_DIMENSION: u32 = 1;

/// Relative cost of each level compared to the one before it: half the pairs,
/// a quarter of the pixels per slice.
const LEVEL_WEIGHT_FACTOR: f64 = 1.0 / 8.0;

/// When to stop generating levels.
///
/// A level is built only if every configured rule allows it; whichever rule
/// triggers first ends the pyramid.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StopPolicy {
    /// Smallest width and height a generated level may have.
    ///
    /// A level whose halved width or height would fall below this value is
    /// not built.
    pub min_dimension: u32,

    /// Highest generated level index, if any. `Some(0)` builds nothing.
    pub max_levels: Option<usize>,

    /// Stop once a generated level fits within this many pixels on both
    /// sides. The first generated level is always allowed.
    pub fit_within: Option<u32>,
}

impl Default for StopPolicy {
    fn default() -> Self {
        Self {
            min_dimension: DEFAULT_MIN_DIMENSION,
            max_levels: None,
            fit_within: None,
        }
    }
}

impl StopPolicy {
    pub fn validate(&self) -> Result<(), String> {
        if self.min_dimension == 0 {
            return Err("min_dimension must be at least 1".to_string());
        }
        if self.fit_within == Some(0) {
            return Err("fit_within must be at least 1".to_string());
        }
        Ok(())
    }

    /// Whether `level` should be generated from a source level of `source` shape.
    pub fn should_build(&self, level: usize, source: SliceShape) -> bool {
        if let Some(max) = self.max_levels {
            if level > max {
                return false;
            }
        }

        let next = source.halved();
        if next.width < self.min_dimension || next.height < self.min_dimension {
            return false;
        }

        if let Some(bound) = self.fit_within {
            if level >= 2 && source.width <= bound && source.height <= bound {
                return false;
            }
        }

        true
    }
}

// =============================================================================
// Planning
// =============================================================================

/// A level the builder intends to generate.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PlannedLevel {
    pub level: usize,
    pub shape: SliceShape,
    pub count: usize,
    /// Pairs to compute, equal to `count`
    pub pairs: usize,
    /// Share of the total work relative to level 1
    pub weight: f64,
}

/// List every level a build of `count` slices of `shape` would generate.
pub fn plan_levels(shape: SliceShape, count: usize, policy: &StopPolicy) -> Vec<PlannedLevel> {
    let mut planned = Vec::new();
    if count == 0 {
        return planned;
    }

    let mut source = shape;
    let mut source_count = count;
    let mut weight = 1.0;
    let mut level = 1;

    while policy.should_build(level, source) {
        let next_count = source_count.div_ceil(2);
        let next = source.halved();
        planned.push(PlannedLevel {
            level,
            shape: next,
            count: next_count,
            pairs: next_count,
            weight,
        });

        source = next;
        source_count = next_count;
        weight *= LEVEL_WEIGHT_FACTOR;
        level += 1;
    }

    planned
}
