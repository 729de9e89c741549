//! Slice layer.
//!
//! This module holds everything that deals with individual slices: the
//! in-memory representation, the on-disk codec, the canonical naming of
//! generated slices, and the read-only [`LevelSource`] view over a level.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │              Level Builder              │
//! └────────────────────┬────────────────────┘
//!                      │ read(index)
//!                      ▼
//! ┌─────────────────────────────────────────┐
//! │              LevelSource                │
//! │  (ordered paths + validated shape)      │
//! └──────────┬───────────────────┬──────────┘
//!            │                   │
//!            ▼                   ▼
//! ┌───────────────────┐ ┌───────────────────┐
//! │   NamingScheme    │ │      codec        │
//! │ (level, position) │ │ (decode / TIFF    │
//! │   -> file name    │ │   encode + fsync) │
//! └───────────────────┘ └───────────────────┘
//! ```

pub mod codec;
mod naming;
mod pixels;
mod source;

pub use naming::{NamingScheme, DEFAULT_POSITION_DIGITS, SLICE_EXTENSION};
pub use pixels::{BitDepth, Sample, Slice, SliceData, SliceShape};
pub use source::{discover_slices, is_supported_image, LevelSource, SUPPORTED_EXTENSIONS};
