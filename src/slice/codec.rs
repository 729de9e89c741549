//! Reading and writing slice files.
//!
//! Inputs may be any of the grayscale or color formats the `image` crate
//! decodes here (TIFF, PNG, BMP, JPEG). Color inputs are reduced to luma.
//! 16-bit and floating point color types map to 16-bit slices, everything
//! else to 8-bit.
//!
//! Generated slices are always written as uncompressed grayscale TIFF at the
//! level's bit depth. A slice is written to a temporary name, flushed to disk,
//! then renamed into place, so a file under its final name is always complete.
//! The directory is flushed after the rename so the new name survives a crash.

use std::fs::{self, File};
use std::io::BufWriter;
use std::path::Path;

use image::{ColorType, DynamicImage, ImageBuffer, ImageDecoder, ImageFormat, ImageReader, Luma};

use crate::error::SliceError;

use super::pixels::{BitDepth, Slice, SliceData, SliceShape};

/// Suffix appended to a slice path while it is being written.
const PARTIAL_SUFFIX: &str = "part";

/// Map a decoder color type to the bit depth of the resulting slice.
fn depth_for_color(color: ColorType) -> Option<BitDepth> {
    match color {
        ColorType::L8 | ColorType::La8 | ColorType::Rgb8 | ColorType::Rgba8 => {
            Some(BitDepth::Eight)
        }
        ColorType::L16
        | ColorType::La16
        | ColorType::Rgb16
        | ColorType::Rgba16
        | ColorType::Rgb32F
        | ColorType::Rgba32F => Some(BitDepth::Sixteen),
        _ => None,
    }
}

fn open_reader(path: &Path) -> Result<ImageReader<std::io::BufReader<File>>, SliceError> {
    ImageReader::open(path)
        .and_then(|r| r.with_guessed_format())
        .map_err(|e| SliceError::io(path.display(), e))
}

/// Read the shape of a slice file from its header without decoding pixels.
pub fn probe_shape(path: &Path) -> Result<SliceShape, SliceError> {
    let decoder = open_reader(path)?
        .into_decoder()
        .map_err(|e| SliceError::Decode {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;

    let (width, height) = decoder.dimensions();
    let color = decoder.color_type();
    let depth = depth_for_color(color).ok_or_else(|| SliceError::UnsupportedColor {
        path: path.display().to_string(),
        color: format!("{:?}", color),
    })?;

    Ok(SliceShape::new(width, height, depth))
}

/// Decode a slice file into grayscale samples.
pub fn read_slice(path: &Path) -> Result<Slice, SliceError> {
    let img = open_reader(path)?.decode().map_err(|e| SliceError::Decode {
        path: path.display().to_string(),
        message: e.to_string(),
    })?;

    let (width, height) = (img.width(), img.height());
    let data = match img {
        DynamicImage::ImageLuma8(buf) => SliceData::U8(buf.into_raw()),
        DynamicImage::ImageLuma16(buf) => SliceData::U16(buf.into_raw()),
        other => match depth_for_color(other.color()) {
            Some(BitDepth::Eight) => SliceData::U8(other.into_luma8().into_raw()),
            Some(BitDepth::Sixteen) => SliceData::U16(other.into_luma16().into_raw()),
            None => {
                return Err(SliceError::UnsupportedColor {
                    path: path.display().to_string(),
                    color: format!("{:?}", other.color()),
                })
            }
        },
    };

    Slice::new(width, height, data).ok_or_else(|| SliceError::Decode {
        path: path.display().to_string(),
        message: "sample count does not match dimensions".to_string(),
    })
}

/// Write a slice as an uncompressed grayscale TIFF and flush it to disk.
pub fn write_slice(path: &Path, slice: &Slice) -> Result<(), SliceError> {
    let encode_err = |message: String| SliceError::Encode {
        path: path.display().to_string(),
        message,
    };

    let img = match slice.data() {
        SliceData::U8(samples) => {
            ImageBuffer::<Luma<u8>, _>::from_raw(slice.width(), slice.height(), samples.clone())
                .map(DynamicImage::ImageLuma8)
        }
        SliceData::U16(samples) => {
            ImageBuffer::<Luma<u16>, _>::from_raw(slice.width(), slice.height(), samples.clone())
                .map(DynamicImage::ImageLuma16)
        }
    }
    .ok_or_else(|| encode_err("buffer does not match dimensions".to_string()))?;

    let partial = path.with_extension(format!("tif.{}", PARTIAL_SUFFIX));
    let file = File::create(&partial).map_err(|e| SliceError::io(partial.display(), e))?;
    let mut writer = BufWriter::new(file);
    img.write_to(&mut writer, ImageFormat::Tiff)
        .map_err(|e| encode_err(e.to_string()))?;

    let file = writer
        .into_inner()
        .map_err(|e| SliceError::io(partial.display(), e.into_error()))?;
    file.sync_all()
        .map_err(|e| SliceError::io(partial.display(), e))?;
    drop(file);

    fs::rename(&partial, path).map_err(|e| SliceError::io(path.display(), e))?;
    match path.parent() {
        Some(dir) => sync_dir(dir),
        None => Ok(()),
    }
}

/// Flush the entries of `dir`, making earlier renames into it durable.
///
/// Only Unix lets a directory be opened and synced; elsewhere this is a no-op.
pub fn sync_dir(dir: &Path) -> Result<(), SliceError> {
    #[cfg(unix)]
    {
        // An empty parent means the current directory.
        let dir = if dir.as_os_str().is_empty() {
            Path::new(".")
        } else {
            dir
        };
        File::open(dir)
            .and_then(|handle| handle.sync_all())
            .map_err(|e| SliceError::io(dir.display(), e))?;
    }
    #[cfg(not(unix))]
    let _ = dir;
    Ok(())
}

/// Whether a file name is a leftover from an interrupted write.
pub fn is_partial(file_name: &str) -> bool {
    file_name.ends_with(&format!(".{}", PARTIAL_SUFFIX))
}

// =============================================================================
// Tests
// =============================================================================
