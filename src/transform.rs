//! Pixel format conversion and cropping.
//!
//! Converters are looked up by `(source, destination)` format pair. Pairs
//! without a registered converter are rejected.

use crate::error::{CameraError, Result};
use crate::traits::PixelFormat;

/// Native and output dimensions of one conversion.
///
/// The output is the top-left `width` x `height` window of the native frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Geometry {
    /// Native capture width; also the source row length in pixels.
    pub native_width: u32,
    /// Native capture height.
    pub native_height: u32,
    /// Output width.
    pub width: u32,
    /// Output height.
    pub height: u32,
}

impl Geometry {
    /// Fail unless the output window fits inside the native frame.
    pub fn check_bounds(&self) -> Result<()> {
        if self.width > self.native_width || self.height > self.native_height {
            return Err(CameraError::CropOutOfBounds {
                width: self.width,
                height: self.height,
                native_width: self.native_width,
                native_height: self.native_height,
            });
        }
        Ok(())
    }
}

/// Signature shared by all converters.
pub type ConvertFn = fn(&[u8], &mut [u8], &Geometry) -> Result<()>;

struct Converter {
    from: PixelFormat,
    to: PixelFormat,
    convert: ConvertFn,
}

const CONVERTERS: &[Converter] = &[Converter {
    from: PixelFormat::Uyvy,
    to: PixelFormat::Mono8,
    convert: uyvy_to_mono8,
}];

/// Find the converter for a format pair.
pub fn lookup(from: PixelFormat, to: PixelFormat) -> Result<ConvertFn> {
    CONVERTERS
        .iter()
        .find(|converter| converter.from == from && converter.to == to)
        .map(|converter| converter.convert)
        .ok_or(CameraError::UnsupportedConversion { from, to })
}

/// Bytes needed for a `width` x `height` frame in `format`.
#[must_use]
pub const fn frame_len(format: PixelFormat, width: u32, height: u32) -> usize {
    width as usize * height as usize * format.bytes_per_pixel() as usize
}

/// Convert `src` in format `from` into `dst` in format `to`.
pub fn transform(
    src: &[u8],
    dst: &mut [u8],
    from: PixelFormat,
    to: PixelFormat,
    geometry: &Geometry,
) -> Result<()> {
    let convert = lookup(from, to)?;
    geometry.check_bounds()?;
    convert(src, dst, geometry)
}

/// Extract the luma byte of each UYVY pixel into an 8-bit plane.
///
/// Output pixel `(i, j)` reads source byte `j * 2 * native_width + 2 * i + 1`.
fn uyvy_to_mono8(src: &[u8], dst: &mut [u8], geometry: &Geometry) -> Result<()> {
    let width = geometry.width as usize;
    let height = geometry.height as usize;
    let src_stride = 2 * geometry.native_width as usize;

    if width == 0 || height == 0 {
        return Ok(());
    }

    let out_len = width * height;
    let needed = (height - 1) * src_stride + 2 * width;
    if src.len() < needed || dst.len() < out_len {
        return Err(CameraError::CropOutOfBounds {
            width: geometry.width,
            height: geometry.height,
            native_width: geometry.native_width,
            native_height: geometry.native_height,
        });
    }

    for (dst_row, src_row) in dst
        .chunks_exact_mut(width)
        .zip(src.chunks(src_stride))
        .take(height)
    {
        for (luma, pair) in dst_row.iter_mut().zip(src_row.chunks_exact(2)) {
            if let [_, y] = pair {
                *luma = *y;
            }
        }
    }

    Ok(())
}
