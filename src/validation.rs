//! Frame content checks for test patterns.
//!
//! Checks work on luma only, so they accept both MONO8 frames and zero-copy
//! UYVY frames. Used by unit tests against the mock driver and by hardware
//! tests against vivid.

use crate::camera::CameraFrame;
use crate::error::{CameraError, Result};
use crate::traits::PixelFormat;

/// Luma of 100% color bars, left to right.
///
/// White, yellow, cyan, green, magenta, red, blue, black.
const COLOR_BAR_LUMA: [u8; 8] = [235, 210, 170, 145, 106, 81, 41, 16];

/// Allowed luma deviation for pattern matching.
const LUMA_TOLERANCE: u8 = 15;

/// Luma of pixel `(x, y)`, or `None` outside the frame.
pub fn luma_at(frame: &CameraFrame<'_>, x: u32, y: u32) -> Option<u8> {
    if x >= frame.width() || y >= frame.height() {
        return None;
    }
    let row = y as usize * frame.stride() as usize;
    let offset = match frame.pixel_format() {
        PixelFormat::Mono8 => row + x as usize,
        PixelFormat::Uyvy => row + 2 * x as usize + 1,
    };
    frame.data().get(offset).copied()
}

fn sample(frame: &CameraFrame<'_>, x: u32, y: u32) -> Result<u8> {
    luma_at(frame, x, y)
        .ok_or_else(|| CameraError::Validation(format!("no pixel at ({x}, {y})")))
}

/// Check the center of each of 8 vertical color bars against its luma.
///
/// # Errors
///
/// Returns `Validation` if a bar is missing or outside the tolerance.
pub fn validate_color_bars(frame: &CameraFrame<'_>) -> Result<()> {
    let bar_width = frame.width() / 8;
    let center_y = frame.height() / 2;

    for (bar, &expected) in (0u32..).zip(COLOR_BAR_LUMA.iter()) {
        let x = bar * bar_width + bar_width / 2;
        let actual = sample(frame, x, center_y)?;
        if actual.abs_diff(expected) > LUMA_TOLERANCE {
            return Err(CameraError::Validation(format!(
                "color bar {bar} at ({x}, {center_y}): expected luma {expected}, got {actual}"
            )));
        }
    }

    Ok(())
}

/// Check for a left-to-right luma ramp along the center row.
///
/// Samples every 10 pixels. Luma may dip by at most 1 between samples and
/// must rise by at least 50 overall.
///
/// # Errors
///
/// Returns `Validation` if the ramp decreases or is too flat.
pub fn validate_gradient(frame: &CameraFrame<'_>) -> Result<()> {
    let center_y = frame.height() / 2;
    let mut first = None;
    let mut prev: Option<u8> = None;

    for x in (0..frame.width()).step_by(10) {
        let luma = sample(frame, x, center_y)?;
        first.get_or_insert(luma);

        if let Some(prev) = prev {
            if u16::from(luma) + 1 < u16::from(prev) {
                return Err(CameraError::Validation(format!(
                    "gradient decreases at x={x}: {luma} after {prev}"
                )));
            }
        }
        prev = Some(luma);
    }

    let (Some(first), Some(last)) = (first, prev) else {
        return Err(CameraError::Validation("empty frame".to_owned()));
    };
    let change = i16::from(last) - i16::from(first);
    if change < 50 {
        return Err(CameraError::Validation(format!(
            "insufficient luma change for gradient: {change} (expected at least 50)"
        )));
    }

    Ok(())
}

/// Check that every pixel has luma within tolerance of `expected`.
///
/// # Errors
///
/// Returns `Validation` at the first pixel that differs.
pub fn validate_solid(frame: &CameraFrame<'_>, expected: u8) -> Result<()> {
    for y in 0..frame.height() {
        for x in 0..frame.width() {
            let actual = sample(frame, x, y)?;
            if actual.abs_diff(expected) > LUMA_TOLERANCE {
                return Err(CameraError::Validation(format!(
                    "pixel ({x}, {y}): expected luma {expected}, got {actual}"
                )));
            }
        }
    }
    Ok(())
}

/// Check that sequence numbers increase by exactly 1.
///
/// # Errors
///
/// Returns `Validation` for an empty slice or any gap.
pub fn validate_sequence(sequences: &[u32]) -> Result<()> {
    if sequences.is_empty() {
        return Err(CameraError::Validation(
            "cannot validate empty frame sequence".to_owned(),
        ));
    }

    for (index, pair) in sequences.windows(2).enumerate() {
        if let [prev, curr] = *pair {
            if prev.checked_add(1) != Some(curr) {
                return Err(CameraError::Validation(format!(
                    "sequence gap at index {}: expected {}, got {curr}",
                    index + 1,
                    prev.wrapping_add(1)
                )));
            }
        }
    }

    Ok(())
}
