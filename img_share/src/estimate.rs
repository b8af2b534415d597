//! Size Estimator
//!
//! Advisory prediction of the shared file size, shown before encoding.
//! Never feeds back into the encode itself.

use crate::config::ShareSettings;
use crate::inspector::SourceImage;

/// Share of the animated estimate kept after frame-rate limiting.
const FRAME_RATE_FACTOR: f64 = 0.8;

/// Predicted output size in bytes.
///
/// Raster: `orig * q/100 * (1 - area_reduction)` where the area reduction
/// is `1 - scale²` once the longest edge exceeds `max_edge`.
/// Animated: `orig * min(scale², 1) * (0.3 + 0.7 * (q/100)²) * 0.8`.
pub fn estimate(
    original_bytes: u64,
    width: u32,
    height: u32,
    max_edge: u32,
    quality: u8,
    is_animated: bool,
) -> u64 {
    let q = quality.min(100) as f64 / 100.0;
    let longest = width.max(height);
    let scale = if longest > max_edge && longest > 0 {
        max_edge as f64 / longest as f64
    } else {
        1.0
    };
    let area = (scale * scale).min(1.0);
    let orig = original_bytes as f64;

    let estimated = if is_animated {
        orig * area * (0.3 + 0.7 * q * q) * FRAME_RATE_FACTOR
    } else {
        // (1 - (1 - q)) * (1 - (1 - area)) without the cancellation error
        orig * q * area
    };

    estimated.max(0.0) as u64
}

/// [`estimate`] for an inspected source and the current dials.
pub fn estimate_for(source: &SourceImage, settings: &ShareSettings) -> u64 {
    estimate(
        source.byte_length,
        source.width,
        source.height,
        settings.max_edge,
        settings.quality,
        source.is_animated,
    )
}
