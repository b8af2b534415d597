//! Parameter Mapper
//!
//! Maps the single 0-100 quality dial to encoder parameters. The animated
//! mapping uses coarse buckets so a slider preview does not flicker
//! between neighbouring values.

use crate::config::ShareSettings;
use serde::Serialize;

pub const MAX_COMPRESSION_LEVEL: u8 = 9;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EncodeParams {
    Raster {
        /// 1..=100
        jpeg_quality: u8,
    },
    Animated(AnimatedParams),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AnimatedParams {
    /// One of 10, 15, 20.
    pub frames_per_second: u8,
    /// One of 64, 128, 192, 256.
    pub palette_colors: u16,
    /// 0..=9
    pub compression_level: u8,
}

impl EncodeParams {
    /// Parameters for the path `is_animated` selects.
    pub fn for_source(is_animated: bool, settings: &ShareSettings) -> Self {
        if is_animated {
            map_animated(settings.quality, settings.compression_level)
        } else {
            map_raster(settings.quality)
        }
    }

    pub fn is_animated(&self) -> bool {
        matches!(self, EncodeParams::Animated(_))
    }
}

/// JPEG quality equals the dial, clamped to the encoder's `1..=100`.
pub fn map_raster(quality: u8) -> EncodeParams {
    EncodeParams::Raster {
        jpeg_quality: quality.clamp(1, 100),
    }
}

/// GIF parameters for `quality`. A `compression_hint` replaces the
/// quality-derived level; the raster path has no use for it.
pub fn map_animated(quality: u8, compression_hint: Option<u8>) -> EncodeParams {
    let q = quality.min(100);

    let frames_per_second = match q {
        0..=29 => 10,
        30..=59 => 15,
        _ => 20,
    };
    let palette_colors = match q {
        0..=29 => 64,
        30..=59 => 128,
        60..=89 => 192,
        _ => 256,
    };
    let compression_level = compression_hint
        .unwrap_or((100 - q) / 10)
        .min(MAX_COMPRESSION_LEVEL);

    EncodeParams::Animated(AnimatedParams {
        frames_per_second,
        palette_colors,
        compression_level,
    })
}
