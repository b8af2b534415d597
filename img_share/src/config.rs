//! In-process configuration: the user's dials and the pipeline knobs.

use image::imageops::FilterType;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_QUALITY: u8 = 80;
pub const DEFAULT_MAX_EDGE: u32 = 1024;
pub const DEFAULT_ENCODER_TIMEOUT: Duration = Duration::from_secs(120);

/// What the user picked on the share screen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShareSettings {
    /// 0..=100; higher keeps more detail.
    pub quality: u8,
    /// Longest output edge in pixels.
    pub max_edge: u32,
    /// Overrides the quality-derived GIF compression level when set.
    pub compression_level: Option<u8>,
}

impl Default for ShareSettings {
    fn default() -> Self {
        Self {
            quality: DEFAULT_QUALITY,
            max_edge: DEFAULT_MAX_EDGE,
            compression_level: None,
        }
    }
}

impl ShareSettings {
    pub fn new(quality: u8, max_edge: u32) -> Self {
        Self {
            quality,
            max_edge,
            compression_level: None,
        }
    }

    pub fn with_compression_level(mut self, level: Option<u8>) -> Self {
        self.compression_level = level;
        self
    }
}

/// Pipeline knobs that do not change per share.
#[derive(Debug, Clone)]
pub struct ShareOptions {
    /// Where staged copies and encoder outputs are created.
    pub cache_dir: PathBuf,
    /// Upper bound for one external encoder attempt; `None` waits forever.
    pub encoder_timeout: Option<Duration>,
    pub resize_filter: FilterType,
    /// Raster inputs above this many pixels are refused before decoding.
    /// `None` accepts any size the decoder can allocate.
    pub max_decoded_pixels: Option<u64>,
}

impl Default for ShareOptions {
    fn default() -> Self {
        Self {
            cache_dir: std::env::temp_dir().join("img-share"),
            encoder_timeout: Some(DEFAULT_ENCODER_TIMEOUT),
            resize_filter: FilterType::Triangle,
            max_decoded_pixels: None,
        }
    }
}

impl ShareOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cache_dir<P: AsRef<Path>>(mut self, dir: P) -> Self {
        self.cache_dir = dir.as_ref().to_path_buf();
        self
    }

    pub fn with_encoder_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.encoder_timeout = timeout;
        self
    }

    pub fn with_resize_filter(mut self, filter: FilterType) -> Self {
        self.resize_filter = filter;
        self
    }

    pub fn with_max_decoded_pixels(mut self, pixels: Option<u64>) -> Self {
        self.max_decoded_pixels = pixels;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_settings_default() {
        let settings = ShareSettings::default();
        assert_eq!(settings.quality, 80);
        assert_eq!(settings.max_edge, 1024);
        assert_eq!(settings.compression_level, None);
    }

    #[test]
    fn test_options_builder() {
        let options = ShareOptions::new()
            .with_cache_dir("/tmp/share-cache")
            .with_encoder_timeout(None)
            .with_resize_filter(FilterType::Lanczos3)
            .with_max_decoded_pixels(Some(1_000));

        assert_eq!(options.cache_dir, PathBuf::from("/tmp/share-cache"));
        assert_eq!(options.encoder_timeout, None);
        assert_eq!(options.resize_filter, FilterType::Lanczos3);
        assert_eq!(options.max_decoded_pixels, Some(1_000));
    }

    #[test]
    fn test_options_defaults() {
        let options = ShareOptions::default();
        assert_eq!(options.encoder_timeout, Some(Duration::from_secs(120)));
        assert_eq!(options.max_decoded_pixels, None);
    }
}
