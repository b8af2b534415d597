//! Raster path: decode, scale, recompress to a single JPEG.
//!
//! Each stage takes the pixel buffer by value and hands a new one on, so
//! at most two full-size buffers are alive at once and all of them are
//! gone when [`encode_raster`] returns.

use crate::config::ShareOptions;
use crate::inspector::SourceImage;
use crate::resize_plan::ResizePlan;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, ExtendedColorType, ImageReader, Rgb, RgbImage};
use shared_utils::{Result, ShareError};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use tracing::{debug, info};

/// Recompress `input` into `output` following `plan`; returns the output
/// length in bytes.
pub fn encode_raster(
    input: &Path,
    output: &Path,
    source: &SourceImage,
    plan: &ResizePlan,
    jpeg_quality: u8,
    options: &ShareOptions,
) -> Result<u64> {
    if let Some(max_pixels) = options.max_decoded_pixels {
        check_pixel_limit(source.width, source.height, max_pixels)?;
    }

    let decoded = decode(input)?;
    let scaled = scale(decoded, plan, options.resize_filter);
    let rgb = flatten(scaled);
    let written = write_jpeg(rgb, output, jpeg_quality)?;

    info!(
        width = plan.target_width,
        height = plan.target_height,
        quality = jpeg_quality,
        bytes = written,
        "Raster encode complete"
    );
    Ok(written)
}

fn check_pixel_limit(width: u32, height: u32, max_pixels: u64) -> Result<()> {
    let pixels = (width as u64)
        .checked_mul(height as u64)
        .ok_or_else(|| ShareError::ResourceLimit("Pixel count overflow".to_string()))?;
    if pixels > max_pixels {
        return Err(ShareError::ResourceLimit(format!(
            "Image too large: {} pixels (limit {})",
            pixels, max_pixels
        )));
    }
    Ok(())
}

/// Decoder allocation limits are off; `max_decoded_pixels` is the only size gate.
fn decode(input: &Path) -> Result<DynamicImage> {
    let mut reader = ImageReader::open(input)
        .map_err(|e| ShareError::Encode(format!("Failed to open staged copy: {}", e)))?
        .with_guessed_format()
        .map_err(|e| ShareError::Encode(format!("Failed to read staged copy: {}", e)))?;
    reader.no_limits();
    reader
        .decode()
        .map_err(|e| ShareError::Encode(format!("Failed to decode pixels: {}", e)))
}

fn scale(image: DynamicImage, plan: &ResizePlan, filter: FilterType) -> DynamicImage {
    if !plan.was_scaled {
        return image;
    }
    debug!(
        from_w = image.width(),
        from_h = image.height(),
        to_w = plan.target_width,
        to_h = plan.target_height,
        "Scaling"
    );
    image.resize_exact(plan.target_width, plan.target_height, filter)
}

/// JPEG has no alpha channel; composite onto white.
fn flatten(image: DynamicImage) -> RgbImage {
    if !image.color().has_alpha() {
        return image.into_rgb8();
    }
    let rgba = image.into_rgba8();
    let mut rgb = RgbImage::new(rgba.width(), rgba.height());
    for (dst, src) in rgb.pixels_mut().zip(rgba.pixels()) {
        let alpha = src[3] as u32;
        let blend = |c: u8| ((c as u32 * alpha + 255 * (255 - alpha) + 127) / 255) as u8;
        *dst = Rgb([blend(src[0]), blend(src[1]), blend(src[2])]);
    }
    rgb
}

fn write_jpeg(rgb: RgbImage, output: &Path, quality: u8) -> Result<u64> {
    let file = File::create(output)?;
    let mut writer = BufWriter::new(file);
    JpegEncoder::new_with_quality(&mut writer, quality.clamp(1, 100))
        .encode(rgb.as_raw(), rgb.width(), rgb.height(), ExtendedColorType::Rgb8)
        .map_err(|e| ShareError::Encode(format!("JPEG encode failed: {}", e)))?;
    drop(rgb);

    writer.flush()?;
    let file = writer
        .into_inner()
        .map_err(|e| ShareError::Io(e.into_error()))?;
    file.sync_all()?;
    Ok(file.metadata()?.len())
}
