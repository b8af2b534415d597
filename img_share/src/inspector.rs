//! Image Inspector
//!
//! Reads just enough of a byte source to describe it: container format,
//! dimensions from the header, byte length and whether it should take the
//! animated path. No pixel data is decoded here.
//!
//! Metadata the caller already knows (MIME type, display name, size) can
//! be passed in as [`SourceHints`]; a [`MetadataIndex`] is consulted next,
//! and whatever is still missing is derived from the bytes themselves.

use image::{ImageFormat, ImageReader};
use shared_utils::image_formats::webp;
use shared_utils::{Result, ShareError};
use std::fs::File;
use std::io::{BufRead, BufReader, Seek, SeekFrom};
use std::path::Path;
use tracing::{debug, warn};

/// Caller-supplied metadata. Every field is optional.
#[derive(Debug, Clone, Default)]
pub struct SourceHints {
    pub mime_type: Option<String>,
    pub file_name: Option<String>,
    /// Content URI or filesystem path the bytes came from.
    pub uri: Option<String>,
    pub byte_length: Option<u64>,
}

impl SourceHints {
    pub fn for_path(path: &Path) -> Self {
        Self {
            file_name: path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned()),
            uri: Some(path.display().to_string()),
            ..Default::default()
        }
    }
}

/// What a metadata index knows about a URI.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IndexedMetadata {
    pub display_name: Option<String>,
    pub byte_length: Option<u64>,
    pub mime_type: Option<String>,
}

/// Secondary metadata source, e.g. a media store or a sidecar database.
pub trait MetadataIndex {
    fn lookup(&self, uri: &str) -> Option<IndexedMetadata>;
}

/// Immutable snapshot of the input taken once at pipeline entry.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceImage {
    pub byte_length: u64,
    pub declared_mime_type: String,
    pub width: u32,
    pub height: u32,
    pub is_animated: bool,
    pub file_name: String,
    pub format: ImageFormat,
}

impl SourceImage {
    /// Canonical file extension for the detected container.
    pub fn extension(&self) -> &'static str {
        format_extension(self.format)
    }
}

pub(crate) fn format_extension(format: ImageFormat) -> &'static str {
    format.extensions_str().first().copied().unwrap_or("bin")
}

/// Describe the image readable from `reader`.
///
/// Fails with [`ShareError::Decode`] only when the bytes are not a
/// recognisable image; missing metadata is never an error.
pub fn inspect<R: BufRead + Seek>(
    mut reader: R,
    hints: &SourceHints,
    index: Option<&dyn MetadataIndex>,
) -> Result<SourceImage> {
    let measured = reader.seek(SeekFrom::End(0))?;
    reader.rewind()?;

    let image_reader = ImageReader::new(&mut reader)
        .with_guessed_format()
        .map_err(|e| ShareError::Decode(format!("Failed to read header: {}", e)))?;
    let format = image_reader
        .format()
        .ok_or_else(|| ShareError::Decode("Unknown image container".to_string()))?;
    let (width, height) = image_reader
        .into_dimensions()
        .map_err(|e| ShareError::Decode(format!("Failed to read dimensions: {}", e)))?;

    if width == 0 || height == 0 {
        return Err(ShareError::Decode(format!(
            "Degenerate dimensions {}x{}",
            width, height
        )));
    }

    reader.rewind()?;
    let is_animated = match format {
        ImageFormat::Gif => true,
        ImageFormat::WebP => webp::is_animated(&mut reader)?,
        _ => false,
    };

    let indexed = match (index, hints.uri.as_deref()) {
        (Some(index), Some(uri)) => index.lookup(uri),
        _ => None,
    }
    .unwrap_or_default();

    let file_name = hints
        .file_name
        .clone()
        .or(indexed.display_name)
        .or_else(|| hints.uri.as_deref().and_then(last_segment))
        .unwrap_or_else(|| {
            format!(
                "image_{}.{}",
                chrono::Utc::now().timestamp_millis(),
                format_extension(format)
            )
        });

    let byte_length = hints
        .byte_length
        .or(indexed.byte_length)
        .unwrap_or(measured);
    if byte_length != measured {
        warn!(declared = byte_length, measured, "Declared size differs from readable bytes");
    }

    let declared_mime_type = hints
        .mime_type
        .clone()
        .or(indexed.mime_type)
        .unwrap_or_else(|| format.to_mime_type().to_string());

    let source = SourceImage {
        byte_length,
        declared_mime_type,
        width,
        height,
        is_animated,
        file_name,
        format,
    };
    debug!(
        format = ?source.format,
        width,
        height,
        bytes = source.byte_length,
        animated = source.is_animated,
        "Inspected source"
    );
    Ok(source)
}

/// Inspect a file on disk; name and URI come from the path.
pub fn inspect_path(path: &Path) -> Result<SourceImage> {
    let file = File::open(path)?;
    inspect(BufReader::new(file), &SourceHints::for_path(path), None)
}

/// Last non-empty segment of a path or URI, without query or fragment.
fn last_segment(uri: &str) -> Option<String> {
    let trimmed = uri.split(['?', '#']).next().unwrap_or(uri);
    trimmed
        .rsplit(['/', '\\'])
        .find(|segment| !segment.is_empty())
        .filter(|segment| !segment.contains(':'))
        .map(str::to_string)
}
