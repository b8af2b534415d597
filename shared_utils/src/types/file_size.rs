//! Byte-count newtype with human-readable display.

use std::fmt;

/// File size in bytes.
///
/// # Examples
/// ```
/// use shared_utils::types::file_size::FileSize;
///
/// let size = FileSize::new(1536);
/// assert_eq!(size.display(), "1.5 KB");
/// assert_eq!(FileSize::new(750).compression_ratio(FileSize::new(1000)), Some(0.75));
/// ```
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct FileSize(u64);

impl FileSize {
    pub const ZERO: FileSize = FileSize(0);

    pub const KB: u64 = 1024;
    pub const MB: u64 = 1024 * 1024;
    pub const GB: u64 = 1024 * 1024 * 1024;

    #[inline]
    pub const fn new(bytes: u64) -> Self {
        Self(bytes)
    }

    #[inline]
    pub const fn bytes(&self) -> u64 {
        self.0
    }

    /// `self / original`, or `None` when `original` is zero.
    pub fn compression_ratio(&self, original: FileSize) -> Option<f64> {
        if original.0 == 0 {
            None
        } else {
            Some(self.0 as f64 / original.0 as f64)
        }
    }

    /// Percent change relative to `original`; negative means smaller.
    pub fn size_change_percent(&self, original: FileSize) -> Option<f64> {
        if original.0 == 0 {
            None
        } else {
            Some((self.0 as f64 - original.0 as f64) / original.0 as f64 * 100.0)
        }
    }

    /// "size reduced 42.0%" / "size increased 3.1%" / "size unchanged".
    pub fn describe_change(&self, original: FileSize) -> String {
        match self.size_change_percent(original) {
            Some(pct) if pct < 0.0 => format!("size reduced {:.1}%", -pct),
            Some(pct) if pct > 0.0 => format!("size increased {:.1}%", pct),
            _ => "size unchanged".to_string(),
        }
    }

    pub fn display(&self) -> String {
        if self.0 >= Self::GB {
            format!("{:.1} GB", self.0 as f64 / Self::GB as f64)
        } else if self.0 >= Self::MB {
            format!("{:.1} MB", self.0 as f64 / Self::MB as f64)
        } else if self.0 >= Self::KB {
            format!("{:.1} KB", self.0 as f64 / Self::KB as f64)
        } else {
            format!("{} B", self.0)
        }
    }
}

impl fmt::Debug for FileSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FileSize({} = {})", self.0, self.display())
    }
}

impl fmt::Display for FileSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.display())
    }
}

impl From<u64> for FileSize {
    fn from(bytes: u64) -> Self {
        Self::new(bytes)
    }
}

impl From<FileSize> for u64 {
    fn from(size: FileSize) -> Self {
        size.0
    }
}
