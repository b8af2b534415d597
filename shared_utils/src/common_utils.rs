//! Common Utilities Module
//!
//! Small helpers shared by the share pipeline and the CLI:
//! - file and directory operations with contextual errors
//! - command-line argument hygiene for external tools
//! - external tool lookup

use anyhow::{Context, Result};
use std::borrow::Cow;
use std::path::{Path, PathBuf};

// ═══════════════════════════════════════════════════════════════
// File Operations
// ═══════════════════════════════════════════════════════════════

/// Lowercase extension of `path`, or an empty string if it has none.
///
/// # Examples
/// ```
/// use std::path::Path;
/// use shared_utils::common_utils::get_extension_lowercase;
///
/// assert_eq!(get_extension_lowercase(Path::new("test.GIF")), "gif");
/// assert_eq!(get_extension_lowercase(Path::new("noext")), "");
/// ```
pub fn get_extension_lowercase(path: &Path) -> String {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase())
        .unwrap_or_default()
}

/// Create `dir` and all missing parents.
///
/// # Examples
/// ```no_run
/// use std::path::Path;
/// use shared_utils::common_utils::ensure_dir_exists;
///
/// ensure_dir_exists(Path::new("/tmp/img-share/cache")).unwrap();
/// ```
pub fn ensure_dir_exists(dir: &Path) -> Result<()> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create directory: {}", dir.display()))
}

/// Copy `source` to `dest`, returning the number of bytes copied.
pub fn copy_file_with_context(source: &Path, dest: &Path) -> Result<u64> {
    std::fs::copy(source, dest).with_context(|| {
        format!(
            "Failed to copy file from {} to {}",
            source.display(),
            dest.display()
        )
    })
}

// ═══════════════════════════════════════════════════════════════
// Command Helpers
// ═══════════════════════════════════════════════════════════════

/// Render `path` as a command-line argument that can never be mistaken
/// for an option.
///
/// FFmpeg has no `--` delimiter, so a relative path starting with `-`
/// gets a `./` prefix.
///
/// # Examples
/// ```
/// use std::path::Path;
/// use shared_utils::common_utils::safe_path_arg;
///
/// assert_eq!(safe_path_arg(Path::new("-frame.gif")), "./-frame.gif");
/// assert_eq!(safe_path_arg(Path::new("/tmp/a.gif")), "/tmp/a.gif");
/// ```
pub fn safe_path_arg(path: &Path) -> Cow<'_, str> {
    let s = path.to_string_lossy();
    if s.starts_with('-') {
        Cow::Owned(format!("./{}", s))
    } else {
        s
    }
}

/// Locate an executable on `PATH`.
pub fn find_tool(name: &str) -> Option<PathBuf> {
    which::which(name).ok()
}
