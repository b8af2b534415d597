//! Shared utilities for img-share
//!
//! - Error taxonomy for the share pipeline (`errors`)
//! - Logging bootstrap with rolling files (`logging`)
//! - FFmpeg process management without pipe deadlocks (`ffmpeg_process`)
//! - Container sniffing for animated WebP (`image_formats`)
//! - File and command helpers (`common_utils`)
//! - Type-safe wrappers (`types`)

pub mod common_utils;
pub mod errors;
pub mod ffmpeg_process;
pub mod image_formats;
pub mod logging;
pub mod types;

pub use common_utils::{
    copy_file_with_context, ensure_dir_exists, find_tool, get_extension_lowercase,
    safe_path_arg,
};
pub use errors::{Result, ShareError};
pub use ffmpeg_process::{format_ffmpeg_error, get_error_suggestion, FfmpegProcess, WaitOutcome};
pub use logging::{init_logging, log_external_tool, LogConfig};
pub use types::FileSize;
