//! Type-safe wrappers.
//!
//! - `file_size`: byte counts with formatting and ratio helpers

pub mod file_size;

pub use file_size::FileSize;
