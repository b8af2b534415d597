pub mod animated_image;
pub mod cancel;
pub mod config;
pub mod estimate;
pub mod history;
pub mod inspector;
pub mod params;
pub mod raster;
pub mod resize_plan;
pub mod temp_files;

pub mod conversion_api;

#[cfg(test)]
mod fixtures;

pub use animated_image::{AttemptKind, EncoderCommand, ExternalEncoder, FfmpegEncoder};
pub use cancel::CancelToken;
pub use config::{ShareOptions, ShareSettings};
pub use conversion_api::{
    spawn_share, EncodeResult, ShareJob, ShareOutcome, SharePipeline, Strategy,
};
pub use estimate::{estimate, estimate_for};
pub use history::{HistoryEntry, HistoryLedger, NewHistoryEntry, SqliteLedger};
pub use inspector::{
    inspect, inspect_path, IndexedMetadata, MetadataIndex, SourceHints, SourceImage,
};
pub use params::{map_animated, map_raster, AnimatedParams, EncodeParams};
pub use resize_plan::{plan, ResizePlan};
pub use temp_files::TempFileSet;

pub use shared_utils::errors::{Result, ShareError};
