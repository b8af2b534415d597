//! Conversion API Module
//!
//! Single entry point for a share run. Stages the input, inspects it,
//! plans and maps parameters, then dispatches to the raster or animated
//! path. Every intermediate file lives in a per-run [`TempFileSet`], so
//! whatever happens only the returned output survives the call.

use crate::animated_image::{encode_animated, ExternalEncoder, FfmpegEncoder};
use crate::cancel::CancelToken;
use crate::config::{ShareOptions, ShareSettings};
use crate::inspector::{inspect, MetadataIndex, SourceHints, SourceImage};
use crate::params::EncodeParams;
use crate::raster::encode_raster;
use crate::resize_plan::{plan, ResizePlan};
use crate::temp_files::TempFileSet;
use serde::Serialize;
use shared_utils::{Result, ShareError};
use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, info, info_span};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    Raster,
    AnimatedPrimary,
    AnimatedFallback,
    AnimatedCopyUnmodified,
}

impl Strategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Strategy::Raster => "raster",
            Strategy::AnimatedPrimary => "animated_primary",
            Strategy::AnimatedFallback => "animated_fallback",
            Strategy::AnimatedCopyUnmodified => "animated_copy_unmodified",
        }
    }
}

/// The produced file. The caller owns it and is responsible for deleting
/// or moving it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EncodeResult {
    pub output_path: PathBuf,
    pub output_byte_length: u64,
    pub strategy_used: Strategy,
}

/// Everything one run learned, for display and for the history ledger.
#[derive(Debug, Clone)]
pub struct ShareOutcome {
    pub source: SourceImage,
    pub plan: ResizePlan,
    pub params: EncodeParams,
    pub result: EncodeResult,
}

pub struct SharePipeline {
    options: ShareOptions,
    encoder: Arc<dyn ExternalEncoder>,
}

impl SharePipeline {
    /// Pipeline using the system `ffmpeg` for animated inputs.
    pub fn new(options: ShareOptions) -> Self {
        let encoder = Arc::new(FfmpegEncoder::from_env(options.encoder_timeout));
        Self::with_encoder(options, encoder)
    }

    pub fn with_encoder(options: ShareOptions, encoder: Arc<dyn ExternalEncoder>) -> Self {
        Self { options, encoder }
    }

    /// Run one share conversion over `input`.
    pub fn run<R: Read>(
        &self,
        mut input: R,
        hints: &SourceHints,
        index: Option<&dyn MetadataIndex>,
        settings: &ShareSettings,
        cancel: &CancelToken,
    ) -> Result<ShareOutcome> {
        let span = info_span!("share", quality = settings.quality, max_edge = settings.max_edge);
        let _enter = span.enter();

        let mut temps = TempFileSet::new(&self.options.cache_dir)?;
        let staged = temps.create("staged", "tmp")?;
        let staged_len = stage(&mut input, &staged)?;
        debug!(path = ?staged, bytes = staged_len, "Staged input");
        cancel.check()?;

        let source = inspect(BufReader::new(File::open(&staged)?), hints, index)?;
        let plan = plan(source.width, source.height, settings.max_edge);
        let params = EncodeParams::for_source(source.is_animated, settings);
        info!(
            file = %source.file_name,
            width = source.width,
            height = source.height,
            animated = source.is_animated,
            target_w = plan.target_width,
            target_h = plan.target_height,
            "Planned share"
        );

        let (output_path, output_byte_length, strategy_used) = match &params {
            EncodeParams::Raster { jpeg_quality } => {
                cancel.check()?;
                let output = temps.create("output", "jpg")?;
                let len = encode_raster(&staged, &output, &source, &plan, *jpeg_quality, &self.options)?;
                (output, len, Strategy::Raster)
            }
            EncodeParams::Animated(animated) => encode_animated(
                self.encoder.as_ref(),
                &staged,
                &source,
                &plan,
                animated,
                &mut temps,
                cancel,
            )?,
        };

        temps.keep(&output_path);
        info!(
            strategy = strategy_used.as_str(),
            bytes = output_byte_length,
            output = ?output_path,
            "Share output ready"
        );

        Ok(ShareOutcome {
            source,
            plan,
            params,
            result: EncodeResult {
                output_path,
                output_byte_length,
                strategy_used,
            },
        })
    }

    /// [`run`](Self::run) over a file on disk.
    pub fn run_path(
        &self,
        path: &Path,
        settings: &ShareSettings,
        cancel: &CancelToken,
    ) -> Result<ShareOutcome> {
        let file = File::open(path)?;
        self.run(file, &SourceHints::for_path(path), None, settings, cancel)
    }
}

/// Copy `input` into `staged` and make it durable before anything reads it.
fn stage<R: Read>(input: &mut R, staged: &Path) -> Result<u64> {
    let mut writer = BufWriter::new(File::create(staged)?);
    let copied = io::copy(input, &mut writer)?;
    writer.flush()?;
    let file = writer
        .into_inner()
        .map_err(|e| ShareError::Io(e.into_error()))?;
    file.sync_all()?;
    Ok(copied)
}

/// A share run on a background worker thread.
pub struct ShareJob {
    handle: JoinHandle<Result<ShareOutcome>>,
    cancel: CancelToken,
}

impl ShareJob {
    /// Request cancellation; the worker stops at its next check and still
    /// cleans up.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    pub fn join(self) -> Result<ShareOutcome> {
        self.handle
            .join()
            .unwrap_or_else(|_| Err(ShareError::Encode("share worker panicked".to_string())))
    }
}

/// Start a share run off the calling thread.
pub fn spawn_share<R>(
    pipeline: Arc<SharePipeline>,
    input: R,
    hints: SourceHints,
    index: Option<Arc<dyn MetadataIndex + Send + Sync>>,
    settings: ShareSettings,
) -> Result<ShareJob>
where
    R: Read + Send + 'static,
{
    let cancel = CancelToken::new();
    let worker_cancel = cancel.clone();
    let handle = thread::Builder::new()
        .name("img-share-worker".to_string())
        .spawn(move || {
            let index = index.as_deref().map(|i| i as &dyn MetadataIndex);
            pipeline.run(input, &hints, index, &settings, &worker_cancel)
        })?;
    Ok(ShareJob { handle, cancel })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{self, ScriptedEncoder, Step};
    use crate::inspector::IndexedMetadata;
    use image::{GenericImageView, ImageFormat};
    use std::io::Cursor;
    use tempfile::TempDir;

    fn pipeline(cache: &Path, steps: Vec<Step>) -> (SharePipeline, Arc<ScriptedEncoder>) {
        let encoder = Arc::new(ScriptedEncoder::new(steps));
        let options = ShareOptions::default().with_cache_dir(cache);
        (SharePipeline::with_encoder(options, encoder.clone()), encoder)
    }

    fn cache_entries(cache: &Path) -> Vec<PathBuf> {
        std::fs::read_dir(cache)
            .unwrap()
            .map(|e| e.unwrap().path())
            .collect()
    }

    #[test]
    fn test_raster_share() {
        let dir = TempDir::new().unwrap();
        let (pipeline, encoder) = pipeline(dir.path(), vec![]);
        let bytes = fixtures::png_bytes(400, 200);
        let outcome = pipeline
            .run(
                Cursor::new(bytes),
                &SourceHints::default(),
                None,
                &ShareSettings::new(80, 100),
                &CancelToken::new(),
            )
            .unwrap();

        assert_eq!(outcome.result.strategy_used, Strategy::Raster);
        assert_eq!(
            (outcome.plan.target_width, outcome.plan.target_height),
            (100, 50)
        );
        let decoded = image::open(&outcome.result.output_path).unwrap();
        assert_eq!(decoded.dimensions(), (100, 50));
        assert!(encoder.calls().is_empty());
        assert_eq!(cache_entries(dir.path()), vec![outcome.result.output_path]);
    }

    #[test]
    fn test_animated_fallback_leaves_only_output() {
        let dir = TempDir::new().unwrap();
        let (pipeline, encoder) = pipeline(dir.path(), vec![Step::Fail, Step::Succeed]);
        let outcome = pipeline
            .run(
                Cursor::new(fixtures::gif_bytes(64, 32, 3)),
                &SourceHints::default(),
                None,
                &ShareSettings::default(),
                &CancelToken::new(),
            )
            .unwrap();

        assert_eq!(outcome.result.strategy_used, Strategy::AnimatedFallback);
        assert_eq!(encoder.calls().len(), 2);
        assert_eq!(cache_entries(dir.path()), vec![outcome.result.output_path]);
    }

    #[test]
    fn test_animated_copy_keeps_original_length() {
        let dir = TempDir::new().unwrap();
        let (pipeline, _) = pipeline(dir.path(), vec![Step::Fail, Step::Fail]);
        let bytes = fixtures::gif_bytes(64, 32, 2);
        let outcome = pipeline
            .run(
                Cursor::new(bytes.clone()),
                &SourceHints::default(),
                None,
                &ShareSettings::default(),
                &CancelToken::new(),
            )
            .unwrap();

        assert_eq!(outcome.result.strategy_used, Strategy::AnimatedCopyUnmodified);
        assert_eq!(outcome.result.output_byte_length, bytes.len() as u64);
        assert_eq!(std::fs::read(&outcome.result.output_path).unwrap(), bytes);
        assert_eq!(cache_entries(dir.path()), vec![outcome.result.output_path]);
    }

    #[test]
    fn test_decode_error_cleans_up() {
        let dir = TempDir::new().unwrap();
        let (pipeline, _) = pipeline(dir.path(), vec![]);
        let err = pipeline
            .run(
                Cursor::new(b"not an image".to_vec()),
                &SourceHints::default(),
                None,
                &ShareSettings::default(),
                &CancelToken::new(),
            )
            .unwrap_err();
        assert!(matches!(err, ShareError::Decode(_)));
        assert!(err.is_user_visible());
        assert!(cache_entries(dir.path()).is_empty());
    }

    #[test]
    fn test_cancel_before_start_cleans_up() {
        let dir = TempDir::new().unwrap();
        let (pipeline, encoder) = pipeline(dir.path(), vec![Step::Succeed]);
        let cancel = CancelToken::new();
        cancel.cancel();
        let err = pipeline
            .run(
                Cursor::new(fixtures::gif_bytes(8, 8, 2)),
                &SourceHints::default(),
                None,
                &ShareSettings::default(),
                &cancel,
            )
            .unwrap_err();
        assert!(matches!(err, ShareError::Cancelled));
        assert!(encoder.calls().is_empty());
        assert!(cache_entries(dir.path()).is_empty());
    }

    #[test]
    fn test_run_path_uses_file_name() {
        let dir = TempDir::new().unwrap();
        let input = dir.path().join("photo.jpg");
        std::fs::write(&input, fixtures::encoded_bytes(20, 10, ImageFormat::Jpeg)).unwrap();
        let cache = dir.path().join("cache");
        let (pipeline, _) = pipeline(&cache, vec![]);

        let outcome = pipeline
            .run_path(&input, &ShareSettings::default(), &CancelToken::new())
            .unwrap();
        assert_eq!(outcome.source.file_name, "photo.jpg");
        assert!(!outcome.plan.was_scaled);
    }

    #[test]
    fn test_spawn_share_joins() {
        let dir = TempDir::new().unwrap();
        let (pipeline, _) = pipeline(dir.path(), vec![Step::Succeed]);
        let job = spawn_share(
            Arc::new(pipeline),
            Cursor::new(fixtures::gif_bytes(16, 16, 2)),
            SourceHints::default(),
            None,
            ShareSettings::default(),
        )
        .unwrap();
        let outcome = job.join().unwrap();
        assert_eq!(outcome.result.strategy_used, Strategy::AnimatedPrimary);
    }

    struct SingleEntryIndex {
        uri: String,
        metadata: IndexedMetadata,
    }

    impl MetadataIndex for SingleEntryIndex {
        fn lookup(&self, uri: &str) -> Option<IndexedMetadata> {
            (uri == self.uri).then(|| self.metadata.clone())
        }
    }

    #[test]
    fn test_spawn_share_consults_index() {
        let dir = TempDir::new().unwrap();
        let (pipeline, _) = pipeline(dir.path(), vec![]);
        let index: Arc<dyn MetadataIndex + Send + Sync> = Arc::new(SingleEntryIndex {
            uri: "content://media/42".to_string(),
            metadata: IndexedMetadata {
                display_name: Some("holiday.png".to_string()),
                ..Default::default()
            },
        });
        let hints = SourceHints {
            uri: Some("content://media/42".to_string()),
            ..Default::default()
        };

        let job = spawn_share(
            Arc::new(pipeline),
            Cursor::new(fixtures::png_bytes(32, 16)),
            hints,
            Some(index),
            ShareSettings::default(),
        )
        .unwrap();
        let outcome = job.join().unwrap();
        assert_eq!(outcome.source.file_name, "holiday.png");
        assert_eq!(outcome.result.strategy_used, Strategy::Raster);
    }

    #[test]
    fn test_spawn_share_cancelled_mid_encode() {
        let dir = TempDir::new().unwrap();
        let (pipeline, _) = pipeline(dir.path(), vec![Step::WaitForCancel]);
        let job = spawn_share(
            Arc::new(pipeline),
            Cursor::new(fixtures::gif_bytes(16, 16, 2)),
            SourceHints::default(),
            None,
            ShareSettings::default(),
        )
        .unwrap();
        job.cancel();
        assert!(matches!(job.join(), Err(ShareError::Cancelled)));
        assert!(cache_entries(dir.path()).is_empty());
    }
}
