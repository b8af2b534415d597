//! Animated path: palette GIF re-encode through an external encoder.
//!
//! Attempt ladder:
//! 1. primary: scale, fps, palette generation, ordered-dither palette use,
//!    compression level
//! 2. fallback: scale and fps only
//! 3. copy the staged original unmodified
//!
//! An attempt succeeds only if the encoder reports success AND the output
//! file is non-empty. Encoder failures never escape this module; only
//! cancellation and I/O errors on our own files do.

use crate::cancel::CancelToken;
use crate::conversion_api::Strategy;
use crate::inspector::SourceImage;
use crate::params::AnimatedParams;
use crate::resize_plan::ResizePlan;
use crate::temp_files::TempFileSet;
use shared_utils::ffmpeg_process::{
    format_ffmpeg_error, get_error_suggestion, FfmpegProcess, WaitOutcome,
};
use shared_utils::{copy_file_with_context, find_tool, log_external_tool, safe_path_arg};
use shared_utils::{Result, ShareError};
use std::fs::File;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::{Duration, Instant};
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptKind {
    Primary,
    Fallback,
}

/// One external encoder invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncoderCommand {
    pub kind: AttemptKind,
    pub input: PathBuf,
    pub output: PathBuf,
    pub filter_graph: String,
    pub compression_level: Option<u8>,
}

impl EncoderCommand {
    pub fn primary(input: &Path, output: &Path, plan: &ResizePlan, params: &AnimatedParams) -> Self {
        let filter_graph = format!(
            "{},fps={},split[s0][s1];[s0]palettegen=max_colors={}:stats_mode=single[p];\
             [s1][p]paletteuse=dither=bayer:bayer_scale=5:diff_mode=rectangle",
            scale_filter(plan),
            params.frames_per_second,
            params.palette_colors
        );
        Self {
            kind: AttemptKind::Primary,
            input: input.to_path_buf(),
            output: output.to_path_buf(),
            filter_graph,
            compression_level: Some(params.compression_level),
        }
    }

    pub fn fallback(input: &Path, output: &Path, plan: &ResizePlan, params: &AnimatedParams) -> Self {
        Self {
            kind: AttemptKind::Fallback,
            input: input.to_path_buf(),
            output: output.to_path_buf(),
            filter_graph: format!("{},fps={}", scale_filter(plan), params.frames_per_second),
            compression_level: None,
        }
    }

    /// FFmpeg argument list, overwrite flag first.
    pub fn to_args(&self) -> Vec<String> {
        let mut args = vec![
            "-y".to_string(),
            "-i".to_string(),
            safe_path_arg(&self.input).into_owned(),
            "-vf".to_string(),
            self.filter_graph.clone(),
        ];
        if let Some(level) = self.compression_level {
            args.push("-compression_level".to_string());
            args.push(level.to_string());
        }
        args.push(safe_path_arg(&self.output).into_owned());
        args
    }
}

fn scale_filter(plan: &ResizePlan) -> String {
    format!(
        "scale={}:{}:force_original_aspect_ratio=decrease",
        plan.target_width, plan.target_height
    )
}

/// Something that can run an [`EncoderCommand`] to completion.
///
/// `Err(ShareError::Cancelled)` must be returned when `cancel` fired while
/// running; any other error is treated as a failed attempt.
pub trait ExternalEncoder: Send + Sync {
    fn name(&self) -> &str;
    fn run(&self, command: &EncoderCommand, cancel: &CancelToken) -> Result<()>;
}

/// Runs the system `ffmpeg` with a bounded wait.
#[derive(Debug, Clone)]
pub struct FfmpegEncoder {
    binary: Option<PathBuf>,
    timeout: Option<Duration>,
}

impl FfmpegEncoder {
    /// Resolve `ffmpeg` on `PATH`. A missing binary is not an error here;
    /// every attempt then fails and the ladder ends in a plain copy.
    pub fn from_env(timeout: Option<Duration>) -> Self {
        let binary = find_tool("ffmpeg");
        if binary.is_none() {
            warn!("ffmpeg not found on PATH; animated inputs will be shared unmodified");
        }
        Self { binary, timeout }
    }

    pub fn with_binary(binary: PathBuf, timeout: Option<Duration>) -> Self {
        Self {
            binary: Some(binary),
            timeout,
        }
    }

    pub fn is_available(&self) -> bool {
        self.binary.is_some()
    }
}

impl ExternalEncoder for FfmpegEncoder {
    fn name(&self) -> &str {
        "ffmpeg"
    }

    fn run(&self, command: &EncoderCommand, cancel: &CancelToken) -> Result<()> {
        let binary = self
            .binary
            .as_ref()
            .ok_or_else(|| ShareError::ExternalEncoder("ffmpeg not found on PATH".to_string()))?;
        let args = command.to_args();

        let started = Instant::now();
        let mut cmd = Command::new(binary);
        cmd.args(&args);
        let process = FfmpegProcess::spawn(&mut cmd)
            .map_err(|e| ShareError::ExternalEncoder(format!("{:#}", e)))?;
        let outcome = process
            .wait_bounded(self.timeout, || cancel.is_cancelled())
            .map_err(|e| ShareError::ExternalEncoder(format!("{:#}", e)))?;

        match outcome {
            WaitOutcome::Exited { status, stderr } => {
                log_external_tool("ffmpeg", &args, &stderr, status.code(), started.elapsed());
                if status.success() {
                    Ok(())
                } else {
                    let mut message = format_ffmpeg_error(&stderr);
                    if let Some(hint) = get_error_suggestion(&stderr) {
                        message.push_str(" (");
                        message.push_str(hint);
                        message.push(')');
                    }
                    Err(ShareError::ExternalEncoder(message))
                }
            }
            WaitOutcome::TimedOut { .. } => Err(ShareError::ExternalEncoder(format!(
                "timed out after {:?}",
                self.timeout.unwrap_or_default()
            ))),
            WaitOutcome::Aborted { .. } => Err(ShareError::Cancelled),
        }
    }
}

/// Run the attempt ladder for an animated source staged at `staged`.
///
/// Returns the chosen output (registered in `temps`), its length and the
/// strategy that produced it.
pub fn encode_animated(
    encoder: &dyn ExternalEncoder,
    staged: &Path,
    source: &SourceImage,
    plan: &ResizePlan,
    params: &AnimatedParams,
    temps: &mut TempFileSet,
    cancel: &CancelToken,
) -> Result<(PathBuf, u64, Strategy)> {
    let output = temps.create("output", "gif")?;

    let primary = EncoderCommand::primary(staged, &output, plan, params);
    if let Some(len) = attempt(encoder, &primary, cancel)? {
        return Ok((output, len, Strategy::AnimatedPrimary));
    }

    let fallback = EncoderCommand::fallback(staged, &output, plan, params);
    if let Some(len) = attempt(encoder, &fallback, cancel)? {
        return Ok((output, len, Strategy::AnimatedFallback));
    }

    cancel.check()?;
    let copy = temps.create("original", source.extension())?;
    let len = copy_file_with_context(staged, &copy)
        .map_err(|e| ShareError::Encode(format!("{:#}", e)))?;
    info!(bytes = len, "Both encoder attempts failed; sharing original bytes");
    Ok((copy, len, Strategy::AnimatedCopyUnmodified))
}

/// `Ok(Some(len))` on a usable output, `Ok(None)` on a failed attempt.
fn attempt(
    encoder: &dyn ExternalEncoder,
    command: &EncoderCommand,
    cancel: &CancelToken,
) -> Result<Option<u64>> {
    cancel.check()?;
    // Leftovers from a failed earlier attempt must not count as output.
    File::create(&command.output)?;

    match encoder.run(command, cancel) {
        Ok(()) => {}
        Err(ShareError::Cancelled) => return Err(ShareError::Cancelled),
        Err(e) => {
            warn!(encoder = encoder.name(), attempt = ?command.kind, error = %e, "Encoder attempt failed");
            return Ok(None);
        }
    }

    let len = std::fs::metadata(&command.output).map(|m| m.len()).unwrap_or(0);
    if len == 0 {
        warn!(encoder = encoder.name(), attempt = ?command.kind, "Encoder reported success but output is empty");
        return Ok(None);
    }
    info!(encoder = encoder.name(), attempt = ?command.kind, bytes = len, "Encoder attempt succeeded");
    Ok(Some(len))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{ScriptedEncoder, Step};
    use crate::params::{map_animated, EncodeParams};
    use crate::resize_plan::plan;
    use image::ImageFormat;
    use tempfile::TempDir;

    fn animated_params(q: u8) -> AnimatedParams {
        match map_animated(q, None) {
            EncodeParams::Animated(p) => p,
            EncodeParams::Raster { .. } => unreachable!(),
        }
    }

    fn gif_source(len: u64) -> SourceImage {
        SourceImage {
            byte_length: len,
            declared_mime_type: "image/gif".into(),
            width: 400,
            height: 200,
            is_animated: true,
            file_name: "a.gif".into(),
            format: ImageFormat::Gif,
        }
    }

    #[test]
    fn test_primary_args() {
        let p = plan(400, 200, 100);
        let cmd = EncoderCommand::primary(
            Path::new("/tmp/in.gif"),
            Path::new("/tmp/out.gif"),
            &p,
            &animated_params(25),
        );
        assert_eq!(
            cmd.to_args(),
            vec![
                "-y",
                "-i",
                "/tmp/in.gif",
                "-vf",
                "scale=100:50:force_original_aspect_ratio=decrease,fps=10,split[s0][s1];\
                 [s0]palettegen=max_colors=64:stats_mode=single[p];\
                 [s1][p]paletteuse=dither=bayer:bayer_scale=5:diff_mode=rectangle",
                "-compression_level",
                "7",
                "/tmp/out.gif",
            ]
        );
    }

    #[test]
    fn test_fallback_args() {
        let p = plan(50, 50, 1024);
        let cmd = EncoderCommand::fallback(
            Path::new("-in.gif"),
            Path::new("out.gif"),
            &p,
            &animated_params(95),
        );
        assert_eq!(
            cmd.to_args(),
            vec![
                "-y",
                "-i",
                "./-in.gif",
                "-vf",
                "scale=50:50:force_original_aspect_ratio=decrease,fps=20",
                "out.gif",
            ]
        );
        assert_eq!(cmd.kind, AttemptKind::Fallback);
    }

    fn run_ladder(steps: Vec<Step>) -> (TempDir, Result<(PathBuf, u64, Strategy)>, usize, Vec<PathBuf>) {
        let dir = TempDir::new().unwrap();
        let staged = dir.path().join("staged.gif");
        std::fs::write(&staged, vec![7u8; 321]).unwrap();
        let encoder = ScriptedEncoder::new(steps);
        let cancel = CancelToken::new();
        let cache = dir.path().join("cache");
        let mut temps = TempFileSet::new(&cache).unwrap();
        let result = encode_animated(
            &encoder,
            &staged,
            &gif_source(321),
            &plan(400, 200, 100),
            &animated_params(50),
            &mut temps,
            &cancel,
        );
        if let Ok((path, _, _)) = &result {
            temps.keep(path);
        }
        drop(temps);
        let left: Vec<PathBuf> = std::fs::read_dir(&cache)
            .unwrap()
            .map(|e| e.unwrap().path())
            .collect();
        (dir, result, encoder.calls().len(), left)
    }

    #[test]
    fn test_primary_success() {
        let (_dir, result, calls, left) = run_ladder(vec![Step::Succeed]);
        let (path, len, strategy) = result.unwrap();
        assert_eq!(strategy, Strategy::AnimatedPrimary);
        assert!(len > 0);
        assert_eq!(calls, 1);
        assert_eq!(left, vec![path]);
    }

    #[test]
    fn test_fallback_after_primary_failure() {
        let (_dir, result, calls, left) = run_ladder(vec![Step::Fail, Step::Succeed]);
        let (path, _, strategy) = result.unwrap();
        assert_eq!(strategy, Strategy::AnimatedFallback);
        assert_eq!(calls, 2);
        assert_eq!(left, vec![path]);
    }

    #[test]
    fn test_empty_output_counts_as_failure() {
        let (_dir, result, _, _) = run_ladder(vec![Step::SucceedEmpty, Step::Succeed]);
        assert_eq!(result.unwrap().2, Strategy::AnimatedFallback);
    }

    #[test]
    fn test_copy_when_both_fail() {
        let (_dir, result, calls, left) = run_ladder(vec![Step::Fail, Step::Fail]);
        let (path, len, strategy) = result.unwrap();
        assert_eq!(strategy, Strategy::AnimatedCopyUnmodified);
        assert_eq!(len, 321);
        assert_eq!(std::fs::read(&path).unwrap(), vec![7u8; 321]);
        assert!(path.to_string_lossy().ends_with(".gif"));
        assert_eq!(calls, 2);
        assert_eq!(left, vec![path]);
    }

    #[test]
    fn test_cancel_during_primary() {
        let (_dir, result, calls, left) = run_ladder(vec![Step::Cancel]);
        assert!(matches!(result, Err(ShareError::Cancelled)));
        assert_eq!(calls, 1);
        assert!(left.is_empty());
    }

    #[test]
    fn test_missing_ffmpeg_fails_attempt() {
        let encoder = FfmpegEncoder {
            binary: None,
            timeout: None,
        };
        assert!(!encoder.is_available());
        let cmd = EncoderCommand::fallback(
            Path::new("a.gif"),
            Path::new("b.gif"),
            &plan(1, 1, 1),
            &animated_params(50),
        );
        let err = encoder.run(&cmd, &CancelToken::new()).unwrap_err();
        assert!(matches!(err, ShareError::ExternalEncoder(_)));
    }

    #[cfg(unix)]
    #[test]
    fn test_ffmpeg_encoder_nonzero_exit() {
        let encoder = FfmpegEncoder::with_binary(PathBuf::from("false"), Some(Duration::from_secs(5)));
        let cmd = EncoderCommand::fallback(
            Path::new("a.gif"),
            Path::new("b.gif"),
            &plan(1, 1, 1),
            &animated_params(50),
        );
        let err = encoder.run(&cmd, &CancelToken::new()).unwrap_err();
        assert!(matches!(err, ShareError::ExternalEncoder(_)));
    }

    #[cfg(unix)]
    #[test]
    fn test_hung_encoder_times_out_into_copy() {
        use std::os::unix::fs::PermissionsExt;

        let dir = TempDir::new().unwrap();
        let script = dir.path().join("hung-ffmpeg");
        std::fs::write(&script, "#!/bin/sh\nexec sleep 30\n").unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

        let staged = dir.path().join("staged.gif");
        std::fs::write(&staged, vec![9u8; 128]).unwrap();
        let encoder = FfmpegEncoder::with_binary(script, Some(Duration::from_millis(100)));
        let mut temps = TempFileSet::new(&dir.path().join("cache")).unwrap();

        let started = Instant::now();
        let (path, len, strategy) = encode_animated(
            &encoder,
            &staged,
            &gif_source(128),
            &plan(400, 200, 100),
            &animated_params(50),
            &mut temps,
            &CancelToken::new(),
        )
        .unwrap();

        assert_eq!(strategy, Strategy::AnimatedCopyUnmodified);
        assert_eq!(len, 128);
        assert_eq!(std::fs::read(&path).unwrap(), vec![9u8; 128]);
        assert!(started.elapsed() < Duration::from_secs(10));
    }
}
