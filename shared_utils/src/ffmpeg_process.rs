//! FFmpeg process management
//!
//! FFmpeg writes its whole log to stderr. If stderr is piped but never
//! drained, a chatty run fills the pipe buffer (~64KB) and the encoder
//! blocks forever. [`FfmpegProcess`] drains stderr on a dedicated thread so
//! the caller can wait on the child without deadlocking, and adds a bounded
//! wait that kills the child on timeout or when the caller asks to abort.
//!
//! ```ignore
//! use shared_utils::ffmpeg_process::{FfmpegProcess, WaitOutcome};
//! use std::process::Command;
//! use std::time::Duration;
//!
//! let mut cmd = Command::new("ffmpeg");
//! cmd.args(["-y", "-i", "in.gif", "out.gif"]);
//!
//! let process = FfmpegProcess::spawn(&mut cmd)?;
//! match process.wait_bounded(Some(Duration::from_secs(120)), || false)? {
//!     WaitOutcome::Exited { status, .. } if status.success() => {}
//!     other => eprintln!("{:?}", other),
//! }
//! ```

use anyhow::{Context, Result};
use std::io::{BufRead, BufReader};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Interval between `try_wait` polls while waiting with a deadline.
const POLL_INTERVAL: Duration = Duration::from_millis(25);

/// How a bounded wait ended.
#[derive(Debug)]
pub enum WaitOutcome {
    /// The process exited on its own.
    Exited { status: ExitStatus, stderr: String },
    /// The deadline passed; the process was killed.
    TimedOut { stderr: String },
    /// The abort predicate fired; the process was killed.
    Aborted { stderr: String },
}

/// Child process wrapper that always drains stderr on a background thread.
///
/// A process dropped before it was reaped is killed and reaped in `Drop`.
pub struct FfmpegProcess {
    child: Child,
    stderr_thread: Option<JoinHandle<String>>,
    started: Instant,
    reaped: bool,
}

impl FfmpegProcess {
    /// Spawn the configured command with stderr captured and stdin/stdout
    /// detached.
    pub fn spawn(cmd: &mut Command) -> Result<Self> {
        let command_str = format!("{:?}", cmd);
        info!(command = %command_str, "Executing FFmpeg command");

        cmd.stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped());

        let mut child = cmd.spawn().context("Failed to spawn FFmpeg process")?;

        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| anyhow::anyhow!("Failed to capture FFmpeg stderr"))?;

        let stderr_thread = thread::spawn(move || {
            let mut buf = String::new();
            for line in BufReader::new(stderr).lines().map_while(|l| l.ok()) {
                buf.push_str(&line);
                buf.push('\n');
            }
            buf
        });

        Ok(Self {
            child,
            stderr_thread: Some(stderr_thread),
            started: Instant::now(),
            reaped: false,
        })
    }

    /// Time since the process was spawned.
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Wait until the process exits, `timeout` elapses, or `should_abort`
    /// returns true. In the last two cases the child is killed and reaped
    /// before returning.
    pub fn wait_bounded<F>(mut self, timeout: Option<Duration>, should_abort: F) -> Result<WaitOutcome>
    where
        F: Fn() -> bool,
    {
        let deadline = timeout.map(|t| self.started + t);
        loop {
            if let Some(status) = self.try_wait()? {
                let stderr = self.collect_stderr();
                log_exit(&status, &stderr);
                return Ok(WaitOutcome::Exited { status, stderr });
            }

            if should_abort() {
                warn!(elapsed_ms = self.elapsed().as_millis() as u64, "Aborting FFmpeg process");
                self.terminate()?;
                return Ok(WaitOutcome::Aborted {
                    stderr: self.collect_stderr(),
                });
            }

            if deadline.is_some_and(|d| Instant::now() >= d) {
                error!(
                    timeout_ms = timeout.map(|t| t.as_millis() as u64),
                    "FFmpeg process timed out, killing it"
                );
                self.terminate()?;
                return Ok(WaitOutcome::TimedOut {
                    stderr: self.collect_stderr(),
                });
            }

            thread::sleep(POLL_INTERVAL);
        }
    }

    /// Check whether the process has exited.
    pub fn try_wait(&mut self) -> Result<Option<ExitStatus>> {
        let status = self
            .child
            .try_wait()
            .context("Failed to check FFmpeg status")?;
        self.reaped |= status.is_some();
        Ok(status)
    }

    /// Kill and reap the process.
    fn terminate(&mut self) -> Result<()> {
        // The child may have exited between the last poll and the kill.
        if let Err(e) = self.child.kill() {
            debug!(error = %e, "Kill after exit");
        }
        self.child
            .wait()
            .context("Failed to reap killed FFmpeg process")?;
        self.reaped = true;
        Ok(())
    }

    fn collect_stderr(&mut self) -> String {
        self.stderr_thread
            .take()
            .map(|t| t.join().unwrap_or_default())
            .unwrap_or_default()
    }
}

impl Drop for FfmpegProcess {
    fn drop(&mut self) {
        if self.reaped {
            return;
        }
        warn!(pid = self.child.id(), "FFmpeg process dropped while running, killing it");
        if let Err(e) = self.terminate() {
            error!(error = %e, "Failed to kill orphaned FFmpeg process");
        }
    }
}

fn log_exit(status: &ExitStatus, stderr: &str) {
    if status.success() {
        info!(exit_code = status.code(), "FFmpeg process completed successfully");
        debug!(stderr_output = %stderr, "FFmpeg stderr output");
    } else {
        error!(
            exit_code = status.code(),
            error = %format_ffmpeg_error(stderr),
            "FFmpeg process failed"
        );
    }
}

/// Pull the most useful line out of FFmpeg's stderr.
///
/// Prefers the last line mentioning an error, then the last line that is
/// not progress output.
pub fn format_ffmpeg_error(stderr: &str) -> String {
    if let Some(error_line) = stderr
        .lines()
        .rev()
        .find(|line| line.contains("Error") || line.contains("error"))
    {
        return error_line.trim().to_string();
    }

    stderr
        .lines()
        .rev()
        .map(str::trim)
        .find(|line| {
            !line.is_empty()
                && !line.starts_with("frame=")
                && !line.starts_with("fps=")
                && !line.starts_with("size=")
        })
        .map(str::to_string)
        .unwrap_or_else(|| "Unknown FFmpeg error".to_string())
}

/// Map common failure patterns of the palette pipeline to a hint.
pub fn get_error_suggestion(stderr: &str) -> Option<&'static str> {
    const PATTERNS: &[(&str, &str)] = &[
        ("No such file or directory", "input vanished before encoding; check the staging copy"),
        ("Invalid data found", "input is corrupt or not a format FFmpeg can demux"),
        ("No such filter", "FFmpeg build lacks palettegen/paletteuse; the reduced command avoids them"),
        ("Unrecognized option", "encoder does not accept -compression_level; the reduced command drops it"),
        ("Permission denied", "cache directory is not writable"),
        ("Output file is empty", "encoder produced no frames; try a lower frame rate"),
    ];

    PATTERNS
        .iter()
        .find(|(pattern, _)| stderr.contains(pattern))
        .map(|(_, hint)| *hint)
}


#[cfg(test)]
mod prop_tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn prop_format_error_non_empty(content in "[a-zA-Z0-9 ]{1,100}") {
            prop_assert!(!format_ffmpeg_error(&content).is_empty());
        }

        #[test]
        fn prop_format_error_prefers_error_line(
            prefix in "[a-zA-Z ]{0,50}",
            suffix in "[a-zA-Z ]{0,50}"
        ) {
            let stderr = format!("{}\nError: palette too large\n{}", prefix, suffix);
            let error = format_ffmpeg_error(&stderr);
            prop_assert!(error.contains("rror"), "got: {}", error);
        }
    }
}
