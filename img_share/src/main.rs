use anyhow::{bail, Context};
use chrono::{Local, Utc};
use clap::{Parser, Subcommand};
use console::style;
use img_share::{
    estimate_for, inspect_path, plan, spawn_share, EncodeParams, HistoryEntry, HistoryLedger,
    NewHistoryEntry, ShareError, ShareOptions, SharePipeline, ShareSettings, SourceHints,
    SqliteLedger,
};
use indicatif::{ProgressBar, ProgressStyle};
use serde_json::json;
use shared_utils::logging::{init_logging, LogConfig};
use shared_utils::FileSize;
use std::collections::BTreeSet;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{warn, Level};

const SPINNER_CHARS: &str = "⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏";

#[derive(Parser)]
#[command(name = "img-share")]
#[command(version, about = "Shrink images and GIFs for sharing, with a conversion history", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// History database path.
    #[arg(long, global = true, value_name = "PATH")]
    db: Option<PathBuf>,

    /// Directory for rolling log files.
    #[arg(long, global = true, value_name = "DIR")]
    log_dir: Option<PathBuf>,

    /// Mirror logs to stderr at debug level.
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Convert one image into a shareable file.
    Share {
        #[arg(value_name = "INPUT")]
        input: PathBuf,

        #[arg(short, long, default_value_t = img_share::config::DEFAULT_QUALITY,
              value_parser = clap::value_parser!(u8).range(0..=100))]
        quality: u8,

        #[arg(short, long, default_value_t = img_share::config::DEFAULT_MAX_EDGE,
              value_parser = clap::value_parser!(u32).range(1..))]
        max_edge: u32,

        /// GIF compression level 0-9; derived from quality when omitted.
        #[arg(long, value_parser = clap::value_parser!(u8).range(0..=9))]
        compression_level: Option<u8>,

        /// Move the result here as `<name>_share.<ext>`.
        #[arg(short, long)]
        output_dir: Option<PathBuf>,

        #[arg(long)]
        cache_dir: Option<PathBuf>,

        /// Per-attempt encoder timeout; 0 waits forever.
        #[arg(long, default_value_t = 120)]
        timeout_secs: u64,

        #[arg(long)]
        no_history: bool,

        #[arg(long)]
        json: bool,
    },

    /// Predict the output size without encoding.
    Estimate {
        #[arg(value_name = "INPUT")]
        input: PathBuf,

        #[arg(short, long, default_value_t = img_share::config::DEFAULT_QUALITY,
              value_parser = clap::value_parser!(u8).range(0..=100))]
        quality: u8,

        #[arg(short, long, default_value_t = img_share::config::DEFAULT_MAX_EDGE,
              value_parser = clap::value_parser!(u32).range(1..))]
        max_edge: u32,

        #[arg(long, value_parser = clap::value_parser!(u8).range(0..=9))]
        compression_level: Option<u8>,

        #[arg(long)]
        json: bool,
    },

    /// Inspect or prune the conversion history.
    History {
        #[command(subcommand)]
        action: HistoryAction,
    },
}

#[derive(Subcommand)]
enum HistoryAction {
    List {
        #[arg(long)]
        json: bool,
    },
    Delete {
        #[arg(required = true, value_name = "ID")]
        ids: Vec<i64>,
    },
    Clear,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut log_config = LogConfig::default()
        .with_stderr(cli.verbose)
        .with_level(if cli.verbose { Level::DEBUG } else { Level::INFO });
    if let Some(dir) = &cli.log_dir {
        log_config = log_config.with_log_dir(dir);
    }
    let _ = init_logging("img_share", log_config);

    let db_path = cli.db.clone().unwrap_or_else(default_db_path);

    match cli.command {
        Commands::Share {
            input,
            quality,
            max_edge,
            compression_level,
            output_dir,
            cache_dir,
            timeout_secs,
            no_history,
            json,
        } => {
            let settings = ShareSettings::new(quality, max_edge).with_compression_level(compression_level);
            let mut options = ShareOptions::default()
                .with_encoder_timeout((timeout_secs > 0).then(|| Duration::from_secs(timeout_secs)));
            if let Some(dir) = cache_dir {
                options = options.with_cache_dir(dir);
            }
            let ledger = if no_history {
                None
            } else {
                Some(SqliteLedger::open(&db_path)?)
            };
            share(&input, settings, options, output_dir.as_deref(), ledger.as_ref(), json)?;
        }

        Commands::Estimate {
            input,
            quality,
            max_edge,
            compression_level,
            json,
        } => {
            let settings = ShareSettings::new(quality, max_edge).with_compression_level(compression_level);
            estimate_file(&input, &settings, json)?;
        }

        Commands::History { action } => {
            let ledger = SqliteLedger::open(&db_path)?;
            match action {
                HistoryAction::List { json } => list_history(&ledger, json)?,
                HistoryAction::Delete { ids } => {
                    let ids: BTreeSet<i64> = ids.into_iter().collect();
                    let removed = ledger.delete_by_ids(&ids)?;
                    println!("{} Removed {} of {} entries", style("🗑").red(), removed, ids.len());
                }
                HistoryAction::Clear => {
                    let removed = ledger.delete_all()?;
                    println!("{} Cleared {} entries", style("🗑").red(), removed);
                }
            }
        }
    }

    Ok(())
}

fn default_db_path() -> PathBuf {
    std::env::var_os("HOME")
        .map(|home| PathBuf::from(home).join(".local").join("share").join("img-share"))
        .unwrap_or_else(|| std::env::temp_dir().join("img-share"))
        .join("history.db")
}

fn share(
    input: &Path,
    settings: ShareSettings,
    options: ShareOptions,
    output_dir: Option<&Path>,
    ledger: Option<&SqliteLedger>,
    json: bool,
) -> anyhow::Result<()> {
    if !input.is_file() {
        eprintln!("❌ Error: Input path does not exist: {}", input.display());
        std::process::exit(1);
    }

    let file = File::open(input).with_context(|| format!("Failed to open {}", input.display()))?;
    let pipeline = Arc::new(SharePipeline::new(options));
    let job = spawn_share(pipeline, file, SourceHints::for_path(input), None, settings)?;

    let cancel = job.cancel_token();
    if let Err(e) = ctrlc::set_handler(move || cancel.cancel()) {
        warn!(error = %e, "Could not install Ctrl-C handler");
    }

    let spinner = create_spinner(json);
    spinner.set_message(format!("Sharing {}", input.display()));
    while !job.is_finished() {
        std::thread::sleep(Duration::from_millis(50));
    }
    spinner.finish_and_clear();

    let mut outcome = match job.join() {
        Ok(outcome) => outcome,
        Err(ShareError::Cancelled) => {
            eprintln!("{} Cancelled", style("⏹").yellow());
            std::process::exit(130);
        }
        Err(e) => {
            eprintln!("❌ Could not produce a shareable file: {}", e);
            std::process::exit(1);
        }
    };

    if let Some(dir) = output_dir {
        let destination = relocate(&outcome.result.output_path, dir, &outcome.source.file_name)?;
        outcome.result.output_path = destination;
    }

    let history_id = match ledger {
        Some(ledger) => {
            let entry = NewHistoryEntry::from_conversion(
                &input.display().to_string(),
                &outcome.source,
                &outcome.result,
                Utc::now(),
            );
            Some(ledger.insert(&entry)?)
        }
        None => None,
    };

    let original = FileSize::new(outcome.source.byte_length);
    let produced = FileSize::new(outcome.result.output_byte_length);

    if json {
        let value = json!({
            "input": input.display().to_string(),
            "file_name": outcome.source.file_name,
            "mime_type": outcome.source.declared_mime_type,
            "animated": outcome.source.is_animated,
            "plan": outcome.plan,
            "params": outcome.params,
            "result": outcome.result,
            "original_size": original.bytes(),
            "compression_ratio": produced.compression_ratio(original),
            "history_id": history_id,
        });
        println!("{}", serde_json::to_string_pretty(&value)?);
    } else {
        println!("{} {}", style("✅ Shared").green().bold(), outcome.source.file_name);
        println!(
            "   {}x{} → {}x{}",
            outcome.source.width,
            outcome.source.height,
            outcome.plan.target_width,
            outcome.plan.target_height
        );
        println!("   Strategy: {}", outcome.result.strategy_used.as_str());
        println!(
            "   Size: {} → {} ({})",
            original,
            produced,
            produced.describe_change(original)
        );
        println!("   Output: {}", style(outcome.result.output_path.display()).cyan());
        if let Some(id) = history_id {
            println!("   History: #{}", id);
        }
    }
    Ok(())
}

fn create_spinner(hidden: bool) -> ProgressBar {
    if hidden {
        return ProgressBar::hidden();
    }
    let pb = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.cyan} {msg} {elapsed:.dim}") {
        pb.set_style(style.tick_chars(SPINNER_CHARS));
    }
    pb.enable_steady_tick(Duration::from_millis(100));
    pb
}

/// Move `output` into `dir` as `<stem>_share.<ext>`; falls back to copy
/// and delete across filesystems. Existing files are never replaced.
fn relocate(output: &Path, dir: &Path, source_name: &str) -> anyhow::Result<PathBuf> {
    shared_utils::ensure_dir_exists(dir)?;
    let stem = Path::new(source_name)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "image".to_string());
    let ext = shared_utils::get_extension_lowercase(output);
    let destination = free_destination(dir, &stem, &ext);

    if std::fs::rename(output, &destination).is_err() {
        shared_utils::copy_file_with_context(output, &destination)?;
        if let Err(e) = std::fs::remove_file(output) {
            warn!(path = ?output, error = %e, "Failed to remove cached output after copy");
        }
    }
    Ok(destination)
}

/// First of `<stem>_share.<ext>`, `<stem>_share_2.<ext>`, ... not yet in `dir`.
fn free_destination(dir: &Path, stem: &str, ext: &str) -> PathBuf {
    let first = dir.join(format!("{}_share.{}", stem, ext));
    if !first.exists() {
        return first;
    }
    (2u32..)
        .map(|n| dir.join(format!("{}_share_{}.{}", stem, n, ext)))
        .find(|candidate| !candidate.exists())
        .unwrap_or(first)
}

fn estimate_file(input: &Path, settings: &ShareSettings, json: bool) -> anyhow::Result<()> {
    if !input.is_file() {
        bail!("Input path does not exist: {}", input.display());
    }
    let source = inspect_path(input)?;
    let plan = plan(source.width, source.height, settings.max_edge);
    let params = EncodeParams::for_source(source.is_animated, settings);
    let estimated = FileSize::new(estimate_for(&source, settings));
    let original = FileSize::new(source.byte_length);

    if json {
        let value = json!({
            "file_name": source.file_name,
            "width": source.width,
            "height": source.height,
            "animated": source.is_animated,
            "original_size": original.bytes(),
            "estimated_size": estimated.bytes(),
            "plan": plan,
            "params": params,
        });
        println!("{}", serde_json::to_string_pretty(&value)?);
        return Ok(());
    }

    println!("{} {}", style("📐").cyan(), source.file_name);
    println!(
        "   {}x{} → {}x{}{}",
        source.width,
        source.height,
        plan.target_width,
        plan.target_height,
        if plan.was_scaled { "" } else { " (unchanged)" }
    );
    match params {
        EncodeParams::Raster { jpeg_quality } => println!("   JPEG quality {}", jpeg_quality),
        EncodeParams::Animated(p) => println!(
            "   GIF {} fps, {} colors, compression {}",
            p.frames_per_second, p.palette_colors, p.compression_level
        ),
    }
    println!("   Original: {}", original);
    println!("   Estimated: {}", style(estimated).bold());
    Ok(())
}

fn list_history(ledger: &SqliteLedger, json: bool) -> anyhow::Result<()> {
    let entries: Vec<HistoryEntry> = ledger.list_all()?;
    if json {
        println!("{}", serde_json::to_string_pretty(&entries)?);
        return Ok(());
    }
    if entries.is_empty() {
        println!("No history yet");
        return Ok(());
    }
    for entry in entries {
        let compressed = entry
            .compressed_byte_length
            .map(|b| FileSize::new(b).to_string())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{:>5}  {}  {}  {}x{}  {} → {}",
            style(format!("#{}", entry.id)).dim(),
            entry.timestamp.with_timezone(&Local).format("%Y-%m-%d %H:%M"),
            entry.file_name,
            entry.width,
            entry.height,
            FileSize::new(entry.original_byte_length),
            compressed
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_relocate_keeps_existing_share() {
        let out_dir = TempDir::new().unwrap();
        let cache = TempDir::new().unwrap();

        let first = cache.path().join("share_output_a.jpg");
        std::fs::write(&first, b"first").unwrap();
        let placed = relocate(&first, out_dir.path(), "beach.png").unwrap();
        assert_eq!(placed, out_dir.path().join("beach_share.jpg"));

        let second = cache.path().join("share_output_b.jpg");
        std::fs::write(&second, b"second").unwrap();
        let placed_again = relocate(&second, out_dir.path(), "beach.png").unwrap();
        assert_eq!(placed_again, out_dir.path().join("beach_share_2.jpg"));

        assert_eq!(std::fs::read(&placed).unwrap(), b"first");
        assert_eq!(std::fs::read(&placed_again).unwrap(), b"second");
        assert!(!first.exists());
        assert!(!second.exists());
    }

    #[test]
    fn test_free_destination_skips_taken_names() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("cat_share.gif"), b"x").unwrap();
        std::fs::write(dir.path().join("cat_share_2.gif"), b"x").unwrap();
        assert_eq!(
            free_destination(dir.path(), "cat", "gif"),
            dir.path().join("cat_share_3.gif")
        );
    }
}
