//! Logging initialization and startup diagnostics
//!
//! This module provides:
//! - Logger initialization (console + file)
//! - External tool availability check (yt-dlp, ffmpeg, ffprobe)

use anyhow::Result;
use simplelog::*;
use std::fs::File;
use std::process::{Command, Stdio};

use crate::core::config;

/// Initialize logger for both console and file output
///
/// # Arguments
/// * `log_file_path` - Path to the log file
///
/// # Returns
/// * `Ok(())` - Logger initialized successfully
/// * `Err(anyhow::Error)` - Failed to initialize logger
pub fn init_logger(log_file_path: &str) -> Result<()> {
    init_logger_with_level(log_file_path, LevelFilter::Info)
}

/// Same as [`init_logger`] with an explicit level (used by `--verbose`).
pub fn init_logger_with_level(log_file_path: &str, level: LevelFilter) -> Result<()> {
    let log_file = File::create(log_file_path).map_err(|e| anyhow::anyhow!("Failed to create log file: {}", e))?;

    CombinedLogger::init(vec![
        TermLogger::new(level, Config::default(), TerminalMode::Mixed, ColorChoice::Auto),
        WriteLogger::new(level, Config::default(), log_file),
    ])
    .map_err(|e| anyhow::anyhow!("Failed to initialize logger: {}", e))?;

    Ok(())
}

fn tool_responds(bin: &str, version_flag: &str) -> bool {
    Command::new(bin)
        .arg(version_flag)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}

/// Logs which external tools are reachable at startup.
///
/// Missing ffmpeg/ffprobe only degrades thumbnails and metadata; missing
/// yt-dlp disables extraction mode.
pub fn log_tools_configuration() {
    log::info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    log::info!("🔧 External tools check");
    log::info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    let tools = [
        (config::YTDL_BIN.as_str(), "--version", "extraction mode will fail"),
        (config::FFPROBE_BIN.as_str(), "-version", "metadata falls back to 1280x720"),
        (config::FFMPEG_BIN.as_str(), "-version", "thumbnails will be skipped"),
    ];

    for (bin, flag, consequence) in tools {
        if tool_responds(bin, flag) {
            log::info!("✅ {}: available", bin);
        } else {
            log::warn!("⚠️  {}: not found, {}", bin, consequence);
        }
    }

    log::info!("📁 Working directory: {}", config::DOWNLOAD_DIR.display());
}
