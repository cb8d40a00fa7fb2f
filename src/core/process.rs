//! Process execution utilities with timeout support
//!
//! Provides helpers for running external processes (ffmpeg, ffprobe)
//! with configurable timeouts so a hung tool never blocks the pipeline.

use std::process::Output;
use std::time::Duration;
use tokio::process::Command;

use crate::core::error::AppError;

/// Run an async Command with a timeout.
///
/// The child is killed when the timeout elapses (`kill_on_drop`).
/// Returns the process Output on success, or an AppError on timeout/IO failure.
pub async fn run_with_timeout(cmd: &mut Command, timeout: Duration) -> Result<Output, AppError> {
    cmd.kill_on_drop(true);
    match tokio::time::timeout(timeout, cmd.output()).await {
        Ok(Ok(output)) => Ok(output),
        Ok(Err(e)) => Err(AppError::Io(e)),
        Err(_) => Err(AppError::Process(format!(
            "Process timed out after {}s",
            timeout.as_secs()
        ))),
    }
}

/// Like [`run_with_timeout`], but also treats a non-zero exit status as an error.
pub async fn run_checked(cmd: &mut Command, timeout: Duration) -> Result<Output, AppError> {
    let output = run_with_timeout(cmd, timeout).await?;
    if output.status.success() {
        Ok(output)
    } else {
        let stderr = String::from_utf8_lossy(&output.stderr);
        Err(AppError::Process(format!(
            "exited with {}: {}",
            output.status,
            stderr.trim()
        )))
    }
}
