//! Extraction mode: drive yt-dlp for manifests, playlists and video sites.
//!
//! The routine is synchronous and may run for tens of minutes, so it executes
//! on a blocking worker. Its progress callback is the only cancellation
//! checkpoint: when the session token fires, the callback answers
//! `ControlFlow::Break` and the routine kills the child process.

use std::collections::VecDeque;
use std::io::{BufRead, BufReader};
use std::ops::ControlFlow;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::{Arc, Mutex};
use std::thread;

use tokio_util::sync::CancellationToken;

use crate::core::config::{self, TransferSettings};
use crate::core::utils::session_temp_stem;
use crate::download::error::TransferError;
use crate::download::request::TransferRequest;
use crate::download::resolver::cleanup_partial_download;
use crate::download::session::TransferGuard;

/// Number of stderr lines kept for error classification
const STDERR_TAIL_LINES: usize = 200;

/// Progress information parsed from a yt-dlp output line.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProgressInfo {
    pub percent: u8,
    /// Bytes per second
    pub speed_bytes: Option<f64>,
    pub eta_seconds: Option<u64>,
    pub current_size: Option<u64>,
    pub total_size: Option<u64>,
}

/// Parses progress from yt-dlp output line
/// Example: "[download]  45.2% of 10.00MiB at 500.00KiB/s ETA 00:10"
pub fn parse_progress(line: &str) -> Option<ProgressInfo> {
    if !line.contains("[download]") || !line.contains('%') {
        return None;
    }

    let mut percent = None;
    let mut speed_bytes = None;
    let mut eta_seconds = None;
    let mut total_size = None;

    let parts: Vec<&str> = line.split_whitespace().collect();
    for (i, part) in parts.iter().enumerate() {
        if part.ends_with('%') {
            if let Ok(p) = part.trim_end_matches('%').parse::<f32>() {
                // Clamp so garbage never jumps straight to 100%
                percent = Some(p.clamp(0.0, 100.0) as u8);
            }
        }

        // "of 10.00MiB" or "of ~10.00MiB"
        if *part == "of" && i + 1 < parts.len() {
            total_size = parse_size(parts[i + 1]).or(total_size);
        }

        // "at 500.00KiB/s"
        if *part == "at" && i + 1 < parts.len() {
            speed_bytes = parse_size(parts[i + 1]).map(|b| b as f64);
        }

        // "ETA 00:10" or "ETA 1:02:03"
        if *part == "ETA" && i + 1 < parts.len() {
            eta_seconds = parse_eta(parts[i + 1]);
        }
    }

    let percent = percent?;
    let current_size = total_size.map(|total| (total as f64 * (percent as f64 / 100.0)) as u64);

    Some(ProgressInfo {
        percent,
        speed_bytes,
        eta_seconds,
        current_size,
        total_size,
    })
}

/// Parses a size such as "10.00MiB", "500.00KiB/s" or "~1.2GiB"
fn parse_size(size_str: &str) -> Option<u64> {
    let size_str = size_str.trim_start_matches('~').trim_end_matches("/s");
    let units: [(&str, f64); 4] = [
        ("GiB", 1024.0 * 1024.0 * 1024.0),
        ("MiB", 1024.0 * 1024.0),
        ("KiB", 1024.0),
        ("B", 1.0),
    ];
    units.iter().find_map(|(suffix, factor)| {
        size_str
            .strip_suffix(suffix)
            .and_then(|n| n.parse::<f64>().ok())
            .map(|n| (n * factor) as u64)
    })
}

/// Parses ETA from "00:10" or "1:02:03"
fn parse_eta(eta_str: &str) -> Option<u64> {
    let mut total = 0u64;
    let parts: Vec<&str> = eta_str.split(':').collect();
    if parts.len() < 2 || parts.len() > 3 {
        return None;
    }
    for part in parts {
        total = total * 60 + part.parse::<u64>().ok()?;
    }
    Some(total)
}

/// Maps the tail of yt-dlp's stderr to the transfer taxonomy.
pub fn classify_extraction_failure(stderr: &str) -> TransferError {
    let lower = stderr.to_lowercase();
    let last_line = stderr
        .lines()
        .rev()
        .find(|l| !l.trim().is_empty())
        .unwrap_or("extraction failed")
        .trim()
        .to_string();

    if lower.contains("timed out") || lower.contains("timeout") {
        return TransferError::Timeout(last_line);
    }

    if let Some(code) = http_status_in(&lower) {
        return TransferError::unavailable(last_line, Some(code));
    }

    if lower.contains("video unavailable")
        || lower.contains("private video")
        || lower.contains("this video is not available")
        || lower.contains("video has been removed")
        || lower.contains("unsupported url")
    {
        return TransferError::unavailable(last_line, Some(404));
    }

    if lower.contains("unable to download webpage")
        || lower.contains("failed to resolve")
        || lower.contains("name or service not known")
        || lower.contains("connection refused")
        || lower.contains("network is unreachable")
    {
        return TransferError::unavailable(last_line, None);
    }

    TransferError::Internal(last_line)
}

/// Finds "http error NNN" in lowercased text
fn http_status_in(lower: &str) -> Option<u16> {
    let idx = lower.find("http error ")?;
    let digits: String = lower[idx + "http error ".len()..]
        .chars()
        .take_while(|c| c.is_ascii_digit())
        .collect();
    digits.parse().ok()
}

/// Everything the extraction routine needs for one run.
#[derive(Debug, Clone)]
pub struct ExtractionJob {
    pub url: String,
    /// Format selector, e.g. `best[height<=720]/best`
    pub format: String,
    /// Output template with a `%(ext)s` placeholder
    pub output_template: String,
    pub concurrent_fragments: u32,
    pub retries: u32,
    pub fragment_retries: u32,
    pub socket_timeout_secs: u64,
    pub buffer_size: u64,
    pub http_chunk_size: u64,
}

impl ExtractionJob {
    pub fn from_request(request: &TransferRequest, base: &Path, settings: &TransferSettings) -> Self {
        Self {
            url: request.url.to_string(),
            format: request.quality.format_selector(),
            output_template: format!("{}.%(ext)s", base.display()),
            concurrent_fragments: settings.concurrent_fragments,
            retries: settings.retries,
            fragment_retries: settings.fragment_retries,
            socket_timeout_secs: settings.socket_timeout_secs,
            buffer_size: settings.buffer_size,
            http_chunk_size: settings.http_chunk_size,
        }
    }

    /// yt-dlp command line (without the binary).
    pub fn to_args(&self) -> Vec<String> {
        let retries = self.retries.to_string();
        vec![
            "-o".into(),
            self.output_template.clone(),
            "--newline".into(),
            "--no-playlist".into(),
            "--format".into(),
            self.format.clone(),
            "--merge-output-format".into(),
            config::extraction::MERGE_OUTPUT_FORMAT.into(),
            "--concurrent-fragments".into(),
            self.concurrent_fragments.to_string(),
            "--retries".into(),
            retries.clone(),
            "--fragment-retries".into(),
            self.fragment_retries.to_string(),
            "--extractor-retries".into(),
            retries.clone(),
            "--file-access-retries".into(),
            retries,
            "--skip-unavailable-fragments".into(),
            "--buffer-size".into(),
            self.buffer_size.to_string(),
            "--http-chunk-size".into(),
            self.http_chunk_size.to_string(),
            "--socket-timeout".into(),
            self.socket_timeout_secs.to_string(),
            self.url.clone(),
        ]
    }
}

/// Progress callback handed to the routine. `Break` asks it to abort.
pub type ProgressCallback<'a> = &'a mut (dyn FnMut(&ProgressInfo) -> ControlFlow<()> + Send);

/// A blocking media-fetching engine.
///
/// Implementations must invoke the callback on every progress report and
/// return `TransferError::Cancelled` promptly after it answers `Break`.
pub trait ExtractionRoutine: Send + Sync {
    fn run(&self, job: &ExtractionJob, on_progress: ProgressCallback<'_>) -> Result<(), TransferError>;
}

/// yt-dlp subprocess.
#[derive(Debug, Clone)]
pub struct YtDlpExtractor {
    bin: String,
}

impl YtDlpExtractor {
    pub fn new(bin: impl Into<String>) -> Self {
        Self { bin: bin.into() }
    }
}

impl Default for YtDlpExtractor {
    fn default() -> Self {
        Self::new(config::YTDL_BIN.as_str())
    }
}

impl ExtractionRoutine for YtDlpExtractor {
    fn run(&self, job: &ExtractionJob, on_progress: ProgressCallback<'_>) -> Result<(), TransferError> {
        let args = job.to_args();
        log::debug!("yt-dlp command: {} {}", self.bin, args.join(" "));

        let mut child = Command::new(&self.bin)
            .args(&args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| TransferError::Internal(format!("Failed to spawn {}: {}", self.bin, e)))?;

        // VecDeque keeps pop_front O(1)
        let stderr_lines = Arc::new(Mutex::new(VecDeque::<String>::new()));
        let stderr_handle = child.stderr.take().map(|stream| {
            let lines = Arc::clone(&stderr_lines);
            thread::spawn(move || {
                for line in BufReader::new(stream).lines().map_while(Result::ok) {
                    log::debug!("yt-dlp stderr: {}", line);
                    if let Ok(mut tail) = lines.lock() {
                        tail.push_back(line);
                        if tail.len() > STDERR_TAIL_LINES {
                            tail.pop_front();
                        }
                    }
                }
            })
        });

        let mut aborted = false;
        if let Some(stdout) = child.stdout.take() {
            for line in BufReader::new(stdout).lines().map_while(Result::ok) {
                log::trace!("yt-dlp stdout: {}", line);
                if let Some(info) = parse_progress(&line) {
                    if on_progress(&info).is_break() {
                        aborted = true;
                        break;
                    }
                }
            }
        }

        if aborted {
            if let Err(e) = child.kill() {
                log::warn!("Failed to kill yt-dlp: {}", e);
            }
            let _ = child.wait();
            return Err(TransferError::Cancelled);
        }

        let status = child
            .wait()
            .map_err(|e| TransferError::Internal(format!("yt-dlp wait failed: {}", e)))?;

        if let Some(handle) = stderr_handle {
            let _ = handle.join();
        }

        if status.success() {
            return Ok(());
        }

        let stderr_text = stderr_lines
            .lock()
            .map(|mut tail| tail.make_contiguous().join("\n"))
            .unwrap_or_default();
        let err = classify_extraction_failure(&stderr_text);
        log::warn!("yt-dlp exited with {} [{}]: {}", status, err.subcategory(), err);
        Err(err)
    }
}

/// Runs an [`ExtractionRoutine`] off the async scheduler and feeds its
/// progress into the session's transfer state.
#[derive(Clone)]
pub struct ExtractionTransfer {
    routine: Arc<dyn ExtractionRoutine>,
    settings: Arc<TransferSettings>,
}

impl ExtractionTransfer {
    pub fn new(routine: Arc<dyn ExtractionRoutine>, settings: Arc<TransferSettings>) -> Self {
        Self { routine, settings }
    }

    /// Base path (no extension) the routine writes to for this request.
    pub fn temp_base(&self, request: &TransferRequest) -> PathBuf {
        self.settings
            .working_dir
            .join(session_temp_stem(request.session, &request.file_name))
    }

    /// Runs the routine and returns the temp base path for output resolution.
    ///
    /// On cancellation or failure every session temporary is removed.
    pub async fn download(
        &self,
        request: &TransferRequest,
        guard: TransferGuard,
        cancel: &CancellationToken,
    ) -> Result<PathBuf, TransferError> {
        if cancel.is_cancelled() {
            return Err(TransferError::Cancelled);
        }

        let base = self.temp_base(request);
        let job = ExtractionJob::from_request(request, &base, &self.settings);
        let routine = Arc::clone(&self.routine);
        let token = cancel.clone();

        log::info!(
            "🎬 Extraction for session {}: {} ({})",
            request.session,
            request.url,
            job.format
        );

        let handle = tokio::task::spawn_blocking(move || {
            let mut on_progress = |info: &ProgressInfo| {
                if token.is_cancelled() {
                    return ControlFlow::Break(());
                }
                guard.update(|state| {
                    state.percent = info.percent;
                    state.transferred = info.current_size.unwrap_or(0);
                    state.total = info.total_size.unwrap_or(0);
                    state.rate = info.speed_bytes.unwrap_or(0.0);
                    state.eta_secs = info.eta_seconds;
                });
                ControlFlow::Continue(())
            };
            let result = routine.run(&job, &mut on_progress);
            drop(guard);
            result
        });

        let result = match handle.await {
            Ok(result) => result,
            Err(e) => Err(TransferError::Internal(format!("extraction worker failed: {}", e))),
        };

        let result = match result {
            Ok(()) if cancel.is_cancelled() => Err(TransferError::Cancelled),
            other => other,
        };

        match result {
            Ok(()) => Ok(base),
            Err(e) => {
                let removed = cleanup_partial_download(&self.settings.working_dir, request.session);
                if e.is_cancelled() {
                    log::info!("Extraction cancelled for session {} ({} temp files removed)", request.session, removed);
                } else {
                    log::warn!("Extraction failed [{}]: {}", e.subcategory(), e);
                }
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ==================== Progress Parsing Tests ====================

    #[test]
    fn test_parse_progress_full_line() {
        let info = parse_progress("[download]  45.2% of 10.00MiB at 500.00KiB/s ETA 00:10").unwrap();
        assert_eq!(info.percent, 45);
        assert_eq!(info.total_size, Some(10 * 1024 * 1024));
        assert_eq!(info.speed_bytes, Some(500.0 * 1024.0));
        assert_eq!(info.eta_seconds, Some(10));
        assert_eq!(info.current_size, Some((10.0 * 1024.0 * 1024.0 * 0.45) as u64));
    }

    #[test]
    fn test_parse_progress_estimated_total() {
        let info = parse_progress("[download]   3.0% of ~1.50GiB at 2.00MiB/s ETA 1:02:03 (frag 3/90)").unwrap();
        assert_eq!(info.percent, 3);
        assert_eq!(info.total_size, Some((1.5 * 1024.0 * 1024.0 * 1024.0) as u64));
        assert_eq!(info.eta_seconds, Some(3723));
    }

    #[test]
    fn test_parse_progress_ignores_other_lines() {
        assert!(parse_progress("[download] Destination: temp_1_clip.mp4").is_none());
        assert!(parse_progress("[info] 50% done").is_none());
        assert!(parse_progress("").is_none());
    }

    #[test]
    fn test_parse_progress_clamps() {
        assert_eq!(parse_progress("[download] 250% of 1.00MiB").unwrap().percent, 100);
    }

    #[test]
    fn test_parse_eta_formats() {
        assert_eq!(parse_eta("00:10"), Some(10));
        assert_eq!(parse_eta("2:05"), Some(125));
        assert_eq!(parse_eta("Unknown"), None);
        assert_eq!(parse_eta("1"), None);
    }

    // ==================== Classification Tests ====================

    #[test]
    fn test_classify_http_status() {
        let err = classify_extraction_failure("ERROR: unable to download video data: HTTP Error 404: Not Found");
        assert!(matches!(err, TransferError::SourceUnavailable { status: Some(404), .. }));
        assert!(!err.is_retryable());

        let err = classify_extraction_failure("ERROR: HTTP Error 503: Service Unavailable");
        assert!(err.is_retryable());
    }

    #[test]
    fn test_classify_timeout() {
        let err = classify_extraction_failure("ERROR: Read timed out.");
        assert!(matches!(err, TransferError::Timeout(_)));
    }

    #[test]
    fn test_classify_unavailable_video() {
        let err = classify_extraction_failure("ERROR: [youtube] abc: Video unavailable");
        assert!(matches!(err, TransferError::SourceUnavailable { .. }));
    }

    #[test]
    fn test_classify_unknown_is_internal() {
        let err = classify_extraction_failure("something odd\nERROR: postprocessing failed\n");
        match err {
            TransferError::Internal(msg) => assert_eq!(msg, "ERROR: postprocessing failed"),
            other => panic!("unexpected: {:?}", other),
        }
    }

    // ==================== Job Tests ====================

    #[test]
    fn test_job_args_carry_tuning() {
        let url = url::Url::parse("https://example.com/live/index.m3u8").unwrap();
        let request = TransferRequest::new(url, crate::download::request::QualityTier::P480, "clip.mp4", 9);
        let settings = TransferSettings::with_working_dir("/work");
        let job = ExtractionJob::from_request(&request, Path::new("/work/temp_9_clip"), &settings);
        let args = job.to_args();

        assert_eq!(args[0], "-o");
        assert_eq!(args[1], "/work/temp_9_clip.%(ext)s");
        let pos = args.iter().position(|a| a == "--format").unwrap();
        assert_eq!(args[pos + 1], "best[height<=480]/best");
        let pos = args.iter().position(|a| a == "--concurrent-fragments").unwrap();
        assert_eq!(args[pos + 1], "8");
        assert!(args.contains(&"--skip-unavailable-fragments".to_string()));
        assert_eq!(args.last().unwrap(), "https://example.com/live/index.m3u8");
    }
}
