use once_cell::sync::Lazy;
use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// Configuration constants for the relay

/// Working directory for in-flight temporaries and finalized artifacts
/// Read from DOWNLOAD_DIR environment variable
/// Default: downloads
pub static DOWNLOAD_DIR: Lazy<PathBuf> =
    Lazy::new(|| PathBuf::from(env::var("DOWNLOAD_DIR").unwrap_or_else(|_| "downloads".to_string())));

/// Cached yt-dlp binary path
/// Read once at startup from YTDL_BIN environment variable or defaults to "yt-dlp"
pub static YTDL_BIN: Lazy<String> = Lazy::new(|| env::var("YTDL_BIN").unwrap_or_else(|_| "yt-dlp".to_string()));

/// ffmpeg binary used for frame extraction
/// Read from FFMPEG_BIN environment variable
pub static FFMPEG_BIN: Lazy<String> = Lazy::new(|| env::var("FFMPEG_BIN").unwrap_or_else(|_| "ffmpeg".to_string()));

/// ffprobe binary used for metadata inspection
/// Read from FFPROBE_BIN environment variable
pub static FFPROBE_BIN: Lazy<String> =
    Lazy::new(|| env::var("FFPROBE_BIN").unwrap_or_else(|_| "ffprobe".to_string()));

/// Log file path
/// Read from LOG_FILE_PATH environment variable
/// Default: mediarelay.log
pub static LOG_FILE_PATH: Lazy<String> =
    Lazy::new(|| env::var("LOG_FILE_PATH").unwrap_or_else(|_| "mediarelay.log".to_string()));

/// Delivery endpoint for the HTTP upload transport
/// Read from UPLOAD_URL environment variable
/// Unset means uploads are disabled in the CLI
pub static UPLOAD_URL: Lazy<Option<String>> = Lazy::new(|| {
    env::var("UPLOAD_URL").ok().and_then(|value| {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
});

/// Direct (HTTP streaming) transfer configuration
pub mod download {
    use super::Duration;
    use once_cell::sync::Lazy;
    use std::env;

    /// Bytes read and committed per chunk (64 KB)
    pub const CHUNK_SIZE: usize = 65_536;

    /// End-to-end timeout for a single transfer (40 minutes, slow servers are common)
    pub const TOTAL_TIMEOUT_SECS: u64 = 2400;

    /// TCP connect timeout (in seconds)
    pub const CONNECT_TIMEOUT_SECS: u64 = 60;

    /// Per-read timeout (in seconds)
    pub const READ_TIMEOUT_SECS: u64 = 120;

    /// Idle connections kept per host in the pool
    pub const POOL_MAX_IDLE_PER_HOST: usize = 30;

    /// Completed files not larger than this are treated as error pages (1 KB)
    pub const MIN_FILE_SIZE_BYTES: u64 = 1024;

    /// Browser-like user agent; several CDNs reject unknown clients
    pub const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36";

    /// Accept invalid TLS certificates
    /// Read from ACCEPT_INVALID_CERTS environment variable
    /// Default: false
    pub static ACCEPT_INVALID_CERTS: Lazy<bool> = Lazy::new(|| {
        env::var("ACCEPT_INVALID_CERTS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(false)
    });

    pub fn total_timeout() -> Duration {
        Duration::from_secs(TOTAL_TIMEOUT_SECS)
    }

    pub fn connect_timeout() -> Duration {
        Duration::from_secs(CONNECT_TIMEOUT_SECS)
    }

    pub fn read_timeout() -> Duration {
        Duration::from_secs(READ_TIMEOUT_SECS)
    }
}

/// Extraction (yt-dlp) configuration
pub mod extraction {
    /// Fragments fetched in parallel for HLS/DASH streams
    pub const CONCURRENT_FRAGMENTS: u32 = 8;

    /// Whole-job retries
    pub const MAX_RETRIES: u32 = 20;

    /// Per-fragment retries
    pub const FRAGMENT_RETRIES: u32 = 20;

    /// yt-dlp socket timeout (in seconds)
    pub const SOCKET_TIMEOUT_SECS: u64 = 120;

    /// Download buffer size (256 KB)
    pub const BUFFER_SIZE: u64 = 262_144;

    /// HTTP chunk size for yt-dlp's native downloader (1 MB)
    pub const HTTP_CHUNK_SIZE: u64 = 1_048_576;

    /// Container used when merging separate video/audio streams
    pub const MERGE_OUTPUT_FORMAT: &str = "mp4";
}

/// Progress reporting configuration
pub mod progress {
    use super::Duration;

    /// Interval between state samples (in milliseconds)
    pub const POLL_INTERVAL_MS: u64 = 2000;

    /// Minimum percentage advance before a download update is emitted
    pub const DOWNLOAD_STEP_PERCENT: u8 = 3;

    /// Minimum percentage advance before an upload update is emitted
    pub const UPLOAD_STEP_PERCENT: u8 = 4;

    /// Width of the textual gauge (in cells)
    pub const GAUGE_WIDTH: usize = 20;

    pub fn poll_interval() -> Duration {
        Duration::from_millis(POLL_INTERVAL_MS)
    }
}

/// Output resolution configuration
pub mod resolve {
    /// Extensions yt-dlp may append to the requested base path
    pub const EXPECTED_EXTENSIONS: &[&str] = &["mp4", "mkv", "webm", "ts"];

    /// Candidates below this size are fragments or error pages (10 KB)
    pub const MIN_CANDIDATE_BYTES: u64 = 10_240;
}

/// ffprobe configuration
pub mod probe {
    use super::Duration;

    /// Timeout for metadata probing (in seconds)
    pub const TIMEOUT_SECS: u64 = 20;

    /// Timeout for the playable-file check (in seconds)
    pub const VALIDATE_TIMEOUT_SECS: u64 = 10;

    /// Fallback metadata when probing fails
    pub const FALLBACK_DURATION_SECS: u64 = 0;
    pub const FALLBACK_WIDTH: u32 = 1280;
    pub const FALLBACK_HEIGHT: u32 = 720;

    pub fn timeout() -> Duration {
        Duration::from_secs(TIMEOUT_SECS)
    }

    pub fn validate_timeout() -> Duration {
        Duration::from_secs(VALIDATE_TIMEOUT_SECS)
    }
}

/// Thumbnail generation configuration
pub mod thumbnail {
    use super::Duration;

    /// Timeout for each ffmpeg invocation (in seconds)
    pub const TIMEOUT_SECS: u64 = 45;

    /// Valid thumbnails are larger than this (2 KB)
    pub const MIN_SIZE_BYTES: u64 = 2048;

    /// Scale filter target (width:height)
    pub const SIZE: &str = "480:270";

    /// JPEG quality (2 = high, 31 = low)
    pub const QUALITY: u8 = 2;

    /// Seek offset used when the duration is unknown or short
    pub const SHORT_VIDEO_SEEK_SECS: u64 = 2;

    /// Upper bound for the primary seek offset
    pub const MAX_SEEK_SECS: u64 = 10;

    /// Videos longer than this also try the midpoint
    pub const MIDPOINT_MIN_DURATION_SECS: u64 = 5;

    pub fn timeout() -> Duration {
        Duration::from_secs(TIMEOUT_SECS)
    }
}

/// Upload configuration
pub mod upload {
    /// Read buffer used when streaming a file to the transport (512 KB)
    pub const CHUNK_SIZE: usize = 524_288;
}

/// Tuning knobs for one pipeline instance.
///
/// `Default` pulls every value from the constants above; tests and embedders
/// override single fields with struct update syntax.
#[derive(Debug, Clone)]
pub struct TransferSettings {
    pub working_dir: PathBuf,
    pub ytdl_bin: String,
    pub ffmpeg_bin: String,
    pub ffprobe_bin: String,

    pub chunk_size: usize,
    pub total_timeout: Duration,
    pub connect_timeout: Duration,
    pub read_timeout: Duration,
    pub pool_max_idle_per_host: usize,
    pub min_direct_size: u64,
    pub user_agent: String,
    pub accept_invalid_certs: bool,

    pub concurrent_fragments: u32,
    pub retries: u32,
    pub fragment_retries: u32,
    pub socket_timeout_secs: u64,
    pub buffer_size: u64,
    pub http_chunk_size: u64,

    pub poll_interval: Duration,
    pub download_step: u8,
    pub upload_step: u8,

    pub resolver_min_size: u64,

    pub probe_timeout: Duration,
    pub thumbnail_timeout: Duration,
    pub thumbnail_min_size: u64,
}

impl Default for TransferSettings {
    fn default() -> Self {
        Self {
            working_dir: DOWNLOAD_DIR.clone(),
            ytdl_bin: YTDL_BIN.clone(),
            ffmpeg_bin: FFMPEG_BIN.clone(),
            ffprobe_bin: FFPROBE_BIN.clone(),

            chunk_size: download::CHUNK_SIZE,
            total_timeout: download::total_timeout(),
            connect_timeout: download::connect_timeout(),
            read_timeout: download::read_timeout(),
            pool_max_idle_per_host: download::POOL_MAX_IDLE_PER_HOST,
            min_direct_size: download::MIN_FILE_SIZE_BYTES,
            user_agent: download::USER_AGENT.to_string(),
            accept_invalid_certs: *download::ACCEPT_INVALID_CERTS,

            concurrent_fragments: extraction::CONCURRENT_FRAGMENTS,
            retries: extraction::MAX_RETRIES,
            fragment_retries: extraction::FRAGMENT_RETRIES,
            socket_timeout_secs: extraction::SOCKET_TIMEOUT_SECS,
            buffer_size: extraction::BUFFER_SIZE,
            http_chunk_size: extraction::HTTP_CHUNK_SIZE,

            poll_interval: progress::poll_interval(),
            download_step: progress::DOWNLOAD_STEP_PERCENT,
            upload_step: progress::UPLOAD_STEP_PERCENT,

            resolver_min_size: resolve::MIN_CANDIDATE_BYTES,

            probe_timeout: probe::timeout(),
            thumbnail_timeout: thumbnail::timeout(),
            thumbnail_min_size: thumbnail::MIN_SIZE_BYTES,
        }
    }
}

impl TransferSettings {
    /// Defaults rooted at a different working directory.
    pub fn with_working_dir(dir: impl Into<PathBuf>) -> Self {
        Self {
            working_dir: dir.into(),
            ..Self::default()
        }
    }
}
