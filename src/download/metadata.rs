//! Media inspection via ffprobe.
//!
//! Metadata is advisory: a missing tool, a timeout or malformed JSON yields
//! [`MediaMetadata::FALLBACK`] instead of an error, and unusable dimensions
//! fall back to 1280x720 without losing the duration. A broken probe never
//! blocks delivery.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::process::Command;

use crate::core::config;
use crate::core::error::{AppError, AppResult};
use crate::core::process::{run_checked, run_with_timeout};

/// Duration and frame size of a media file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MediaMetadata {
    pub duration_secs: u64,
    pub width: u32,
    pub height: u32,
}

impl MediaMetadata {
    /// Used whenever inspection fails.
    pub const FALLBACK: MediaMetadata = MediaMetadata {
        duration_secs: config::probe::FALLBACK_DURATION_SECS,
        width: config::probe::FALLBACK_WIDTH,
        height: config::probe::FALLBACK_HEIGHT,
    };

    pub fn is_fallback(&self) -> bool {
        *self == Self::FALLBACK
    }
}

impl Default for MediaMetadata {
    fn default() -> Self {
        Self::FALLBACK
    }
}

#[derive(Debug, Deserialize)]
struct ProbeOutput {
    #[serde(default)]
    streams: Vec<ProbeStream>,
    format: Option<ProbeFormat>,
}

#[derive(Debug, Deserialize)]
struct ProbeStream {
    codec_type: Option<String>,
    width: Option<i64>,
    height: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct ProbeFormat {
    duration: Option<String>,
}

/// Parses `ffprobe -print_format json -show_format -show_streams` output.
///
/// Returns `None` only when the JSON is malformed. Without a video stream, or
/// with a missing or non-positive dimension, both dimensions fall back to
/// 1280x720 while the duration is kept. A missing duration reads as 0.
pub fn parse_probe_output(json: &str) -> Option<MediaMetadata> {
    let output: ProbeOutput = serde_json::from_str(json).ok()?;

    let dimension = |value: Option<i64>| value.and_then(|v| u32::try_from(v).ok()).filter(|v| *v > 0);
    let (width, height) = output
        .streams
        .iter()
        .find(|s| s.codec_type.as_deref() == Some("video"))
        .and_then(|video| Some((dimension(video.width)?, dimension(video.height)?)))
        .unwrap_or((MediaMetadata::FALLBACK.width, MediaMetadata::FALLBACK.height));

    let duration_secs = output
        .format
        .and_then(|f| f.duration)
        .and_then(|d| d.trim().parse::<f64>().ok())
        .filter(|d| d.is_finite() && *d >= 0.0)
        .map(|d| d as u64)
        .unwrap_or(0);

    Some(MediaMetadata {
        duration_secs,
        width,
        height,
    })
}

/// A way of obtaining metadata for a file.
#[async_trait]
pub trait MediaProbe: Send + Sync {
    fn name(&self) -> &str;

    async fn probe(&self, path: &Path) -> AppResult<MediaMetadata>;
}

/// ffprobe with JSON output and a bounded timeout.
#[derive(Debug, Clone)]
pub struct FfprobeProbe {
    bin: String,
    timeout: Duration,
}

impl FfprobeProbe {
    pub fn new(bin: impl Into<String>, timeout: Duration) -> Self {
        Self {
            bin: bin.into(),
            timeout,
        }
    }
}

impl Default for FfprobeProbe {
    fn default() -> Self {
        Self::new(config::FFPROBE_BIN.as_str(), config::probe::timeout())
    }
}

#[async_trait]
impl MediaProbe for FfprobeProbe {
    fn name(&self) -> &str {
        "ffprobe"
    }

    async fn probe(&self, path: &Path) -> AppResult<MediaMetadata> {
        let mut cmd = Command::new(&self.bin);
        cmd.args(["-v", "quiet", "-print_format", "json", "-show_format", "-show_streams"])
            .arg(path);
        let output = run_checked(&mut cmd, self.timeout).await?;
        let json = String::from_utf8_lossy(&output.stdout);
        parse_probe_output(&json).ok_or_else(|| AppError::Validation("unusable ffprobe output".to_string()))
    }
}

/// Ordered list of probes; the first usable answer wins.
#[derive(Clone)]
pub struct MediaInspector {
    probes: Vec<Arc<dyn MediaProbe>>,
}

impl MediaInspector {
    pub fn new(probes: Vec<Arc<dyn MediaProbe>>) -> Self {
        Self { probes }
    }

    pub fn ffprobe(bin: impl Into<String>, timeout: Duration) -> Self {
        Self::new(vec![Arc::new(FfprobeProbe::new(bin, timeout))])
    }

    /// Never fails: falls back to `MediaMetadata::FALLBACK`.
    pub async fn inspect(&self, path: &Path) -> MediaMetadata {
        for probe in &self.probes {
            match probe.probe(path).await {
                Ok(meta) => {
                    log::info!(
                        "[PROBE] {}: {}s {}x{} via {}",
                        path.display(),
                        meta.duration_secs,
                        meta.width,
                        meta.height,
                        probe.name()
                    );
                    return meta;
                }
                Err(e) => log::warn!("[PROBE] {} failed for {}: {}", probe.name(), path.display(), e),
            }
        }
        log::warn!("[PROBE] Using fallback metadata for {}", path.display());
        MediaMetadata::FALLBACK
    }
}

impl Default for MediaInspector {
    fn default() -> Self {
        Self::new(vec![Arc::new(FfprobeProbe::default())])
    }
}

/// Checks that a downloaded file is real, playable media: it exists, is at
/// least `min_size` bytes, and `ffprobe -v error` exits cleanly in time.
pub async fn validate_media_file(path: &Path, ffprobe_bin: &str, timeout: Duration, min_size: u64) -> bool {
    let size = match tokio::fs::metadata(path).await {
        Ok(meta) if meta.is_file() => meta.len(),
        _ => {
            log::warn!("Validation: {} does not exist", path.display());
            return false;
        }
    };

    if size < min_size {
        log::warn!("Validation: {} too small ({} bytes)", path.display(), size);
        return false;
    }

    let mut cmd = Command::new(ffprobe_bin);
    cmd.args(["-v", "error"]).arg(path);
    match run_with_timeout(&mut cmd, timeout).await {
        Ok(output) if output.status.success() => true,
        Ok(output) => {
            log::warn!(
                "Validation: ffprobe rejected {}: {}",
                path.display(),
                String::from_utf8_lossy(&output.stderr).trim()
            );
            false
        }
        Err(e) => {
            log::warn!("Validation: ffprobe failed for {}: {}", path.display(), e);
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
        "streams": [
            {"index": 0, "codec_type": "audio", "codec_name": "aac"},
            {"index": 1, "codec_type": "video", "codec_name": "h264", "width": 1920, "height": 1080}
        ],
        "format": {"filename": "clip.mp4", "duration": "63.480000"}
    }"#;

    // ==================== Parsing Tests ====================

    #[test]
    fn test_parse_probe_output_first_video_stream() {
        let meta = parse_probe_output(SAMPLE).unwrap();
        assert_eq!(
            meta,
            MediaMetadata {
                duration_secs: 63,
                width: 1920,
                height: 1080
            }
        );
    }

    #[test]
    fn test_parse_probe_output_malformed() {
        assert!(parse_probe_output("not json").is_none());
        assert!(parse_probe_output("").is_none());
        assert!(parse_probe_output(r#"{"streams": "nope"}"#).is_none());
    }

    #[test]
    fn test_parse_probe_output_bad_dimensions_keep_duration() {
        let expected = MediaMetadata {
            duration_secs: 5,
            width: 1280,
            height: 720,
        };
        let zero = r#"{"streams":[{"codec_type":"video","width":0,"height":480}],"format":{"duration":"5.9"}}"#;
        assert_eq!(parse_probe_output(zero), Some(expected));
        let missing = r#"{"streams":[{"codec_type":"video","width":640}],"format":{"duration":"5"}}"#;
        assert_eq!(parse_probe_output(missing), Some(expected));
        let audio_only = r#"{"streams":[{"codec_type":"audio"}],"format":{"duration":"5"}}"#;
        assert_eq!(parse_probe_output(audio_only), Some(expected));

        let negative = r#"{"streams":[{"codec_type":"video","width":-2,"height":720}]}"#;
        assert_eq!(parse_probe_output(negative), Some(MediaMetadata::FALLBACK));
    }

    #[test]
    fn test_parse_probe_output_missing_duration() {
        let json = r#"{"streams":[{"codec_type":"video","width":640,"height":360}],"format":{"duration":"N/A"}}"#;
        assert_eq!(parse_probe_output(json).unwrap().duration_secs, 0);
    }

    // ==================== Inspector Tests ====================

    struct FailingProbe;

    #[async_trait]
    impl MediaProbe for FailingProbe {
        fn name(&self) -> &str {
            "failing"
        }
        async fn probe(&self, _path: &Path) -> AppResult<MediaMetadata> {
            Err(AppError::Validation("broken".into()))
        }
    }

    struct FixedProbe(MediaMetadata);

    #[async_trait]
    impl MediaProbe for FixedProbe {
        fn name(&self) -> &str {
            "fixed"
        }
        async fn probe(&self, _path: &Path) -> AppResult<MediaMetadata> {
            Ok(self.0)
        }
    }

    #[tokio::test]
    async fn test_inspector_falls_back() {
        let inspector = MediaInspector::new(vec![Arc::new(FailingProbe)]);
        let meta = inspector.inspect(Path::new("/nope.mp4")).await;
        assert!(meta.is_fallback());
        assert_eq!((meta.duration_secs, meta.width, meta.height), (0, 1280, 720));
    }

    #[tokio::test]
    async fn test_inspector_tries_probes_in_order() {
        let wanted = MediaMetadata {
            duration_secs: 9,
            width: 320,
            height: 240,
        };
        let inspector = MediaInspector::new(vec![Arc::new(FailingProbe), Arc::new(FixedProbe(wanted))]);
        assert_eq!(inspector.inspect(Path::new("x.mp4")).await, wanted);
    }

    #[tokio::test]
    async fn test_missing_ffprobe_binary_falls_back() {
        let inspector = MediaInspector::ffprobe("definitely-not-ffprobe-5f3a", Duration::from_secs(1));
        assert!(inspector.inspect(Path::new("x.mp4")).await.is_fallback());
    }

    #[tokio::test]
    async fn test_validate_rejects_missing_and_small_files() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing.mp4");
        assert!(!validate_media_file(&missing, "ffprobe", Duration::from_secs(1), 10_240).await);

        let small = dir.path().join("small.mp4");
        std::fs::write(&small, b"tiny").unwrap();
        assert!(!validate_media_file(&small, "ffprobe", Duration::from_secs(1), 10_240).await);
    }
}
