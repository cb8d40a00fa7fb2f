//! Still-frame thumbnails via an ordered cascade of ffmpeg strategies.
//!
//! Each stage writes to the same output path and is judged by one rule: the
//! file exists and is larger than the minimum size. The first passing stage
//! wins. A failed cascade returns `None` and never blocks delivery.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;

use crate::core::config;
use crate::core::error::AppResult;
use crate::core::process::run_checked;

/// How the frame is scaled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScaleMode {
    /// Fit inside the box, keeping the aspect ratio
    Fit,
    /// Plain scale to the box, the most permissive filter
    Exact,
}

/// One frame-extraction invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameRequest {
    /// Seek offset in seconds, `None` lets the tool pick its default frame
    pub seek_secs: Option<f64>,
    pub scale: ScaleMode,
}

impl FrameRequest {
    /// `-vf` filter for this request.
    pub fn filter(&self) -> String {
        match self.scale {
            ScaleMode::Fit => format!("scale={}:force_original_aspect_ratio=decrease", config::thumbnail::SIZE),
            ScaleMode::Exact => format!("scale={}", config::thumbnail::SIZE),
        }
    }
}

/// Seek offset of the first stage: a quarter of the duration capped at
/// 10 s, or 2 s for short or unknown durations.
pub fn primary_seek_secs(duration_secs: u64) -> f64 {
    if duration_secs > config::thumbnail::MAX_SEEK_SECS {
        (duration_secs as f64 / 4.0).min(config::thumbnail::MAX_SEEK_SECS as f64)
    } else {
        config::thumbnail::SHORT_VIDEO_SEEK_SECS as f64
    }
}

/// Stages of the cascade, in the order they are tried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThumbnailStrategy {
    /// Quarter of the duration (capped), scaled to fit
    Computed,
    /// First frame
    Start,
    /// Middle of the video, only for videos longer than 5 s
    Midpoint,
    /// No seek at all, plain scale
    NoSeek,
}

impl ThumbnailStrategy {
    pub const CASCADE: [ThumbnailStrategy; 4] = [
        ThumbnailStrategy::Computed,
        ThumbnailStrategy::Start,
        ThumbnailStrategy::Midpoint,
        ThumbnailStrategy::NoSeek,
    ];

    /// Frame request for a video of the given duration, `None` if the stage
    /// does not apply.
    pub fn plan(self, duration_secs: u64) -> Option<FrameRequest> {
        match self {
            ThumbnailStrategy::Computed => Some(FrameRequest {
                seek_secs: Some(primary_seek_secs(duration_secs)),
                scale: ScaleMode::Fit,
            }),
            ThumbnailStrategy::Start => Some(FrameRequest {
                seek_secs: Some(0.0),
                scale: ScaleMode::Fit,
            }),
            ThumbnailStrategy::Midpoint => (duration_secs > config::thumbnail::MIDPOINT_MIN_DURATION_SECS).then(|| {
                FrameRequest {
                    seek_secs: Some(duration_secs as f64 / 2.0),
                    scale: ScaleMode::Fit,
                }
            }),
            ThumbnailStrategy::NoSeek => Some(FrameRequest {
                seek_secs: None,
                scale: ScaleMode::Exact,
            }),
        }
    }
}

/// Writes one frame of `video` to `output`.
#[async_trait]
pub trait FrameExtractor: Send + Sync {
    async fn extract(&self, video: &Path, output: &Path, request: &FrameRequest) -> AppResult<()>;
}

/// ffmpeg with a bounded timeout per invocation.
#[derive(Debug, Clone)]
pub struct FfmpegFrameExtractor {
    bin: String,
    timeout: Duration,
}

impl FfmpegFrameExtractor {
    pub fn new(bin: impl Into<String>, timeout: Duration) -> Self {
        Self {
            bin: bin.into(),
            timeout,
        }
    }

    pub fn build_args(video: &Path, output: &Path, request: &FrameRequest) -> Vec<String> {
        let mut args = Vec::with_capacity(12);
        if let Some(seek) = request.seek_secs {
            args.push("-ss".to_string());
            args.push(format!("{}", seek));
        }
        args.push("-i".to_string());
        args.push(video.display().to_string());
        args.extend(["-vframes".to_string(), "1".to_string()]);
        args.extend(["-vf".to_string(), request.filter()]);
        // 2 = high, 31 = low
        args.extend(["-q:v".to_string(), config::thumbnail::QUALITY.to_string()]);
        args.push(output.display().to_string());
        args.push("-y".to_string());
        args
    }
}

impl Default for FfmpegFrameExtractor {
    fn default() -> Self {
        Self::new(config::FFMPEG_BIN.as_str(), config::thumbnail::timeout())
    }
}

#[async_trait]
impl FrameExtractor for FfmpegFrameExtractor {
    async fn extract(&self, video: &Path, output: &Path, request: &FrameRequest) -> AppResult<()> {
        let mut cmd = Command::new(&self.bin);
        cmd.args(Self::build_args(video, output, request));
        run_checked(&mut cmd, self.timeout).await?;
        Ok(())
    }
}

/// Runs the strategy cascade against a [`FrameExtractor`].
#[derive(Clone)]
pub struct ThumbnailGenerator {
    extractor: Arc<dyn FrameExtractor>,
    strategies: Vec<ThumbnailStrategy>,
    min_size: u64,
}

impl ThumbnailGenerator {
    pub fn new(extractor: Arc<dyn FrameExtractor>, min_size: u64) -> Self {
        Self {
            extractor,
            strategies: ThumbnailStrategy::CASCADE.to_vec(),
            min_size,
        }
    }

    pub fn with_strategies(self, strategies: Vec<ThumbnailStrategy>) -> Self {
        Self { strategies, ..self }
    }

    /// Returns the thumbnail path on the first valid stage, `None` if every
    /// stage failed. Never returns an error.
    ///
    /// A stage is judged by its output file alone; an extractor error is only
    /// logged.
    pub async fn generate(&self, video: &Path, output: &Path, duration_secs: u64) -> Option<PathBuf> {
        log::info!(
            "[THUMBNAIL] Generating thumbnail for {} ({}s)",
            video.display(),
            duration_secs
        );

        for strategy in &self.strategies {
            let Some(request) = strategy.plan(duration_secs) else {
                log::debug!("[THUMBNAIL] Skipping {:?} for {}s video", strategy, duration_secs);
                continue;
            };

            remove_stale(output).await;

            if let Err(e) = self.extractor.extract(video, output, &request).await {
                log::warn!("[THUMBNAIL] {:?} stage reported: {}", strategy, e);
            }

            match self.valid_size(output).await {
                Some(size) => {
                    log::info!("[THUMBNAIL] {:?} stage produced {} bytes", strategy, size);
                    return Some(output.to_path_buf());
                }
                None => log::warn!("[THUMBNAIL] {:?} stage produced no usable file", strategy),
            }
        }

        remove_stale(output).await;
        log::warn!("[THUMBNAIL] All strategies failed for {}", video.display());
        None
    }

    async fn valid_size(&self, output: &Path) -> Option<u64> {
        let meta = tokio::fs::metadata(output).await.ok()?;
        (meta.is_file() && meta.len() > self.min_size).then_some(meta.len())
    }
}

impl Default for ThumbnailGenerator {
    fn default() -> Self {
        Self::new(
            Arc::new(FfmpegFrameExtractor::default()),
            config::thumbnail::MIN_SIZE_BYTES,
        )
    }
}

async fn remove_stale(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            log::debug!("[THUMBNAIL] Could not remove {}: {}", path.display(), e);
        }
    }
}
