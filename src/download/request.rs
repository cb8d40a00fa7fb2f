//! What the command layer hands to the pipeline.

use std::path::Path;

use strum::{AsRefStr, Display, EnumString};
use url::Url;

use crate::download::session::SessionId;

/// Requested video quality ceiling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, EnumString, Display, AsRefStr)]
pub enum QualityTier {
    #[strum(to_string = "360p", serialize = "360")]
    P360,
    #[strum(to_string = "480p", serialize = "480")]
    P480,
    #[default]
    #[strum(to_string = "720p", serialize = "720")]
    P720,
    #[strum(to_string = "1080p", serialize = "1080")]
    P1080,
}

impl QualityTier {
    /// Maximum frame height for this tier.
    pub fn max_height(self) -> u32 {
        match self {
            QualityTier::P360 => 360,
            QualityTier::P480 => 480,
            QualityTier::P720 => 720,
            QualityTier::P1080 => 1080,
        }
    }

    /// Parses a user token, falling back to the default tier on anything unknown.
    pub fn from_token(token: &str) -> Self {
        token.trim().to_lowercase().parse().unwrap_or_default()
    }

    /// yt-dlp format selector capped at this tier's height.
    pub fn format_selector(self) -> String {
        format!("best[height<={}]/best", self.max_height())
    }
}

/// How the bytes are fetched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumString, Display)]
#[strum(serialize_all = "lowercase")]
pub enum TransferMode {
    /// Plain HTTP streaming into the destination file
    Direct,
    /// External extraction routine (manifests, playlists, video sites)
    Extract,
}

const MANIFEST_EXTENSIONS: &[&str] = &["m3u8", "mpd"];
const VIDEO_EXTENSIONS: &[&str] = &["mp4", "mkv", "webm", "avi", "mov", "flv", "wmv", "m4v", "3gp", "ts"];
const VIDEO_URL_MARKERS: &[&str] = &["/video/", "/videos/", "/embed/", "/watch", "/playlist", "/stream/"];

impl TransferMode {
    /// Picks a mode from the URL shape.
    ///
    /// Manifests and video-like URLs go to extraction; everything else is
    /// fetched directly.
    pub fn infer(url: &Url) -> Self {
        let path = url.path().to_lowercase();
        let ext = Path::new(&path)
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default()
            .to_string();

        if MANIFEST_EXTENSIONS.contains(&ext.as_str()) {
            return TransferMode::Extract;
        }
        if VIDEO_EXTENSIONS.contains(&ext.as_str()) {
            return TransferMode::Extract;
        }
        if ext.is_empty() && VIDEO_URL_MARKERS.iter().any(|m| path.contains(m)) {
            return TransferMode::Extract;
        }
        TransferMode::Direct
    }
}

/// Kind of media, selects the delivery call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "lowercase")]
pub enum MediaKind {
    Video,
    Image,
    Document,
}

const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "gif", "webp", "bmp"];

impl MediaKind {
    /// Classifies a local file by extension.
    pub fn from_path(path: &Path) -> Self {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_lowercase())
            .unwrap_or_default();
        if IMAGE_EXTENSIONS.contains(&ext.as_str()) {
            MediaKind::Image
        } else if VIDEO_EXTENSIONS.contains(&ext.as_str()) {
            MediaKind::Video
        } else {
            MediaKind::Document
        }
    }
}

/// One download request. Immutable once built.
#[derive(Debug, Clone, PartialEq)]
pub struct TransferRequest {
    pub url: Url,
    pub quality: QualityTier,
    /// Final file name inside the working directory
    pub file_name: String,
    pub session: SessionId,
    pub mode: TransferMode,
}

impl TransferRequest {
    /// Builds a request with the mode inferred from the URL.
    pub fn new(url: Url, quality: QualityTier, file_name: impl Into<String>, session: SessionId) -> Self {
        let mode = TransferMode::infer(&url);
        Self {
            url,
            quality,
            file_name: file_name.into(),
            session,
            mode,
        }
    }

    pub fn with_mode(self, mode: TransferMode) -> Self {
        Self { mode, ..self }
    }
}
