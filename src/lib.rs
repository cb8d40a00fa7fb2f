//! mediarelay - media download/upload orchestration core
//!
//! Fetches media from direct HTTP links or through yt-dlp, finds the real
//! artifact on disk, reads its metadata with ffprobe, cuts a thumbnail with
//! ffmpeg and streams the result to a delivery transport. Every stage is
//! cancellable per session and reports throttled progress.
//!
//! # Module Structure
//!
//! - `core`: configuration, errors, logging, subprocess and formatting helpers
//! - `download`: transfer engines, session registry, progress, post-processing
//!   and upload

pub mod cli;
pub mod core;
pub mod download;

// Re-export commonly used types for convenience
pub use crate::core::{AppError, AppResult, config};
pub use download::{FetchedMedia, MediaPipeline, SessionRegistry, TransferError, TransferRequest};
