//! Shared fixtures for integration tests.
#![allow(dead_code)]

use std::ops::ControlFlow;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use mediarelay::core::config::TransferSettings;
use mediarelay::core::error::AppResult;
use mediarelay::download::error::TransferError;
use mediarelay::download::metadata::{MediaMetadata, MediaProbe};
use mediarelay::download::progress::{ProgressSink, TransferStatus};
use mediarelay::download::session::SessionId;
use mediarelay::download::ytdlp::{ExtractionJob, ExtractionRoutine, ProgressCallback, ProgressInfo};

pub fn which(bin: &str) -> bool {
    Command::new("bash")
        .arg("-lc")
        .arg(format!("command -v {} >/dev/null 2>&1", bin))
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}

/// Settings rooted at `dir` with external tools pointed at names that do not
/// exist, so nothing real is spawned by accident.
pub fn test_settings(dir: &Path) -> TransferSettings {
    TransferSettings {
        ytdl_bin: "mediarelay-missing-ytdlp".into(),
        ffmpeg_bin: "mediarelay-missing-ffmpeg".into(),
        ffprobe_bin: "mediarelay-missing-ffprobe".into(),
        poll_interval: std::time::Duration::from_millis(10),
        ..TransferSettings::with_working_dir(dir)
    }
}

/// Records every status it receives.
#[derive(Default)]
pub struct CollectingSink {
    pub updates: Mutex<Vec<(SessionId, TransferStatus)>>,
}

impl CollectingSink {
    pub fn statuses(&self) -> Vec<TransferStatus> {
        self.updates.lock().unwrap().iter().map(|(_, s)| s.clone()).collect()
    }

    pub fn percents(&self) -> Vec<u8> {
        self.statuses()
            .iter()
            .filter(|s| matches!(s, TransferStatus::Transferring { .. }))
            .filter_map(|s| s.percent())
            .collect()
    }
}

#[async_trait]
impl ProgressSink for CollectingSink {
    async fn update(&self, session: SessionId, status: TransferStatus) -> AppResult<()> {
        self.updates.lock().unwrap().push((session, status));
        Ok(())
    }
}

pub struct FixedProbe(pub MediaMetadata);

#[async_trait]
impl MediaProbe for FixedProbe {
    fn name(&self) -> &str {
        "fixed"
    }

    async fn probe(&self, _path: &Path) -> AppResult<MediaMetadata> {
        Ok(self.0)
    }
}

/// Extraction routine that writes the given `(suffix, size)` files next to
/// the job's base path after reporting a few progress steps.
pub struct FakeRoutine {
    pub outputs: Vec<(&'static str, usize)>,
    pub fail_with: Option<fn() -> TransferError>,
    pub seen_jobs: Mutex<Vec<ExtractionJob>>,
}

impl FakeRoutine {
    pub fn writing(outputs: Vec<(&'static str, usize)>) -> Arc<Self> {
        Arc::new(Self {
            outputs,
            fail_with: None,
            seen_jobs: Mutex::new(Vec::new()),
        })
    }

    pub fn base_of(job: &ExtractionJob) -> PathBuf {
        PathBuf::from(job.output_template.trim_end_matches(".%(ext)s"))
    }
}

impl ExtractionRoutine for FakeRoutine {
    fn run(&self, job: &ExtractionJob, on_progress: ProgressCallback<'_>) -> Result<(), TransferError> {
        self.seen_jobs.lock().unwrap().push(job.clone());
        let base = Self::base_of(job);

        for (suffix, size) in &self.outputs {
            let path = PathBuf::from(format!("{}{}", base.display(), suffix));
            std::fs::write(&path, vec![0u8; *size]).map_err(TransferError::from)?;
        }

        for percent in [10u8, 50, 100] {
            let info = ProgressInfo {
                percent,
                speed_bytes: Some(1024.0),
                eta_seconds: Some(1),
                current_size: None,
                total_size: None,
            };
            if on_progress(&info).is_break() {
                return Err(TransferError::Cancelled);
            }
        }

        match self.fail_with {
            Some(make) => Err(make()),
            None => Ok(()),
        }
    }
}

/// Routine that reports progress until the callback answers `Break`.
pub struct EndlessRoutine;

impl ExtractionRoutine for EndlessRoutine {
    fn run(&self, job: &ExtractionJob, on_progress: ProgressCallback<'_>) -> Result<(), TransferError> {
        let part = PathBuf::from(format!("{}.mp4.part", FakeRoutine::base_of(job).display()));
        std::fs::write(&part, vec![0u8; 4096]).map_err(TransferError::from)?;
        for step in 0u32.. {
            let info = ProgressInfo {
                percent: (step % 100) as u8,
                speed_bytes: None,
                eta_seconds: None,
                current_size: None,
                total_size: None,
            };
            if on_progress(&info) == ControlFlow::Break(()) {
                return Err(TransferError::Cancelled);
            }
            std::thread::sleep(std::time::Duration::from_millis(5));
        }
        Ok(())
    }
}
