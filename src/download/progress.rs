//! Throttled progress reporting.
//!
//! The monitor samples a session's [`TransferState`] on a fixed interval and
//! forwards a [`TransferStatus`] to a [`ProgressSink`] only when the integer
//! percentage advanced by at least the configured step. Producers write as
//! often as they like; the sink sees a bounded update rate.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::core::config;
use crate::core::error::AppResult;
use crate::core::format::{format_rate, format_size, format_time, percent_of, progress_gauge};
use crate::download::session::{SessionId, SessionRegistry, TransferState};

/// Which half of the pipeline a status describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Download,
    Upload,
}

/// User-facing state of a session's request.
#[derive(Debug, Clone, PartialEq)]
pub enum TransferStatus {
    /// Request accepted, nothing transferred yet
    Initializing { title: String },
    /// Bytes are moving
    Transferring {
        title: String,
        direction: Direction,
        percent: u8,
        transferred: u64,
        /// 0 when unknown
        total: u64,
        /// Bytes per second
        rate: f64,
        eta_secs: Option<u64>,
    },
    /// Resolving, probing or thumbnailing
    Processing { title: String },
    Completed { title: String, elapsed_secs: u64 },
    Cancelled { title: String },
    Failed { title: String, error: String },
}

impl TransferStatus {
    /// Builds a `Transferring` status from a registry snapshot.
    pub fn from_state(title: &str, direction: Direction, state: &TransferState) -> Self {
        TransferStatus::Transferring {
            title: title.to_string(),
            direction,
            percent: effective_percent(state),
            transferred: state.transferred,
            total: state.total,
            rate: state.rate,
            eta_secs: state.eta_secs,
        }
    }

    /// Percentage carried by the status, if any.
    pub fn percent(&self) -> Option<u8> {
        match self {
            TransferStatus::Transferring { percent, .. } => Some(*percent),
            TransferStatus::Completed { .. } => Some(100),
            _ => None,
        }
    }

    /// Renders the status as plain multi-line text.
    ///
    /// # Example
    ///
    /// ```
    /// use mediarelay::download::progress::{Direction, TransferStatus};
    ///
    /// let status = TransferStatus::Transferring {
    ///     title: "clip.mp4".to_string(),
    ///     direction: Direction::Download,
    ///     percent: 50,
    ///     transferred: 512,
    ///     total: 1024,
    ///     rate: 256.0,
    ///     eta_secs: Some(2),
    /// };
    /// assert!(status.to_message().contains("512.00 B / 1.00 KB"));
    /// ```
    pub fn to_message(&self) -> String {
        match self {
            TransferStatus::Initializing { title } => format!("⏳ {}\nInitializing download...", title),
            TransferStatus::Transferring {
                title,
                direction,
                percent,
                transferred,
                total,
                rate,
                eta_secs,
            } => {
                let (emoji, verb) = match direction {
                    Direction::Download => ("📥", "Downloading"),
                    Direction::Upload => ("📤", "Uploading"),
                };
                let mut s = String::with_capacity(title.len() + 160);
                s.push_str(emoji);
                s.push(' ');
                s.push_str(verb);
                s.push_str(": ");
                s.push_str(title);
                s.push('\n');
                s.push_str(&progress_gauge(*percent as f64, config::progress::GAUGE_WIDTH));
                s.push_str("\n📦 ");
                s.push_str(&format_size(*transferred));
                if *total > 0 {
                    s.push_str(" / ");
                    s.push_str(&format_size(*total));
                }
                if *rate > 0.0 {
                    s.push_str("\n⚡ ");
                    s.push_str(&format_rate(*rate));
                }
                if let Some(eta) = eta_secs {
                    s.push_str("\n⏱️ ETA: ");
                    s.push_str(&format_time(*eta));
                }
                s
            }
            TransferStatus::Processing { title } => format!("⚙️ {}\nProcessing media...", title),
            TransferStatus::Completed { title, elapsed_secs } => {
                format!("✅ {}\nDone in {}", title, format_time(*elapsed_secs))
            }
            TransferStatus::Cancelled { title } => format!("🚫 {}\nCancelled", title),
            TransferStatus::Failed { title, error } => format!("❌ {}\nError: {}", title, error),
        }
    }
}

/// Percentage computed from byte counts, or the producer's own figure when
/// the total is unknown (extraction reports percentages directly).
fn effective_percent(state: &TransferState) -> u8 {
    if state.total > 0 {
        percent_of(state.transferred, state.total)
    } else {
        state.percent.min(100)
    }
}

/// Destination of progress updates (a chat message, a terminal, a test probe).
///
/// Failures are reported back but never abort a transfer.
#[async_trait]
pub trait ProgressSink: Send + Sync {
    async fn update(&self, session: SessionId, status: TransferStatus) -> AppResult<()>;
}

/// Sink that writes every update to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

#[async_trait]
impl ProgressSink for LogSink {
    async fn update(&self, session: SessionId, status: TransferStatus) -> AppResult<()> {
        log::info!("[session {}] {}", session, status.to_message().replace('\n', " | "));
        Ok(())
    }
}

/// Sends a status, logging and swallowing sink failures.
pub async fn notify(sink: &dyn ProgressSink, session: SessionId, status: TransferStatus) {
    if let Err(e) = sink.update(session, status).await {
        log::debug!("Progress sink rejected update for session {}: {}", session, e);
    }
}

/// Percentage-delta gate.
///
/// Starts from a 0% baseline and lets a value through only when it is at
/// least `step` points above the last value let through.
#[derive(Debug, Clone)]
pub struct ProgressThrottle {
    step: u8,
    last: u8,
}

impl ProgressThrottle {
    pub fn new(step: u8) -> Self {
        Self { step: step.max(1), last: 0 }
    }

    pub fn should_emit(&mut self, percent: u8) -> bool {
        if percent >= self.last.saturating_add(self.step) {
            self.last = percent;
            true
        } else {
            false
        }
    }

    pub fn last_emitted(&self) -> u8 {
        self.last
    }
}

/// Polling observer over the session registry.
#[derive(Debug, Clone)]
pub struct ProgressMonitor {
    registry: Arc<SessionRegistry>,
    interval: Duration,
    step: u8,
}

impl ProgressMonitor {
    pub fn new(registry: Arc<SessionRegistry>, interval: Duration, step: u8) -> Self {
        Self {
            registry,
            interval,
            step,
        }
    }

    /// Monitor with the default download cadence (2 s, 3 points).
    pub fn for_downloads(registry: Arc<SessionRegistry>) -> Self {
        Self::new(
            registry,
            config::progress::poll_interval(),
            config::progress::DOWNLOAD_STEP_PERCENT,
        )
    }

    /// Samples the session's transfer state until the token is cancelled or
    /// the state disappears. Returns the number of updates emitted.
    ///
    /// The state entry must exist before this is called; a missing entry is
    /// read as "transfer finished".
    pub async fn run(
        &self,
        session: SessionId,
        title: &str,
        direction: Direction,
        cancel: CancellationToken,
        sink: &dyn ProgressSink,
    ) -> u32 {
        let mut throttle = ProgressThrottle::new(self.step);
        let mut emitted = 0u32;
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    log::debug!("Progress monitor for session {} stopped: cancelled", session);
                    break;
                }
                _ = ticker.tick() => {}
            }

            let Some(state) = self.registry.transfer_state(session) else {
                log::debug!("Progress monitor for session {} stopped: transfer ended", session);
                break;
            };

            let percent = effective_percent(&state);
            if throttle.should_emit(percent) {
                notify(sink, session, TransferStatus::from_state(title, direction, &state)).await;
                emitted += 1;
            }
        }

        emitted
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ==================== Throttle Tests ====================

    #[test]
    fn test_throttle_requires_step() {
        let mut throttle = ProgressThrottle::new(3);
        assert!(!throttle.should_emit(0));
        assert!(!throttle.should_emit(2));
        assert!(throttle.should_emit(3));
        assert!(!throttle.should_emit(5));
        assert!(throttle.should_emit(6));
        assert!(throttle.should_emit(100));
        assert!(!throttle.should_emit(100));
    }

    #[test]
    fn test_throttle_emissions_strictly_increase_by_step() {
        let mut throttle = ProgressThrottle::new(4);
        let emitted: Vec<u8> = (0..=100u8).filter(|p| throttle.should_emit(*p)).collect();
        assert!(!emitted.is_empty());
        for pair in emitted.windows(2) {
            assert!(pair[1] >= pair[0] + 4, "{:?}", pair);
        }
    }

    #[test]
    fn test_throttle_zero_step_is_clamped() {
        let mut throttle = ProgressThrottle::new(0);
        assert!(throttle.should_emit(1));
        assert!(!throttle.should_emit(1));
    }

    // ==================== Message Tests ====================

    #[test]
    fn test_transferring_message_with_total() {
        let status = TransferStatus::Transferring {
            title: "clip.mp4".into(),
            direction: Direction::Download,
            percent: 50,
            transferred: 1024 * 1024,
            total: 2 * 1024 * 1024,
            rate: 1024.0 * 1024.0,
            eta_secs: Some(65),
        };
        let msg = status.to_message();
        assert!(msg.starts_with("📥 Downloading: clip.mp4"));
        assert!(msg.contains("50.0%"));
        assert!(msg.contains("1.00 MB / 2.00 MB"));
        assert!(msg.contains("1.00 MB/s"));
        assert!(msg.contains("ETA: 1m 5s"));
    }

    #[test]
    fn test_transferring_message_unknown_total() {
        let status = TransferStatus::Transferring {
            title: "x".into(),
            direction: Direction::Upload,
            percent: 0,
            transferred: 2048,
            total: 0,
            rate: 0.0,
            eta_secs: None,
        };
        let msg = status.to_message();
        assert!(msg.starts_with("📤 Uploading: x"));
        assert!(msg.contains("📦 2.00 KB"));
        assert!(!msg.contains(" / "));
        assert!(!msg.contains("ETA"));
    }

    #[test]
    fn test_stage_messages() {
        assert!(TransferStatus::Initializing { title: "a".into() }.to_message().contains("Initializing"));
        assert!(TransferStatus::Cancelled { title: "a".into() }.to_message().contains("Cancelled"));
        let failed = TransferStatus::Failed {
            title: "a".into(),
            error: "timed out".into(),
        };
        assert!(failed.to_message().ends_with("Error: timed out"));
        let done = TransferStatus::Completed {
            title: "a".into(),
            elapsed_secs: 3,
        };
        assert_eq!(done.percent(), Some(100));
        assert!(done.to_message().contains("Done in 3s"));
    }

    #[test]
    fn test_from_state_prefers_byte_counts() {
        let state = TransferState {
            transferred: 25,
            total: 100,
            rate: 5.0,
            eta_secs: Some(15),
            percent: 90,
        };
        assert_eq!(TransferStatus::from_state("t", Direction::Download, &state).percent(), Some(25));

        let extraction = TransferState {
            percent: 42,
            ..TransferState::default()
        };
        assert_eq!(
            TransferStatus::from_state("t", Direction::Download, &extraction).percent(),
            Some(42)
        );
    }
}
