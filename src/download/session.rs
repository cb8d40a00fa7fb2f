//! Per-session cancellation tokens and live transfer state.
//!
//! [`SessionRegistry`] is the only state shared between tasks: the control
//! surface cancels through it, transfer engines publish progress through a
//! [`TransferGuard`], and the progress monitor reads from it. The guard removes
//! its entry on drop, so a finished transfer never leaves a stale state behind.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio_util::sync::CancellationToken;

use crate::core::format::percent_of;
use crate::download::error::TransferError;

/// Identifier of the session (chat/user) that owns a request.
pub type SessionId = i64;

/// Snapshot of one running transfer.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TransferState {
    /// Bytes written so far
    pub transferred: u64,
    /// Total bytes, 0 when the source did not announce a length
    pub total: u64,
    /// Instantaneous rate estimate (bytes per second)
    pub rate: f64,
    /// Remaining-time estimate
    pub eta_secs: Option<u64>,
    /// Last percentage reported by the producer
    pub percent: u8,
}

impl TransferState {
    /// Records a byte-count sample and recomputes rate, ETA and percentage
    /// from the wall-clock time elapsed since the transfer started.
    pub fn record(&mut self, transferred: u64, total: u64, elapsed: Duration) {
        self.transferred = transferred;
        self.total = total;
        let secs = elapsed.as_secs_f64();
        self.rate = if secs > 0.0 { transferred as f64 / secs } else { 0.0 };
        self.eta_secs = if self.rate > 0.0 && total > transferred {
            Some(((total - transferred) as f64 / self.rate).round() as u64)
        } else {
            None
        };
        self.percent = percent_of(transferred, total);
    }
}

/// Registry of session cancellation tokens and live transfer states.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    tokens: DashMap<SessionId, CancellationToken>,
    transfers: DashMap<SessionId, TransferState>,
}

impl SessionRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Returns the session's token, creating one if needed.
    ///
    /// A cancelled token is returned as is, so a cancel issued before the
    /// pipeline reaches this point still stops it. Only [`reset_session`]
    /// clears the flag.
    ///
    /// [`reset_session`]: SessionRegistry::reset_session
    pub fn open_session(&self, session: SessionId) -> CancellationToken {
        self.tokens.entry(session).or_default().value().clone()
    }

    /// Starts a new request for the session with a clean flag, replacing a
    /// token cancelled by an earlier request.
    pub fn reset_session(&self, session: SessionId) -> CancellationToken {
        let token = CancellationToken::new();
        self.tokens.insert(session, token.clone());
        token
    }

    pub fn cancellation(&self, session: SessionId) -> Option<CancellationToken> {
        self.tokens.get(&session).map(|t| t.clone())
    }

    /// Clears the session's flag. Returns false if the session is unknown.
    pub fn cancel(&self, session: SessionId) -> bool {
        match self.tokens.get(&session) {
            Some(token) => {
                token.cancel();
                log::info!("Session {} cancelled", session);
                true
            }
            None => false,
        }
    }

    pub fn is_cancelled(&self, session: SessionId) -> bool {
        self.tokens.get(&session).is_some_and(|t| t.is_cancelled())
    }

    /// Forgets the session's token once the whole request lifecycle is over.
    pub fn close_session(&self, session: SessionId) {
        self.tokens.remove(&session);
    }

    /// Creates the transfer state for a session.
    ///
    /// Only one transfer per session may run at a time. The state is removed
    /// when the returned guard is dropped.
    pub fn begin_transfer(self: &Arc<Self>, session: SessionId) -> Result<TransferGuard, TransferError> {
        match self.transfers.entry(session) {
            Entry::Occupied(_) => Err(TransferError::Internal(format!(
                "session {} already has an active transfer",
                session
            ))),
            Entry::Vacant(entry) => {
                entry.insert(TransferState::default());
                Ok(TransferGuard {
                    registry: Arc::clone(self),
                    session,
                })
            }
        }
    }

    /// Copy of the current transfer state, `None` once the transfer ended.
    pub fn transfer_state(&self, session: SessionId) -> Option<TransferState> {
        self.transfers.get(&session).map(|s| s.clone())
    }

    pub fn has_transfer(&self, session: SessionId) -> bool {
        self.transfers.contains_key(&session)
    }

    pub fn active_transfers(&self) -> usize {
        self.transfers.len()
    }

    fn update_transfer(&self, session: SessionId, f: impl FnOnce(&mut TransferState)) {
        if let Some(mut state) = self.transfers.get_mut(&session) {
            f(&mut state);
        }
    }

    fn remove_transfer(&self, session: SessionId) {
        self.transfers.remove(&session);
    }
}

/// Write handle for one session's transfer state. Removes the state on drop.
#[derive(Debug)]
pub struct TransferGuard {
    registry: Arc<SessionRegistry>,
    session: SessionId,
}

impl TransferGuard {
    pub fn session(&self) -> SessionId {
        self.session
    }

    pub fn update(&self, f: impl FnOnce(&mut TransferState)) {
        self.registry.update_transfer(self.session, f);
    }

    pub fn record(&self, transferred: u64, total: u64, elapsed: Duration) {
        self.update(|state| state.record(transferred, total, elapsed));
    }
}

impl Drop for TransferGuard {
    fn drop(&mut self) {
        self.registry.remove_transfer(self.session);
    }
}
