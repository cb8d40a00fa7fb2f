use thiserror::Error;

/// Structured error type for transfer operations.
///
/// `Cancelled` is a cooperative stop requested by the session owner, not a
/// failure; callers render it differently and never log it as an error.
#[derive(Debug, Error)]
pub enum TransferError {
    /// The session's cancellation token fired before the transfer finished
    #[error("cancelled")]
    Cancelled,
    /// Non-success response or unreachable host
    #[error("source unavailable: {message}")]
    SourceUnavailable {
        message: String,
        /// HTTP status if the server answered at all
        status: Option<u16>,
    },
    /// Connect, read or whole-transfer timeout
    #[error("timed out: {0}")]
    Timeout(String),
    /// Transfer completed but the result is not larger than `min` bytes
    #[error("output too small: {size} bytes (must exceed {min})")]
    OutputTooSmall { size: u64, min: u64 },
    /// No candidate artifact survived output resolution
    #[error("no output found: {0}")]
    NoOutputFound(String),
    /// Requested file name is not a single path component
    #[error("invalid file name: {0:?}")]
    InvalidFileName(String),
    /// Unexpected failure from the network or extraction layer
    #[error("internal error: {0}")]
    Internal(String),
}

impl TransferError {
    pub fn unavailable(message: impl Into<String>, status: Option<u16>) -> Self {
        TransferError::SourceUnavailable {
            message: message.into(),
            status,
        }
    }

    /// Returns subcategory for logs and metrics
    pub fn subcategory(&self) -> &'static str {
        match self {
            TransferError::Cancelled => "cancelled",
            TransferError::SourceUnavailable { .. } => "source_unavailable",
            TransferError::Timeout(_) => "timeout",
            TransferError::OutputTooSmall { .. } => "output_too_small",
            TransferError::NoOutputFound(_) => "no_output_found",
            TransferError::InvalidFileName(_) => "invalid_file_name",
            TransferError::Internal(_) => "internal",
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, TransferError::Cancelled)
    }

    /// Whether a caller-level retry may help.
    ///
    /// Timeouts always qualify. An unavailable source qualifies when the host
    /// was unreachable, or answered with 408, 429 or a 5xx status.
    pub fn is_retryable(&self) -> bool {
        match self {
            TransferError::Timeout(_) => true,
            TransferError::SourceUnavailable { status, .. } => match status {
                None => true,
                Some(code) => *code == 408 || *code == 429 || (500..600).contains(code),
            },
            _ => false,
        }
    }
}

impl From<std::io::Error> for TransferError {
    fn from(err: std::io::Error) -> Self {
        TransferError::Internal(err.to_string())
    }
}

impl From<reqwest::Error> for TransferError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            TransferError::Timeout(err.to_string())
        } else if err.is_connect() {
            TransferError::unavailable(err.to_string(), None)
        } else if let Some(status) = err.status() {
            TransferError::unavailable(err.to_string(), Some(status.as_u16()))
        } else {
            TransferError::Internal(err.to_string())
        }
    }
}
