use thiserror::Error;

use crate::download::error::TransferError;

/// Centralized error types for the application
///
/// Transfer-level failures keep their own taxonomy (`TransferError`) so callers
/// can tell cancellation from real failures; everything else the binary and
/// the glue around the core can hit lands here.
///
/// # Example
///
/// ```no_run
/// use mediarelay::core::error::AppError;
///
/// fn handle_error(err: AppError) {
///     eprintln!("Error: {}", err);
/// }
/// ```
#[derive(Error, Debug)]
pub enum AppError {
    /// Download/upload pipeline errors
    #[error("Transfer error: {0}")]
    Transfer(#[from] TransferError),

    /// HTTP client errors
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// URL parsing errors
    #[error("URL parsing error: {0}")]
    Url(#[from] url::ParseError),

    /// JSON errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// External process failures (spawn, exit code, timeout)
    #[error("Process error: {0}")]
    Process(String),

    /// Anyhow errors (for general error handling)
    #[error("Application error: {0}")]
    Anyhow(#[from] anyhow::Error),

    /// Validation errors
    #[error("Validation error: {0}")]
    Validation(String),
}

/// Type alias for Result with AppError
pub type AppResult<T> = Result<T, AppError>;

impl From<String> for AppError {
    fn from(err: String) -> Self {
        AppError::Validation(err)
    }
}

impl From<&str> for AppError {
    fn from(err: &str) -> Self {
        AppError::Validation(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transfer_error_wraps() {
        let err: AppError = TransferError::Cancelled.into();
        assert!(matches!(err, AppError::Transfer(TransferError::Cancelled)));
        assert_eq!(err.to_string(), "Transfer error: cancelled");
    }

    #[test]
    fn test_from_str_is_validation() {
        let err: AppError = "bad quality".into();
        assert!(matches!(err, AppError::Validation(_)));
        assert_eq!(err.to_string(), "Validation error: bad quality");
    }
}
