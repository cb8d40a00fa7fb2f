//! Core utilities, configuration, and common functionality

pub mod config;
pub mod error;
pub mod format;
pub mod logging;
pub mod process;
pub mod utils;

// Re-exports for convenience
pub use config::*;
pub use error::{AppError, AppResult};
pub use format::{format_rate, format_size, format_time, progress_gauge};
pub use logging::{init_logger, log_tools_configuration};
pub use utils::{escape_filename, is_plain_file_name, sanitize_filename};
