//! Download, post-processing and delivery of media

pub mod error;
pub mod http;
pub mod metadata;
pub mod pipeline;
pub mod progress;
pub mod request;
pub mod resolver;
pub mod session;
pub mod thumbnail;
pub mod upload;
pub mod ytdlp;

// Re-exports for convenience
pub use error::TransferError;
pub use metadata::{MediaInspector, MediaMetadata, validate_media_file};
pub use pipeline::{FetchedMedia, MediaPipeline};
pub use progress::{LogSink, ProgressMonitor, ProgressSink, TransferStatus};
pub use request::{MediaKind, QualityTier, TransferMode, TransferRequest};
pub use session::{SessionId, SessionRegistry, TransferGuard};
pub use thumbnail::ThumbnailGenerator;
pub use upload::{DeliveryTransport, HttpDeliveryTransport, UploadEngine};
