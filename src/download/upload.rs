//! Upload engine: streams a local artifact to the delivery transport while
//! reporting throttled progress.

use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::{Body, Client};
use tokio::io::{AsyncRead, ReadBuf};
use tokio::time::MissedTickBehavior;
use tokio_util::io::ReaderStream;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::core::config;
use crate::core::error::{AppError, AppResult};
use crate::core::format::{format_rate, format_size};
use crate::download::metadata::MediaMetadata;
use crate::download::pipeline::FetchedMedia;
use crate::download::progress::{Direction, ProgressSink, ProgressThrottle, TransferStatus, notify};
use crate::download::request::MediaKind;
use crate::download::session::{SessionId, SessionRegistry};

/// Tracks the number of bytes sent during an upload operation.
///
/// Atomic so the reporting loop can read it while the transport's body
/// stream advances it.
#[derive(Debug, Clone, Default)]
pub struct UploadProgress {
    bytes_sent: Arc<AtomicU64>,
}

impl UploadProgress {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_bytes(&self, bytes: usize) {
        self.bytes_sent.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn bytes_sent(&self) -> u64 {
        self.bytes_sent.load(Ordering::Relaxed)
    }
}

/// An `AsyncRead` wrapper that counts every byte handed to the consumer.
pub struct ProgressReader<R> {
    inner: R,
    progress: UploadProgress,
}

impl<R> ProgressReader<R> {
    pub fn new(inner: R, progress: UploadProgress) -> Self {
        Self { inner, progress }
    }
}

impl<R: AsyncRead + Unpin> AsyncRead for ProgressReader<R> {
    fn poll_read(mut self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<std::io::Result<()>> {
        let before = buf.filled().len();
        let poll = Pin::new(&mut self.inner).poll_read(cx, buf);
        if let Poll::Ready(Ok(())) = &poll {
            let after = buf.filled().len();
            if after > before {
                self.progress.add_bytes(after - before);
            }
        }
        poll
    }
}

/// A file about to be uploaded, with its progress counter.
#[derive(Debug, Clone)]
pub struct UploadFile {
    pub path: PathBuf,
    pub file_name: String,
    pub size: u64,
    pub progress: UploadProgress,
}

impl UploadFile {
    pub async fn open(path: &Path, progress: UploadProgress) -> AppResult<Self> {
        let size = tokio::fs::metadata(path).await?.len();
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "file".to_string());
        Ok(Self {
            path: path.to_path_buf(),
            file_name,
            size,
            progress,
        })
    }

    /// Opens the file behind a counting reader.
    pub async fn reader(&self) -> AppResult<ProgressReader<tokio::fs::File>> {
        let file = tokio::fs::File::open(&self.path).await?;
        Ok(ProgressReader::new(file, self.progress.clone()))
    }
}

/// Where finished artifacts go (a chat, an HTTP endpoint, a test double).
#[async_trait]
pub trait DeliveryTransport: Send + Sync {
    async fn send_video(
        &self,
        session: SessionId,
        file: UploadFile,
        metadata: MediaMetadata,
        thumbnail: Option<&Path>,
    ) -> AppResult<()>;

    async fn send_photo(&self, session: SessionId, file: UploadFile) -> AppResult<()>;

    async fn send_document(&self, session: SessionId, file: UploadFile) -> AppResult<()>;
}

/// Posts artifacts as streamed multipart uploads to one endpoint.
///
/// Form fields: `session`, `kind`, `file`, and for videos `duration`,
/// `width`, `height` and an optional `thumbnail` part.
#[derive(Debug, Clone)]
pub struct HttpDeliveryTransport {
    client: Client,
    endpoint: Url,
}

impl HttpDeliveryTransport {
    pub fn new(endpoint: Url) -> AppResult<Self> {
        let client = Client::builder()
            .user_agent(config::download::USER_AGENT)
            .connect_timeout(config::download::connect_timeout())
            .build()?;
        Ok(Self { client, endpoint })
    }

    /// Transport for `UPLOAD_URL`, `None` when it is not configured.
    pub fn from_env() -> AppResult<Option<Self>> {
        match config::UPLOAD_URL.as_deref() {
            Some(raw) => Ok(Some(Self::new(Url::parse(raw)?)?)),
            None => Ok(None),
        }
    }

    async fn file_part(file: &UploadFile) -> AppResult<Part> {
        let reader = file.reader().await?;
        let stream = ReaderStream::with_capacity(reader, config::upload::CHUNK_SIZE);
        Ok(Part::stream_with_length(Body::wrap_stream(stream), file.size).file_name(file.file_name.clone()))
    }

    async fn post(&self, form: Form) -> AppResult<()> {
        let response = self.client.post(self.endpoint.as_str()).multipart(form).send().await?;
        response.error_for_status()?;
        Ok(())
    }
}

#[async_trait]
impl DeliveryTransport for HttpDeliveryTransport {
    async fn send_video(
        &self,
        session: SessionId,
        file: UploadFile,
        metadata: MediaMetadata,
        thumbnail: Option<&Path>,
    ) -> AppResult<()> {
        let mut form = Form::new()
            .text("session", session.to_string())
            .text("kind", MediaKind::Video.to_string())
            .text("duration", metadata.duration_secs.to_string())
            .text("width", metadata.width.to_string())
            .text("height", metadata.height.to_string())
            .part("file", Self::file_part(&file).await?);

        if let Some(thumb) = thumbnail {
            match tokio::fs::read(thumb).await {
                Ok(bytes) => form = form.part("thumbnail", Part::bytes(bytes).file_name("thumbnail.jpg")),
                Err(e) => log::warn!("[UPLOAD] Thumbnail {} unreadable, sending without: {}", thumb.display(), e),
            }
        }

        self.post(form).await
    }

    async fn send_photo(&self, session: SessionId, file: UploadFile) -> AppResult<()> {
        let form = Form::new()
            .text("session", session.to_string())
            .text("kind", MediaKind::Image.to_string())
            .part("file", Self::file_part(&file).await?);
        self.post(form).await
    }

    async fn send_document(&self, session: SessionId, file: UploadFile) -> AppResult<()> {
        let form = Form::new()
            .text("session", session.to_string())
            .text("kind", MediaKind::Document.to_string())
            .part("file", Self::file_part(&file).await?);
        self.post(form).await
    }
}

/// Single-attempt upload with progress reporting.
#[derive(Clone)]
pub struct UploadEngine {
    transport: Arc<dyn DeliveryTransport>,
    registry: Arc<SessionRegistry>,
    interval: Duration,
    step: u8,
}

impl UploadEngine {
    pub fn new(
        transport: Arc<dyn DeliveryTransport>,
        registry: Arc<SessionRegistry>,
        interval: Duration,
        step: u8,
    ) -> Self {
        Self {
            transport,
            registry,
            interval,
            step,
        }
    }

    /// Uploads `media` and reports whether the transport accepted it.
    ///
    /// Failures are logged, never returned; retrying and telling the user is
    /// the caller's job.
    pub async fn upload(&self, media: &FetchedMedia, cancel: &CancellationToken, sink: &dyn ProgressSink) -> bool {
        let session = media.session;
        let progress = UploadProgress::new();
        let file = match UploadFile::open(&media.path, progress.clone()).await {
            Ok(file) => file,
            Err(e) => {
                log::warn!("[UPLOAD] Cannot open {}: {}", media.path.display(), e);
                return false;
            }
        };
        let total = file.size;

        let guard = match self.registry.begin_transfer(session) {
            Ok(guard) => guard,
            Err(e) => {
                log::warn!("[UPLOAD] {}", e);
                return false;
            }
        };

        log::info!(
            "[UPLOAD] Sending {} ({}) as {} for session {}",
            media.path.display(),
            format_size(total),
            media.kind,
            session
        );

        let started = Instant::now();
        let send = self.dispatch(media, file);
        tokio::pin!(send);

        let mut throttle = ProgressThrottle::new(self.step);
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let result = loop {
            tokio::select! {
                result = &mut send => break result,
                _ = cancel.cancelled() => break Err(AppError::Validation("upload cancelled".to_string())),
                _ = ticker.tick() => {
                    guard.record(progress.bytes_sent().min(total), total, started.elapsed());
                    if let Some(state) = self.registry.transfer_state(session) {
                        let status = TransferStatus::from_state(&media.title, Direction::Upload, &state);
                        if throttle.should_emit(status.percent().unwrap_or(0)) {
                            notify(sink, session, status).await;
                        }
                    }
                }
            }
        };
        drop(guard);

        let elapsed = started.elapsed();
        match result {
            Ok(()) => {
                let rate = total as f64 / elapsed.as_secs_f64().max(0.001);
                log::info!(
                    "[UPLOAD] ✅ {} sent in {:.1}s ({})",
                    media.path.display(),
                    elapsed.as_secs_f64(),
                    format_rate(rate)
                );
                true
            }
            Err(e) => {
                if cancel.is_cancelled() {
                    log::info!("[UPLOAD] Cancelled for session {}", session);
                } else {
                    log::warn!(
                        "[UPLOAD] ❌ {} failed after {:.1}s ({} of {} sent): {}",
                        media.path.display(),
                        elapsed.as_secs_f64(),
                        format_size(progress.bytes_sent()),
                        format_size(total),
                        e
                    );
                }
                false
            }
        }
    }

    async fn dispatch(&self, media: &FetchedMedia, file: UploadFile) -> AppResult<()> {
        match media.kind {
            MediaKind::Video => {
                let metadata = media.metadata.unwrap_or_default();
                self.transport
                    .send_video(media.session, file, metadata, media.thumbnail.as_deref())
                    .await
            }
            MediaKind::Image => self.transport.send_photo(media.session, file).await,
            MediaKind::Document => self.transport.send_document(media.session, file).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use tokio::io::AsyncReadExt;

    // ==================== ProgressReader Tests ====================

    #[tokio::test]
    async fn test_progress_reader_counts_bytes() {
        let data = vec![7u8; 10_000];
        let progress = UploadProgress::new();
        let mut reader = ProgressReader::new(&data[..], progress.clone());
        let mut sink = Vec::new();
        reader.read_to_end(&mut sink).await.unwrap();
        assert_eq!(sink.len(), 10_000);
        assert_eq!(progress.bytes_sent(), 10_000);
    }

    // ==================== Engine Tests ====================

    #[derive(Default)]
    struct RecordingTransport {
        calls: Mutex<Vec<(&'static str, SessionId, u64)>>,
        fail: bool,
    }

    impl RecordingTransport {
        async fn drain(&self, kind: &'static str, session: SessionId, file: UploadFile) -> AppResult<()> {
            let mut reader = file.reader().await?;
            let mut buf = Vec::new();
            reader.read_to_end(&mut buf).await?;
            self.calls.lock().unwrap().push((kind, session, file.progress.bytes_sent()));
            if self.fail {
                return Err(AppError::Validation("rejected".into()));
            }
            Ok(())
        }
    }

    #[async_trait]
    impl DeliveryTransport for RecordingTransport {
        async fn send_video(
            &self,
            session: SessionId,
            file: UploadFile,
            _metadata: MediaMetadata,
            _thumbnail: Option<&Path>,
        ) -> AppResult<()> {
            self.drain("video", session, file).await
        }

        async fn send_photo(&self, session: SessionId, file: UploadFile) -> AppResult<()> {
            self.drain("photo", session, file).await
        }

        async fn send_document(&self, session: SessionId, file: UploadFile) -> AppResult<()> {
            self.drain("document", session, file).await
        }
    }

    fn media(path: PathBuf, kind: MediaKind) -> FetchedMedia {
        FetchedMedia {
            session: 11,
            title: "clip".into(),
            path,
            kind,
            metadata: None,
            thumbnail: None,
        }
    }

    #[tokio::test]
    async fn test_upload_dispatches_by_kind() {
        let dir = tempfile::tempdir().unwrap();
        let photo = dir.path().join("p.jpg");
        std::fs::write(&photo, vec![1u8; 4096]).unwrap();

        let transport = Arc::new(RecordingTransport::default());
        let registry = SessionRegistry::new();
        let engine = UploadEngine::new(transport.clone(), registry.clone(), Duration::from_millis(10), 4);

        let sent = engine
            .upload(&media(photo, MediaKind::Image), &CancellationToken::new(), &crate::download::progress::LogSink)
            .await;

        assert!(sent);
        assert_eq!(*transport.calls.lock().unwrap(), vec![("photo", 11, 4096)]);
        assert!(!registry.has_transfer(11));
    }

    #[tokio::test]
    async fn test_upload_failure_reports_false() {
        let dir = tempfile::tempdir().unwrap();
        let doc = dir.path().join("d.pdf");
        std::fs::write(&doc, b"doc").unwrap();

        let transport = Arc::new(RecordingTransport {
            fail: true,
            ..Default::default()
        });
        let engine = UploadEngine::new(transport, SessionRegistry::new(), Duration::from_millis(10), 4);

        assert!(
            !engine
                .upload(&media(doc, MediaKind::Document), &CancellationToken::new(), &crate::download::progress::LogSink)
                .await
        );
    }

    #[tokio::test]
    async fn test_upload_missing_file_reports_false() {
        let engine = UploadEngine::new(
            Arc::new(RecordingTransport::default()),
            SessionRegistry::new(),
            Duration::from_millis(10),
            4,
        );
        let missing = media(PathBuf::from("/definitely/missing.mp4"), MediaKind::Video);
        assert!(
            !engine
                .upload(&missing, &CancellationToken::new(), &crate::download::progress::LogSink)
                .await
        );
    }
}
