//! Request lifecycle: transfer → resolve → inspect → thumbnail → deliver.
//!
//! [`MediaPipeline`] owns one instance of every engine and wires them around
//! the shared [`SessionRegistry`]. A progress monitor runs beside each
//! transfer and stops as soon as the transfer state disappears.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use crate::core::config::TransferSettings;
use crate::core::utils::{is_plain_file_name, session_temp_prefix};
use crate::download::error::TransferError;
use crate::download::http::DirectTransfer;
use crate::download::metadata::{MediaInspector, MediaMetadata};
use crate::download::progress::{Direction, ProgressMonitor, ProgressSink, TransferStatus, notify};
use crate::download::request::{MediaKind, TransferMode, TransferRequest};
use crate::download::resolver;
use crate::download::session::{SessionId, SessionRegistry, TransferGuard};
use crate::download::thumbnail::{FfmpegFrameExtractor, ThumbnailGenerator};
use crate::download::upload::{DeliveryTransport, UploadEngine};
use crate::download::ytdlp::{ExtractionRoutine, ExtractionTransfer, YtDlpExtractor};

/// A finished, post-processed artifact ready for delivery.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchedMedia {
    pub session: SessionId,
    /// Display title used in progress messages
    pub title: String,
    pub path: PathBuf,
    pub kind: MediaKind,
    /// Present for videos only
    pub metadata: Option<MediaMetadata>,
    pub thumbnail: Option<PathBuf>,
}

pub struct MediaPipeline {
    registry: Arc<SessionRegistry>,
    settings: Arc<TransferSettings>,
    direct: DirectTransfer,
    extraction: ExtractionTransfer,
    inspector: MediaInspector,
    thumbnails: ThumbnailGenerator,
    uploader: Option<UploadEngine>,
    sink: Arc<dyn ProgressSink>,
}

impl MediaPipeline {
    /// Pipeline with the yt-dlp, ffprobe and ffmpeg binaries named in
    /// `settings` and no delivery transport.
    pub fn new(
        registry: Arc<SessionRegistry>,
        settings: Arc<TransferSettings>,
        sink: Arc<dyn ProgressSink>,
    ) -> Result<Self, TransferError> {
        let direct = DirectTransfer::new(Arc::clone(&settings))?;
        let extraction = ExtractionTransfer::new(
            Arc::new(YtDlpExtractor::new(settings.ytdl_bin.clone())),
            Arc::clone(&settings),
        );
        let inspector = MediaInspector::ffprobe(settings.ffprobe_bin.clone(), settings.probe_timeout);
        let thumbnails = ThumbnailGenerator::new(
            Arc::new(FfmpegFrameExtractor::new(
                settings.ffmpeg_bin.clone(),
                settings.thumbnail_timeout,
            )),
            settings.thumbnail_min_size,
        );

        Ok(Self {
            registry,
            settings,
            direct,
            extraction,
            inspector,
            thumbnails,
            uploader: None,
            sink,
        })
    }

    pub fn with_extraction_routine(mut self, routine: Arc<dyn ExtractionRoutine>) -> Self {
        self.extraction = ExtractionTransfer::new(routine, Arc::clone(&self.settings));
        self
    }

    pub fn with_inspector(mut self, inspector: MediaInspector) -> Self {
        self.inspector = inspector;
        self
    }

    pub fn with_thumbnails(mut self, thumbnails: ThumbnailGenerator) -> Self {
        self.thumbnails = thumbnails;
        self
    }

    pub fn with_transport(mut self, transport: Arc<dyn DeliveryTransport>) -> Self {
        self.uploader = Some(UploadEngine::new(
            transport,
            Arc::clone(&self.registry),
            self.settings.poll_interval,
            self.settings.upload_step,
        ));
        self
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    pub fn settings(&self) -> &TransferSettings {
        &self.settings
    }

    /// Downloads and post-processes one request.
    ///
    /// Metadata and thumbnail failures are absorbed; transfer and resolution
    /// failures are returned with every session temporary already removed.
    /// A session that was cancelled before this call is not transferred at
    /// all. On any error the session's token is released.
    pub async fn fetch(&self, request: &TransferRequest) -> Result<FetchedMedia, TransferError> {
        let session = request.session;
        let title = request.file_name.clone();
        let started = Instant::now();

        notify(self.sink.as_ref(), session, TransferStatus::Initializing { title: title.clone() }).await;

        let result = self.fetch_inner(request, &title).await;
        // A concurrent transfer for the same session still owns the token.
        if result.is_err() && !self.registry.has_transfer(session) {
            self.registry.close_session(session);
        }

        match result {
            Ok(media) => {
                notify(
                    self.sink.as_ref(),
                    session,
                    TransferStatus::Completed {
                        title,
                        elapsed_secs: started.elapsed().as_secs(),
                    },
                )
                .await;
                Ok(media)
            }
            Err(e) if e.is_cancelled() => {
                log::info!("Request for session {} cancelled: {}", session, request.url);
                notify(self.sink.as_ref(), session, TransferStatus::Cancelled { title }).await;
                Err(e)
            }
            Err(e) => {
                log::warn!("Request for session {} failed [{}]: {}", session, e.subcategory(), e);
                notify(
                    self.sink.as_ref(),
                    session,
                    TransferStatus::Failed {
                        title,
                        error: e.to_string(),
                    },
                )
                .await;
                Err(e)
            }
        }
    }

    async fn fetch_inner(&self, request: &TransferRequest, title: &str) -> Result<FetchedMedia, TransferError> {
        let session = request.session;
        let dir = &self.settings.working_dir;
        if !is_plain_file_name(&request.file_name) {
            return Err(TransferError::InvalidFileName(request.file_name.clone()));
        }

        let cancel = self.registry.open_session(session);
        if cancel.is_cancelled() {
            return Err(TransferError::Cancelled);
        }

        fs_err::create_dir_all(dir)?;
        let final_path = dir.join(&request.file_name);

        // State must exist before the monitor's first sample.
        let guard = self.registry.begin_transfer(session)?;
        let monitor_stop = cancel.child_token();
        let monitor_task = {
            let monitor = ProgressMonitor::new(
                Arc::clone(&self.registry),
                self.settings.poll_interval,
                self.settings.download_step,
            );
            let sink = Arc::clone(&self.sink);
            let title = title.to_string();
            let stop = monitor_stop.clone();
            tokio::spawn(async move { monitor.run(session, &title, Direction::Download, stop, sink.as_ref()).await })
        };

        let transferred = self.transfer(request, &final_path, guard, &cancel).await;

        monitor_stop.cancel();
        match monitor_task.await {
            Ok(emitted) => log::debug!("Session {}: {} progress updates sent", session, emitted),
            Err(e) => log::debug!("Progress monitor task for session {} failed: {}", session, e),
        }

        let path = transferred?;

        if cancel.is_cancelled() {
            remove_quietly(&path).await;
            resolver::cleanup_partial_download(dir, session);
            return Err(TransferError::Cancelled);
        }

        notify(
            self.sink.as_ref(),
            session,
            TransferStatus::Processing {
                title: title.to_string(),
            },
        )
        .await;

        let kind = MediaKind::from_path(&path);
        let (metadata, thumbnail) = if kind == MediaKind::Video {
            let metadata = self.inspector.inspect(&path).await;
            let thumb_path = thumbnail_path(&path);
            let thumbnail = self
                .thumbnails
                .generate(&path, &thumb_path, metadata.duration_secs)
                .await;
            (Some(metadata), thumbnail)
        } else {
            (None, None)
        };

        if cancel.is_cancelled() {
            remove_quietly(&path).await;
            if let Some(thumb) = &thumbnail {
                remove_quietly(thumb).await;
            }
            return Err(TransferError::Cancelled);
        }

        Ok(FetchedMedia {
            session,
            title: title.to_string(),
            path,
            kind,
            metadata,
            thumbnail,
        })
    }

    /// Runs the engine for the request's mode and moves the result to
    /// `final_path`.
    async fn transfer(
        &self,
        request: &TransferRequest,
        final_path: &Path,
        guard: TransferGuard,
        cancel: &tokio_util::sync::CancellationToken,
    ) -> Result<PathBuf, TransferError> {
        let dir = &self.settings.working_dir;
        let session = request.session;

        match request.mode {
            TransferMode::Direct => {
                let temp = dir.join(format!("{}{}", session_temp_prefix(session), request.file_name));
                let downloaded = self.direct.download(&request.url, &temp, guard, cancel).await?;
                resolver::promote(&downloaded, final_path).inspect_err(|_| {
                    resolver::cleanup_partial_download(dir, session);
                })
            }
            TransferMode::Extract => {
                let base = self.extraction.download(request, guard, cancel).await?;
                resolver::resolve_output(dir, &base, session, final_path, self.settings.resolver_min_size).inspect_err(
                    |_| {
                        resolver::cleanup_partial_download(dir, session);
                    },
                )
            }
        }
    }

    /// Uploads a fetched artifact. `false` when no transport is configured,
    /// the session was cancelled or the transport rejected it.
    pub async fn deliver(&self, media: &FetchedMedia) -> bool {
        let Some(uploader) = &self.uploader else {
            log::warn!("[UPLOAD] No delivery transport configured, keeping {}", media.path.display());
            return false;
        };
        let cancel = self.registry.open_session(media.session);
        if cancel.is_cancelled() {
            log::info!("[UPLOAD] Session {} cancelled, not sending {}", media.session, media.path.display());
            return false;
        }
        uploader.upload(media, &cancel, self.sink.as_ref()).await
    }

    /// Removes the artifact and its thumbnail and forgets the session.
    pub async fn cleanup(&self, media: &FetchedMedia) {
        remove_quietly(&media.path).await;
        if let Some(thumb) = &media.thumbnail {
            remove_quietly(thumb).await;
        }
        self.registry.close_session(media.session);
    }
}

/// `<stem>.thumb.jpg` next to the video.
fn thumbnail_path(video: &Path) -> PathBuf {
    let stem = video
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "video".to_string());
    video.with_file_name(format!("{}.thumb.jpg", stem))
}

async fn remove_quietly(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            log::warn!("Failed to remove {}: {}", path.display(), e);
        }
    }
}
