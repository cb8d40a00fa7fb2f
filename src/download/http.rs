//! Direct HTTP transfer: stream a response body into the destination file.
//!
//! Every chunk is a cancellation checkpoint. A cancelled or failed transfer
//! removes the partial file before returning.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use futures_util::StreamExt;
use reqwest::Client;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::core::config::TransferSettings;
use crate::download::error::TransferError;
use crate::download::session::TransferGuard;

/// Streaming HTTP downloader with a shared connection pool.
#[derive(Debug, Clone)]
pub struct DirectTransfer {
    client: Client,
    settings: Arc<TransferSettings>,
}

impl DirectTransfer {
    pub fn new(settings: Arc<TransferSettings>) -> Result<Self, TransferError> {
        let client = Client::builder()
            .user_agent(settings.user_agent.as_str())
            .timeout(settings.total_timeout)
            .connect_timeout(settings.connect_timeout)
            .pool_max_idle_per_host(settings.pool_max_idle_per_host)
            .danger_accept_invalid_certs(settings.accept_invalid_certs)
            .build()
            .map_err(|e| TransferError::Internal(format!("HTTP client build failed: {}", e)))?;

        Ok(Self { client, settings })
    }

    /// Downloads `url` into `dest`.
    ///
    /// Consumes the transfer guard: the session's transfer state lives exactly
    /// as long as this call.
    pub async fn download(
        &self,
        url: &Url,
        dest: &Path,
        guard: TransferGuard,
        cancel: &CancellationToken,
    ) -> Result<PathBuf, TransferError> {
        log::info!("📥 Direct download for session {}: {}", guard.session(), url);

        let result = self.stream_to_file(url, dest, &guard, cancel).await;
        drop(guard);

        match result {
            Ok(size) if size <= self.settings.min_direct_size => {
                remove_partial(dest).await;
                log::warn!(
                    "Direct download too small ({} bytes, need more than {}), treating as error page: {}",
                    size,
                    self.settings.min_direct_size,
                    url
                );
                Err(TransferError::OutputTooSmall {
                    size,
                    min: self.settings.min_direct_size,
                })
            }
            Ok(size) => {
                log::info!("✅ Direct download finished: {} ({} bytes)", dest.display(), size);
                Ok(dest.to_path_buf())
            }
            Err(e) => {
                remove_partial(dest).await;
                if e.is_cancelled() {
                    log::info!("Direct download cancelled: {}", url);
                } else {
                    log::warn!("Direct download failed [{}]: {}", e.subcategory(), e);
                }
                Err(e)
            }
        }
    }

    async fn stream_to_file(
        &self,
        url: &Url,
        dest: &Path,
        guard: &TransferGuard,
        cancel: &CancellationToken,
    ) -> Result<u64, TransferError> {
        if cancel.is_cancelled() {
            return Err(TransferError::Cancelled);
        }

        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(TransferError::Cancelled),
            response = self.client.get(url.as_str()).send() => response?,
        };

        let status = response.status();
        if !status.is_success() {
            return Err(TransferError::unavailable(
                format!("HTTP {} for {}", status, url),
                Some(status.as_u16()),
            ));
        }

        let total = response.content_length().unwrap_or(0);
        guard.record(0, total, std::time::Duration::ZERO);

        let mut file = fs_err::tokio::File::create(dest).await?;
        let mut stream = response.bytes_stream();
        let started = Instant::now();
        let mut written: u64 = 0;

        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(TransferError::Cancelled),
                next = tokio::time::timeout(self.settings.read_timeout, stream.next()) => next,
            };

            let bytes = match next {
                Err(_) => {
                    return Err(TransferError::Timeout(format!(
                        "no data for {}s",
                        self.settings.read_timeout.as_secs()
                    )));
                }
                Ok(None) => break,
                Ok(Some(chunk)) => chunk?,
            };

            for piece in bytes.chunks(self.settings.chunk_size.max(1)) {
                if cancel.is_cancelled() {
                    return Err(TransferError::Cancelled);
                }
                file.write_all(piece).await?;
                written += piece.len() as u64;
                guard.record(written, total, started.elapsed());
            }
        }

        file.flush().await?;
        Ok(written)
    }
}

async fn remove_partial(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => log::debug!("Removed partial file {}", path.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => log::warn!("Failed to remove partial file {}: {}", path.display(), e),
    }
}
