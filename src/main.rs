use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use dotenvy::dotenv;
use simplelog::LevelFilter;
use tokio::signal;
use url::Url;

use mediarelay::cli::{Cli, Commands, ModeArg};
use mediarelay::core::logging::init_logger_with_level;
use mediarelay::core::utils::SANITIZED_NAME_MAX_LEN;
use mediarelay::core::{config, escape_filename, log_tools_configuration, sanitize_filename};
use mediarelay::download::metadata::{MediaInspector, validate_media_file};
use mediarelay::download::{
    HttpDeliveryTransport, LogSink, MediaPipeline, QualityTier, SessionRegistry, ThumbnailGenerator, TransferMode,
    TransferRequest,
};

/// Entry point for the mediarelay CLI
///
/// # Errors
/// Returns an error if initialization fails or the requested command fails.
#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse_args();

    // Load environment variables from .env if present, before any config is read
    let _ = dotenv();

    let level = if cli.verbose { LevelFilter::Debug } else { LevelFilter::Info };
    init_logger_with_level(&config::LOG_FILE_PATH, level)?;

    match cli.command {
        Commands::Fetch {
            url,
            quality,
            name,
            mode,
            session,
            upload,
        } => run_fetch(url, quality, name, mode, session, upload).await,
        Commands::Probe { path } => run_probe(&path).await,
        Commands::Thumbnail {
            video,
            output,
            duration,
        } => run_thumbnail(&video, &output, duration).await,
        Commands::Validate { path } => run_validate(&path).await,
    }
}

/// File name for a URL: its last path segment, escaped. Extraction results
/// always end up as `.mp4`, so their stem is sanitized and the extension forced.
fn default_file_name(url: &Url, mode: TransferMode) -> String {
    let segment = url
        .path_segments()
        .and_then(|segments| segments.last())
        .filter(|s| !s.is_empty())
        .unwrap_or("download");
    let mut name = escape_filename(segment);
    if mode == TransferMode::Extract {
        let ext = Path::new(&name).extension().map(|e| e.to_string_lossy().to_lowercase());
        if !matches!(ext.as_deref(), Some("mp4")) {
            let stem = Path::new(&name)
                .file_stem()
                .map(|s| sanitize_filename(&s.to_string_lossy(), SANITIZED_NAME_MAX_LEN))
                .filter(|s| !s.trim().is_empty())
                .unwrap_or_else(|| "download".to_string());
            name = format!("{}.{}", stem, config::extraction::MERGE_OUTPUT_FORMAT);
        }
    }
    name
}

/// The user's `--name` with path separators escaped, or a name derived from the URL.
fn requested_file_name(name: Option<String>, url: &Url, mode: TransferMode) -> String {
    match name {
        Some(name) => escape_filename(&name),
        None => default_file_name(url, mode),
    }
}

async fn run_fetch(
    url: String,
    quality: String,
    name: Option<String>,
    mode: ModeArg,
    session: i64,
    upload: bool,
) -> Result<()> {
    log_tools_configuration();

    let url = Url::parse(&url).with_context(|| format!("invalid URL: {}", url))?;
    let mode = mode.into_mode().unwrap_or_else(|| TransferMode::infer(&url));
    let file_name = requested_file_name(name, &url, mode);
    let request = TransferRequest::new(url, QualityTier::from_token(&quality), file_name, session).with_mode(mode);

    let registry = SessionRegistry::new();
    let settings = Arc::new(config::TransferSettings::default());
    let mut pipeline = MediaPipeline::new(Arc::clone(&registry), settings, Arc::new(LogSink))?;

    if upload {
        match HttpDeliveryTransport::from_env()? {
            Some(transport) => pipeline = pipeline.with_transport(Arc::new(transport)),
            None => anyhow::bail!("--upload needs UPLOAD_URL to be set"),
        }
    }

    registry.reset_session(session);
    let ctrl_c = {
        let registry = Arc::clone(&registry);
        tokio::spawn(async move {
            if signal::ctrl_c().await.is_ok() {
                log::info!("Ctrl-C received, cancelling session {}", session);
                registry.cancel(session);
            }
        })
    };

    log::info!(
        "Fetching {} ({}, {}) into {}",
        request.url,
        request.mode,
        request.quality,
        request.file_name
    );

    let result = pipeline.fetch(&request).await;
    let outcome = match result {
        Ok(media) => {
            println!("{}", media.path.display());
            if let Some(thumb) = &media.thumbnail {
                println!("{}", thumb.display());
            }
            if upload {
                if pipeline.deliver(&media).await {
                    pipeline.cleanup(&media).await;
                    Ok(())
                } else if registry.is_cancelled(session) {
                    log::info!("Cancelled before upload, keeping {}", media.path.display());
                    Ok(())
                } else {
                    Err(anyhow::anyhow!("upload of {} failed", media.path.display()))
                }
            } else {
                Ok(())
            }
        }
        Err(e) if e.is_cancelled() => {
            log::info!("Cancelled");
            Ok(())
        }
        Err(e) => Err(e.into()),
    };

    ctrl_c.abort();
    outcome
}

async fn run_probe(path: &Path) -> Result<()> {
    let inspector = MediaInspector::default();
    let metadata = inspector.inspect(path).await;
    println!("{}", serde_json::to_string_pretty(&metadata)?);
    Ok(())
}

async fn run_thumbnail(video: &Path, output: &Path, duration: Option<u64>) -> Result<()> {
    let duration = match duration {
        Some(d) => d,
        None => MediaInspector::default().inspect(video).await.duration_secs,
    };
    match ThumbnailGenerator::default().generate(video, output, duration).await {
        Some(path) => {
            println!("{}", path.display());
            Ok(())
        }
        None => anyhow::bail!("no thumbnail could be generated for {}", video.display()),
    }
}

async fn run_validate(path: &Path) -> Result<()> {
    let valid = validate_media_file(
        path,
        &config::FFPROBE_BIN,
        config::probe::validate_timeout(),
        config::resolve::MIN_CANDIDATE_BYTES,
    )
    .await;
    println!("{}", if valid { "valid" } else { "invalid" });
    if valid {
        Ok(())
    } else {
        anyhow::bail!("{} is not playable media", path.display())
    }
}
