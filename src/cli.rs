use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

use crate::download::request::TransferMode;

#[derive(Parser)]
#[command(name = "mediarelay")]
#[command(author, version, about = "Download, inspect, thumbnail and relay media files", long_about = None)]
pub struct Cli {
    /// Log at debug level
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Download a URL and post-process the result
    Fetch {
        /// Source URL
        url: String,

        /// Quality tier (360p, 480p, 720p, 1080p)
        #[arg(short, long, default_value = "720p")]
        quality: String,

        /// Output file name inside DOWNLOAD_DIR, path separators escaped (derived from the URL if omitted)
        #[arg(short, long)]
        name: Option<String>,

        /// Transfer mode
        #[arg(short, long, value_enum, default_value_t = ModeArg::Auto)]
        mode: ModeArg,

        /// Session id owning the request
        #[arg(short, long, default_value_t = 1)]
        session: i64,

        /// Upload the result to UPLOAD_URL afterwards
        #[arg(long)]
        upload: bool,
    },

    /// Print media metadata as JSON
    Probe {
        /// Media file
        path: PathBuf,
    },

    /// Generate a thumbnail for a video
    Thumbnail {
        /// Video file
        video: PathBuf,

        /// Output image
        output: PathBuf,

        /// Duration in seconds (probed if omitted)
        #[arg(short, long)]
        duration: Option<u64>,
    },

    /// Check that a file is playable media
    Validate {
        /// Media file
        path: PathBuf,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ModeArg {
    /// Pick from the URL shape
    Auto,
    Direct,
    Extract,
}

impl ModeArg {
    /// Explicit mode, `None` for auto.
    pub fn into_mode(self) -> Option<TransferMode> {
        match self {
            ModeArg::Auto => None,
            ModeArg::Direct => Some(TransferMode::Direct),
            ModeArg::Extract => Some(TransferMode::Extract),
        }
    }
}

impl Cli {
    pub fn parse_args() -> Self {
        Self::parse()
    }
}
