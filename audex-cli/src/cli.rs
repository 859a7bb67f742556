//! Command-line interface definition.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use audex_pipeline::AudioFormat;

#[derive(Debug, Parser)]
#[command(
    name = "audex",
    about = "Retrieve a video and extract its audio track",
    version
)]
pub struct Args {
    /// Video URL (direct link, public cloud share, or anything the
    /// external extractor supports)
    #[arg(required_unless_present = "input", conflicts_with = "input")]
    pub url: Option<String>,

    /// Use a local video file instead of a URL
    #[arg(long, value_name = "PATH")]
    pub input: Option<PathBuf>,

    /// Directory the extracted audio file is written to
    #[arg(long, default_value = ".", value_name = "DIR")]
    pub out_dir: PathBuf,

    /// Maximum payload size in megabytes
    #[arg(long, default_value_t = 2000, value_name = "MB")]
    pub max_size: u64,

    /// Target audio format (mp3, aac)
    #[arg(long, default_value = "mp3")]
    pub format: AudioFormat,

    /// Audio bitrate, encoder syntax
    #[arg(long, default_value = "192k")]
    pub bitrate: String,

    /// Worker slots for concurrent jobs
    #[arg(long, default_value_t = 4)]
    pub concurrency: usize,

    /// Whole-fetch deadline in seconds
    #[arg(long, value_name = "SECS")]
    pub fetch_timeout: Option<u64>,

    /// Extraction deadline in seconds
    #[arg(long, value_name = "SECS")]
    pub extract_timeout: Option<u64>,

    /// Encoding deadline in seconds
    #[arg(long, default_value_t = 120, value_name = "SECS")]
    pub transcode_timeout: u64,

    /// Working directory root for temporary job artifacts
    #[arg(long, value_name = "DIR")]
    pub temp_root: Option<PathBuf>,

    /// Path to the encoder executable
    #[arg(long, value_name = "PATH")]
    pub ffmpeg_path: Option<String>,

    /// Path to the extractor executable
    #[arg(long, value_name = "PATH")]
    pub ytdlp_path: Option<String>,

    /// Access token passed through to cloud providers
    #[arg(long, value_name = "TOKEN")]
    pub access_token: Option<String>,

    /// Emit machine-readable JSON lines instead of human output
    #[arg(long)]
    pub json: bool,

    /// Increase log verbosity
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Log warnings and errors only
    #[arg(short, long, conflicts_with = "verbose")]
    pub quiet: bool,
}

impl Args {
    pub fn transcode_timeout_duration(&self) -> Option<Duration> {
        // 0 disables the deadline.
        (self.transcode_timeout > 0).then(|| Duration::from_secs(self.transcode_timeout))
    }
}
