//! # Transcoder
//!
//! Wraps the external audio encoder (ffmpeg) and manages its lifecycle:
//! start, heartbeat, timeout, forced termination, output validation.
//!
//! Progress is heartbeat-based. The encoder reports no usable percentage
//! for audio extraction, so [`transcode`] yields a `Processing` event per
//! liveness poll while the child runs, then a single `Done` carrying the
//! validated [`TranscodeResult`]. The sequence is finite and cannot be
//! restarted.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::LazyLock;
use std::time::Duration;

use futures::Stream;
use humansize::{BINARY, format_size};
use regex::Regex;
use tokio::io::AsyncReadExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use process_utils::{kill_with_grace, output_tail};

const DEFAULT_BINARY: &str = "ffmpeg";
const BINARY_ENV: &str = "AUDEX_FFMPEG";
const STDERR_TAIL_BYTES: usize = 512;

/// Target audio container/codec pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display, strum::EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum AudioFormat {
    Mp3,
    Aac,
}

impl AudioFormat {
    pub fn codec(&self) -> &'static str {
        match self {
            AudioFormat::Mp3 => "libmp3lame",
            AudioFormat::Aac => "aac",
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            AudioFormat::Mp3 => "mp3",
            AudioFormat::Aac => "m4a",
        }
    }
}

#[derive(Debug, Clone)]
pub struct TranscodeConfig {
    /// Encoder executable; `AUDEX_FFMPEG` overrides the default lookup.
    pub binary_path: String,
    pub format: AudioFormat,
    /// Audio bitrate, encoder syntax (`192k`).
    pub bitrate: String,
    pub sample_rate: u32,
    pub channels: u32,
    /// Whole-encode deadline; `None` means wait for the encoder.
    pub timeout: Option<Duration>,
    /// Liveness poll interval; one `Processing` heartbeat per poll.
    pub poll_interval: Duration,
    /// How long a killed child gets before it is declared unresponsive.
    pub kill_grace: Duration,
}

impl Default for TranscodeConfig {
    fn default() -> Self {
        Self {
            binary_path: std::env::var(BINARY_ENV).unwrap_or_else(|_| DEFAULT_BINARY.to_owned()),
            format: AudioFormat::Mp3,
            bitrate: "192k".to_owned(),
            sample_rate: 44_100,
            channels: 2,
            timeout: Some(Duration::from_secs(120)),
            poll_interval: Duration::from_millis(500),
            kill_grace: Duration::from_secs(5),
        }
    }
}

/// A validated encoder output, owned by the job until delivery completes.
#[derive(Debug, Clone)]
pub struct TranscodeResult {
    pub path: PathBuf,
    pub format: AudioFormat,
    pub size_bytes: u64,
    /// Parsed opportunistically from the encoder's progress output.
    pub duration: Option<Duration>,
}

/// One item of the progress sequence.
#[derive(Debug, Clone)]
pub enum TranscodeEvent {
    Processing,
    Done(TranscodeResult),
}

#[derive(Debug, thiserror::Error)]
pub enum TranscodeError {
    #[error("encoding timed out after {limit:?}")]
    Timeout { limit: Duration },

    #[error("encoder failed: {detail}")]
    EncodeFailure { detail: String },

    #[error("encoder reported success but produced no output")]
    OutputMissing,

    #[error("encoding cancelled")]
    Cancelled,

    #[error("I/O error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },
}

/// Deterministic output path for `input` under `out_dir`.
pub fn output_path(input: &Path, out_dir: &Path, format: AudioFormat) -> PathBuf {
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "audio".to_owned());
    out_dir.join(format!("{stem}.{}", format.extension()))
}

/// Extract the audio track of `input` into `out_dir`.
///
/// Returns the progress sequence described in the module docs. The child
/// is killed if the stream is dropped mid-run.
pub fn transcode(
    config: &TranscodeConfig,
    input: &Path,
    out_dir: &Path,
    token: &CancellationToken,
) -> impl Stream<Item = Result<TranscodeEvent, TranscodeError>> + use<> {
    let config = config.clone();
    let input = input.to_path_buf();
    let out = output_path(&input, out_dir, config.format);
    let token = token.clone();

    async_stream::try_stream! {
        info!(
            input = %input.display(),
            output = %out.display(),
            format = %config.format,
            "starting audio extraction"
        );

        let mut cmd = process_utils::tokio_command(&config.binary_path);
        cmd.arg("-y")
            .arg("-hide_banner")
            .arg("-i")
            .arg(&input)
            .arg("-vn")
            .arg("-acodec")
            .arg(config.format.codec())
            .arg("-b:a")
            .arg(&config.bitrate)
            .arg("-ar")
            .arg(config.sample_rate.to_string())
            .arg("-ac")
            .arg(config.channels.to_string())
            .arg(&out)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|e| TranscodeError::EncodeFailure {
            detail: format!("failed to spawn `{}`: {e}", config.binary_path),
        })?;

        let mut stderr = child.stderr.take().expect("stderr was piped");
        let stderr_task = tokio::spawn(async move {
            let mut buf = String::new();
            let _ = stderr.read_to_string(&mut buf).await;
            buf
        });

        let deadline = config.timeout.map(|t| tokio::time::Instant::now() + t);
        let status = loop {
            let outcome: Result<Option<std::process::ExitStatus>, TranscodeError> = tokio::select! {
                biased;
                _ = token.cancelled() => {
                    kill_with_grace(&mut child, config.kill_grace).await;
                    discard_output(&out).await;
                    Err(TranscodeError::Cancelled)
                }
                _ = sleep_until_opt(deadline) => {
                    kill_with_grace(&mut child, config.kill_grace).await;
                    discard_output(&out).await;
                    Err(TranscodeError::Timeout {
                        limit: config.timeout.expect("deadline implies timeout"),
                    })
                }
                status = child.wait() => status.map(Some).map_err(TranscodeError::from),
                _ = tokio::time::sleep(config.poll_interval) => {
                    yield TranscodeEvent::Processing;
                    Ok(None)
                }
            };
            if let Some(status) = outcome? {
                break status;
            }
        };

        let stderr_output = stderr_task.await.unwrap_or_default();

        if !status.success() {
            debug!(status = %status, "encoder exited with failure");
            discard_output(&out).await;
            Err(TranscodeError::EncodeFailure {
                detail: output_tail(&stderr_output, STDERR_TAIL_BYTES),
            })?;
        }

        let size_bytes = match tokio::fs::metadata(&out).await {
            Ok(meta) if meta.len() > 0 => meta.len(),
            _ => {
                Err(TranscodeError::OutputMissing)?;
                unreachable!();
            }
        };

        let duration = parse_reported_duration(&stderr_output);
        info!(
            output = %out.display(),
            size = %format_size(size_bytes, BINARY),
            ?duration,
            "audio extraction complete"
        );

        yield TranscodeEvent::Done(TranscodeResult {
            path: out.clone(),
            format: config.format,
            size_bytes,
            duration,
        });
    }
}

async fn sleep_until_opt(deadline: Option<tokio::time::Instant>) {
    match deadline {
        Some(d) => tokio::time::sleep_until(d).await,
        None => std::future::pending().await,
    }
}

async fn discard_output(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await
        && e.kind() != std::io::ErrorKind::NotFound
    {
        warn!(path = %path.display(), error = %e, "failed to discard encoder output");
    }
}

static TIME_STAMP: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"time=(\d+):(\d{2}):(\d{2})\.(\d{2})").unwrap());

/// Last `time=HH:MM:SS.cc` stamp in the encoder's progress output, if any.
fn parse_reported_duration(stderr: &str) -> Option<Duration> {
    let caps = TIME_STAMP.captures_iter(stderr).last()?;
    let hours: u64 = caps[1].parse().ok()?;
    let minutes: u64 = caps[2].parse().ok()?;
    let seconds: u64 = caps[3].parse().ok()?;
    let centis: u64 = caps[4].parse().ok()?;
    Some(Duration::from_millis(
        ((hours * 3600 + minutes * 60 + seconds) * 1000) + centis * 10,
    ))
}


#[cfg(all(test, unix))]
mod process_tests {
    use super::*;
    use futures::StreamExt;
    use std::os::unix::fs::PermissionsExt;

    fn fake_encoder(dir: &Path, body: &str) -> PathBuf {
        let path = dir.join("fake-ffmpeg");
        // The encoder's output path is its last argument.
        let script = format!("#!/bin/sh\nfor out in \"$@\"; do :; done\n{body}\n");
        std::fs::write(&path, script).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    fn config_for(tool: &Path) -> TranscodeConfig {
        TranscodeConfig {
            binary_path: tool.to_string_lossy().into_owned(),
            poll_interval: Duration::from_millis(50),
            kill_grace: Duration::from_secs(2),
            ..TranscodeConfig::default()
        }
    }

    async fn collect(
        config: &TranscodeConfig,
        input: &Path,
        out_dir: &Path,
        token: &CancellationToken,
    ) -> Vec<Result<TranscodeEvent, TranscodeError>> {
        transcode(config, input, out_dir, token).collect().await
    }

    #[tokio::test]
    async fn emits_heartbeats_then_done() {
        let dir = tempfile::tempdir().unwrap();
        let tool = fake_encoder(
            dir.path(),
            "sleep 1\necho 'time=00:00:03.50 bitrate=192k' >&2\nhead -c 300 /dev/zero > \"$out\"\nexit 0",
        );
        let input = dir.path().join("clip.mp4");
        std::fs::write(&input, b"video").unwrap();
        let token = CancellationToken::new();

        let events = collect(&config_for(&tool), &input, dir.path(), &token).await;
        let processing = events
            .iter()
            .filter(|e| matches!(e, Ok(TranscodeEvent::Processing)))
            .count();
        assert!(processing >= 1, "expected heartbeats while the child runs");

        match events.last().unwrap() {
            Ok(TranscodeEvent::Done(result)) => {
                assert_eq!(result.size_bytes, 300);
                assert_eq!(result.path, dir.path().join("clip.mp3"));
                assert_eq!(result.duration, Some(Duration::from_millis(3_500)));
            }
            other => panic!("expected Done last, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn encoder_failure_carries_stderr_detail() {
        let dir = tempfile::tempdir().unwrap();
        let tool = fake_encoder(dir.path(), "echo 'Invalid data found' >&2\nexit 1");
        let input = dir.path().join("clip.mp4");
        std::fs::write(&input, b"video").unwrap();
        let token = CancellationToken::new();

        let events = collect(&config_for(&tool), &input, dir.path(), &token).await;
        match events.last().unwrap() {
            Err(TranscodeError::EncodeFailure { detail }) => {
                assert!(detail.contains("Invalid data found"));
            }
            other => panic!("expected EncodeFailure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn zero_exit_without_output_is_output_missing() {
        let dir = tempfile::tempdir().unwrap();
        let tool = fake_encoder(dir.path(), "exit 0");
        let input = dir.path().join("clip.mp4");
        std::fs::write(&input, b"video").unwrap();
        let token = CancellationToken::new();

        let events = collect(&config_for(&tool), &input, dir.path(), &token).await;
        assert!(matches!(
            events.last().unwrap(),
            Err(TranscodeError::OutputMissing)
        ));
    }

    #[tokio::test]
    async fn timeout_kills_the_encoder() {
        let dir = tempfile::tempdir().unwrap();
        let tool = fake_encoder(dir.path(), "sleep 30");
        let input = dir.path().join("clip.mp4");
        std::fs::write(&input, b"video").unwrap();
        let token = CancellationToken::new();
        let config = TranscodeConfig {
            timeout: Some(Duration::from_millis(300)),
            ..config_for(&tool)
        };

        let start = std::time::Instant::now();
        let events = collect(&config, &input, dir.path(), &token).await;
        assert!(matches!(
            events.last().unwrap(),
            Err(TranscodeError::Timeout { .. })
        ));
        assert!(start.elapsed() < Duration::from_secs(10));
    }

    #[tokio::test]
    async fn cancellation_kills_the_encoder_and_discards_output() {
        let dir = tempfile::tempdir().unwrap();
        let tool = fake_encoder(
            dir.path(),
            "head -c 10 /dev/zero > \"$out\"\nsleep 30",
        );
        let input = dir.path().join("clip.mp4");
        std::fs::write(&input, b"video").unwrap();
        let token = CancellationToken::new();

        let cancel = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            cancel.cancel();
        });

        let events = collect(&config_for(&tool), &input, dir.path(), &token).await;
        assert!(matches!(
            events.last().unwrap(),
            Err(TranscodeError::Cancelled)
        ));
        assert!(!dir.path().join("clip.mp3").exists());
    }
}
