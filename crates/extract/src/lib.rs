//! # External Extractor Adapter
//!
//! Wraps a general-purpose video retrieval tool (yt-dlp by default) as a
//! last-resort source. The tool is treated as an opaque child process with
//! a narrow contract: exit code 0 plus an existing output file is success,
//! anything else is a [`ExtractError::ToolFailure`].
//!
//! This is the slowest and least predictable path and is always attempted
//! after direct fetching has failed.

use std::path::Path;
use std::process::Stdio;
use std::sync::LazyLock;
use std::time::Duration;

use humansize::{BINARY, format_size};
use tokio::io::AsyncReadExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use audex_fetch::{FetchedMedia, Origin};
use process_utils::{kill_with_grace, output_tail};

const DEFAULT_BINARY: &str = "yt-dlp";
const BINARY_ENV: &str = "AUDEX_YTDLP";
const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/126.0.0.0 Safari/537.36";
const STDERR_TAIL_BYTES: usize = 512;

static DEFAULT_AVAILABLE: LazyLock<bool> = LazyLock::new(|| probe(&default_binary()));

fn default_binary() -> String {
    std::env::var(BINARY_ENV).unwrap_or_else(|_| DEFAULT_BINARY.to_owned())
}

fn probe(binary: &str) -> bool {
    let mut cmd = process_utils::std_command(binary);
    cmd.arg("--version")
        .stdout(Stdio::null())
        .stderr(Stdio::null());
    cmd.status().is_ok_and(|s| s.success())
}

#[derive(Debug, Clone)]
pub struct ExtractorConfig {
    /// Tool executable; `AUDEX_YTDLP` overrides the default lookup.
    pub binary_path: String,
    /// Format preference passed through to the tool.
    pub format: String,
    /// Download retry count handled inside the tool.
    pub retries: u32,
    /// Seconds the tool sleeps between its own retries.
    pub retry_sleep_secs: u32,
    pub user_agent: String,
    /// Whole-extraction deadline; `None` means wait for the tool.
    pub timeout: Option<Duration>,
    /// How long a killed child gets before it is declared unresponsive.
    pub kill_grace: Duration,
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self {
            binary_path: default_binary(),
            format: "best[height<=720]/best".to_owned(),
            retries: 3,
            retry_sleep_secs: 1,
            user_agent: DEFAULT_USER_AGENT.to_owned(),
            timeout: None,
            kill_grace: Duration::from_secs(5),
        }
    }
}

impl ExtractorConfig {
    /// Whether the configured tool responds to `--version`.
    ///
    /// The default binary is probed once per process; overridden paths are
    /// probed on every call.
    pub fn is_available(&self) -> bool {
        if self.binary_path == default_binary() {
            *DEFAULT_AVAILABLE
        } else {
            probe(&self.binary_path)
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ExtractError {
    #[error("extraction tool failed: {detail}")]
    ToolFailure { detail: String },

    #[error("extracted file exceeds the {} size ceiling", format_size(*limit, BINARY))]
    TooLarge { limit: u64 },

    #[error("extraction timed out after {limit:?}")]
    Timeout { limit: Duration },

    #[error("extraction cancelled")]
    Cancelled,

    #[error("I/O error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },
}

/// Run the external tool against `url`, writing the merged output to `dest`.
///
/// The output file is checked against `size_ceiling` after the tool exits;
/// oversized output is deleted and reported as [`ExtractError::TooLarge`].
pub async fn extract(
    config: &ExtractorConfig,
    url: &str,
    dest: &Path,
    size_ceiling: u64,
    token: &CancellationToken,
) -> Result<FetchedMedia, ExtractError> {
    info!(url = %url, tool = %config.binary_path, "invoking external extractor");

    let mut cmd = process_utils::tokio_command(&config.binary_path);
    cmd.arg("-f")
        .arg(&config.format)
        .arg("-o")
        .arg(dest)
        .arg("--no-playlist")
        .arg("--no-progress")
        .arg("--geo-bypass")
        .arg("--retries")
        .arg(config.retries.to_string())
        .arg("--retry-sleep")
        .arg(config.retry_sleep_secs.to_string())
        .arg("--user-agent")
        .arg(&config.user_agent)
        .arg("--referer")
        .arg(url)
        .arg(url)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = cmd.spawn().map_err(|e| ExtractError::ToolFailure {
        detail: format!("failed to spawn `{}`: {e}", config.binary_path),
    })?;

    let mut stderr = child.stderr.take().expect("stderr was piped");
    let stderr_task = tokio::spawn(async move {
        let mut buf = String::new();
        let _ = stderr.read_to_string(&mut buf).await;
        buf
    });

    let deadline = config.timeout.map(|t| tokio::time::Instant::now() + t);
    let status = tokio::select! {
        biased;
        _ = token.cancelled() => {
            kill_with_grace(&mut child, config.kill_grace).await;
            discard_partial(dest).await;
            return Err(ExtractError::Cancelled);
        }
        _ = sleep_until_opt(deadline) => {
            kill_with_grace(&mut child, config.kill_grace).await;
            discard_partial(dest).await;
            return Err(ExtractError::Timeout {
                limit: config.timeout.expect("deadline implies timeout"),
            });
        }
        status = child.wait() => status?,
    };

    let stderr_output = stderr_task.await.unwrap_or_default();

    if !status.success() {
        debug!(status = %status, "extractor exited with failure");
        discard_partial(dest).await;
        return Err(ExtractError::ToolFailure {
            detail: output_tail(&stderr_output, STDERR_TAIL_BYTES),
        });
    }

    let meta = match tokio::fs::metadata(dest).await {
        Ok(meta) => meta,
        Err(_) => {
            return Err(ExtractError::ToolFailure {
                detail: "tool reported success but output file is missing".to_owned(),
            });
        }
    };

    let size_bytes = meta.len();
    if size_bytes > size_ceiling {
        discard_partial(dest).await;
        return Err(ExtractError::TooLarge {
            limit: size_ceiling,
        });
    }

    info!(
        dest = %dest.display(),
        size = %format_size(size_bytes, BINARY),
        "extraction complete"
    );
    Ok(FetchedMedia {
        path: dest.to_path_buf(),
        size_bytes,
        origin: Origin::Extractor,
    })
}

async fn sleep_until_opt(deadline: Option<tokio::time::Instant>) {
    match deadline {
        Some(d) => tokio::time::sleep_until(d).await,
        None => std::future::pending().await,
    }
}

/// Cancellation always discards partial output; the tool's in-progress
/// `.part` file is covered as well.
async fn discard_partial(dest: &Path) {
    let mut part = dest.as_os_str().to_owned();
    part.push(".part");
    for path in [dest.to_path_buf(), std::path::PathBuf::from(part)] {
        if let Err(e) = tokio::fs::remove_file(&path).await
            && e.kind() != std::io::ErrorKind::NotFound
        {
            warn!(path = %path.display(), error = %e, "failed to discard partial output");
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;
    use std::path::PathBuf;

    fn fake_tool(dir: &Path, body: &str) -> PathBuf {
        let path = dir.join("fake-ytdlp");
        let script = format!("#!/bin/sh\n{body}\n");
        std::fs::write(&path, script).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    // The fake parses `-o <dest>` the way the real tool would.
    const PARSE_DEST: &str = r#"
out=""
prev=""
for a in "$@"; do
  if [ "$prev" = "-o" ]; then out="$a"; fi
  prev="$a"
done"#;

    fn config_for(tool: &Path) -> ExtractorConfig {
        ExtractorConfig {
            binary_path: tool.to_string_lossy().into_owned(),
            kill_grace: Duration::from_secs(2),
            ..ExtractorConfig::default()
        }
    }

    #[tokio::test]
    async fn successful_extraction_returns_media() {
        let dir = tempfile::tempdir().unwrap();
        let tool = fake_tool(
            dir.path(),
            &format!("{PARSE_DEST}\nhead -c 200 /dev/zero > \"$out\"\nexit 0"),
        );
        let dest = dir.path().join("source.mp4");
        let token = CancellationToken::new();

        let media = extract(&config_for(&tool), "https://x.example/v", &dest, 1024, &token)
            .await
            .unwrap();
        assert_eq!(media.size_bytes, 200);
        assert_eq!(media.origin, Origin::Extractor);
        assert!(dest.exists());
    }

    #[tokio::test]
    async fn nonzero_exit_is_tool_failure_with_stderr_detail() {
        let dir = tempfile::tempdir().unwrap();
        let tool = fake_tool(dir.path(), "echo 'ERROR: unsupported url' >&2\nexit 1");
        let dest = dir.path().join("source.mp4");
        let token = CancellationToken::new();

        let err = extract(&config_for(&tool), "https://x.example/v", &dest, 1024, &token)
            .await
            .unwrap_err();
        match err {
            ExtractError::ToolFailure { detail } => assert!(detail.contains("unsupported url")),
            other => panic!("expected ToolFailure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn zero_exit_without_output_is_tool_failure() {
        let dir = tempfile::tempdir().unwrap();
        let tool = fake_tool(dir.path(), "exit 0");
        let dest = dir.path().join("source.mp4");
        let token = CancellationToken::new();

        let err = extract(&config_for(&tool), "https://x.example/v", &dest, 1024, &token)
            .await
            .unwrap_err();
        assert!(matches!(err, ExtractError::ToolFailure { .. }));
    }

    #[tokio::test]
    async fn oversized_output_is_deleted_and_too_large() {
        let dir = tempfile::tempdir().unwrap();
        let tool = fake_tool(
            dir.path(),
            &format!("{PARSE_DEST}\nhead -c 4096 /dev/zero > \"$out\"\nexit 0"),
        );
        let dest = dir.path().join("source.mp4");
        let token = CancellationToken::new();

        let err = extract(&config_for(&tool), "https://x.example/v", &dest, 1024, &token)
            .await
            .unwrap_err();
        assert!(matches!(err, ExtractError::TooLarge { limit: 1024 }));
        assert!(!dest.exists());
    }

    #[tokio::test]
    async fn timeout_kills_the_tool() {
        let dir = tempfile::tempdir().unwrap();
        let tool = fake_tool(dir.path(), "sleep 30");
        let dest = dir.path().join("source.mp4");
        let token = CancellationToken::new();
        let config = ExtractorConfig {
            timeout: Some(Duration::from_millis(200)),
            ..config_for(&tool)
        };

        let err = extract(&config, "https://x.example/v", &dest, 1024, &token)
            .await
            .unwrap_err();
        assert!(matches!(err, ExtractError::Timeout { .. }));
    }

    #[tokio::test]
    async fn cancellation_kills_the_tool_and_discards_output() {
        let dir = tempfile::tempdir().unwrap();
        let tool = fake_tool(
            dir.path(),
            &format!("{PARSE_DEST}\nhead -c 10 /dev/zero > \"$out\"\nsleep 30"),
        );
        let dest = dir.path().join("source.mp4");
        let token = CancellationToken::new();

        let cancel = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            cancel.cancel();
        });

        let err = extract(&config_for(&tool), "https://x.example/v", &dest, 1024, &token)
            .await
            .unwrap_err();
        assert!(matches!(err, ExtractError::Cancelled));
        assert!(!dest.exists());
    }
}
