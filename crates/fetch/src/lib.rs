//! # Fetcher
//!
//! Streams bytes from a resolved source into local storage under a hard
//! size ceiling. The response body is written chunk-by-chunk, never
//! buffered whole; the transfer aborts the moment the accumulated size
//! exceeds the ceiling and the partial file is removed.
//!
//! Retry and fallback policy live in the orchestrator, not here: any
//! failure is reported as a typed [`FetchError`] and left alone.

use std::path::{Path, PathBuf};

use humansize::{BINARY, format_size};
use reqwest::Client;
use tokio::fs;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use audex_resolve::ResolvedSource;

mod config;
mod copy;

pub use config::{FetchConfig, create_client};
pub use copy::{CopyCapError, copy_capped};

/// Where a locally stored media file came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    Direct,
    CloudPublic,
    Extractor,
    Upload,
}

/// A media file on local storage, owned by exactly one job.
///
/// Created on a successful fetch/extract/adopt and deleted by the job's
/// cleanup phase whether or not transcoding succeeds.
#[derive(Debug, Clone)]
pub struct FetchedMedia {
    pub path: PathBuf,
    pub size_bytes: u64,
    pub origin: Origin,
}

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("source responded with HTTP {status}")]
    BadStatus { status: reqwest::StatusCode },

    #[error("payload exceeds the {} size ceiling", format_size(*limit, BINARY))]
    TooLarge { limit: u64 },

    #[error("transport failure: {source}")]
    Transport {
        #[from]
        source: reqwest::Error,
    },

    #[error("fetch timed out after {limit:?}")]
    TimedOut { limit: std::time::Duration },

    #[error("fetch cancelled")]
    Cancelled,

    #[error("client configuration error: {reason}")]
    Configuration { reason: String },

    #[error("I/O error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },
}

/// Stream a resolved source to `dest`, enforcing `size_ceiling`.
///
/// On any failure the partial file is removed before the error is
/// returned; a successful return means `dest` holds exactly
/// `FetchedMedia::size_bytes` bytes.
pub async fn fetch(
    client: &Client,
    source: &ResolvedSource,
    dest: &Path,
    size_ceiling: u64,
    token: &CancellationToken,
) -> Result<FetchedMedia, FetchError> {
    let origin = match source.kind {
        audex_resolve::SourceKind::Direct => Origin::Direct,
        audex_resolve::SourceKind::CloudPublic => Origin::CloudPublic,
        // The orchestrator routes these to the extractor; reaching here is
        // still well-defined (plain GET of the original URL).
        audex_resolve::SourceKind::NeedsExtractor => Origin::Direct,
    };

    info!(url = %source.url, dest = %dest.display(), "starting fetch");

    let response = client
        .get(&source.url)
        .header(reqwest::header::REFERER, source.url.as_str())
        .send()
        .await?;

    let status = response.status();
    if !status.is_success() {
        return Err(FetchError::BadStatus { status });
    }

    if let Some(len) = response.content_length() {
        debug!(size = %format_size(len, BINARY), "fetch content length");
        // Fail before transferring anything when the server already tells
        // us the payload cannot fit.
        if len > size_ceiling {
            return Err(FetchError::TooLarge {
                limit: size_ceiling,
            });
        }
    }

    let mut file = fs::File::create(dest).await?;
    let stream = response.bytes_stream();
    let copied = copy_capped(stream, &mut file, size_ceiling, token).await;

    match copied {
        Ok(size_bytes) => {
            file.sync_all().await?;
            info!(
                size = %format_size(size_bytes, BINARY),
                dest = %dest.display(),
                "fetch complete"
            );
            Ok(FetchedMedia {
                path: dest.to_path_buf(),
                size_bytes,
                origin,
            })
        }
        Err(err) => {
            drop(file);
            remove_partial(dest).await;
            Err(match err {
                CopyCapError::Exceeded { .. } => FetchError::TooLarge {
                    limit: size_ceiling,
                },
                CopyCapError::Cancelled => FetchError::Cancelled,
                CopyCapError::Source(e) => FetchError::Transport { source: e },
                CopyCapError::Io(e) => FetchError::Io { source: e },
            })
        }
    }
}

/// Adopt a pre-existing local file (an upload handed over by the caller)
/// as job-owned media, applying the same ceiling check as a fetch.
pub async fn adopt(path: &Path, size_ceiling: u64) -> Result<FetchedMedia, FetchError> {
    let meta = fs::metadata(path).await?;
    let size_bytes = meta.len();
    if size_bytes > size_ceiling {
        return Err(FetchError::TooLarge {
            limit: size_ceiling,
        });
    }
    debug!(path = %path.display(), size = %format_size(size_bytes, BINARY), "adopted local upload");
    Ok(FetchedMedia {
        path: path.to_path_buf(),
        size_bytes,
        origin: Origin::Upload,
    })
}

async fn remove_partial(path: &Path) {
    if let Err(e) = fs::remove_file(path).await
        && e.kind() != std::io::ErrorKind::NotFound
    {
        warn!(path = %path.display(), error = %e, "failed to remove partial file");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn adopt_accepts_file_under_ceiling() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("upload.mp4");
        std::fs::write(&path, vec![0u8; 1024]).unwrap();

        let media = adopt(&path, 2048).await.unwrap();
        assert_eq!(media.size_bytes, 1024);
        assert_eq!(media.origin, Origin::Upload);
    }

    #[tokio::test]
    async fn adopt_rejects_oversized_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("upload.mp4");
        std::fs::write(&path, vec![0u8; 4096]).unwrap();

        let err = adopt(&path, 1024).await.unwrap_err();
        assert!(matches!(err, FetchError::TooLarge { limit: 1024 }));
        // Uploads are caller-owned; adopt must not delete them.
        assert!(path.exists());
    }

    #[tokio::test]
    async fn adopt_missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = adopt(&dir.path().join("absent.mp4"), 1024).await.unwrap_err();
        assert!(matches!(err, FetchError::Io { .. }));
    }
}
