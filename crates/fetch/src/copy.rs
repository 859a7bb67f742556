//! Ceiling-enforced streaming copy.
//!
//! Factored out of [`fetch`](crate::fetch) so the size-cap invariant can be
//! exercised against an in-memory stream: the copy never writes more than
//! one chunk past the ceiling, and the caller learns exactly how many bytes
//! were accepted before the abort.

use bytes::Bytes;
use futures::{Stream, StreamExt};
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;

#[derive(Debug)]
pub enum CopyCapError<E> {
    /// Accumulated size passed the ceiling; `written` is the byte count
    /// accepted before the offending chunk.
    Exceeded { written: u64 },
    Cancelled,
    Source(E),
    Io(std::io::Error),
}

/// Copy `stream` into `file`, aborting as soon as the accumulated size
/// would exceed `ceiling`. Size accounting happens per chunk, before the
/// chunk is written.
pub async fn copy_capped<S, E>(
    stream: S,
    file: &mut tokio::fs::File,
    ceiling: u64,
    token: &CancellationToken,
) -> Result<u64, CopyCapError<E>>
where
    S: Stream<Item = Result<Bytes, E>>,
{
    let mut stream = std::pin::pin!(stream);
    let mut written: u64 = 0;

    loop {
        let chunk = tokio::select! {
            biased;
            _ = token.cancelled() => return Err(CopyCapError::Cancelled),
            chunk = stream.next() => chunk,
        };

        let Some(chunk) = chunk else {
            break;
        };
        let chunk = chunk.map_err(CopyCapError::Source)?;

        if written + chunk.len() as u64 > ceiling {
            return Err(CopyCapError::Exceeded { written });
        }

        file.write_all(&chunk).await.map_err(CopyCapError::Io)?;
        written += chunk.len() as u64;
    }

    file.flush().await.map_err(CopyCapError::Io)?;
    Ok(written)
}
