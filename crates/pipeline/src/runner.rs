//! Drives one job through the pipeline phases.

use std::path::{Path, PathBuf};
use std::pin::pin;
use std::sync::Arc;

use futures::StreamExt;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use audex_fetch::{FetchError, FetchedMedia, Origin};
use audex_resolve::{ResolvedSource, SourceKind, sanitize_filename};
use audex_transcode::{TranscodeEvent, TranscodeResult};

use crate::error::{PipelineError, lift_extract, lift_fetch, lift_transcode};
use crate::handle::Delivery;
use crate::job::{JobId, JobState, MediaSource, RetrievalRequest, StateCell};
use crate::progress::{ProgressEvent, ProgressStage, emit};
use crate::{CallerGuard, Inner};

type ProgressTx = mpsc::UnboundedSender<ProgressEvent>;

pub(crate) async fn run_job(
    inner: Arc<Inner>,
    request: RetrievalRequest,
    id: JobId,
    progress_tx: ProgressTx,
    token: CancellationToken,
    outcome_tx: oneshot::Sender<Result<Delivery, PipelineError>>,
    caller_guard: CallerGuard,
) {
    let mut state = StateCell::new(id);

    match drive(&inner, &request, id, &mut state, &progress_tx, &token).await {
        Ok(success) => deliver(&inner, id, &mut state, success, outcome_tx).await,
        Err(err) => {
            let terminal = if err.is_cancelled() {
                JobState::Cancelled
            } else {
                JobState::Failed
            };
            state.advance(terminal);
            info!(job = %id, state = %state.get(), error = %err, "job ended");
            let _ = outcome_tx.send(Err(err));
        }
    }

    drop(caller_guard);
}

struct DriveOk {
    /// Removal of this directory is the job's cleanup; it must outlive
    /// delivery.
    job_dir: JobDir,
    audio: TranscodeResult,
    display_name: String,
    origin: Origin,
}

async fn drive(
    inner: &Arc<Inner>,
    request: &RetrievalRequest,
    id: JobId,
    state: &mut StateCell,
    progress_tx: &ProgressTx,
    token: &CancellationToken,
) -> Result<DriveOk, PipelineError> {
    // The concurrency bound counts jobs past this acquire. The slot is
    // released when this function returns; delivery does not hold one.
    let _permit = inner
        .slots
        .acquire()
        .await
        .map_err(|_| PipelineError::internal("worker slots closed"))?;

    let root = request
        .working_root
        .clone()
        .unwrap_or_else(|| inner.config.temp_root.clone());
    let job_dir = JobDir::create(root.join(format!("job-{id}"))).await?;
    let ceiling = request
        .size_ceiling
        .unwrap_or(inner.config.max_payload_bytes);

    state.advance(JobState::Resolving);
    emit(progress_tx, id, ProgressStage::Resolving);

    let (media, display_name) =
        acquire_media(inner, request, id, state, progress_tx, token, &job_dir, ceiling).await?;

    // Cancellation check point between retrieval and transcoding.
    if token.is_cancelled() {
        return Err(PipelineError::Cancelled);
    }

    state.advance(JobState::Transcoding);
    let stream = audex_transcode::transcode(
        &inner.config.transcode,
        &media.path,
        job_dir.path(),
        token,
    );
    let mut stream = pin!(stream);
    let mut audio = None;
    while let Some(event) = stream.next().await {
        match event.map_err(lift_transcode)? {
            TranscodeEvent::Processing => emit(progress_tx, id, ProgressStage::Processing),
            TranscodeEvent::Done(result) => audio = Some(result),
        }
    }
    let audio =
        audio.ok_or_else(|| PipelineError::internal("encoder stream ended without a result"))?;

    // The ceiling is re-checked before delivery; an output the caller
    // cannot accept is as terminal as an oversized source.
    if audio.size_bytes > ceiling {
        return Err(PipelineError::TooLarge { limit: ceiling });
    }

    // The input is consumed; drop it now rather than at directory removal.
    if media.origin != Origin::Upload
        && let Err(e) = tokio::fs::remove_file(&media.path).await
    {
        debug!(job = %id, path = %media.path.display(), error = %e, "input file already gone");
    }

    emit(progress_tx, id, ProgressStage::Done);
    Ok(DriveOk {
        job_dir,
        audio,
        display_name,
        origin: media.origin,
    })
}

#[allow(clippy::too_many_arguments)]
async fn acquire_media(
    inner: &Arc<Inner>,
    request: &RetrievalRequest,
    id: JobId,
    state: &mut StateCell,
    progress_tx: &ProgressTx,
    token: &CancellationToken,
    job_dir: &JobDir,
    ceiling: u64,
) -> Result<(FetchedMedia, String), PipelineError> {
    let url = match &request.source {
        MediaSource::Upload(path) => {
            // Uploads are caller-owned files; adopt them in place with the
            // same ceiling check, and never route them to the extractor.
            let media = audex_fetch::adopt(path, ceiling).await.map_err(lift_fetch)?;
            let display_name = path
                .file_name()
                .map(|n| sanitize_filename(&n.to_string_lossy()))
                .unwrap_or_else(|| "video".to_owned());
            return Ok((media, display_name));
        }
        MediaSource::Url(url) => url,
    };

    match inner
        .resolver
        .resolve(url, request.access_token.as_deref())
        .await
    {
        Ok(resolved) if resolved.kind != SourceKind::NeedsExtractor => {
            state.advance(JobState::Fetching);
            emit(progress_tx, id, ProgressStage::Fetching);

            let dest = job_dir.path().join("source.bin");
            match fetch_with_deadline(inner, &resolved, &dest, ceiling, token).await {
                Ok(media) => Ok((media, resolved.display_name)),
                // The ceiling is a hard user-facing constraint; a larger
                // source will not get smaller through another tool.
                Err(FetchError::TooLarge { limit }) => Err(PipelineError::TooLarge { limit }),
                Err(FetchError::Cancelled) => Err(PipelineError::Cancelled),
                Err(e) => {
                    warn!(job = %id, error = %e, "fetch failed, falling back to extractor");
                    let media =
                        run_extractor(inner, url, id, state, progress_tx, token, job_dir, ceiling)
                            .await?;
                    Ok((media, resolved.display_name))
                }
            }
        }
        Ok(resolved) => {
            let media =
                run_extractor(inner, url, id, state, progress_tx, token, job_dir, ceiling).await?;
            Ok((media, resolved.display_name))
        }
        Err(e) => {
            warn!(job = %id, error = %e, "resolution failed, falling back to extractor");
            let media =
                run_extractor(inner, url, id, state, progress_tx, token, job_dir, ceiling).await?;
            Ok((media, "video".to_owned()))
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn run_extractor(
    inner: &Arc<Inner>,
    url: &str,
    id: JobId,
    state: &mut StateCell,
    progress_tx: &ProgressTx,
    token: &CancellationToken,
    job_dir: &JobDir,
    ceiling: u64,
) -> Result<FetchedMedia, PipelineError> {
    state.advance(JobState::Extracting);
    emit(progress_tx, id, ProgressStage::Extracting);

    let dest = job_dir.path().join("source.mp4");
    audex_extract::extract(&inner.config.extractor, url, &dest, ceiling, token)
        .await
        .map_err(lift_extract)
}

async fn fetch_with_deadline(
    inner: &Arc<Inner>,
    resolved: &ResolvedSource,
    dest: &Path,
    ceiling: u64,
    token: &CancellationToken,
) -> Result<FetchedMedia, FetchError> {
    let fetch = audex_fetch::fetch(&inner.client, resolved, dest, ceiling, token);
    match inner.config.fetch_timeout {
        Some(limit) => match tokio::time::timeout(limit, fetch).await {
            Ok(result) => result,
            Err(_) => Err(FetchError::TimedOut { limit }),
        },
        None => fetch.await,
    }
}

async fn deliver(
    inner: &Arc<Inner>,
    id: JobId,
    state: &mut StateCell,
    success: DriveOk,
    outcome_tx: oneshot::Sender<Result<Delivery, PipelineError>>,
) {
    state.advance(JobState::Delivering);

    let (ack_tx, ack_rx) = oneshot::channel();
    let delivery = Delivery {
        audio: success.audio,
        display_name: success.display_name,
        origin: success.origin,
        ack: Some(ack_tx),
    };

    if outcome_tx.send(Ok(delivery)).is_err() {
        debug!(job = %id, "caller dropped the handle before delivery");
    } else {
        // The output file stays alive until the caller confirms delivery
        // or the grace period lapses, whichever comes first.
        tokio::select! {
            _ = ack_rx => debug!(job = %id, "delivery acknowledged"),
            _ = tokio::time::sleep(inner.config.delivery_grace) => {
                debug!(job = %id, "delivery grace elapsed without acknowledgment")
            }
        }
    }

    state.advance(JobState::Succeeded);
    info!(job = %id, "job complete");
    drop(success.job_dir);
}

/// Job-unique working directory; removing it is the job's cleanup.
///
/// Removal runs exactly once, from `Drop`, so it covers every exit path.
struct JobDir {
    path: PathBuf,
}

impl JobDir {
    async fn create(path: PathBuf) -> std::io::Result<Self> {
        tokio::fs::create_dir_all(&path).await?;
        Ok(Self { path })
    }

    fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for JobDir {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_dir_all(&self.path)
            && e.kind() != std::io::ErrorKind::NotFound
        {
            warn!(path = %self.path.display(), error = %e, "failed to remove job directory");
        }
    }
}
