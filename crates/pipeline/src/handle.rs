//! The caller-facing job handle and delivery object.

use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use audex_fetch::Origin;
use audex_transcode::TranscodeResult;

use crate::error::PipelineError;
use crate::job::JobId;
use crate::progress::ProgressEvent;

/// Handle to one in-flight job.
///
/// Exposes the job's ordered progress events, a cancellation trigger and
/// the awaitable typed outcome. Dropping the handle abandons the job's
/// output (the job still runs to a terminal state and cleans up).
pub struct JobHandle {
    id: JobId,
    progress: mpsc::UnboundedReceiver<ProgressEvent>,
    outcome: oneshot::Receiver<Result<Delivery, PipelineError>>,
    cancel: CancellationToken,
}

impl JobHandle {
    pub(crate) fn new(
        id: JobId,
        progress: mpsc::UnboundedReceiver<ProgressEvent>,
        outcome: oneshot::Receiver<Result<Delivery, PipelineError>>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            id,
            progress,
            outcome,
            cancel,
        }
    }

    pub fn id(&self) -> JobId {
        self.id
    }

    /// Request cancellation. Acknowledged at the job's next check point;
    /// the outcome will then be [`PipelineError::Cancelled`].
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Next progress event, or `None` once the job stops emitting.
    pub async fn progress(&mut self) -> Option<ProgressEvent> {
        self.progress.recv().await
    }

    /// Await the job's terminal outcome.
    pub async fn outcome(self) -> Result<Delivery, PipelineError> {
        match self.outcome.await {
            Ok(result) => result,
            // The job task never dropped its sender on any designed path.
            Err(_) => Err(PipelineError::internal("job task vanished")),
        }
    }
}

/// A successful job's result, handed to the caller for delivery.
///
/// The audio file stays on disk until [`Delivery::acknowledge`] is called
/// or the delivery grace period lapses; after that the job's cleanup
/// removes it. Dropping an unacknowledged `Delivery` releases the file for
/// immediate cleanup.
#[derive(Debug)]
pub struct Delivery {
    pub audio: TranscodeResult,
    /// User-facing name inferred from the source, already sanitized.
    pub display_name: String,
    /// Which path produced the media.
    pub origin: Origin,
    pub(crate) ack: Option<oneshot::Sender<()>>,
}

impl Delivery {
    /// Confirm the output file has been consumed, releasing it for cleanup.
    pub fn acknowledge(mut self) {
        if let Some(ack) = self.ack.take() {
            let _ = ack.send(());
        }
    }
}
