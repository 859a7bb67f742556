//! Per-job progress events.
//!
//! The core emits semantic stage tags only; how they are rendered is the
//! caller's business. Events are ordered within a job, with no cross-job
//! interleaving guarantees, and delivery is fire-and-forget.

use tokio::sync::mpsc;
use tracing::debug;

use crate::job::JobId;

/// Semantic stage tag, in the order a job passes through them. `Extracting`
/// replaces `Fetching` on the fallback path; `Processing` repeats as a
/// heartbeat while the encoder runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum ProgressStage {
    Resolving,
    Fetching,
    Extracting,
    Processing,
    Done,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressEvent {
    pub job: JobId,
    pub stage: ProgressStage,
}

/// Fire-and-forget send: a dropped receiver is logged, never fatal.
pub(crate) fn emit(tx: &mpsc::UnboundedSender<ProgressEvent>, job: JobId, stage: ProgressStage) {
    if tx.send(ProgressEvent { job, stage }).is_err() {
        debug!(job = %job, stage = %stage, "progress receiver gone, event dropped");
    }
}
