//! The error taxonomy surfaced to callers.
//!
//! Every terminal failure is typed so the chat layer can render a phase-
//! specific message without seeing internals. Unrecognized failures wrap
//! into [`PipelineError::Internal`] and still trigger cleanup.

use humansize::{BINARY, format_size};

use audex_extract::ExtractError;
use audex_fetch::FetchError;
use audex_resolve::ResolveError;
use audex_transcode::TranscodeError;

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("source resolution failed: {0}")]
    Resolve(#[from] ResolveError),

    #[error("fetch failed: {0}")]
    Fetch(#[from] FetchError),

    #[error("extraction failed: {0}")]
    Extract(#[from] ExtractError),

    #[error("transcoding failed: {0}")]
    Transcode(#[from] TranscodeError),

    #[error("payload exceeds the {} size ceiling", format_size(*limit, BINARY))]
    TooLarge { limit: u64 },

    #[error("job cancelled")]
    Cancelled,

    #[error("caller `{caller}` already has a job in flight")]
    CallerBusy { caller: String },

    #[error("internal error: {reason}")]
    Internal { reason: String },
}

impl PipelineError {
    pub(crate) fn internal(reason: impl Into<String>) -> Self {
        PipelineError::Internal {
            reason: reason.into(),
        }
    }

    /// Whether this failure reflects an acknowledged cancellation.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, PipelineError::Cancelled)
    }
}

impl From<std::io::Error> for PipelineError {
    fn from(e: std::io::Error) -> Self {
        PipelineError::internal(e.to_string())
    }
}

/// Lift a fetch failure, folding the variants the orchestrator treats
/// specially (ceiling, cancellation) into their pipeline-level forms.
pub(crate) fn lift_fetch(e: FetchError) -> PipelineError {
    match e {
        FetchError::TooLarge { limit } => PipelineError::TooLarge { limit },
        FetchError::Cancelled => PipelineError::Cancelled,
        e => PipelineError::Fetch(e),
    }
}

pub(crate) fn lift_extract(e: ExtractError) -> PipelineError {
    match e {
        ExtractError::TooLarge { limit } => PipelineError::TooLarge { limit },
        ExtractError::Cancelled => PipelineError::Cancelled,
        e => PipelineError::Extract(e),
    }
}

pub(crate) fn lift_transcode(e: TranscodeError) -> PipelineError {
    match e {
        TranscodeError::Cancelled => PipelineError::Cancelled,
        e => PipelineError::Transcode(e),
    }
}
