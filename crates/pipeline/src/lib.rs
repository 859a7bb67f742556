//! # Job Orchestrator
//!
//! Coordinates the retrieval-and-transcode pipeline: one request flows
//! through Resolver → Fetcher (or Extractor fallback) → Transcoder, under a
//! process-wide concurrency ceiling, with cancellation propagated into every
//! blocking phase and all job-owned artifacts cleaned up on every outcome.
//!
//! The orchestrator is the only layer that translates one component's
//! failure into a fallback attempt at another, and the only layer that
//! decides a failure is terminal. Size-ceiling violations are always
//! terminal: the ceiling is a user-facing constraint, not a source quirk.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use reqwest::Client;
use tokio::sync::{Semaphore, mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

mod config;
mod error;
mod handle;
mod job;
mod progress;
mod runner;

pub use audex_extract::ExtractorConfig;
pub use audex_fetch::{FetchConfig, Origin};
pub use audex_transcode::{AudioFormat, TranscodeConfig, TranscodeResult};
pub use config::PipelineConfig;
pub use error::PipelineError;
pub use handle::{Delivery, JobHandle};
pub use job::{CallerId, JobId, JobState, MediaSource, RetrievalRequest};
pub use progress::{ProgressEvent, ProgressStage};

use audex_resolve::Resolver;

/// The pipeline coordinator. One instance per process, explicitly
/// constructed and shared by reference; it holds its own configuration,
/// HTTP client and worker-slot semaphore.
pub struct Orchestrator {
    inner: Arc<Inner>,
}

pub(crate) struct Inner {
    pub(crate) config: PipelineConfig,
    pub(crate) client: Client,
    pub(crate) resolver: Resolver,
    pub(crate) slots: Semaphore,
    active_callers: Mutex<HashSet<CallerId>>,
}

impl Orchestrator {
    pub fn new(config: PipelineConfig) -> Result<Self, PipelineError> {
        let client = audex_fetch::create_client(&config.fetch)?;
        let resolver = Resolver::new(client.clone());
        let slots = Semaphore::new(config.concurrency);
        info!(
            concurrency = config.concurrency,
            temp_root = %config.temp_root.display(),
            "orchestrator ready"
        );
        Ok(Self {
            inner: Arc::new(Inner {
                config,
                client,
                resolver,
                slots,
                active_callers: Mutex::new(HashSet::new()),
            }),
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.inner.config
    }

    /// Accept a request and start driving it through the pipeline.
    ///
    /// The returned handle exposes the job's progress events, a cancel
    /// trigger and the awaitable typed outcome. With per-caller
    /// single-flight enabled, a caller with a live job is rejected with
    /// [`PipelineError::CallerBusy`] instead of occupying a second slot.
    pub fn submit(&self, request: RetrievalRequest) -> Result<JobHandle, PipelineError> {
        let caller_guard = self.inner.clone().claim_caller(&request.caller)?;

        let id = JobId::new();
        let token = CancellationToken::new();
        let (progress_tx, progress_rx) = mpsc::unbounded_channel();
        let (outcome_tx, outcome_rx) = oneshot::channel();

        info!(job = %id, caller = %request.caller, "job submitted");

        tokio::spawn(runner::run_job(
            self.inner.clone(),
            request,
            id,
            progress_tx,
            token.clone(),
            outcome_tx,
            caller_guard,
        ));

        Ok(JobHandle::new(id, progress_rx, outcome_rx, token))
    }
}

impl Inner {
    fn claim_caller(self: Arc<Self>, caller: &CallerId) -> Result<CallerGuard, PipelineError> {
        if !self.config.single_flight_per_caller {
            return Ok(CallerGuard {
                inner: self,
                caller: None,
            });
        }
        let mut active = self
            .active_callers
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        if !active.insert(caller.clone()) {
            debug!(caller = %caller, "caller already has a job in flight");
            return Err(PipelineError::CallerBusy {
                caller: caller.to_string(),
            });
        }
        drop(active);
        Ok(CallerGuard {
            caller: Some(caller.clone()),
            inner: self,
        })
    }
}

/// Releases the caller's single-flight claim when the job ends, however it
/// ends.
pub(crate) struct CallerGuard {
    inner: Arc<Inner>,
    caller: Option<CallerId>,
}

impl Drop for CallerGuard {
    fn drop(&mut self) {
        if let Some(caller) = self.caller.take() {
            let mut active = self
                .inner
                .active_callers
                .lock()
                .unwrap_or_else(|e| e.into_inner());
            active.remove(&caller);
        }
    }
}
