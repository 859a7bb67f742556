//! Request/job types and the per-job state machine.

use std::fmt;
use std::path::PathBuf;

use tracing::{debug, warn};
use uuid::Uuid;

/// Opaque job identifier, also the job's temp-directory token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct JobId(Uuid);

impl JobId {
    pub(crate) fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.simple())
    }
}

/// Identity of the requesting caller, used for per-caller single-flight.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CallerId(String);

impl CallerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl fmt::Display for CallerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// What the caller handed us: a link to chase or a file already on disk.
#[derive(Debug, Clone)]
pub enum MediaSource {
    Url(String),
    Upload(PathBuf),
}

/// Immutable description of one retrieval job, owned exclusively by that
/// job once submitted.
#[derive(Debug, Clone)]
pub struct RetrievalRequest {
    pub source: MediaSource,
    pub caller: CallerId,
    /// Byte-size ceiling; `None` uses the pipeline default.
    pub size_ceiling: Option<u64>,
    /// Passed through to cloud providers that want one; nothing else.
    pub access_token: Option<String>,
    /// Override for the job's working directory root.
    pub working_root: Option<PathBuf>,
}

impl RetrievalRequest {
    pub fn for_url(url: impl Into<String>, caller: CallerId) -> Self {
        Self {
            source: MediaSource::Url(url.into()),
            caller,
            size_ceiling: None,
            access_token: None,
            working_root: None,
        }
    }

    pub fn for_upload(path: impl Into<PathBuf>, caller: CallerId) -> Self {
        Self {
            source: MediaSource::Upload(path.into()),
            caller,
            size_ceiling: None,
            access_token: None,
            working_root: None,
        }
    }
}

/// Lifecycle of one job. Transitions are strictly forward; any non-terminal
/// state may move to `Failed` or `Cancelled`. Terminal states are sticky.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum JobState {
    Pending,
    Resolving,
    Fetching,
    Extracting,
    Transcoding,
    Delivering,
    Succeeded,
    Failed,
    Cancelled,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobState::Succeeded | JobState::Failed | JobState::Cancelled
        )
    }

    fn rank(self) -> u8 {
        match self {
            JobState::Pending => 0,
            JobState::Resolving => 1,
            JobState::Fetching => 2,
            JobState::Extracting => 3,
            JobState::Transcoding => 4,
            JobState::Delivering => 5,
            JobState::Succeeded => 6,
            JobState::Failed | JobState::Cancelled => 7,
        }
    }

    /// Whether `self -> next` is a legal transition.
    pub fn may_advance(self, next: JobState) -> bool {
        if self.is_terminal() {
            return false;
        }
        if matches!(next, JobState::Failed | JobState::Cancelled) {
            return true;
        }
        next.rank() > self.rank()
    }
}

/// Tracks one job's state, refusing illegal transitions.
#[derive(Debug)]
pub(crate) struct StateCell {
    job: JobId,
    state: JobState,
}

impl StateCell {
    pub(crate) fn new(job: JobId) -> Self {
        Self {
            job,
            state: JobState::Pending,
        }
    }

    pub(crate) fn get(&self) -> JobState {
        self.state
    }

    /// Advance to `next`, logging the transition. An illegal transition is
    /// logged and ignored rather than corrupting the machine.
    pub(crate) fn advance(&mut self, next: JobState) -> bool {
        if !self.state.may_advance(next) {
            warn!(job = %self.job, from = %self.state, to = %next, "illegal state transition ignored");
            return false;
        }
        debug!(job = %self.job, from = %self.state, to = %next, "state transition");
        self.state = next;
        true
    }
}
