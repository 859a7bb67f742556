//! Pipeline-wide configuration.

use std::path::PathBuf;
use std::time::Duration;

use audex_extract::ExtractorConfig;
use audex_fetch::FetchConfig;
use audex_transcode::TranscodeConfig;

/// Configuration surface consumed by the orchestrator.
///
/// Per-phase timeouts live with their phase: the fetch deadline here, the
/// extractor's and encoder's deadlines inside their own configs.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Root under which every job gets its own `job-<id>` directory.
    pub temp_root: PathBuf,
    /// Hard payload ceiling in bytes, unless a request overrides it.
    pub max_payload_bytes: u64,
    /// Process-wide worker-slot count.
    pub concurrency: usize,
    /// Whole-fetch deadline; `None` relies on the client's read timeout.
    pub fetch_timeout: Option<Duration>,
    /// How long a successful job waits for delivery acknowledgment before
    /// cleaning up its output anyway.
    pub delivery_grace: Duration,
    /// Reject a second in-flight job from the same caller.
    pub single_flight_per_caller: bool,
    pub fetch: FetchConfig,
    pub extractor: ExtractorConfig,
    pub transcode: TranscodeConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            temp_root: std::env::temp_dir().join("audex"),
            max_payload_bytes: 2000 * 1024 * 1024,
            concurrency: 4,
            fetch_timeout: None,
            delivery_grace: Duration::from_secs(30),
            single_flight_per_caller: true,
            fetch: FetchConfig::default(),
            extractor: ExtractorConfig::default(),
            transcode: TranscodeConfig::default(),
        }
    }
}
