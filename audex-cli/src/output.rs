//! Human and JSON rendering of pipeline events and outcomes.

use std::path::Path;

use humansize::{BINARY, format_size};

use audex_pipeline::{Delivery, PipelineError, ProgressStage};

pub fn render_stage(stage: ProgressStage, json: bool) {
    if json {
        println!(
            "{}",
            serde_json::json!({ "event": "progress", "stage": stage.to_string() })
        );
    } else {
        let text = match stage {
            ProgressStage::Resolving => "resolving source...",
            ProgressStage::Fetching => "fetching video...",
            ProgressStage::Extracting => "extracting via external tool...",
            ProgressStage::Processing => "processing audio...",
            ProgressStage::Done => "finishing up...",
        };
        eprintln!("  {text}");
    }
}

pub fn render_success(delivery: &Delivery, saved_to: &Path, json: bool) {
    if json {
        println!(
            "{}",
            serde_json::json!({
                "status": "ok",
                "path": saved_to,
                "format": delivery.audio.format.to_string(),
                "size_bytes": delivery.audio.size_bytes,
                "duration_secs": delivery.audio.duration.map(|d| d.as_secs_f64()),
            })
        );
    } else {
        println!(
            "saved {} ({})",
            saved_to.display(),
            format_size(delivery.audio.size_bytes, BINARY)
        );
    }
}

/// Stable error kind for scripting; mirrors the pipeline taxonomy.
fn error_kind(err: &PipelineError) -> &'static str {
    match err {
        PipelineError::Resolve(_) => "resolve",
        PipelineError::Fetch(_) => "fetch",
        PipelineError::Extract(_) => "extract",
        PipelineError::Transcode(_) => "transcode",
        PipelineError::TooLarge { .. } => "too-large",
        PipelineError::Cancelled => "cancelled",
        PipelineError::CallerBusy { .. } => "busy",
        PipelineError::Internal { .. } => "internal",
    }
}

pub fn render_failure(err: &PipelineError, json: bool) {
    if json {
        println!(
            "{}",
            serde_json::json!({
                "status": "error",
                "kind": error_kind(err),
                "message": err.to_string(),
            })
        );
    } else {
        let hint = match err {
            PipelineError::TooLarge { .. } => "the source is larger than the configured limit",
            PipelineError::Resolve(_) | PipelineError::Fetch(_) | PipelineError::Extract(_) => {
                "the source could not be retrieved"
            }
            PipelineError::Transcode(_) => "the encoder could not process the video",
            PipelineError::Cancelled => "the job was cancelled",
            PipelineError::CallerBusy { .. } => "another job is already running",
            PipelineError::Internal { .. } => "an unexpected error occurred",
        };
        eprintln!("error: {err}");
        eprintln!("({hint})");
    }
}
