mod cli;
mod output;

use std::process;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing::debug;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use audex_pipeline::{
    CallerId, Orchestrator, PipelineConfig, ProgressStage, RetrievalRequest,
};

use crate::cli::Args;

#[tokio::main]
async fn main() {
    let args = Args::parse();
    init_logging(args.verbose, args.quiet);

    if let Err(e) = run(args).await {
        process::exit(e);
    }
}

fn init_logging(verbose: u8, quiet: bool) {
    let default_level = if quiet {
        "warn"
    } else {
        match verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("audex={default_level},warn")));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .init();
}

/// Returns the process exit code on failure.
async fn run(args: Args) -> Result<(), i32> {
    let config = build_config(&args);
    let orchestrator = Orchestrator::new(config).map_err(|e| {
        output::render_failure(&e, args.json);
        1
    })?;

    let mut request = match (&args.url, &args.input) {
        (Some(url), None) => RetrievalRequest::for_url(url.as_str(), CallerId::new("cli")),
        (None, Some(path)) => RetrievalRequest::for_upload(path, CallerId::new("cli")),
        // clap enforces exactly one of the two.
        _ => unreachable!(),
    };
    request.size_ceiling = Some(args.max_size * 1024 * 1024);
    request.access_token = args.access_token.clone();

    let mut handle = orchestrator.submit(request).map_err(|e| {
        output::render_failure(&e, args.json);
        1
    })?;

    let mut last_stage = None;
    while let Some(event) = handle.progress().await {
        // Heartbeats repeat; render each stage once.
        if last_stage != Some(event.stage) {
            output::render_stage(event.stage, args.json);
            last_stage = Some(event.stage);
        }
        if event.stage == ProgressStage::Done {
            break;
        }
    }

    match handle.outcome().await {
        Ok(delivery) => {
            let saved_to = match save_audio(&args, &delivery).await {
                Ok(path) => path,
                Err(e) => {
                    eprintln!("error: {e:#}");
                    return Err(1);
                }
            };
            output::render_success(&delivery, &saved_to, args.json);
            delivery.acknowledge();
            Ok(())
        }
        Err(e) => {
            output::render_failure(&e, args.json);
            Err(1)
        }
    }
}

fn build_config(args: &Args) -> PipelineConfig {
    let mut config = PipelineConfig {
        max_payload_bytes: args.max_size * 1024 * 1024,
        concurrency: args.concurrency,
        fetch_timeout: args.fetch_timeout.map(Duration::from_secs),
        ..PipelineConfig::default()
    };
    if let Some(root) = &args.temp_root {
        config.temp_root.clone_from(root);
    }
    config.extractor.timeout = args.extract_timeout.map(Duration::from_secs);
    config.transcode.timeout = args.transcode_timeout_duration();
    config.transcode.format = args.format;
    config.transcode.bitrate.clone_from(&args.bitrate);
    if let Some(path) = &args.ffmpeg_path {
        config.transcode.binary_path.clone_from(path);
    }
    if let Some(path) = &args.ytdlp_path {
        config.extractor.binary_path.clone_from(path);
    }
    if !config.extractor.is_available() {
        debug!(
            tool = %config.extractor.binary_path,
            "extractor tool not found; only direct sources will work"
        );
    }
    config
}

/// Copy the job-owned output into the requested directory under its
/// user-facing name, before the job's cleanup reclaims it.
async fn save_audio(
    args: &Args,
    delivery: &audex_pipeline::Delivery,
) -> anyhow::Result<std::path::PathBuf> {
    tokio::fs::create_dir_all(&args.out_dir)
        .await
        .with_context(|| format!("creating {}", args.out_dir.display()))?;

    let stem = std::path::Path::new(&delivery.display_name)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "audio".to_owned());
    let dest = args
        .out_dir
        .join(format!("{stem}.{}", delivery.audio.format.extension()));

    tokio::fs::copy(&delivery.audio.path, &dest)
        .await
        .with_context(|| format!("saving audio to {}", dest.display()))?;
    Ok(dest)
}
