use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use log::{LevelFilter, info, warn};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use trace_matcher::{
    Fix, MapMatcher, MatchObserver, MatchOutput, MatcherConfig, MatchingDebugInfo,
    MatchingDebugPayload, NetworkConfig, RoadNetwork,
};

/// Match GPS traces against a road network
#[derive(Parser, Debug)]
#[command(name = "trace-matcher")]
struct Args {
    /// Road network JSON (`{"edges": [...]}`)
    #[arg(long)]
    network: PathBuf,

    /// Traces JSON (`[{"id": "...", "fixes": [...]}]`)
    #[arg(long)]
    traces: PathBuf,

    /// Optional JSON with `matcher` and `network` settings
    #[arg(long)]
    config: Option<PathBuf>,

    /// Write the report here instead of stdout
    #[arg(long)]
    output: Option<PathBuf>,

    /// Attach the per-state debug payload to every report
    #[arg(long)]
    debug: bool,

    #[arg(long, default_value = "info")]
    log_level: LevelFilter,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ConfigFile {
    matcher: MatcherConfig,
    network: NetworkConfig,
}

#[derive(Debug, Deserialize)]
struct TraceInput {
    id: String,
    fixes: Vec<Fix>,
}

#[derive(Debug, Serialize)]
struct TraceReport {
    id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<MatchOutput>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    debug: Option<MatchingDebugPayload>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    env_logger::builder()
        .filter_level(args.log_level)
        .format_target(false)
        .format_timestamp(None)
        .target(env_logger::Target::Stderr)
        .init();
    info!("Starting trace matcher");

    let config: ConfigFile = match &args.config {
        Some(path) => serde_json::from_slice(&tokio::fs::read(path).await?)?,
        None => ConfigFile::default(),
    };

    let network_json = tokio::fs::read_to_string(&args.network).await?;
    let network = RoadNetwork::from_json(&network_json, config.network.clone())?;

    let traces: Vec<TraceInput> = serde_json::from_slice(&tokio::fs::read(&args.traces).await?)?;
    info!("Loaded {} traces", traces.len());

    let matcher = MapMatcher::new(config.matcher)?;
    let debug = args.debug;

    // Matching is CPU bound, keep it off the async workers
    let reports =
        tokio::task::spawn_blocking(move || match_all(&matcher, &network, &traces, debug))
            .await??;

    let matched = reports.iter().filter(|r| r.result.is_some()).count();
    info!(
        "Trace matching completed. Processed: {}, Successful: {}",
        reports.len(),
        matched
    );

    let json = serde_json::to_string_pretty(&reports)?;
    match &args.output {
        Some(path) => tokio::fs::write(path, json).await?,
        None => println!("{}", json),
    }

    Ok(())
}

fn match_all(
    matcher: &MapMatcher,
    network: &RoadNetwork,
    traces: &[TraceInput],
    debug: bool,
) -> Result<Vec<TraceReport>> {
    let pb = ProgressBar::new(traces.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("[{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} ({eta}) - Matching traces")?
            .progress_chars("##-"),
    );

    let reports = traces
        .par_iter()
        .map(|trace| {
            let report = match_one(matcher, network, trace, debug);
            pb.inc(1);
            report
        })
        .collect();

    pb.finish_and_clear();
    Ok(reports)
}

fn match_one(
    matcher: &MapMatcher,
    network: &RoadNetwork,
    trace: &TraceInput,
    debug: bool,
) -> TraceReport {
    let mut debug_info = debug.then(MatchingDebugInfo::new);
    let observer = debug_info.as_mut().map(|d| d as &mut dyn MatchObserver);

    match matcher.match_trace(&trace.fixes, network, network, observer) {
        Ok(output) => {
            info!(
                "Trace {}: {}/{} fixes matched in {} segments",
                trace.id,
                output.matched_count(),
                output.trace_len,
                output.segments.len()
            );
            TraceReport {
                id: trace.id.clone(),
                result: Some(output),
                error: None,
                debug: debug_info.map(MatchingDebugInfo::into_payload),
            }
        }
        Err(e) => {
            let e = anyhow::Error::new(e);
            warn!("Trace {} failed: {:#}", trace.id, e);
            TraceReport {
                id: trace.id.clone(),
                result: None,
                error: Some(format!("{:#}", e)),
                debug: None,
            }
        }
    }
}
