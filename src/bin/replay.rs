//! replay - run recorded detector output through the pipeline
//!
//! Reads one raw model output per line (JSON) and prints one frame outcome
//! per line. Time advances by a fixed interval per frame index, so a replay
//! is deterministic.

use anyhow::{Context, Result};
use clap::Parser;
use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::PathBuf;

use obstacle_signal::{ObstaclePipeline, PipelineConfig, RawModelOutput};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// JSONL file of raw model outputs; stdin when omitted.
    input: Option<PathBuf>,
    /// Milliseconds between consecutive frame indices.
    #[arg(long, default_value_t = 100)]
    interval_ms: u64,
    /// Config file (JSON or TOML). Falls back to OBSTACLE_CONFIG.
    #[arg(long, env = "OBSTACLE_CONFIG")]
    config: Option<PathBuf>,
    /// Skip lines that fail to parse instead of aborting.
    #[arg(long)]
    skip_invalid: bool,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => PipelineConfig::from_path(path)?,
        None => PipelineConfig::load()?,
    };
    let mut pipeline = ObstaclePipeline::new(&config)?;

    let reader: Box<dyn BufRead> = match &args.input {
        Some(path) => Box::new(BufReader::new(
            File::open(path).with_context(|| format!("open {}", path.display()))?,
        )),
        None => Box::new(BufReader::new(io::stdin())),
    };
    let mut out = BufWriter::new(io::stdout().lock());

    let mut processed = 0u64;
    for (line_no, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let raw: RawModelOutput = match serde_json::from_str(&line) {
            Ok(raw) => raw,
            Err(e) if args.skip_invalid => {
                log::warn!("line {}: {}", line_no + 1, e);
                continue;
            }
            Err(e) => return Err(e).with_context(|| format!("line {}", line_no + 1)),
        };
        let now_ms = raw.frame_index.saturating_mul(args.interval_ms);
        if let Some(outcome) = pipeline.process(&raw, now_ms) {
            serde_json::to_writer(&mut out, &outcome)?;
            out.write_all(b"\n")?;
            processed += 1;
        }
    }
    out.flush()?;

    if let Some(event_log) = pipeline.event_logger() {
        if !event_log.is_empty() {
            match event_log.flush_now() {
                Ok(sent) => log::info!("flushed {} log events", sent),
                Err(e) => log::warn!("event log flush failed: {}", e),
            }
        }
    }
    log::info!("replayed {} frames", processed);
    Ok(())
}
