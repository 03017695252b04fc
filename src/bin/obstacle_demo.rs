//! obstacle_demo - synthetic detector stream through the pipeline worker

use anyhow::{anyhow, Result};
use clap::Parser;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{mpsc, Arc};
use std::time::{Duration, Instant};

use obstacle_signal::{
    ConfigStore, DetectionEvent, DetectionListener, FrameOutcome, ObstaclePipeline,
    PipelineConfig, PipelineRuntime, RawModelOutput,
};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Duration in seconds of the synthetic stream.
    #[arg(long, default_value_t = 10)]
    seconds: u64,
    /// Frames per second submitted to the worker.
    #[arg(long, default_value_t = 15)]
    fps: u32,
    /// Optional deterministic seed for the synthetic detector.
    #[arg(long)]
    seed: Option<u64>,
    /// Probability that a frame carries a spurious full-frame box.
    #[arg(long, default_value_t = 0.05)]
    artifact_rate: f64,
    /// Probability that the obstacle is missed on a frame.
    #[arg(long, default_value_t = 0.1)]
    dropout_rate: f64,
}

struct ConsoleListener {
    fallbacks: Arc<AtomicU64>,
}

impl DetectionListener for ConsoleListener {
    fn on_detection(&mut self, event: &DetectionEvent) {
        log::info!(
            "obstacle ahead: ~{:.1}m (height {:.2}, conf {:.2}, target {:?})",
            event.distance,
            event.height,
            event.confidence,
            event.tracking_id
        );
    }

    fn on_fallback_detection(&mut self, height: f32, confidence: f32) {
        self.fallbacks.fetch_add(1, Ordering::Relaxed);
        log::trace!("fallback height={:.3} conf={:.2}", height, confidence);
    }
}

/// An obstacle drifting toward the camera with detector jitter.
struct SyntheticDetector {
    rng: StdRng,
    frame_index: u64,
    height: f32,
    center_x: f32,
    artifact_rate: f64,
    dropout_rate: f64,
}

impl SyntheticDetector {
    fn new(seed: Option<u64>, artifact_rate: f64, dropout_rate: f64) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            rng,
            frame_index: 0,
            height: 0.15,
            center_x: 0.5,
            artifact_rate,
            dropout_rate,
        }
    }

    fn next_frame(&mut self) -> RawModelOutput {
        let mut boxes = Vec::new();
        let mut scores = Vec::new();

        self.height = (self.height + self.rng.gen_range(-0.01..0.025)).clamp(0.1, 0.85);
        self.center_x = (self.center_x + self.rng.gen_range(-0.02..0.02)).clamp(0.2, 0.8);
        if !self.rng.gen_bool(self.dropout_rate) {
            let h = (self.height + self.rng.gen_range(-0.03..0.03)).max(0.05);
            let w = h * 0.6;
            let ymax = 0.95;
            boxes.push([
                ymax - h,
                self.center_x - w / 2.0,
                ymax,
                self.center_x + w / 2.0,
            ]);
            scores.push(self.rng.gen_range(0.45..0.95));
        }
        if self.rng.gen_bool(self.artifact_rate) {
            boxes.push([0.0, 0.0, 1.0, 1.0]);
            scores.push(0.99);
        }
        // Off-path clutter near the frame edge.
        if self.rng.gen_bool(0.3) {
            let x = self.rng.gen_range(0.0..0.08);
            boxes.push([0.5, x, 0.9, x + 0.05]);
            scores.push(self.rng.gen_range(0.3..0.8));
        }

        let frame = RawModelOutput::from_boxes(&boxes, &scores, self.frame_index);
        self.frame_index += 1;
        frame
    }
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    if args.fps == 0 {
        return Err(anyhow!("fps must be >= 1"));
    }
    for (name, rate) in [
        ("artifact-rate", args.artifact_rate),
        ("dropout-rate", args.dropout_rate),
    ] {
        if !(0.0..=1.0).contains(&rate) {
            return Err(anyhow!("{} must be within [0, 1]", name));
        }
    }

    let store = ConfigStore::new(PipelineConfig::load()?)?;
    let fallbacks = Arc::new(AtomicU64::new(0));
    let pipeline = ObstaclePipeline::new(&store.current())?.with_listener(Box::new(ConsoleListener {
        fallbacks: Arc::clone(&fallbacks),
    }));
    let (outcome_tx, outcome_rx) = mpsc::channel::<FrameOutcome>();
    let handle = PipelineRuntime::new(pipeline)
        .with_config_updates(store.subscribe())
        .with_outcomes(outcome_tx)
        .spawn()?;

    let (stop_tx, stop_rx) = mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = stop_tx.send(());
    })
    .map_err(|e| anyhow!("error setting Ctrl-C handler: {}", e))?;

    let mut detector = SyntheticDetector::new(args.seed, args.artifact_rate, args.dropout_rate);
    let frame_interval = Duration::from_secs(1) / args.fps;
    let deadline = Instant::now() + Duration::from_secs(args.seconds);
    let mut last_direction = None;

    log::info!(
        "obstacle_demo running for {}s at {} fps (Ctrl-C to stop)",
        args.seconds,
        args.fps
    );
    while Instant::now() < deadline {
        handle.submit(detector.next_frame());

        while let Ok(outcome) = outcome_rx.try_recv() {
            let direction = outcome.navigation.direction;
            if last_direction != Some(direction) {
                log::info!(
                    "guidance: {:?} (path clear: {}, obstacles: {})",
                    direction,
                    outcome.navigation.path_clear,
                    outcome.navigation.obstacle_count
                );
                last_direction = Some(direction);
            }
            if let Some(id) = outcome.lost_target {
                log::info!("target {} lost", id);
            }
        }

        if stop_rx.recv_timeout(frame_interval).is_ok() {
            log::info!("shutdown signal received, stopping pipeline...");
            break;
        }
    }

    let stats = handle.stats();
    handle.stop()?;
    log::info!(
        "frames submitted={} processed={} superseded={} fallbacks={}",
        stats.frames_submitted,
        stats.frames_processed,
        stats.frames_superseded,
        fallbacks.load(Ordering::Relaxed)
    );
    Ok(())
}
