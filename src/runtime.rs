//! Worker thread that owns an [`ObstaclePipeline`].
//!
//! Frames are handed over through a single slot: a frame submitted while the
//! previous one is still waiting replaces it, so a slow pipeline never builds
//! a backlog. Reset and pause requests are serialized with frame processing
//! and discard the pending frame. Configuration updates are applied between
//! frames.

use anyhow::{anyhow, Result};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{Receiver, Sender};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::JoinHandle;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::config::PipelineConfig;
use crate::detect::RawModelOutput;
use crate::pipeline::{FrameOutcome, ObstaclePipeline};

const IDLE_WAIT: Duration = Duration::from_millis(100);

pub type Clock = Box<dyn Fn() -> u64 + Send>;

/// Wall-clock milliseconds since the Unix epoch.
pub fn epoch_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Command {
    Reset,
    Pause(bool),
}

#[derive(Default)]
struct Slot {
    pending: Option<RawModelOutput>,
    commands: VecDeque<Command>,
}

#[derive(Default)]
struct Counters {
    submitted: AtomicU64,
    processed: AtomicU64,
    superseded: AtomicU64,
    discarded: AtomicU64,
    ignored: AtomicU64,
}

struct Shared {
    slot: Mutex<Slot>,
    wake: Condvar,
    shutdown: AtomicBool,
    counters: Counters,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Slot> {
        self.slot.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RuntimeStats {
    pub frames_submitted: u64,
    pub frames_processed: u64,
    /// Replaced by a newer frame before the worker picked them up.
    pub frames_superseded: u64,
    /// Dropped by a reset or pause request.
    pub frames_discarded: u64,
    /// Reached the pipeline while it was paused.
    pub frames_ignored: u64,
}

pub struct PipelineRuntime {
    pipeline: ObstaclePipeline,
    config_updates: Option<Receiver<PipelineConfig>>,
    outcomes: Option<Sender<FrameOutcome>>,
    clock: Clock,
}

impl PipelineRuntime {
    pub fn new(pipeline: ObstaclePipeline) -> Self {
        Self {
            pipeline,
            config_updates: None,
            outcomes: None,
            clock: Box::new(epoch_ms),
        }
    }

    /// Apply configurations from a [`crate::config::ConfigStore`] subscription.
    pub fn with_config_updates(mut self, updates: Receiver<PipelineConfig>) -> Self {
        self.config_updates = Some(updates);
        self
    }

    /// Forward every processed frame's outcome.
    pub fn with_outcomes(mut self, outcomes: Sender<FrameOutcome>) -> Self {
        self.outcomes = Some(outcomes);
        self
    }

    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    pub fn spawn(self) -> Result<RuntimeHandle> {
        let shared = Arc::new(Shared {
            slot: Mutex::new(Slot::default()),
            wake: Condvar::new(),
            shutdown: AtomicBool::new(false),
            counters: Counters::default(),
        });
        let worker_shared = Arc::clone(&shared);
        let join = std::thread::Builder::new()
            .name("obstacle-pipeline".to_string())
            .spawn(move || self.run(&worker_shared))
            .map_err(|e| anyhow!("failed to spawn pipeline worker: {}", e))?;
        log::info!("pipeline worker started");
        Ok(RuntimeHandle {
            shared,
            join: Some(join),
        })
    }

    fn run(mut self, shared: &Shared) {
        loop {
            let (commands, frame) = {
                let mut slot = shared.lock();
                while slot.pending.is_none()
                    && slot.commands.is_empty()
                    && !shared.shutdown.load(Ordering::SeqCst)
                {
                    let (guard, _) = shared
                        .wake
                        .wait_timeout(slot, IDLE_WAIT)
                        .unwrap_or_else(|e| e.into_inner());
                    slot = guard;
                    if self.config_updates.is_some() {
                        break;
                    }
                }
                if shared.shutdown.load(Ordering::SeqCst) {
                    break;
                }
                let commands: Vec<Command> = slot.commands.drain(..).collect();
                (commands, slot.pending.take())
            };

            self.apply_config_updates();
            for command in commands {
                match command {
                    Command::Reset => self.pipeline.reset(),
                    Command::Pause(paused) => self.pipeline.set_paused(paused),
                }
            }

            let Some(frame) = frame else {
                continue;
            };
            match self.pipeline.process(&frame, (self.clock)()) {
                Some(outcome) => {
                    shared.counters.processed.fetch_add(1, Ordering::Relaxed);
                    if let Some(tx) = &self.outcomes {
                        if tx.send(outcome).is_err() {
                            log::debug!("outcome receiver dropped");
                            self.outcomes = None;
                        }
                    }
                }
                None => {
                    shared.counters.ignored.fetch_add(1, Ordering::Relaxed);
                }
            }
        }
        log::info!("pipeline worker stopped");
    }

    fn apply_config_updates(&mut self) {
        let Some(updates) = &self.config_updates else {
            return;
        };
        // Only the newest configuration matters.
        let mut latest = None;
        while let Ok(config) = updates.try_recv() {
            latest = Some(config);
        }
        if let Some(config) = latest {
            self.pipeline.apply_config(&config);
        }
    }
}

pub struct RuntimeHandle {
    shared: Arc<Shared>,
    join: Option<JoinHandle<()>>,
}

impl RuntimeHandle {
    /// Hand a frame to the worker. Returns `true` when it replaced a frame
    /// that had not been picked up yet.
    pub fn submit(&self, frame: RawModelOutput) -> bool {
        let counters = &self.shared.counters;
        counters.submitted.fetch_add(1, Ordering::Relaxed);
        let superseded = {
            let mut slot = self.shared.lock();
            slot.pending.replace(frame).is_some()
        };
        if superseded {
            counters.superseded.fetch_add(1, Ordering::Relaxed);
        }
        self.shared.wake.notify_one();
        superseded
    }

    /// Clear all pipeline state before the next frame.
    pub fn reset(&self) {
        self.control(Command::Reset);
    }

    pub fn set_paused(&self, paused: bool) {
        self.control(Command::Pause(paused));
    }

    pub fn stats(&self) -> RuntimeStats {
        let c = &self.shared.counters;
        RuntimeStats {
            frames_submitted: c.submitted.load(Ordering::Relaxed),
            frames_processed: c.processed.load(Ordering::Relaxed),
            frames_superseded: c.superseded.load(Ordering::Relaxed),
            frames_discarded: c.discarded.load(Ordering::Relaxed),
            frames_ignored: c.ignored.load(Ordering::Relaxed),
        }
    }

    pub fn stop(mut self) -> Result<()> {
        self.shutdown();
        if let Some(join) = self.join.take() {
            join.join()
                .map_err(|_| anyhow!("pipeline worker thread panicked"))?;
        }
        Ok(())
    }

    fn control(&self, command: Command) {
        let dropped = {
            let mut slot = self.shared.lock();
            slot.commands.push_back(command);
            slot.pending.take().is_some()
        };
        if dropped {
            self.shared
                .counters
                .discarded
                .fetch_add(1, Ordering::Relaxed);
        }
        self.shared.wake.notify_one();
    }

    fn shutdown(&self) {
        self.shared.shutdown.store(true, Ordering::SeqCst);
        self.shared.wake.notify_all();
    }
}

impl Drop for RuntimeHandle {
    fn drop(&mut self) {
        self.shutdown();
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    fn frame(frame_index: u64) -> RawModelOutput {
        RawModelOutput::from_boxes(&[[0.2, 0.4, 0.8, 0.6]], &[0.9], frame_index)
    }

    fn runtime() -> (RuntimeHandle, mpsc::Receiver<FrameOutcome>) {
        let pipeline = ObstaclePipeline::new(&PipelineConfig::default()).unwrap();
        let (tx, rx) = mpsc::channel();
        let handle = PipelineRuntime::new(pipeline)
            .with_outcomes(tx)
            .with_clock(Box::new(|| 0))
            .spawn()
            .unwrap();
        (handle, rx)
    }

    #[test]
    fn submitted_frames_are_processed() {
        let (handle, rx) = runtime();
        handle.submit(frame(0));
        let outcome = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(outcome.frame_index, 0);
        assert!(outcome.target.is_some());
        let stats = handle.stats();
        assert_eq!(stats.frames_submitted, 1);
        handle.stop().unwrap();
    }

    #[test]
    fn paused_runtime_ignores_frames() {
        let (handle, rx) = runtime();
        handle.set_paused(true);
        handle.submit(frame(0));
        assert!(rx.recv_timeout(Duration::from_millis(300)).is_err());
        handle.set_paused(false);
        handle.submit(frame(1));
        let outcome = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(outcome.frame_index, 1);
        handle.stop().unwrap();
    }

    #[test]
    fn config_updates_reach_the_worker() {
        let store = crate::config::ConfigStore::new(PipelineConfig::default()).unwrap();
        let pipeline = ObstaclePipeline::new(&store.current()).unwrap();
        let (tx, rx) = mpsc::channel();
        let handle = PipelineRuntime::new(pipeline)
            .with_config_updates(store.subscribe())
            .with_outcomes(tx)
            .spawn()
            .unwrap();
        store
            .update(|c| c.hazard.min_confidence = 0.95)
            .unwrap();
        handle.submit(frame(0));
        let outcome = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(outcome.hazards, 0);
        handle.stop().unwrap();
    }
}
