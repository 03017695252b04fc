//! Per-frame composition of the stages.
//!
//! One call to [`ObstaclePipeline::process`] runs decode, hazard filtering,
//! tracking, stabilization, proximity gating, navigation guidance and event
//! logging synchronously. All mutable state lives here and is only touched by
//! the caller that owns the pipeline.

use anyhow::Result;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

use crate::config::PipelineConfig;
use crate::detect::{
    decode_detections, BoundingBox, GeometricHazardFilter, HazardFilter, RawModelOutput,
};
use crate::event_log::{EventLogger, LogEvent};
use crate::navigation::{NavigationBuffer, NavigationResult};
use crate::proximity::{ProximityDecision, ProximityReporter, ProximityState};
use crate::stabilize::{StabilizerOutput, StabilizerState, TemporalStabilizer};
use crate::track::{IouTracker, TargetTracker, TrackUpdate, TrackedTarget};
use crate::transport::{HttpLogSink, LogSink};

/// Externally visible obstacle report.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct DetectionEvent {
    pub height: f32,
    pub confidence: f32,
    /// Heuristic distance proxy, not a calibrated measurement.
    pub distance: f32,
    pub bounding_box: Option<BoundingBox>,
    pub tracking_id: Option<u64>,
    pub timestamp_ms: u64,
}

/// Consumer of the stabilized signal (audio, haptics).
pub trait DetectionListener: Send {
    /// Primary channel: at most once per cooldown window.
    fn on_detection(&mut self, event: &DetectionEvent);

    /// Rate-limited or sub-threshold readings, for passive aggregation.
    fn on_fallback_detection(&mut self, height: f32, confidence: f32);
}

/// Listener that drops everything.
#[derive(Debug, Default)]
pub struct NullListener;

impl DetectionListener for NullListener {
    fn on_detection(&mut self, _event: &DetectionEvent) {}

    fn on_fallback_detection(&mut self, _height: f32, _confidence: f32) {}
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FallbackReason {
    /// Stable and meaningful, but inside the cooldown window.
    RateLimited,
    /// The stabilizer is not in the detected state.
    BelowThreshold,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
#[serde(tag = "channel", rename_all = "snake_case")]
pub enum Emission {
    Primary(DetectionEvent),
    Fallback {
        height: f32,
        confidence: f32,
        reason: FallbackReason,
    },
}

/// Summary of one processed frame.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct FrameOutcome {
    pub frame_index: u64,
    pub candidates: usize,
    pub hazards: usize,
    pub target: Option<TrackedTarget>,
    /// Tracking id dropped on this frame, if the target was lost.
    pub lost_target: Option<u64>,
    pub stabilizer: Option<StabilizerOutput>,
    pub emission: Option<Emission>,
    pub navigation: NavigationResult,
}

pub struct ObstaclePipeline {
    hazard: Box<dyn HazardFilter>,
    tracker: Box<dyn TargetTracker>,
    stabilizer: TemporalStabilizer,
    proximity: ProximityReporter,
    navigation: NavigationBuffer,
    event_log: Option<EventLogger>,
    listener: Box<dyn DetectionListener>,
    paused: bool,
}

impl ObstaclePipeline {
    /// Canonical policies (geometric hazard filter, IoU tracker). The event
    /// logger is attached when enabled, posting to the configured endpoint.
    pub fn new(config: &PipelineConfig) -> Result<Self> {
        let event_log = if config.event_log.enabled {
            let sink = match config.event_log.endpoint.as_deref() {
                Some(endpoint) => Some(Arc::new(HttpLogSink::new(
                    endpoint,
                    Duration::from_millis(config.event_log.timeout_ms),
                )?) as Arc<dyn LogSink>),
                None => None,
            };
            Some(EventLogger::new(&config.event_log, sink))
        } else {
            None
        };

        Ok(Self {
            hazard: Box::new(GeometricHazardFilter::new(config.hazard.clone())),
            tracker: Box::new(IouTracker::new(config.tracker.clone())),
            stabilizer: TemporalStabilizer::new(config.stabilizer.clone()),
            proximity: ProximityReporter::new(config.proximity.clone()),
            navigation: NavigationBuffer::new(config.navigation.clone()),
            event_log,
            listener: Box::new(NullListener),
            paused: false,
        })
    }

    pub fn with_hazard_filter(mut self, hazard: Box<dyn HazardFilter>) -> Self {
        self.hazard = hazard;
        self
    }

    pub fn with_tracker(mut self, tracker: Box<dyn TargetTracker>) -> Self {
        self.tracker = tracker;
        self
    }

    pub fn with_listener(mut self, listener: Box<dyn DetectionListener>) -> Self {
        self.listener = listener;
        self
    }

    pub fn with_event_logger(mut self, event_log: EventLogger) -> Self {
        self.event_log = Some(event_log);
        self
    }

    pub fn event_logger(&self) -> Option<&EventLogger> {
        self.event_log.as_ref()
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    /// While paused, frames are ignored without touching any state.
    pub fn set_paused(&mut self, paused: bool) {
        if paused != self.paused {
            log::info!("pipeline {}", if paused { "paused" } else { "resumed" });
        }
        self.paused = paused;
    }

    /// Clear tracker, stabilizer, proximity and navigation state together.
    pub fn reset(&mut self) {
        self.tracker.reset();
        self.stabilizer.reset();
        self.proximity.reset();
        self.navigation.clear();
        log::info!("pipeline state reset");
    }

    /// Re-parameterise every stage in place without clearing state.
    pub fn apply_config(&mut self, config: &PipelineConfig) {
        self.hazard.update_thresholds(&config.hazard);
        self.tracker.update_settings(&config.tracker);
        self.stabilizer.reconfigure(&config.stabilizer);
        self.proximity.reconfigure(&config.proximity);
        self.navigation.reconfigure(&config.navigation);
        log::debug!("pipeline configuration updated");
    }

    pub fn current_target(&self) -> Option<&TrackedTarget> {
        self.tracker.current()
    }

    pub fn stabilizer_state(&self) -> StabilizerState {
        self.stabilizer.state()
    }

    pub fn proximity_state(&self) -> &ProximityState {
        self.proximity.state()
    }

    pub fn navigation(&self) -> NavigationResult {
        self.navigation.result()
    }

    /// Run one frame through every stage. `None` when paused.
    pub fn process(&mut self, raw: &RawModelOutput, now_ms: u64) -> Option<FrameOutcome> {
        if self.paused {
            return None;
        }

        let decoded = decode_detections(raw);
        let hazards = self.hazard.filter(&decoded.detections);

        self.navigation.extend(&hazards);
        let navigation = self.navigation.result();

        let update = self.tracker.update(&hazards, raw.frame_index);
        let lost_target = match update {
            TrackUpdate::Lost { tracking_id } => {
                self.stabilizer.reset();
                self.proximity.forget_target();
                Some(tracking_id)
            }
            _ => None,
        };

        let mut outcome = FrameOutcome {
            frame_index: raw.frame_index,
            candidates: decoded.detections.len() + decoded.discarded,
            hazards: hazards.len(),
            target: update.target().copied(),
            lost_target,
            stabilizer: None,
            emission: None,
            navigation,
        };

        if let Some(target) = outcome.target {
            let det = target.detection;
            let reading = self.stabilizer.update(det.height, det.confidence);
            if let Some(event_log) = &self.event_log {
                event_log.record(LogEvent {
                    timestamp: now_ms,
                    height: reading.height,
                    confidence: reading.confidence,
                    center_x: det.center_x,
                    smoothed: reading.smoothed,
                    slope: reading.slope,
                    detected: reading.detected,
                });
            }
            outcome.stabilizer = Some(reading);
            outcome.emission = self.route(&target, &reading, now_ms);
        }

        Some(outcome)
    }

    fn route(
        &mut self,
        target: &TrackedTarget,
        reading: &StabilizerOutput,
        now_ms: u64,
    ) -> Option<Emission> {
        if !reading.detected {
            self.proximity.break_streak();
            self.listener
                .on_fallback_detection(reading.height, reading.confidence);
            return Some(Emission::Fallback {
                height: reading.height,
                confidence: reading.confidence,
                reason: FallbackReason::BelowThreshold,
            });
        }

        match self
            .proximity
            .evaluate(reading.height, reading.confidence, now_ms)
        {
            ProximityDecision::Report(report) => {
                let event = DetectionEvent {
                    height: report.height,
                    confidence: report.confidence,
                    distance: report.distance,
                    bounding_box: Some(target.detection.bbox.to_xywh()),
                    tracking_id: Some(target.tracking_id),
                    timestamp_ms: now_ms,
                };
                log::info!(
                    "obstacle target={} distance~{:.2} height={:.3} conf={:.2}",
                    target.tracking_id,
                    event.distance,
                    event.height,
                    event.confidence
                );
                self.listener.on_detection(&event);
                Some(Emission::Primary(event))
            }
            ProximityDecision::RateLimited(report) => {
                self.listener
                    .on_fallback_detection(report.height, report.confidence);
                Some(Emission::Fallback {
                    height: report.height,
                    confidence: report.confidence,
                    reason: FallbackReason::RateLimited,
                })
            }
            ProximityDecision::Settling { .. } | ProximityDecision::Unchanged { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::ConfidenceOnlyFilter;
    use crate::navigation::Direction;
    use crate::track::ClosestTargetTracker;

    fn frame(frame_index: u64, boxes: &[[f32; 4]], scores: &[f32]) -> RawModelOutput {
        RawModelOutput::from_boxes(boxes, scores, frame_index)
    }

    #[test]
    fn empty_and_malformed_frames_report_nothing() {
        let mut pipeline = ObstaclePipeline::new(&PipelineConfig::default()).unwrap();
        let outcome = pipeline.process(&RawModelOutput::default(), 0).unwrap();
        assert_eq!(outcome.candidates, 0);
        assert!(outcome.target.is_none());
        assert!(outcome.emission.is_none());
        assert_eq!(outcome.navigation.direction, Direction::Straight);
    }

    #[test]
    fn full_frame_artifact_is_never_tracked() {
        let mut pipeline = ObstaclePipeline::new(&PipelineConfig::default()).unwrap();
        for i in 0..5 {
            let outcome = pipeline
                .process(&frame(i, &[[0.0, 0.0, 1.0, 1.0]], &[0.95]), i * 100)
                .unwrap();
            assert_eq!(outcome.hazards, 0);
            assert!(outcome.target.is_none());
        }
    }

    #[test]
    fn paused_frames_leave_state_untouched() {
        let mut pipeline = ObstaclePipeline::new(&PipelineConfig::default()).unwrap();
        pipeline.set_paused(true);
        assert!(pipeline
            .process(&frame(0, &[[0.3, 0.4, 0.8, 0.6]], &[0.9]), 0)
            .is_none());
        assert!(pipeline.current_target().is_none());
        assert!(pipeline.stabilizer_state().height_history.is_empty());

        pipeline.set_paused(false);
        let outcome = pipeline
            .process(&frame(1, &[[0.3, 0.4, 0.8, 0.6]], &[0.9]), 100)
            .unwrap();
        assert!(outcome.target.is_some());
    }

    #[test]
    fn swapped_policies_are_used() {
        let mut pipeline = ObstaclePipeline::new(&PipelineConfig::default())
            .unwrap()
            .with_hazard_filter(Box::new(ConfidenceOnlyFilter::new(0.5)))
            .with_tracker(Box::new(ClosestTargetTracker::default()));
        // Full-frame box passes the confidence-only filter.
        let outcome = pipeline
            .process(&frame(0, &[[0.0, 0.0, 1.0, 1.0]], &[0.95]), 0)
            .unwrap();
        assert_eq!(outcome.hazards, 1);
        assert!(outcome.target.is_some());
        // Closest-only tracking drops the target on the first empty frame.
        let outcome = pipeline.process(&frame(1, &[], &[]), 100).unwrap();
        assert_eq!(outcome.lost_target, Some(1));
    }

    #[test]
    fn reset_clears_every_stage() {
        let mut pipeline = ObstaclePipeline::new(&PipelineConfig::default()).unwrap();
        for i in 0..4 {
            pipeline.process(&frame(i, &[[0.2, 0.4, 0.8, 0.6]], &[0.9]), i * 100);
        }
        assert!(pipeline.current_target().is_some());
        pipeline.reset();
        assert!(pipeline.current_target().is_none());
        assert_eq!(pipeline.stabilizer_state(), StabilizerState::default());
        assert_eq!(pipeline.proximity_state(), &ProximityState::default());
        assert_eq!(pipeline.navigation().obstacle_count, 0);
    }
}
