use serde::{Deserialize, Serialize};

use crate::detect::Detection;

/// The single obstacle currently followed across frames.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct TrackedTarget {
    pub detection: Detection,
    pub tracking_id: u64,
    pub last_seen_frame: u64,
    /// Frames since the last matching detection. Zero when fresh.
    pub stale_frames: u32,
}

impl TrackedTarget {
    pub fn is_stale(&self) -> bool {
        self.stale_frames > 0
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TrackerSettings {
    /// A detection must overlap the target by strictly more than this IoU.
    pub iou_match_threshold: f32,
    /// Frames a target may go unmatched before it is dropped.
    pub target_loss_frames: u32,
}

impl Default for TrackerSettings {
    fn default() -> Self {
        Self {
            iou_match_threshold: 0.3,
            target_loss_frames: 30,
        }
    }
}

/// Outcome of feeding one frame to a tracker.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum TrackUpdate {
    /// No target before or after this frame.
    Idle,
    Acquired(TrackedTarget),
    Matched(TrackedTarget),
    /// No match; the last known state is carried forward.
    Stale(TrackedTarget),
    Lost { tracking_id: u64 },
}

impl TrackUpdate {
    /// Target to feed downstream this frame, if any.
    pub fn target(&self) -> Option<&TrackedTarget> {
        match self {
            TrackUpdate::Acquired(t) | TrackUpdate::Matched(t) | TrackUpdate::Stale(t) => Some(t),
            TrackUpdate::Idle | TrackUpdate::Lost { .. } => None,
        }
    }
}

/// Policy maintaining zero or one active target.
pub trait TargetTracker: Send {
    fn name(&self) -> &'static str;

    /// Advance by one frame of hazard-filtered detections.
    fn update(&mut self, detections: &[Detection], frame_index: u64) -> TrackUpdate;

    fn current(&self) -> Option<&TrackedTarget>;

    /// Drop the active target. Tracking ids are never reused.
    fn reset(&mut self);

    fn update_settings(&mut self, _settings: &TrackerSettings) {}
}

/// Tallest detection, first on ties. Height stands in for proximity.
pub(crate) fn tallest(detections: &[Detection]) -> Option<&Detection> {
    detections.iter().fold(None, |best: Option<&Detection>, det| match best {
        Some(current) if det.height <= current.height => Some(current),
        _ => Some(det),
    })
}

/// Index and IoU of the best overlap strictly above `threshold`, first on ties.
pub(crate) fn best_match(
    reference: &Detection,
    detections: &[Detection],
    threshold: f32,
) -> Option<(usize, f32)> {
    let mut best: Option<(usize, f32)> = None;
    for (i, det) in detections.iter().enumerate() {
        let iou = reference.iou(det);
        if iou <= threshold {
            continue;
        }
        match best {
            Some((_, top)) if iou <= top => {}
            _ => best = Some((i, iou)),
        }
    }
    best
}
