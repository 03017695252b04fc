use crate::detect::Detection;

use super::target::{
    best_match, tallest, TargetTracker, TrackUpdate, TrackedTarget, TrackerSettings,
};

/// Closest-obstacle-only policy: every frame follows the tallest detection
/// and nothing persists across empty frames.
///
/// The tracking id survives when consecutive picks overlap above the match
/// threshold, so downstream consumers can still tell one obstacle from the next.
#[derive(Debug)]
pub struct ClosestTargetTracker {
    settings: TrackerSettings,
    target: Option<TrackedTarget>,
    next_id: u64,
}

impl ClosestTargetTracker {
    pub fn new(settings: TrackerSettings) -> Self {
        Self {
            settings,
            target: None,
            next_id: 1,
        }
    }
}

impl Default for ClosestTargetTracker {
    fn default() -> Self {
        Self::new(TrackerSettings::default())
    }
}

impl TargetTracker for ClosestTargetTracker {
    fn name(&self) -> &'static str {
        "closest"
    }

    fn update(&mut self, detections: &[Detection], frame_index: u64) -> TrackUpdate {
        let previous = self.target.take();
        let Some(closest) = tallest(detections).copied() else {
            return match previous {
                Some(t) => TrackUpdate::Lost {
                    tracking_id: t.tracking_id,
                },
                None => TrackUpdate::Idle,
            };
        };

        let continued = previous.filter(|prev| {
            best_match(
                &prev.detection,
                std::slice::from_ref(&closest),
                self.settings.iou_match_threshold,
            )
            .is_some()
        });
        let tracking_id = match continued {
            Some(prev) => prev.tracking_id,
            None => {
                self.next_id += 1;
                self.next_id - 1
            }
        };
        let target = TrackedTarget {
            detection: closest,
            tracking_id,
            last_seen_frame: frame_index,
            stale_frames: 0,
        };
        self.target = Some(target);
        if continued.is_some() {
            TrackUpdate::Matched(target)
        } else {
            TrackUpdate::Acquired(target)
        }
    }

    fn current(&self) -> Option<&TrackedTarget> {
        self.target.as_ref()
    }

    fn reset(&mut self) {
        self.target = None;
    }

    fn update_settings(&mut self, settings: &TrackerSettings) {
        self.settings = settings.clone();
    }
}
