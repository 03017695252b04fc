use crate::detect::Detection;

use super::target::{
    best_match, tallest, TargetTracker, TrackUpdate, TrackedTarget, TrackerSettings,
};

/// Single-target tracker matching frames by box overlap.
///
/// NoTarget -> Tracked on the tallest filtered detection. While tracked, the
/// best IoU above the match threshold refreshes the target; otherwise the last
/// known state is carried forward until the loss budget runs out.
#[derive(Debug)]
pub struct IouTracker {
    settings: TrackerSettings,
    target: Option<TrackedTarget>,
    next_id: u64,
}

impl IouTracker {
    pub fn new(settings: TrackerSettings) -> Self {
        Self {
            settings,
            target: None,
            next_id: 1,
        }
    }

    fn acquire(&mut self, detection: Detection, frame_index: u64) -> TrackedTarget {
        let target = TrackedTarget {
            detection,
            tracking_id: self.next_id,
            last_seen_frame: frame_index,
            stale_frames: 0,
        };
        self.next_id += 1;
        self.target = Some(target);
        log::debug!(
            "target {} acquired at frame {} (height {:.3})",
            target.tracking_id,
            frame_index,
            detection.height
        );
        target
    }
}

impl Default for IouTracker {
    fn default() -> Self {
        Self::new(TrackerSettings::default())
    }
}

impl TargetTracker for IouTracker {
    fn name(&self) -> &'static str {
        "iou"
    }

    fn update(&mut self, detections: &[Detection], frame_index: u64) -> TrackUpdate {
        let Some(mut target) = self.target else {
            return match tallest(detections) {
                Some(det) => TrackUpdate::Acquired(self.acquire(*det, frame_index)),
                None => TrackUpdate::Idle,
            };
        };

        if let Some((index, _)) = best_match(
            &target.detection,
            detections,
            self.settings.iou_match_threshold,
        ) {
            target.detection = detections[index];
            target.last_seen_frame = frame_index;
            target.stale_frames = 0;
            self.target = Some(target);
            return TrackUpdate::Matched(target);
        }

        target.stale_frames += 1;
        if target.stale_frames > self.settings.target_loss_frames {
            log::debug!(
                "target {} lost after {} unmatched frames",
                target.tracking_id,
                target.stale_frames
            );
            self.target = None;
            return TrackUpdate::Lost {
                tracking_id: target.tracking_id,
            };
        }
        self.target = Some(target);
        TrackUpdate::Stale(target)
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::BoxCoords;

    fn det(ymin: f32, xmin: f32, ymax: f32, xmax: f32) -> Detection {
        Detection::from_raw(BoxCoords::new(ymin, xmin, ymax, xmax), 0.8).unwrap()
    }

    #[test]
    fn acquires_tallest_detection() {
        let mut tracker = IouTracker::new(TrackerSettings::default());
        let update = tracker.update(&[det(0.5, 0.1, 0.7, 0.3), det(0.2, 0.4, 0.9, 0.6)], 0);
        match update {
            TrackUpdate::Acquired(t) => {
                assert_eq!(t.tracking_id, 1);
                assert!((t.detection.height - 0.7).abs() < 1e-6);
            }
            other => panic!("expected acquisition, got {:?}", other),
        }
    }

    #[test]
    fn matches_overlapping_detection_and_keeps_id() {
        let mut tracker = IouTracker::new(TrackerSettings::default());
        tracker.update(&[det(0.2, 0.4, 0.8, 0.6)], 0);
        let update = tracker.update(&[det(0.0, 0.0, 0.3, 0.1), det(0.22, 0.41, 0.82, 0.61)], 1);
        let TrackUpdate::Matched(t) = update else {
            panic!("expected match, got {:?}", update);
        };
        assert_eq!(t.tracking_id, 1);
        assert_eq!(t.last_seen_frame, 1);
        assert!((t.detection.bbox.ymax - 0.82).abs() < 1e-6);
    }

    #[test]
    fn ties_resolve_to_first_detection() {
        let reference = det(0.2, 0.4, 0.8, 0.6);
        let same = [det(0.2, 0.4, 0.8, 0.6), det(0.2, 0.4, 0.8, 0.6)];
        assert_eq!(best_match(&reference, &same, 0.3).map(|m| m.0), Some(0));
    }

    #[test]
    fn persists_then_loses_target_after_budget() {
        let settings = TrackerSettings {
            iou_match_threshold: 0.3,
            target_loss_frames: 3,
        };
        let mut tracker = IouTracker::new(settings);
        tracker.update(&[det(0.2, 0.4, 0.8, 0.6)], 0);

        for frame in 1..=3 {
            let update = tracker.update(&[det(0.0, 0.0, 0.3, 0.1)], frame);
            let TrackUpdate::Stale(t) = update else {
                panic!("expected stale at frame {}, got {:?}", frame, update);
            };
            assert_eq!(t.stale_frames, frame as u32);
            assert_eq!(t.last_seen_frame, 0);
        }

        assert_eq!(tracker.update(&[], 4), TrackUpdate::Lost { tracking_id: 1 });
        assert!(tracker.current().is_none());

        // Re-acquisition issues a fresh id.
        let TrackUpdate::Acquired(t) = tracker.update(&[det(0.2, 0.4, 0.8, 0.6)], 5) else {
            panic!("expected re-acquisition");
        };
        assert_eq!(t.tracking_id, 2);
    }

    #[test]
    fn reset_drops_target_without_reusing_ids() {
        let mut tracker = IouTracker::new(TrackerSettings::default());
        tracker.update(&[det(0.2, 0.4, 0.8, 0.6)], 0);
        tracker.reset();
        assert!(tracker.current().is_none());
        assert_eq!(tracker.update(&[], 1), TrackUpdate::Idle);
        let TrackUpdate::Acquired(t) = tracker.update(&[det(0.2, 0.4, 0.8, 0.6)], 2) else {
            panic!("expected acquisition");
        };
        assert_eq!(t.tracking_id, 2);
    }
}
