use serde::{Deserialize, Serialize};

use super::result::Detection;

/// Thresholds for the geometric hazard predicate.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HazardThresholds {
    pub min_confidence: f32,
    /// Boxes smaller than this are treated as noise.
    pub min_area: f32,
    /// Near-full-frame boxes are a known stalled-inference artifact.
    pub max_area: f32,
    /// Horizontal walking band, inclusive.
    pub min_center_x: f32,
    pub max_center_x: f32,
    /// The box bottom (`ymax`) must reach strictly below this line.
    pub min_bottom: f32,
    pub max_aspect_ratio: f32,
}

impl Default for HazardThresholds {
    fn default() -> Self {
        Self {
            min_confidence: 0.25,
            min_area: 0.002,
            max_area: 0.9,
            min_center_x: 0.1,
            max_center_x: 0.9,
            min_bottom: 0.3,
            max_aspect_ratio: 5.0,
        }
    }
}

/// Why a candidate was rejected.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Rejection {
    LowConfidence,
    TooSmall,
    FullFrame,
    OffPath,
    NotGrounded,
    TooWide,
}

/// Policy deciding whether a candidate represents a walking obstacle.
pub trait HazardFilter: Send {
    fn name(&self) -> &'static str;

    fn is_hazard(&self, detection: &Detection) -> bool;

    fn filter(&self, detections: &[Detection]) -> Vec<Detection> {
        detections
            .iter()
            .filter(|det| self.is_hazard(det))
            .copied()
            .collect()
    }

    /// Replace thresholds after a live configuration change.
    fn update_thresholds(&mut self, _thresholds: &HazardThresholds) {}
}

/// Confidence floor plus geometric artifact suppression.
#[derive(Clone, Debug, Default)]
pub struct GeometricHazardFilter {
    thresholds: HazardThresholds,
}

impl GeometricHazardFilter {
    pub fn new(thresholds: HazardThresholds) -> Self {
        Self { thresholds }
    }

    pub fn thresholds(&self) -> &HazardThresholds {
        &self.thresholds
    }

    /// First failed check, or `None` when the candidate is a hazard.
    pub fn check(&self, detection: &Detection) -> Option<Rejection> {
        let t = &self.thresholds;
        if detection.confidence < t.min_confidence {
            return Some(Rejection::LowConfidence);
        }
        if detection.height <= 0.0 || detection.area < t.min_area {
            return Some(Rejection::TooSmall);
        }
        if detection.area > t.max_area {
            return Some(Rejection::FullFrame);
        }
        if detection.center_x < t.min_center_x || detection.center_x > t.max_center_x {
            return Some(Rejection::OffPath);
        }
        if detection.bbox.ymax <= t.min_bottom {
            return Some(Rejection::NotGrounded);
        }
        if detection.width / detection.height > t.max_aspect_ratio {
            return Some(Rejection::TooWide);
        }
        None
    }
}

impl HazardFilter for GeometricHazardFilter {
    fn name(&self) -> &'static str {
        "geometric"
    }

    fn is_hazard(&self, detection: &Detection) -> bool {
        self.check(detection).is_none()
    }

    fn update_thresholds(&mut self, thresholds: &HazardThresholds) {
        self.thresholds = thresholds.clone();
    }
}

/// Trusts the classifier alone: only the confidence floor and a non-empty box.
#[derive(Clone, Debug)]
pub struct ConfidenceOnlyFilter {
    min_confidence: f32,
}

impl ConfidenceOnlyFilter {
    pub fn new(min_confidence: f32) -> Self {
        Self { min_confidence }
    }
}

impl HazardFilter for ConfidenceOnlyFilter {
    fn name(&self) -> &'static str {
        "confidence-only"
    }

    fn is_hazard(&self, detection: &Detection) -> bool {
        detection.confidence >= self.min_confidence && detection.area > 0.0
    }

    fn update_thresholds(&mut self, thresholds: &HazardThresholds) {
        self.min_confidence = thresholds.min_confidence;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::result::BoxCoords;

    fn det(ymin: f32, xmin: f32, ymax: f32, xmax: f32, conf: f32) -> Detection {
        Detection::from_raw(BoxCoords::new(ymin, xmin, ymax, xmax), conf).unwrap()
    }

    #[test]
    fn accepts_grounded_center_obstacle() {
        let filter = GeometricHazardFilter::default();
        assert!(filter.is_hazard(&det(0.3, 0.4, 0.8, 0.6, 0.6)));
    }

    #[test]
    fn rejects_each_artifact_pattern() {
        let filter = GeometricHazardFilter::default();
        let cases = [
            (det(0.3, 0.4, 0.8, 0.6, 0.1), Rejection::LowConfidence),
            (det(0.5, 0.5, 0.52, 0.52, 0.9), Rejection::TooSmall),
            (det(0.0, 0.0, 1.0, 1.0, 0.9), Rejection::FullFrame),
            (det(0.3, 0.0, 0.8, 0.15, 0.9), Rejection::OffPath),
            (det(0.3, 0.85, 0.8, 1.0, 0.9), Rejection::OffPath),
            (det(0.0, 0.4, 0.25, 0.6, 0.9), Rejection::NotGrounded),
            (det(0.7, 0.1, 0.8, 0.9, 0.9), Rejection::TooWide),
        ];
        for (candidate, expected) in cases {
            assert_eq!(filter.check(&candidate), Some(expected), "{:?}", candidate.bbox);
        }
    }

    #[test]
    fn filter_keeps_order_of_accepted() {
        let filter = GeometricHazardFilter::default();
        let accepted = filter.filter(&[
            det(0.3, 0.4, 0.8, 0.6, 0.6),
            det(0.0, 0.0, 1.0, 1.0, 0.9),
            det(0.4, 0.2, 0.9, 0.3, 0.5),
        ]);
        assert_eq!(accepted.len(), 2);
        assert!((accepted[1].center_x - 0.25).abs() < 1e-6);
    }

    #[test]
    fn confidence_only_variant_ignores_geometry() {
        let filter = ConfidenceOnlyFilter::new(0.25);
        assert!(filter.is_hazard(&det(0.0, 0.0, 1.0, 1.0, 0.9)));
        assert!(!filter.is_hazard(&det(0.3, 0.4, 0.8, 0.6, 0.2)));
    }
}
