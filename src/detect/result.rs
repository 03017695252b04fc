use serde::{Deserialize, Serialize};

/// Axis-aligned box in normalized `[ymin, xmin, ymax, xmax]` order.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct BoxCoords {
    pub ymin: f32,
    pub xmin: f32,
    pub ymax: f32,
    pub xmax: f32,
}

impl BoxCoords {
    pub fn new(ymin: f32, xmin: f32, ymax: f32, xmax: f32) -> Self {
        Self {
            ymin,
            xmin,
            ymax,
            xmax,
        }
    }

    pub fn from_array(coords: [f32; 4]) -> Self {
        Self::new(coords[0], coords[1], coords[2], coords[3])
    }

    pub fn is_finite(&self) -> bool {
        self.ymin.is_finite()
            && self.xmin.is_finite()
            && self.ymax.is_finite()
            && self.xmax.is_finite()
    }

    /// Clamp every coordinate into the unit square.
    pub fn clamped(&self) -> Self {
        Self::new(
            clamp_unit(self.ymin),
            clamp_unit(self.xmin),
            clamp_unit(self.ymax),
            clamp_unit(self.xmax),
        )
    }

    pub fn height(&self) -> f32 {
        (self.ymax - self.ymin).max(0.0)
    }

    pub fn width(&self) -> f32 {
        (self.xmax - self.xmin).max(0.0)
    }

    pub fn area(&self) -> f32 {
        self.height() * self.width()
    }

    pub fn center_x(&self) -> f32 {
        (self.xmin + self.xmax) / 2.0
    }

    pub fn center_y(&self) -> f32 {
        (self.ymin + self.ymax) / 2.0
    }

    /// Intersection-over-union of two boxes.
    ///
    /// Returns 0.0 for disjoint or degenerate boxes and 1.0 for identical,
    /// non-empty boxes.
    pub fn iou(&self, other: &BoxCoords) -> f32 {
        let top = self.ymin.max(other.ymin);
        let left = self.xmin.max(other.xmin);
        let bottom = self.ymax.min(other.ymax);
        let right = self.xmax.min(other.xmax);

        if bottom <= top || right <= left {
            return 0.0;
        }

        let intersection = (bottom - top) * (right - left);
        let union = self.area() + other.area() - intersection;
        if union <= 0.0 {
            return 0.0;
        }
        (intersection / union).min(1.0)
    }

    /// Top-left origin `{x, y, w, h}` view used by output callbacks.
    pub fn to_xywh(&self) -> BoundingBox {
        BoundingBox {
            x: self.xmin,
            y: self.ymin,
            w: self.width(),
            h: self.height(),
        }
    }
}

/// Bounding box in `{x, y, w, h}` form, as handed to output consumers.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub w: f32,
    pub h: f32,
}

/// A single candidate detection with derived geometry.
///
/// All derived fields are clamped to `[0, 1]`. Detections are ephemeral and
/// recomputed every frame.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub bbox: BoxCoords,
    pub confidence: f32,
    pub height: f32,
    pub width: f32,
    pub area: f32,
    pub center_x: f32,
    pub center_y: f32,
}

impl Detection {
    /// Build a detection from a raw box and score.
    ///
    /// Returns `None` when any coordinate or the score is NaN or infinite, so
    /// a single corrupt candidate never poisons the rest of the frame.
    pub fn from_raw(bbox: BoxCoords, confidence: f32) -> Option<Self> {
        if !bbox.is_finite() || !confidence.is_finite() {
            return None;
        }
        let bbox = bbox.clamped();
        Some(Self {
            bbox,
            confidence: clamp_unit(confidence),
            height: clamp_unit(bbox.height()),
            width: clamp_unit(bbox.width()),
            area: clamp_unit(bbox.area()),
            center_x: clamp_unit(bbox.center_x()),
            center_y: clamp_unit(bbox.center_y()),
        })
    }

    pub fn iou(&self, other: &Detection) -> f32 {
        self.bbox.iou(&other.bbox)
    }
}

/// Every normalized detection decoded from one frame.
#[derive(Clone, Debug, Default)]
pub struct DetectionResult {
    pub frame_index: u64,
    pub detections: Vec<Detection>,
    /// Candidates dropped because of non-finite values.
    pub discarded: usize,
}

impl DetectionResult {
    pub fn is_empty(&self) -> bool {
        self.detections.is_empty()
    }
}

pub(crate) fn clamp_unit(value: f32) -> f32 {
    value.clamp(0.0, 1.0)
}
