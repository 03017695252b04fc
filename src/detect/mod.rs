mod hazard;
mod normalize;
mod result;

pub use hazard::{
    ConfidenceOnlyFilter, GeometricHazardFilter, HazardFilter, HazardThresholds, Rejection,
};
pub use normalize::{
    best_index, decode_detections, normalize_output, NormalizedOutput, RawModelOutput,
};
pub use result::{BoundingBox, BoxCoords, Detection, DetectionResult};
