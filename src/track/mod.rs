//! Single-target tracking across frames.

mod closest;
mod iou;
mod target;

pub use closest::ClosestTargetTracker;
pub use iou::IouTracker;
pub use target::{TargetTracker, TrackUpdate, TrackedTarget, TrackerSettings};
