//! Obstacle Signal Stabilizer
//!
//! This crate turns noisy per-frame object-detector output into a stable
//! obstacle signal for an assistive navigation device.
//!
//! # Architecture
//!
//! Each frame flows through seven stages, all driven synchronously by
//! [`ObstaclePipeline::process`]:
//!
//! 1. **Normalize**: accept any tensor layout the model emits and decode
//!    finite, clamped detections.
//! 2. **Hazard filter**: keep only candidates that plausibly obstruct the path.
//! 3. **Track**: follow one target across frames by box overlap, tolerating
//!    short dropouts.
//! 4. **Stabilize**: smooth the target height and gate it with hysteresis and
//!    a trend requirement.
//! 5. **Proximity**: report a distance estimate only when it is stable,
//!    meaningfully changed and outside the cooldown window.
//! 6. **Navigation**: recommend a steering direction from recent hazards.
//! 7. **Event log**: buffer stabilizer readings and ship them in batches.
//!
//! # Module Structure
//!
//! - `detect`: raw model output decoding and hazard filtering
//! - `track`: target tracking policies
//! - `stabilize`, `proximity`, `navigation`: signal stages
//! - `event_log`, `transport`: buffered event upload
//! - `pipeline`: per-frame composition and listener callbacks
//! - `runtime`: worker thread with single-slot frame handoff
//! - `config`: layered configuration and live updates

pub mod config;
pub mod detect;
pub mod event_log;
pub mod navigation;
pub mod pipeline;
pub mod proximity;
pub mod runtime;
pub mod stabilize;
pub mod track;
pub mod transport;

pub use config::{ConfigStore, PipelineConfig};
pub use detect::{
    best_index, decode_detections, normalize_output, BoundingBox, BoxCoords, Detection,
    DetectionResult, GeometricHazardFilter, HazardFilter, HazardThresholds, NormalizedOutput,
    RawModelOutput,
};
pub use event_log::{EventLogSettings, EventLogger, LogEvent};
pub use navigation::{Direction, NavigationBuffer, NavigationResult, NavigationSettings};
pub use pipeline::{
    DetectionEvent, DetectionListener, Emission, FallbackReason, FrameOutcome, NullListener,
    ObstaclePipeline,
};
pub use proximity::{ProximityDecision, ProximityReporter, ProximitySettings};
pub use runtime::{PipelineRuntime, RuntimeHandle, RuntimeStats};
pub use stabilize::{StabilizerOutput, StabilizerSettings, TemporalStabilizer};
pub use track::{IouTracker, TargetTracker, TrackUpdate, TrackedTarget, TrackerSettings};
pub use transport::{HttpLogSink, LogSink};
