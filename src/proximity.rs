//! Height-to-distance conversion with stability and rate gating.
//!
//! The distance is a monotonic heuristic over normalized box height, not a
//! calibrated measurement. A value is only reported once it has held steady
//! for several readings and moved meaningfully since the last report, and
//! reports inside the cooldown window are redirected to the fallback channel.

use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProximitySettings {
    pub min_distance: f32,
    /// Intercept `a` in `distance = max(min, a - b * height)`.
    pub distance_offset: f32,
    /// Slope `b` in `distance = max(min, a - b * height)`.
    pub distance_scale: f32,
    /// Readings within this distance of the stable estimate count as stable.
    pub stability_epsilon: f32,
    pub stable_frames_required: u32,
    /// Minimum move from the last reported distance before reporting again.
    pub meaningful_change_threshold: f32,
    pub cooldown_ms: u64,
}

impl Default for ProximitySettings {
    fn default() -> Self {
        Self {
            min_distance: 0.3,
            distance_offset: 2.0,
            distance_scale: 1.5,
            stability_epsilon: 0.1,
            stable_frames_required: 3,
            meaningful_change_threshold: 0.2,
            cooldown_ms: 1000,
        }
    }
}

impl ProximitySettings {
    pub fn estimate_distance(&self, height: f32) -> f32 {
        (self.distance_offset - self.distance_scale * height).max(self.min_distance)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct ProximityState {
    pub stable_distance: Option<f32>,
    pub consecutive_stable_frames: u32,
    pub last_reported_distance: Option<f32>,
    pub last_reported_at_ms: Option<u64>,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct ProximityReport {
    pub distance: f32,
    pub height: f32,
    pub confidence: f32,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ProximityDecision {
    /// Not yet stable for enough consecutive readings.
    Settling { distance: f32, stable_frames: u32 },
    /// Stable, but too close to the last reported distance.
    Unchanged { distance: f32 },
    /// Emit on the primary channel.
    Report(ProximityReport),
    /// Would report, but the cooldown has not elapsed.
    RateLimited(ProximityReport),
}

#[derive(Debug, Default)]
pub struct ProximityReporter {
    settings: ProximitySettings,
    state: ProximityState,
}

impl ProximityReporter {
    pub fn new(settings: ProximitySettings) -> Self {
        Self {
            settings,
            state: ProximityState::default(),
        }
    }

    pub fn settings(&self) -> &ProximitySettings {
        &self.settings
    }

    pub fn state(&self) -> &ProximityState {
        &self.state
    }

    pub fn reconfigure(&mut self, settings: &ProximitySettings) {
        self.settings = settings.clone();
    }

    pub fn evaluate(&mut self, height: f32, confidence: f32, now_ms: u64) -> ProximityDecision {
        let distance = self.settings.estimate_distance(height);

        match self.state.stable_distance {
            Some(stable) if (distance - stable).abs() <= self.settings.stability_epsilon => {
                self.state.consecutive_stable_frames += 1;
            }
            _ => {
                self.state.stable_distance = Some(distance);
                self.state.consecutive_stable_frames = 1;
            }
        }

        if self.state.consecutive_stable_frames < self.settings.stable_frames_required {
            return ProximityDecision::Settling {
                distance,
                stable_frames: self.state.consecutive_stable_frames,
            };
        }

        if let Some(last) = self.state.last_reported_distance {
            if (distance - last).abs() < self.settings.meaningful_change_threshold {
                return ProximityDecision::Unchanged { distance };
            }
        }

        let report = ProximityReport {
            distance,
            height,
            confidence,
        };
        if let Some(at) = self.state.last_reported_at_ms {
            if now_ms.saturating_sub(at) < self.settings.cooldown_ms {
                return ProximityDecision::RateLimited(report);
            }
        }

        self.state.last_reported_distance = Some(distance);
        self.state.last_reported_at_ms = Some(now_ms);
        ProximityDecision::Report(report)
    }

    /// Clear distance memory when the target is lost. The emission timestamp
    /// is kept so a new target still honors the cooldown.
    pub fn forget_target(&mut self) {
        self.state = ProximityState {
            last_reported_at_ms: self.state.last_reported_at_ms,
            ..ProximityState::default()
        };
    }

    /// End the current stability streak. Called for readings that skip
    /// evaluation, so stable frames are always consecutive; the last report
    /// is kept.
    pub fn break_streak(&mut self) {
        self.state.stable_distance = None;
        self.state.consecutive_stable_frames = 0;
    }

    pub fn reset(&mut self) {
        self.state = ProximityState::default();
    }
}
