//! Temporal stabilization of the tracked target's height signal.
//!
//! Raw per-frame heights flicker. The stabilizer keeps a bounded window of
//! readings, smooths them with a trailing moving average, estimates the trend
//! with a least-squares slope and debounces the "obstacle detected" flag with
//! two-sided hysteresis. Two overrides (instant-close and sudden-increase)
//! bypass the slope requirement so a fast-approaching obstacle is never held
//! back by the debounce.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

pub const MIN_FRAMES: usize = 2;
pub const MAX_FRAMES: usize = 30;
const MAX_INSTANT_CLOSE_MARGIN: f32 = 0.15;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StabilizerSettings {
    /// Window length in readings, clamped to 2..=30.
    pub frames: usize,
    /// Entry threshold on normalized height.
    pub threshold: f32,
    /// Exit threshold is `threshold - hysteresis`, floored at zero.
    pub hysteresis: f32,
    /// Minimum trend (height per reading) required for standard entry.
    pub min_slope: f32,
    /// Jump between consecutive smoothed values that forces detection.
    pub sudden_delta: f32,
    /// Moving-average length, clamped to `frames`.
    pub smoothing_window: usize,
    /// Enter on size alone, without a rising trend.
    pub allow_size_only: bool,
}

impl Default for StabilizerSettings {
    fn default() -> Self {
        Self {
            frames: 8,
            threshold: 0.35,
            hysteresis: 0.05,
            min_slope: 0.05,
            sudden_delta: 0.2,
            smoothing_window: 3,
            allow_size_only: false,
        }
    }
}

impl StabilizerSettings {
    /// Copy with window lengths forced into their legal ranges.
    pub fn clamped(&self) -> Self {
        let frames = self.frames.clamp(MIN_FRAMES, MAX_FRAMES);
        Self {
            frames,
            smoothing_window: self.smoothing_window.clamp(1, frames),
            ..self.clone()
        }
    }

    pub fn enter_threshold(&self) -> f32 {
        self.threshold
    }

    pub fn exit_threshold(&self) -> f32 {
        (self.threshold - self.hysteresis).max(0.0)
    }

    pub fn instant_close_threshold(&self) -> f32 {
        self.threshold + MAX_INSTANT_CLOSE_MARGIN.min(self.hysteresis * 3.0)
    }
}

/// Inputs the hysteresis gate evaluates for one reading.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct GateInput {
    pub smoothed: f32,
    pub previous_smoothed: Option<f32>,
    pub latest_raw: f32,
    pub slope: f32,
}

/// Debounced detected/not-detected state machine.
#[derive(Clone, Debug)]
pub struct HysteresisGate {
    enter: f32,
    exit: f32,
    instant_close: f32,
    min_slope: f32,
    sudden_delta: f32,
    allow_size_only: bool,
    detected: bool,
}

impl HysteresisGate {
    pub fn new(settings: &StabilizerSettings) -> Self {
        Self {
            enter: settings.enter_threshold(),
            exit: settings.exit_threshold(),
            instant_close: settings.instant_close_threshold(),
            min_slope: settings.min_slope,
            sudden_delta: settings.sudden_delta,
            allow_size_only: settings.allow_size_only,
            detected: false,
        }
    }

    pub fn detected(&self) -> bool {
        self.detected
    }

    /// Re-parameterise, keeping the current state.
    pub fn reconfigure(&mut self, settings: &StabilizerSettings) {
        let detected = self.detected;
        *self = Self::new(settings);
        self.detected = detected;
    }

    pub fn reset(&mut self) {
        self.detected = false;
    }

    pub fn step(&mut self, input: GateInput) -> bool {
        let sudden = input
            .previous_smoothed
            .map(|prev| input.smoothed - prev >= self.sudden_delta)
            .unwrap_or(false);

        self.detected = if input.smoothed >= self.instant_close || sudden {
            true
        } else if self.detected {
            let receded = input.smoothed <= self.exit && input.latest_raw <= self.enter;
            let retreating = input.slope <= -self.min_slope;
            !(receded || retreating)
        } else {
            let large = input.smoothed >= self.enter || input.latest_raw >= self.enter;
            let approaching = self.allow_size_only || input.slope >= self.min_slope;
            large && approaching
        };
        self.detected
    }
}

/// Result of one stabilizer update.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct StabilizerOutput {
    pub height: f32,
    pub confidence: f32,
    pub smoothed: f32,
    pub slope: f32,
    pub detected: bool,
    /// The detected flag flipped on this reading.
    pub transitioned: bool,
}

/// Snapshot of the stabilizer's mutable state.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct StabilizerState {
    pub height_history: Vec<f32>,
    pub confidence_history: Vec<f32>,
    pub smoothed: f32,
    pub slope: f32,
    pub obstacle_detected: bool,
}

pub struct TemporalStabilizer {
    settings: StabilizerSettings,
    heights: VecDeque<f32>,
    confidences: VecDeque<f32>,
    smoothed: f32,
    slope: f32,
    gate: HysteresisGate,
}

impl TemporalStabilizer {
    pub fn new(settings: StabilizerSettings) -> Self {
        let settings = settings.clamped();
        Self {
            gate: HysteresisGate::new(&settings),
            heights: VecDeque::with_capacity(settings.frames),
            confidences: VecDeque::with_capacity(settings.frames),
            smoothed: 0.0,
            slope: 0.0,
            settings,
        }
    }

    pub fn settings(&self) -> &StabilizerSettings {
        &self.settings
    }

    pub fn detected(&self) -> bool {
        self.gate.detected()
    }

    /// Feed one accepted reading.
    pub fn update(&mut self, height: f32, confidence: f32) -> StabilizerOutput {
        self.heights.push_back(height);
        self.confidences.push_back(confidence);
        self.trim();

        let raw: Vec<f32> = self.heights.iter().copied().collect();
        let series = moving_average(&raw, self.settings.smoothing_window);
        let tail = &series[series.len().saturating_sub(self.settings.frames)..];

        let was_detected = self.gate.detected();
        self.smoothed = series.last().copied().unwrap_or(0.0);
        self.slope = ols_slope(tail);
        let detected = self.gate.step(GateInput {
            smoothed: self.smoothed,
            previous_smoothed: series.len().checked_sub(2).map(|i| series[i]),
            latest_raw: height,
            slope: self.slope,
        });

        if detected != was_detected {
            log::debug!(
                "obstacle {} (smoothed {:.3}, slope {:.4})",
                if detected { "entered" } else { "cleared" },
                self.smoothed,
                self.slope
            );
        }

        StabilizerOutput {
            height,
            confidence,
            smoothed: self.smoothed,
            slope: self.slope,
            detected,
            transitioned: detected != was_detected,
        }
    }

    /// Re-parameterise without clearing state. A shorter window drops the
    /// oldest readings.
    pub fn reconfigure(&mut self, settings: &StabilizerSettings) {
        self.settings = settings.clamped();
        self.gate.reconfigure(&self.settings);
        self.trim();
    }

    pub fn reset(&mut self) {
        self.heights.clear();
        self.confidences.clear();
        self.smoothed = 0.0;
        self.slope = 0.0;
        self.gate.reset();
    }

    pub fn state(&self) -> StabilizerState {
        StabilizerState {
            height_history: self.heights.iter().copied().collect(),
            confidence_history: self.confidences.iter().copied().collect(),
            smoothed: self.smoothed,
            slope: self.slope,
            obstacle_detected: self.gate.detected(),
        }
    }

    fn trim(&mut self) {
        while self.heights.len() > self.settings.frames {
            self.heights.pop_front();
            self.confidences.pop_front();
        }
    }
}

/// Trailing simple moving average: element `i` averages the last `window`
/// values up to and including `i`.
pub fn moving_average(values: &[f32], window: usize) -> Vec<f32> {
    let window = window.max(1);
    (0..values.len())
        .map(|i| {
            let start = (i + 1).saturating_sub(window);
            let slice = &values[start..=i];
            slice.iter().sum::<f32>() / slice.len() as f32
        })
        .collect()
}

/// Ordinary least-squares slope with the index as the independent variable.
/// Zero for fewer than two points.
pub fn ols_slope(values: &[f32]) -> f32 {
    let n = values.len();
    if n < 2 {
        return 0.0;
    }
    let mean_x = (n - 1) as f32 / 2.0;
    let mean_y = values.iter().sum::<f32>() / n as f32;
    let (num, den) = values
        .iter()
        .enumerate()
        .fold((0.0f32, 0.0f32), |(num, den), (i, &y)| {
            let dx = i as f32 - mean_x;
            (num + dx * (y - mean_y), den + dx * dx)
        });
    if den == 0.0 {
        0.0
    } else {
        num / den
    }
}
