//! Zone-based steering guidance over a short rolling buffer of detections.
//!
//! Guidance deliberately reads raw hazard-filtered detections instead of the
//! gated proximity signal, so it keeps reacting while reports are rate limited.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

use crate::detect::{BoxCoords, Detection};

pub const MIN_BUFFER_LEN: usize = 5;
pub const MAX_BUFFER_LEN: usize = 10;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NavigationSettings {
    /// Rolling buffer length, clamped to 5..=10.
    pub buffer_len: usize,
    /// Center-x strictly below this is the left zone.
    pub left_boundary: f32,
    /// Center-x strictly above this is the right zone.
    pub right_boundary: f32,
}

impl Default for NavigationSettings {
    fn default() -> Self {
        Self {
            buffer_len: 8,
            left_boundary: 0.35,
            right_boundary: 0.65,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Straight,
    Left,
    Right,
    Stop,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Zone {
    Left,
    Center,
    Right,
}

/// One buffered entry: box plus confidence.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct NavigationSample {
    pub bbox: BoxCoords,
    pub confidence: f32,
}

impl NavigationSample {
    pub fn center_x(&self) -> f32 {
        self.bbox.center_x()
    }
}

impl From<&Detection> for NavigationSample {
    fn from(det: &Detection) -> Self {
        Self {
            bbox: det.bbox,
            confidence: det.confidence,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct NavigationResult {
    pub direction: Direction,
    pub path_clear: bool,
    pub obstacle_count: usize,
    pub left_count: usize,
    pub center_count: usize,
    pub right_count: usize,
    pub avg_confidence: f32,
}

impl Default for NavigationResult {
    fn default() -> Self {
        Self {
            direction: Direction::Straight,
            path_clear: true,
            obstacle_count: 0,
            left_count: 0,
            center_count: 0,
            right_count: 0,
            avg_confidence: 0.0,
        }
    }
}

impl NavigationSettings {
    pub fn zone_of(&self, center_x: f32) -> Zone {
        if center_x < self.left_boundary {
            Zone::Left
        } else if center_x > self.right_boundary {
            Zone::Right
        } else {
            Zone::Center
        }
    }
}

/// Stateless guidance over a slice of samples.
pub fn guidance(samples: &[NavigationSample], settings: &NavigationSettings) -> NavigationResult {
    let (mut left, mut center, mut right) = (0usize, 0usize, 0usize);
    for sample in samples {
        match settings.zone_of(sample.center_x()) {
            Zone::Left => left += 1,
            Zone::Right => right += 1,
            Zone::Center => center += 1,
        }
    }

    let direction = if center == 0 {
        // Path ahead is open; nudge away from a single occupied side.
        match (left > 0, right > 0) {
            (true, false) => Direction::Right,
            (false, true) => Direction::Left,
            _ => Direction::Straight,
        }
    } else if left < right {
        Direction::Left
    } else if right < left {
        Direction::Right
    } else {
        Direction::Stop
    };

    let avg_confidence = if samples.is_empty() {
        0.0
    } else {
        samples.iter().map(|s| s.confidence).sum::<f32>() / samples.len() as f32
    };

    NavigationResult {
        direction,
        path_clear: center == 0,
        obstacle_count: samples.len(),
        left_count: left,
        center_count: center,
        right_count: right,
        avg_confidence,
    }
}

/// Bounded ring buffer of recent detections feeding [`guidance`].
#[derive(Clone, Debug)]
pub struct NavigationBuffer {
    settings: NavigationSettings,
    samples: VecDeque<NavigationSample>,
}

impl NavigationBuffer {
    pub fn new(settings: NavigationSettings) -> Self {
        let settings = NavigationSettings {
            buffer_len: settings.buffer_len.clamp(MIN_BUFFER_LEN, MAX_BUFFER_LEN),
            ..settings
        };
        Self {
            samples: VecDeque::with_capacity(settings.buffer_len),
            settings,
        }
    }

    pub fn push(&mut self, sample: NavigationSample) {
        self.samples.push_back(sample);
        while self.samples.len() > self.settings.buffer_len {
            self.samples.pop_front();
        }
    }

    pub fn extend<'a>(&mut self, detections: impl IntoIterator<Item = &'a Detection>) {
        for det in detections {
            self.push(det.into());
        }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn result(&self) -> NavigationResult {
        let samples: Vec<NavigationSample> = self.samples.iter().copied().collect();
        guidance(&samples, &self.settings)
    }

    pub fn reconfigure(&mut self, settings: &NavigationSettings) {
        *self = Self {
            samples: std::mem::take(&mut self.samples),
            ..Self::new(settings.clone())
        };
        while self.samples.len() > self.settings.buffer_len {
            self.samples.pop_front();
        }
    }

    pub fn clear(&mut self) {
        self.samples.clear();
    }
}

impl Default for NavigationBuffer {
    fn default() -> Self {
        Self::new(NavigationSettings::default())
    }
}
