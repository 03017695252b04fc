use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Mutex, MutexGuard};

use crate::detect::HazardThresholds;
use crate::event_log::EventLogSettings;
use crate::navigation::{NavigationSettings, MAX_BUFFER_LEN, MIN_BUFFER_LEN};
use crate::proximity::ProximitySettings;
use crate::stabilize::StabilizerSettings;
use crate::track::TrackerSettings;

pub const CONFIG_PATH_ENV: &str = "OBSTACLE_CONFIG";

#[derive(Debug, Deserialize, Default)]
struct PipelineConfigFile {
    stabilizer: Option<StabilizerConfigFile>,
    hazard: Option<HazardConfigFile>,
    tracker: Option<TrackerConfigFile>,
    proximity: Option<ProximityConfigFile>,
    navigation: Option<NavigationConfigFile>,
    log: Option<LogConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct StabilizerConfigFile {
    frames: Option<usize>,
    threshold: Option<f32>,
    hysteresis: Option<f32>,
    min_slope: Option<f32>,
    sudden_delta: Option<f32>,
    smoothing_window: Option<usize>,
    allow_size_only: Option<bool>,
}

#[derive(Debug, Deserialize, Default)]
struct HazardConfigFile {
    min_confidence: Option<f32>,
    min_area: Option<f32>,
    max_area: Option<f32>,
    min_center_x: Option<f32>,
    max_center_x: Option<f32>,
    min_bottom: Option<f32>,
    max_aspect_ratio: Option<f32>,
}

#[derive(Debug, Deserialize, Default)]
struct TrackerConfigFile {
    iou_match_threshold: Option<f32>,
    target_loss_frames: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct ProximityConfigFile {
    min_distance: Option<f32>,
    distance_offset: Option<f32>,
    distance_scale: Option<f32>,
    stability_epsilon: Option<f32>,
    stable_frames_required: Option<u32>,
    meaningful_change_threshold: Option<f32>,
    cooldown_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct NavigationConfigFile {
    buffer_len: Option<usize>,
    left_boundary: Option<f32>,
    right_boundary: Option<f32>,
}

#[derive(Debug, Deserialize, Default)]
struct LogConfigFile {
    enabled: Option<bool>,
    batch_size: Option<usize>,
    max_entries: Option<usize>,
    send_immediate: Option<bool>,
    endpoint: Option<String>,
    timeout_ms: Option<u64>,
}

/// Every tunable of the pipeline, grouped by stage.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct PipelineConfig {
    pub stabilizer: StabilizerSettings,
    pub hazard: HazardThresholds,
    pub tracker: TrackerSettings,
    pub proximity: ProximitySettings,
    pub navigation: NavigationSettings,
    pub event_log: EventLogSettings,
}

fn merge<T>(slot: &mut T, value: Option<T>) {
    if let Some(value) = value {
        *slot = value;
    }
}

impl PipelineConfig {
    /// Defaults, overlaid with the file named by `OBSTACLE_CONFIG` (if set),
    /// then environment overrides, then validation.
    pub fn load() -> Result<Self> {
        let file_cfg = match std::env::var(CONFIG_PATH_ENV).ok().as_deref() {
            Some(path) if !path.trim().is_empty() => read_config_file(Path::new(path))?,
            _ => PipelineConfigFile::default(),
        };
        let mut cfg = Self::from_file(file_cfg);
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Load from an explicit file; environment overrides still apply.
    pub fn from_path(path: &Path) -> Result<Self> {
        let mut cfg = Self::from_file(read_config_file(path)?);
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: PipelineConfigFile) -> Self {
        let mut cfg = Self::default();

        let s = file.stabilizer.unwrap_or_default();
        let st = &mut cfg.stabilizer;
        merge(&mut st.frames, s.frames);
        merge(&mut st.threshold, s.threshold);
        merge(&mut st.hysteresis, s.hysteresis);
        merge(&mut st.min_slope, s.min_slope);
        merge(&mut st.sudden_delta, s.sudden_delta);
        merge(&mut st.smoothing_window, s.smoothing_window);
        merge(&mut st.allow_size_only, s.allow_size_only);

        let h = file.hazard.unwrap_or_default();
        let hz = &mut cfg.hazard;
        merge(&mut hz.min_confidence, h.min_confidence);
        merge(&mut hz.min_area, h.min_area);
        merge(&mut hz.max_area, h.max_area);
        merge(&mut hz.min_center_x, h.min_center_x);
        merge(&mut hz.max_center_x, h.max_center_x);
        merge(&mut hz.min_bottom, h.min_bottom);
        merge(&mut hz.max_aspect_ratio, h.max_aspect_ratio);

        let t = file.tracker.unwrap_or_default();
        merge(&mut cfg.tracker.iou_match_threshold, t.iou_match_threshold);
        merge(&mut cfg.tracker.target_loss_frames, t.target_loss_frames);

        let p = file.proximity.unwrap_or_default();
        let px = &mut cfg.proximity;
        merge(&mut px.min_distance, p.min_distance);
        merge(&mut px.distance_offset, p.distance_offset);
        merge(&mut px.distance_scale, p.distance_scale);
        merge(&mut px.stability_epsilon, p.stability_epsilon);
        merge(&mut px.stable_frames_required, p.stable_frames_required);
        merge(&mut px.meaningful_change_threshold, p.meaningful_change_threshold);
        merge(&mut px.cooldown_ms, p.cooldown_ms);

        let n = file.navigation.unwrap_or_default();
        merge(&mut cfg.navigation.buffer_len, n.buffer_len);
        merge(&mut cfg.navigation.left_boundary, n.left_boundary);
        merge(&mut cfg.navigation.right_boundary, n.right_boundary);

        let l = file.log.unwrap_or_default();
        let lg = &mut cfg.event_log;
        merge(&mut lg.enabled, l.enabled);
        merge(&mut lg.batch_size, l.batch_size);
        merge(&mut lg.max_entries, l.max_entries);
        merge(&mut lg.send_immediate, l.send_immediate);
        merge(&mut lg.timeout_ms, l.timeout_ms);
        lg.endpoint = l.endpoint.filter(|e| !e.trim().is_empty());

        cfg
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(threshold) = std::env::var("OBSTACLE_THRESHOLD") {
            self.stabilizer.threshold = threshold
                .trim()
                .parse()
                .map_err(|_| anyhow!("OBSTACLE_THRESHOLD must be a number"))?;
        }
        if let Ok(cooldown) = std::env::var("OBSTACLE_COOLDOWN_MS") {
            self.proximity.cooldown_ms = cooldown
                .trim()
                .parse()
                .map_err(|_| anyhow!("OBSTACLE_COOLDOWN_MS must be an integer number of ms"))?;
        }
        if let Ok(endpoint) = std::env::var("OBSTACLE_LOG_ENDPOINT") {
            if !endpoint.trim().is_empty() {
                self.event_log.endpoint = Some(endpoint.trim().to_string());
            }
        }
        if let Ok(immediate) = std::env::var("OBSTACLE_LOG_IMMEDIATE") {
            self.event_log.send_immediate = parse_bool(&immediate)
                .ok_or_else(|| anyhow!("OBSTACLE_LOG_IMMEDIATE must be true/false"))?;
        }
        Ok(())
    }

    /// Clamp window sizes into range and reject values no stage can use.
    pub fn validate(&mut self) -> Result<()> {
        let st = &mut self.stabilizer;
        for (name, value) in [
            ("stabilizer.threshold", st.threshold),
            ("stabilizer.hysteresis", st.hysteresis),
            ("stabilizer.min_slope", st.min_slope),
            ("stabilizer.sudden_delta", st.sudden_delta),
        ] {
            ensure_non_negative(name, value)?;
        }
        let clamped = st.clamped();
        if clamped.frames != st.frames || clamped.smoothing_window != st.smoothing_window {
            log::warn!(
                "stabilizer window clamped: frames {} -> {}, smoothing_window {} -> {}",
                st.frames,
                clamped.frames,
                st.smoothing_window,
                clamped.smoothing_window
            );
        }
        *st = clamped;

        let hz = &self.hazard;
        for (name, value) in [
            ("hazard.min_confidence", hz.min_confidence),
            ("hazard.min_area", hz.min_area),
            ("hazard.max_area", hz.max_area),
            ("hazard.min_center_x", hz.min_center_x),
            ("hazard.max_center_x", hz.max_center_x),
            ("hazard.min_bottom", hz.min_bottom),
            ("hazard.max_aspect_ratio", hz.max_aspect_ratio),
        ] {
            ensure_non_negative(name, value)?;
        }
        if hz.min_center_x > hz.max_center_x {
            return Err(anyhow!("hazard horizontal band is empty"));
        }
        if hz.min_area > hz.max_area {
            return Err(anyhow!("hazard area range is empty"));
        }

        ensure_non_negative("tracker.iou_match_threshold", self.tracker.iou_match_threshold)?;

        let px = &self.proximity;
        for (name, value) in [
            ("proximity.min_distance", px.min_distance),
            ("proximity.distance_offset", px.distance_offset),
            ("proximity.distance_scale", px.distance_scale),
            ("proximity.stability_epsilon", px.stability_epsilon),
            ("proximity.meaningful_change_threshold", px.meaningful_change_threshold),
        ] {
            ensure_non_negative(name, value)?;
        }

        let nav = &mut self.navigation;
        let buffer_len = nav.buffer_len.clamp(MIN_BUFFER_LEN, MAX_BUFFER_LEN);
        if buffer_len != nav.buffer_len {
            log::warn!("navigation buffer_len clamped: {} -> {}", nav.buffer_len, buffer_len);
            nav.buffer_len = buffer_len;
        }
        if nav.left_boundary > nav.right_boundary {
            return Err(anyhow!("navigation left_boundary exceeds right_boundary"));
        }

        let lg = &self.event_log;
        if lg.batch_size == 0 {
            return Err(anyhow!("log batch_size must be greater than zero"));
        }
        if lg.max_entries < lg.batch_size {
            return Err(anyhow!(
                "log max_entries ({}) must be at least batch_size ({})",
                lg.max_entries,
                lg.batch_size
            ));
        }
        Ok(())
    }
}

fn ensure_non_negative(name: &str, value: f32) -> Result<()> {
    if !value.is_finite() || value < 0.0 {
        return Err(anyhow!("{} must be a finite non-negative number, got {}", name, value));
    }
    Ok(())
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// JSON by default; TOML when the file name ends in `.toml`.
fn read_config_file(path: &Path) -> Result<PipelineConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let is_toml = path
        .extension()
        .map(|ext| ext.eq_ignore_ascii_case("toml"))
        .unwrap_or(false);
    let cfg = if is_toml {
        toml::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}

struct StoreInner {
    current: PipelineConfig,
    subscribers: Vec<Sender<PipelineConfig>>,
}

/// Shared configuration with change notification.
///
/// Replaces process-wide mutable settings: the owner updates through the
/// store and every subscriber receives the validated config.
pub struct ConfigStore {
    inner: Mutex<StoreInner>,
}

impl ConfigStore {
    pub fn new(mut config: PipelineConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            inner: Mutex::new(StoreInner {
                current: config,
                subscribers: Vec::new(),
            }),
        })
    }

    fn lock(&self) -> MutexGuard<'_, StoreInner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn current(&self) -> PipelineConfig {
        self.lock().current.clone()
    }

    pub fn subscribe(&self) -> Receiver<PipelineConfig> {
        let (tx, rx) = mpsc::channel();
        self.lock().subscribers.push(tx);
        rx
    }

    /// Apply `change` to a copy, validate it, then publish. On validation
    /// failure nothing changes.
    pub fn update<F>(&self, change: F) -> Result<PipelineConfig>
    where
        F: FnOnce(&mut PipelineConfig),
    {
        let mut inner = self.lock();
        let mut next = inner.current.clone();
        change(&mut next);
        next.validate()?;
        inner.current = next.clone();
        // Dropped receivers unsubscribe implicitly.
        inner.subscribers.retain(|tx| tx.send(next.clone()).is_ok());
        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() -> Result<()> {
        let mut cfg = PipelineConfig::default();
        cfg.validate()?;
        assert_eq!(cfg, PipelineConfig::default());
        Ok(())
    }

    #[test]
    fn validate_clamps_windows() -> Result<()> {
        let mut cfg = PipelineConfig::default();
        cfg.stabilizer.frames = 1;
        cfg.stabilizer.smoothing_window = 9;
        cfg.navigation.buffer_len = 40;
        cfg.validate()?;
        assert_eq!(cfg.stabilizer.frames, 2);
        assert_eq!(cfg.stabilizer.smoothing_window, 2);
        assert_eq!(cfg.navigation.buffer_len, 10);
        Ok(())
    }

    #[test]
    fn validate_rejects_unusable_values() {
        let mut cfg = PipelineConfig::default();
        cfg.stabilizer.threshold = f32::NAN;
        assert!(cfg.validate().is_err());

        let mut cfg = PipelineConfig::default();
        cfg.hazard.min_center_x = 0.8;
        cfg.hazard.max_center_x = 0.2;
        assert!(cfg.validate().is_err());

        let mut cfg = PipelineConfig::default();
        cfg.event_log.batch_size = 0;
        assert!(cfg.validate().is_err());

        let mut cfg = PipelineConfig::default();
        cfg.event_log.max_entries = 10;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn store_notifies_subscribers() -> Result<()> {
        let store = ConfigStore::new(PipelineConfig::default())?;
        let rx = store.subscribe();
        let dropped = store.subscribe();
        drop(dropped);

        store.update(|cfg| cfg.proximity.cooldown_ms = 250)?;
        assert_eq!(rx.try_recv()?.proximity.cooldown_ms, 250);
        assert_eq!(store.current().proximity.cooldown_ms, 250);

        assert!(store.update(|cfg| cfg.stabilizer.hysteresis = -1.0).is_err());
        assert!(rx.try_recv().is_err());
        assert_eq!(store.current().stabilizer.hysteresis, 0.05);
        Ok(())
    }
}
