use std::io::Write;
use std::sync::Mutex;

use tempfile::NamedTempFile;

use obstacle_signal::config::{ConfigStore, PipelineConfig, CONFIG_PATH_ENV};
use obstacle_signal::navigation::MAX_BUFFER_LEN;
use obstacle_signal::stabilize::MIN_FRAMES;

static ENV_LOCK: Mutex<()> = Mutex::new(());

fn clear_env() {
    for key in [
        CONFIG_PATH_ENV,
        "OBSTACLE_THRESHOLD",
        "OBSTACLE_COOLDOWN_MS",
        "OBSTACLE_LOG_ENDPOINT",
        "OBSTACLE_LOG_IMMEDIATE",
    ] {
        std::env::remove_var(key);
    }
}

#[test]
fn defaults_without_config_file() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let cfg = PipelineConfig::load().expect("load config");
    assert_eq!(cfg, {
        let mut defaults = PipelineConfig::default();
        defaults.validate().unwrap();
        defaults
    });
    assert_eq!(cfg.stabilizer.threshold, 0.35);
    assert_eq!(cfg.proximity.cooldown_ms, 1000);
    assert!(!cfg.event_log.enabled);
}

#[test]
fn loads_json_file_and_env_overrides() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = NamedTempFile::new().expect("temp config");
    file.write_all(
        br#"{
            "stabilizer": { "frames": 12, "threshold": 0.4, "allow_size_only": true },
            "hazard": { "min_confidence": 0.5 },
            "tracker": { "target_loss_frames": 10 },
            "proximity": { "cooldown_ms": 500 },
            "log": { "enabled": true, "batch_size": 10, "max_entries": 100 }
        }"#,
    )
    .expect("write config");

    std::env::set_var(CONFIG_PATH_ENV, file.path());
    std::env::set_var("OBSTACLE_THRESHOLD", "0.3");
    std::env::set_var("OBSTACLE_LOG_ENDPOINT", "http://127.0.0.1:9/logs");
    std::env::set_var("OBSTACLE_LOG_IMMEDIATE", "yes");

    let cfg = PipelineConfig::load().expect("load config");

    assert_eq!(cfg.stabilizer.frames, 12);
    assert_eq!(cfg.stabilizer.threshold, 0.3);
    assert!(cfg.stabilizer.allow_size_only);
    assert_eq!(cfg.hazard.min_confidence, 0.5);
    assert_eq!(cfg.hazard.max_area, 0.9);
    assert_eq!(cfg.tracker.target_loss_frames, 10);
    assert_eq!(cfg.proximity.cooldown_ms, 500);
    assert!(cfg.event_log.enabled);
    assert_eq!(cfg.event_log.batch_size, 10);
    assert!(cfg.event_log.send_immediate);
    assert_eq!(cfg.event_log.endpoint.as_deref(), Some("http://127.0.0.1:9/logs"));

    clear_env();
}

#[test]
fn loads_toml_file_and_clamps_windows() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = tempfile::Builder::new()
        .suffix(".toml")
        .tempfile()
        .expect("temp config");
    file.write_all(
        br#"
[stabilizer]
frames = 1
smoothing_window = 9

[navigation]
buffer_len = 40
left_boundary = 0.3
right_boundary = 0.7
"#,
    )
    .expect("write config");

    let cfg = PipelineConfig::from_path(file.path()).expect("load config");
    assert_eq!(cfg.stabilizer.frames, MIN_FRAMES);
    assert_eq!(cfg.stabilizer.smoothing_window, MIN_FRAMES);
    assert_eq!(cfg.navigation.buffer_len, MAX_BUFFER_LEN);
    assert_eq!(cfg.navigation.left_boundary, 0.3);
}

#[test]
fn rejects_unusable_values() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = NamedTempFile::new().expect("temp config");
    file.write_all(br#"{ "hazard": { "min_center_x": 0.8, "max_center_x": 0.2 } }"#)
        .expect("write config");
    let err = PipelineConfig::from_path(file.path()).unwrap_err();
    assert!(err.to_string().contains("band"));

    let mut file = NamedTempFile::new().expect("temp config");
    file.write_all(br#"{ "log": { "batch_size": 0 } }"#)
        .expect("write config");
    assert!(PipelineConfig::from_path(file.path()).is_err());

    std::env::set_var("OBSTACLE_COOLDOWN_MS", "soon");
    assert!(PipelineConfig::load().is_err());
    clear_env();

    let mut file = NamedTempFile::new().expect("temp config");
    file.write_all(b"{ not json").expect("write config");
    std::env::set_var(CONFIG_PATH_ENV, file.path());
    assert!(PipelineConfig::load().is_err());
    clear_env();
}

#[test]
fn store_notifies_subscribers_with_validated_config() {
    let store = ConfigStore::new(PipelineConfig::default()).expect("store");
    let rx = store.subscribe();

    let updated = store
        .update(|cfg| {
            cfg.stabilizer.threshold = 0.5;
            cfg.stabilizer.frames = 100;
        })
        .expect("update");
    assert_eq!(updated.stabilizer.frames, 30);

    let received = rx.try_recv().expect("notification");
    assert_eq!(received, updated);
    assert_eq!(store.current().stabilizer.threshold, 0.5);

    assert!(store.update(|cfg| cfg.hazard.min_area = -1.0).is_err());
    assert!(rx.try_recv().is_err());
    assert_eq!(store.current().hazard.min_area, 0.002);
}
