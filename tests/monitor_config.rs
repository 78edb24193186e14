use std::sync::Mutex;
use std::time::Duration;

use tempfile::NamedTempFile;

use access_monitor::config::{MonitorConfig, SinkKind};

static ENV_LOCK: Mutex<()> = Mutex::new(());

fn clear_env() {
    for key in [
        "ACCESS_MONITOR_CONFIG",
        "ACCESS_MONITOR_CAMERA_ID",
        "ACCESS_MONITOR_SOURCE",
        "ACCESS_MONITOR_WIDTH",
        "ACCESS_MONITOR_HEIGHT",
        "ACCESS_MONITOR_MAX_CACHE_SIZE",
        "ACCESS_MONITOR_EMPTY_FRAMES_THRESHOLD",
        "ACCESS_MONITOR_COOLDOWN_SECS",
        "ACCESS_MONITOR_DETECTOR",
        "ACCESS_MONITOR_SINK_DIR",
        "AZURESTORAGE_CONNECTION_STRING",
    ] {
        std::env::remove_var(key);
    }
}

#[test]
fn loads_config_from_file_and_env_overrides() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = NamedTempFile::new().expect("temp config");
    let json = r#"{
        "camera_id": "Front_Door",
        "engine": {
            "max_cache_size": 20,
            "empty_frames_threshold": 8,
            "cooldown_secs": 2,
            "min_match_size": 40
        },
        "source": {
            "url": "/srv/replay",
            "width": 800,
            "height": 600,
            "target_fps": 0,
            "loop": true
        },
        "detector": {
            "backend": "stub",
            "stub_pattern": [1, 1, 0]
        },
        "emit": {
            "staging_dir": "/tmp/staging",
            "jpeg_quality": 75
        },
        "sink": {
            "kind": "http",
            "container": "frontdoor"
        }
    }"#;
    std::io::Write::write_all(&mut file, json.as_bytes()).expect("write config");

    std::env::set_var("ACCESS_MONITOR_CONFIG", file.path());
    std::env::set_var("ACCESS_MONITOR_EMPTY_FRAMES_THRESHOLD", "12");
    std::env::set_var("ACCESS_MONITOR_DETECTOR", "cpu");
    std::env::set_var(
        "AZURESTORAGE_CONNECTION_STRING",
        "BlobEndpoint=https://cams.blob.core.windows.net;SharedAccessSignature=sv=2022&sig=x",
    );

    let cfg = MonitorConfig::load().expect("load config");

    assert_eq!(cfg.camera_id, "front_door");
    assert_eq!(cfg.engine.max_cache_size, 20);
    assert_eq!(cfg.engine.empty_frames_threshold, 12);
    assert_eq!(cfg.engine.cooldown, Duration::from_secs(2));
    assert_eq!(cfg.engine.min_match_size, 40);
    assert_eq!(cfg.source.url, "/srv/replay");
    assert_eq!((cfg.source.width, cfg.source.height), (800, 600));
    assert!(cfg.source.loop_files);
    assert_eq!(cfg.detector.backend, "cpu");
    assert_eq!(cfg.detector.stub_pattern, vec![1, 1, 0]);
    assert_eq!(cfg.emit.jpeg_quality, 75);
    assert_eq!(cfg.sink.kind, SinkKind::Http);
    assert_eq!(cfg.sink.container, "frontdoor");
    assert!(cfg.sink.connection_string.is_some());

    clear_env();
}

#[test]
fn defaults_apply_without_config_file() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let cfg = MonitorConfig::load().expect("load defaults");
    assert_eq!(cfg.engine.max_cache_size, 50);
    assert_eq!(cfg.engine.empty_frames_threshold, 50);
    assert_eq!(cfg.engine.cooldown, Duration::from_secs(5));
    assert_eq!(cfg.engine.min_match_size, 70);
    assert_eq!(cfg.source.url, "stub://camera_01");
    assert_eq!(cfg.sink.kind, SinkKind::Directory);

    clear_env();
}

#[test]
fn invalid_env_values_are_rejected() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("ACCESS_MONITOR_MAX_CACHE_SIZE", "lots");
    assert!(MonitorConfig::load().is_err());

    std::env::set_var("ACCESS_MONITOR_MAX_CACHE_SIZE", "0");
    assert!(MonitorConfig::load().is_err());

    clear_env();
    std::env::set_var("ACCESS_MONITOR_WIDTH", "0");
    assert!(MonitorConfig::load().is_err());

    clear_env();
    std::env::set_var("ACCESS_MONITOR_CAMERA_ID", "../../etc");
    assert!(MonitorConfig::load().is_err());

    clear_env();
}

#[test]
fn http_sink_needs_a_usable_connection_string() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = NamedTempFile::new().expect("temp config");
    std::io::Write::write_all(&mut file, br#"{ "sink": { "kind": "http" } }"#)
        .expect("write config");
    std::env::set_var("ACCESS_MONITOR_CONFIG", file.path());
    assert!(MonitorConfig::load().is_err());

    std::env::set_var("AZURESTORAGE_CONNECTION_STRING", "AccountName=cams;AccountKey=abc");
    assert!(MonitorConfig::load().is_err());

    std::env::set_var(
        "AZURESTORAGE_CONNECTION_STRING",
        "DefaultEndpointsProtocol=https;AccountName=cams;AccountKey=c2VjcmV0;EndpointSuffix=core.windows.net",
    );
    let cfg = MonitorConfig::load().expect("portal connection string");
    assert_eq!(cfg.sink.kind, SinkKind::Http);

    clear_env();
}

#[test]
fn overrides_applied_after_loading_are_validated_once() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("ACCESS_MONITOR_MAX_CACHE_SIZE", "0");
    assert!(MonitorConfig::load().is_err());

    let mut cfg = MonitorConfig::load_unvalidated(None).expect("unvalidated load");
    assert_eq!(cfg.engine.max_cache_size, 0);
    cfg.engine.max_cache_size = 10;
    cfg.validate().expect("override fixes the env value");
    assert_eq!(cfg.engine.max_cache_size, 10);

    std::env::set_var("ACCESS_MONITOR_MAX_CACHE_SIZE", "lots");
    assert!(MonitorConfig::load_unvalidated(None).is_err());

    clear_env();
}

#[test]
fn malformed_config_file_is_rejected() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = NamedTempFile::new().expect("temp config");
    std::io::Write::write_all(&mut file, b"{ not json").expect("write config");
    std::env::set_var("ACCESS_MONITOR_CONFIG", file.path());
    let err = MonitorConfig::load().expect_err("malformed config");
    assert!(err.to_string().contains("invalid config file"));

    clear_env();
}
