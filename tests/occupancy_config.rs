use std::sync::Mutex;

use tempfile::NamedTempFile;

use desk_occupancy::config::OccupancyConfig;
use desk_occupancy::OccupancyError;

static ENV_LOCK: Mutex<()> = Mutex::new(());

fn clear_env() {
    for key in [
        "OCCUPANCY_CONFIG",
        "OCCUPANCY_ZONES_PATH",
        "OCCUPANCY_SOURCE_URL",
        "OCCUPANCY_FPS",
        "OCCUPANCY_DETECTION_INTERVAL_FRAMES",
        "OCCUPANCY_SMOOTHING_WINDOW_FRAMES",
        "OCCUPANCY_TRACKED_CLASS",
        "OCCUPANCY_LOG_PATH",
        "OCCUPANCY_DB_PATH",
    ] {
        std::env::remove_var(key);
    }
}

fn write_config(json: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().expect("temp config");
    std::io::Write::write_all(&mut file, json.as_bytes()).expect("write config");
    file
}

fn config_error_code(err: &anyhow::Error) -> Option<&'static str> {
    err.downcast_ref::<OccupancyError>().map(|e| e.code())
}

#[test]
fn defaults_follow_thirty_fps() {
    let _guard = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    clear_env();

    let cfg = OccupancyConfig::load().expect("load defaults");
    assert_eq!(cfg.zones_path.to_str(), Some("desk_roi_pos.json"));
    assert_eq!(cfg.source.url, "stub://desks");
    assert_eq!(cfg.detection.backend, "replay");
    assert_eq!(cfg.output.log_path.to_str(), Some("log.json"));
    assert!(cfg.output.db_path.is_none());

    let engine = cfg.engine_config().unwrap();
    assert_eq!(engine.detection_interval_frames, 30);
    assert_eq!(engine.smoothing_window_frames, 300);
    assert_eq!(engine.tracked_class_label, "person");
    assert!(engine.point_in_polygon_inclusive_boundary);
    assert!((engine.min_confidence - 0.1).abs() < f32::EPSILON);
}

#[test]
fn loads_config_from_file_and_env_overrides() {
    let _guard = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    clear_env();

    let file = write_config(
        r#"{
            "zones_path": "/etc/occupancy/zones.json",
            "source": { "url": "/var/lib/occupancy/office.mp4", "fps": 25.0, "width": 1280, "height": 720, "max_frames": 500 },
            "detection": { "backend": "Replay", "replay_path": "/var/lib/occupancy/detections.jsonl",
                           "interval_seconds": 2.0, "tracked_class_label": "person", "min_confidence": 0.25 },
            "smoothing": { "window_seconds": 4.0 },
            "point_in_polygon_inclusive_boundary": false,
            "output": { "log_path": "/tmp/log.json", "snapshot_dir": "/tmp/snaps" }
        }"#,
    );

    std::env::set_var("OCCUPANCY_CONFIG", file.path());
    std::env::set_var("OCCUPANCY_SMOOTHING_WINDOW_FRAMES", "75");
    std::env::set_var("OCCUPANCY_DB_PATH", "/tmp/occupancy.db");

    let cfg = OccupancyConfig::load().expect("load config");

    assert_eq!(cfg.zones_path.to_str(), Some("/etc/occupancy/zones.json"));
    assert_eq!(cfg.source.url, "/var/lib/occupancy/office.mp4");
    assert_eq!(cfg.source.width, 1280);
    assert_eq!(cfg.source.height, 720);
    assert_eq!(cfg.source.max_frames, Some(500));
    assert_eq!(cfg.detection.backend, "replay");
    assert_eq!(cfg.output.db_path.as_deref(), Some("/tmp/occupancy.db"));
    assert_eq!(
        cfg.output.snapshot_dir.as_deref().and_then(|p| p.to_str()),
        Some("/tmp/snaps")
    );

    let engine = cfg.engine_config().unwrap();
    assert_eq!(engine.detection_interval_frames, 50);
    assert_eq!(engine.smoothing_window_frames, 75);
    assert!(!engine.point_in_polygon_inclusive_boundary);
    assert!((engine.min_confidence - 0.25).abs() < f32::EPSILON);

    clear_env();
}

#[test]
fn rejects_zero_detection_interval() {
    let _guard = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    clear_env();

    std::env::set_var("OCCUPANCY_DETECTION_INTERVAL_FRAMES", "0");
    let err = OccupancyConfig::load().unwrap_err();
    assert_eq!(config_error_code(&err), Some("CONFIGURATION_ERROR"));

    clear_env();
}

#[test]
fn rejects_unparseable_overrides() {
    let _guard = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    clear_env();

    std::env::set_var("OCCUPANCY_SMOOTHING_WINDOW_FRAMES", "ten seconds");
    assert!(OccupancyConfig::load().is_err());
    clear_env();

    std::env::set_var("OCCUPANCY_FPS", "-5");
    let err = OccupancyConfig::load().unwrap_err();
    assert_eq!(config_error_code(&err), Some("CONFIGURATION_ERROR"));

    clear_env();
}

#[test]
fn rejects_unknown_backend_and_missing_model() {
    let _guard = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    clear_env();

    let file = write_config(r#"{ "detection": { "backend": "cloud" } }"#);
    std::env::set_var("OCCUPANCY_CONFIG", file.path());
    let err = OccupancyConfig::load().unwrap_err();
    assert!(err.to_string().contains("unknown detection backend"));

    let file = write_config(r#"{ "detection": { "backend": "tract" } }"#);
    std::env::set_var("OCCUPANCY_CONFIG", file.path());
    let err = OccupancyConfig::load().unwrap_err();
    assert!(err.to_string().contains("model_path"));

    clear_env();
}

#[test]
fn rejects_malformed_config_file() {
    let _guard = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    clear_env();

    let file = write_config("{ not json");
    std::env::set_var("OCCUPANCY_CONFIG", file.path());
    let err = OccupancyConfig::load().unwrap_err();
    assert_eq!(config_error_code(&err), Some("CONFIGURATION_ERROR"));

    clear_env();
}
