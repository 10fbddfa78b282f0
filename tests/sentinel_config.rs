use std::io::Write;
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Duration;

use tempfile::NamedTempFile;

use weapon_sentinel::{EngineConfig, Preset, ReadFailurePolicy, SentinelConfig, SourceSpec};

static ENV_LOCK: Mutex<()> = Mutex::new(());

fn clear_env() {
    for key in [
        "SENTINEL_CONFIG",
        "SENTINEL_ALERT_DIR",
        "SENTINEL_INDEX_DB",
        "SENTINEL_API_ADDR",
        "SENTINEL_DETECTOR",
        "SENTINEL_DETECTIONS",
        "SENTINEL_RECONNECT_ATTEMPTS",
        "MODEL_PATH",
        "TELEGRAM_TOKEN",
        "TELEGRAM_CHAT_ID",
    ] {
        std::env::remove_var(key);
    }
}

fn config_file(suffix: &str, contents: &str) -> NamedTempFile {
    let mut file = tempfile::Builder::new()
        .suffix(suffix)
        .tempfile()
        .expect("temp config");
    file.write_all(contents.as_bytes()).expect("write config");
    file
}

#[test]
fn defaults_without_config_file() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let cfg = SentinelConfig::load().expect("load config");
    assert_eq!(cfg.alert_dir, PathBuf::from("alerts"));
    assert_eq!(cfg.index_db_path, None);
    assert_eq!(cfg.api_addr, "127.0.0.1:8800");
    assert_eq!(cfg.detector.backend, "scripted");
    assert_eq!(cfg.detector.model_path, PathBuf::from("models/guns.onnx"));
    assert_eq!(cfg.detector.input_size, 640);
    assert!(cfg.telegram.is_none());
    assert_eq!(cfg.presets.file_playback, EngineConfig::file_playback());
    assert_eq!(cfg.presets.live_stream, EngineConfig::live_stream());
    assert_eq!(cfg.presets.interactive, EngineConfig::interactive());
    assert_eq!(cfg.recovery.reconnect_attempts, 5);
    assert_eq!(cfg.recovery.reconnect_wait, Duration::from_secs(2));
    assert_eq!(cfg.recovery.live_retry, Duration::from_millis(500));
}

#[test]
fn loads_json_file_and_env_overrides() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let file = config_file(
        ".json",
        r#"{
            "alert_dir": "/var/lib/sentinel/alerts",
            "index_db_path": "/var/lib/sentinel/alerts.db",
            "api": { "addr": "127.0.0.1:9100" },
            "detector": { "backend": "Sidecar", "sidecar_path": "/tmp/detections.jsonl" },
            "reconnect": { "attempts": 3, "wait_secs": 0.5 },
            "live_retry_ms": 250
        }"#,
    );
    std::env::set_var("SENTINEL_CONFIG", file.path());
    std::env::set_var("SENTINEL_API_ADDR", "127.0.0.1:9200");
    std::env::set_var("MODEL_PATH", "/models/custom.onnx");
    std::env::set_var("SENTINEL_RECONNECT_ATTEMPTS", "7");

    let cfg = SentinelConfig::load().expect("load config");
    clear_env();

    assert_eq!(cfg.alert_dir, PathBuf::from("/var/lib/sentinel/alerts"));
    assert_eq!(cfg.index_db_path.as_deref(), Some("/var/lib/sentinel/alerts.db"));
    assert_eq!(cfg.api_addr, "127.0.0.1:9200");
    assert_eq!(cfg.detector.backend, "sidecar");
    assert_eq!(
        cfg.detector.sidecar_path,
        Some(PathBuf::from("/tmp/detections.jsonl"))
    );
    assert_eq!(cfg.detector.model_path, PathBuf::from("/models/custom.onnx"));
    assert_eq!(cfg.recovery.reconnect_attempts, 7);
    assert_eq!(cfg.recovery.reconnect_wait, Duration::from_millis(500));
    assert_eq!(cfg.recovery.live_retry, Duration::from_millis(250));

    let request = cfg.stream_request(SourceSpec::parse("0").unwrap(), Preset::Interactive);
    assert_eq!(
        request.policy,
        ReadFailurePolicy::Reconnect {
            attempts: 7,
            delay: Duration::from_millis(500)
        }
    );
    let live = cfg.stream_request(
        SourceSpec::parse("rtsp://cam/live").unwrap(),
        Preset::LiveStream,
    );
    assert_eq!(
        live.policy,
        ReadFailurePolicy::Retry {
            delay: Duration::from_millis(250)
        }
    );
}

#[test]
fn toml_preset_overrides_keep_other_constants() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let file = config_file(
        ".toml",
        r#"
alert_dir = "alerts-test"

[presets.live_stream]
conf_hard = 0.7
alert_cooldown_seconds = 30.0

[presets.interactive]
frame_streak_required = 3
"#,
    );
    std::env::set_var("SENTINEL_CONFIG", file.path());
    let cfg = SentinelConfig::load().expect("load config");
    clear_env();

    let live = cfg.engine_config(Preset::LiveStream);
    assert_eq!(live.conf_hard, 0.7);
    assert_eq!(live.alert_cooldown_seconds, 30.0);
    assert_eq!(live.min_area, EngineConfig::live_stream().min_area);
    assert_eq!(
        live.stability_displacement_threshold,
        EngineConfig::live_stream().stability_displacement_threshold
    );

    let interactive = cfg.engine_config(Preset::Interactive);
    assert_eq!(interactive.frame_streak_required, 3);
    assert_eq!(interactive.conf_hard, EngineConfig::interactive().conf_hard);
    assert_eq!(cfg.presets.file_playback, EngineConfig::file_playback());

    let request = cfg.stream_request(SourceSpec::parse("rtsp://cam").unwrap(), Preset::LiveStream);
    assert_eq!(&request.config, live);
}

#[test]
fn rejects_invalid_preset_values() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let out_of_range = config_file(".toml", "[presets.file_playback]\nconf_hard = 1.5\n");
    std::env::set_var("SENTINEL_CONFIG", out_of_range.path());
    let err = SentinelConfig::load().unwrap_err();
    assert!(err.to_string().contains("file-playback"), "{}", err);

    let unknown_field = config_file(".toml", "[presets.interactive]\nconf_hardest = 0.9\n");
    std::env::set_var("SENTINEL_CONFIG", unknown_field.path());
    assert!(SentinelConfig::load().is_err());
    clear_env();
}

#[test]
fn telegram_credentials_are_all_or_nothing() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("TELEGRAM_TOKEN", "123:abc");
    let err = SentinelConfig::load().unwrap_err();
    assert!(err.to_string().contains("TELEGRAM_CHAT_ID"), "{}", err);

    clear_env();
    std::env::set_var("TELEGRAM_CHAT_ID", "42");
    assert!(SentinelConfig::load().is_err());

    std::env::set_var("TELEGRAM_TOKEN", "123:abc");
    let cfg = SentinelConfig::load().expect("load config");
    clear_env();

    let telegram = cfg.telegram.as_ref().expect("telegram settings");
    assert_eq!(telegram.chat_id, "42");
    let debug = format!("{:?}", cfg);
    assert!(!debug.contains("123:abc"));
}

#[test]
fn telegram_credentials_from_file() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let file = config_file(
        ".json",
        r#"{ "notifier": { "telegram_token": "from-file", "telegram_chat_id": "7" } }"#,
    );
    std::env::set_var("SENTINEL_CONFIG", file.path());
    std::env::set_var("TELEGRAM_CHAT_ID", "99");
    let cfg = SentinelConfig::load().expect("load config");
    clear_env();

    let telegram = cfg.telegram.expect("telegram settings");
    assert_eq!(telegram.token, "from-file");
    assert_eq!(telegram.chat_id, "99");
}

#[test]
fn rejects_unusable_detector_settings() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("SENTINEL_DETECTOR", "yolo9000");
    assert!(SentinelConfig::load().is_err());

    std::env::set_var("SENTINEL_DETECTOR", "sidecar");
    let err = SentinelConfig::load().unwrap_err();
    assert!(err.to_string().contains("SENTINEL_DETECTIONS"), "{}", err);

    std::env::set_var("SENTINEL_DETECTIONS", "/tmp/detections.jsonl");
    let cfg = SentinelConfig::load().expect("load config");
    assert_eq!(cfg.detector.backend, "sidecar");

    std::env::remove_var("SENTINEL_DETECTIONS");
    std::env::set_var("SENTINEL_DETECTOR", "scripted");
    std::env::set_var("SENTINEL_RECONNECT_ATTEMPTS", "many");
    assert!(SentinelConfig::load().is_err());
    clear_env();
}

#[test]
fn rejects_unreadable_config_file() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("SENTINEL_CONFIG", "/nonexistent/sentinel.json");
    assert!(SentinelConfig::load().is_err());

    let garbage = config_file(".json", "{ not json");
    std::env::set_var("SENTINEL_CONFIG", garbage.path());
    assert!(SentinelConfig::load().is_err());
    clear_env();
}
