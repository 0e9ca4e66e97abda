use std::path::Path;
use std::sync::Mutex;

use tempfile::NamedTempFile;

use firewatch::config::FirewatchConfig;

static ENV_LOCK: Mutex<()> = Mutex::new(());

fn clear_env() {
    for key in [
        "FIREWATCH_CONFIG",
        "FIREWATCH_API_ADDR",
        "FIREWATCH_PUBLIC_URL",
        "FIREWATCH_MAX_UPLOAD_BYTES",
        "FIREWATCH_UPLOAD_DIR",
        "FIREWATCH_RESULT_DIR",
        "FIREWATCH_HISTORY_PATH",
        "FIREWATCH_BACKEND",
        "FIREWATCH_MODEL_PATH",
        "FIREWATCH_CONFIDENCE",
        "FIREWATCH_CAMERA_DEVICE",
        "FIREWATCH_CAMERA_FPS",
    ] {
        std::env::remove_var(key);
    }
}

fn write_config(json: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().expect("temp config");
    std::io::Write::write_all(&mut file, json.as_bytes()).expect("write config");
    file
}

#[test]
fn defaults_without_file_or_env() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let cfg = FirewatchConfig::load().expect("load defaults");
    assert_eq!(cfg.api_addr, "127.0.0.1:5000");
    assert_eq!(cfg.public_url, "http://localhost:5000");
    assert_eq!(cfg.max_upload_bytes, 16 * 1024 * 1024);
    assert_eq!(cfg.storage.result_dir, Path::new("results"));
    assert_eq!(cfg.storage.history_path, Path::new("history/detections.json"));
    let default_backend = if cfg!(feature = "backend-tract") {
        "tract"
    } else {
        "stub"
    };
    assert_eq!(cfg.detector.backend, default_backend);
    assert_eq!(cfg.detector.class_names, vec!["fire", "smoke"]);
    assert_eq!(cfg.detector.inference_size, 640);
    assert_eq!(cfg.detector.confidence_threshold, 0.5);
    assert_eq!(cfg.camera.device, "/dev/video0");
    assert_eq!(cfg.camera.target_fps, 10);
}

#[test]
fn loads_config_from_file_and_env_overrides() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let file = write_config(
        r#"{
            "api": {
                "addr": "0.0.0.0:8080",
                "public_url": "https://fire.example/",
                "max_upload_bytes": 1048576
            },
            "storage": {
                "result_dir": "/var/lib/firewatch/results",
                "history_path": "/var/lib/firewatch/history.json"
            },
            "detector": {
                "backend": "tract",
                "model_path": "/opt/models/fire.onnx",
                "class_names": ["flame", "smoke", "ember"],
                "inference_size": 320,
                "confidence_threshold": 0.4
            },
            "camera": {
                "device": "stub://yard",
                "target_fps": 5,
                "width": 320
            }
        }"#,
    );

    std::env::set_var("FIREWATCH_CONFIG", file.path());
    std::env::set_var("FIREWATCH_CONFIDENCE", "0.65");
    std::env::set_var("FIREWATCH_CAMERA_FPS", "15");
    std::env::set_var("FIREWATCH_UPLOAD_DIR", "/tmp/fw-uploads");

    let cfg = FirewatchConfig::load().expect("load config");

    assert_eq!(cfg.api_addr, "0.0.0.0:8080");
    assert_eq!(cfg.public_url, "https://fire.example");
    assert_eq!(cfg.max_upload_bytes, 1_048_576);
    assert_eq!(cfg.storage.upload_dir, Path::new("/tmp/fw-uploads"));
    assert_eq!(cfg.storage.result_dir, Path::new("/var/lib/firewatch/results"));
    assert_eq!(cfg.storage.history_path, Path::new("/var/lib/firewatch/history.json"));
    assert_eq!(cfg.detector.backend, "tract");
    assert_eq!(cfg.detector.model_path, Path::new("/opt/models/fire.onnx"));
    assert_eq!(cfg.detector.class_names, vec!["flame", "smoke", "ember"]);
    assert_eq!(cfg.detector.inference_size, 320);
    assert_eq!(cfg.detector.confidence_threshold, 0.65);
    assert_eq!(cfg.detector.iou_threshold, 0.45);
    assert_eq!(cfg.camera.device, "stub://yard");
    assert_eq!(cfg.camera.target_fps, 15);
    assert_eq!(cfg.camera.width, 320);
    assert_eq!(cfg.camera.height, 480);

    clear_env();
}

#[test]
fn explicit_path_replaces_env_file() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let ignored = write_config(r#"{"api": {"addr": "10.0.0.1:1"}}"#);
    let chosen = write_config(r#"{"api": {"addr": "127.0.0.1:6000"}}"#);
    std::env::set_var("FIREWATCH_CONFIG", ignored.path());

    let cfg = FirewatchConfig::load_from(Some(chosen.path())).expect("load config");
    assert_eq!(cfg.api_addr, "127.0.0.1:6000");

    clear_env();
}

#[test]
fn rejects_invalid_env_values() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("FIREWATCH_CONFIDENCE", "high");
    assert!(FirewatchConfig::load().is_err());
    clear_env();

    std::env::set_var("FIREWATCH_CONFIDENCE", "1.5");
    assert!(FirewatchConfig::load().is_err());
    clear_env();

    std::env::set_var("FIREWATCH_PUBLIC_URL", "fire.example");
    assert!(FirewatchConfig::load().is_err());
    clear_env();
}

#[test]
fn rejects_unreadable_or_invalid_file() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let file = write_config("{ not json");
    std::env::set_var("FIREWATCH_CONFIG", file.path());
    let err = FirewatchConfig::load().expect_err("invalid json must fail");
    assert!(err.to_string().contains("invalid config file"));

    std::env::set_var("FIREWATCH_CONFIG", "/nonexistent/firewatch.json");
    let err = FirewatchConfig::load().expect_err("missing file must fail");
    assert!(err.to_string().contains("failed to read config file"));

    clear_env();
}
