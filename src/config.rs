use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::camera::CameraConfig;
use crate::detect::InferenceParams;

const DEFAULT_API_ADDR: &str = "127.0.0.1:5000";
const DEFAULT_PUBLIC_URL: &str = "http://localhost:5000";
const DEFAULT_MAX_UPLOAD_BYTES: usize = 16 * 1024 * 1024;
const DEFAULT_UPLOAD_DIR: &str = "uploads";
const DEFAULT_RESULT_DIR: &str = "results";
const DEFAULT_HISTORY_PATH: &str = "history/detections.json";
#[cfg(feature = "backend-tract")]
const DEFAULT_BACKEND: &str = "tract";
#[cfg(not(feature = "backend-tract"))]
const DEFAULT_BACKEND: &str = "stub";
const DEFAULT_MODEL_PATH: &str = "best.onnx";
const DEFAULT_CLASS_NAMES: [&str; 2] = ["fire", "smoke"];
const DEFAULT_INFERENCE_SIZE: u32 = 640;
const DEFAULT_CONFIDENCE: f32 = 0.5;
const DEFAULT_IOU: f32 = 0.45;

#[derive(Debug, Deserialize, Default)]
struct FirewatchConfigFile {
    api: Option<ApiConfigFile>,
    storage: Option<StorageConfigFile>,
    detector: Option<DetectorConfigFile>,
    camera: Option<CameraConfig>,
}

#[derive(Debug, Deserialize, Default)]
struct ApiConfigFile {
    addr: Option<String>,
    public_url: Option<String>,
    max_upload_bytes: Option<usize>,
}

#[derive(Debug, Deserialize, Default)]
struct StorageConfigFile {
    upload_dir: Option<PathBuf>,
    result_dir: Option<PathBuf>,
    history_path: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Default)]
struct DetectorConfigFile {
    backend: Option<String>,
    model_path: Option<PathBuf>,
    class_names: Option<Vec<String>>,
    inference_size: Option<u32>,
    confidence_threshold: Option<f32>,
    iou_threshold: Option<f32>,
}

#[derive(Debug, Clone)]
pub struct FirewatchConfig {
    pub api_addr: String,
    /// Base for result-image URLs handed to clients.
    pub public_url: String,
    pub max_upload_bytes: usize,
    pub storage: StorageSettings,
    pub detector: DetectorSettings,
    pub camera: CameraConfig,
}

#[derive(Debug, Clone)]
pub struct StorageSettings {
    pub upload_dir: PathBuf,
    pub result_dir: PathBuf,
    pub history_path: PathBuf,
}

impl StorageSettings {
    /// Default layout rooted at `root`.
    pub fn under(root: &Path) -> Self {
        Self {
            upload_dir: root.join(DEFAULT_UPLOAD_DIR),
            result_dir: root.join(DEFAULT_RESULT_DIR),
            history_path: root.join(DEFAULT_HISTORY_PATH),
        }
    }
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            upload_dir: PathBuf::from(DEFAULT_UPLOAD_DIR),
            result_dir: PathBuf::from(DEFAULT_RESULT_DIR),
            history_path: PathBuf::from(DEFAULT_HISTORY_PATH),
        }
    }
}

#[derive(Debug, Clone)]
pub struct DetectorSettings {
    pub backend: String,
    pub model_path: PathBuf,
    pub class_names: Vec<String>,
    pub inference_size: u32,
    pub confidence_threshold: f32,
    pub iou_threshold: f32,
}

impl DetectorSettings {
    pub fn params(&self) -> InferenceParams {
        InferenceParams {
            size: self.inference_size,
            confidence_threshold: self.confidence_threshold,
            iou_threshold: self.iou_threshold,
        }
    }
}

impl Default for DetectorSettings {
    fn default() -> Self {
        Self {
            backend: DEFAULT_BACKEND.to_string(),
            model_path: PathBuf::from(DEFAULT_MODEL_PATH),
            class_names: DEFAULT_CLASS_NAMES.iter().map(|s| s.to_string()).collect(),
            inference_size: DEFAULT_INFERENCE_SIZE,
            confidence_threshold: DEFAULT_CONFIDENCE,
            iou_threshold: DEFAULT_IOU,
        }
    }
}

impl Default for FirewatchConfig {
    fn default() -> Self {
        Self {
            api_addr: DEFAULT_API_ADDR.to_string(),
            public_url: DEFAULT_PUBLIC_URL.to_string(),
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
            storage: StorageSettings::default(),
            detector: DetectorSettings::default(),
            camera: CameraConfig::default(),
        }
    }
}

impl FirewatchConfig {
    /// Load from `FIREWATCH_CONFIG` (JSON, optional), apply env overrides, validate.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("FIREWATCH_CONFIG").ok();
        Self::load_from(config_path.as_deref().map(Path::new))
    }

    /// Like `load`, with an explicit config file taking the place of `FIREWATCH_CONFIG`.
    pub fn load_from(config_path: Option<&Path>) -> Result<Self> {
        let file_cfg = match config_path {
            Some(path) => Some(read_config_file(path)?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default());
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: FirewatchConfigFile) -> Self {
        let defaults = Self::default();
        let api = file.api.unwrap_or_default();
        let storage = file.storage.unwrap_or_default();
        let detector = file.detector.unwrap_or_default();
        Self {
            api_addr: api.addr.unwrap_or(defaults.api_addr),
            public_url: api.public_url.unwrap_or(defaults.public_url),
            max_upload_bytes: api.max_upload_bytes.unwrap_or(defaults.max_upload_bytes),
            storage: StorageSettings {
                upload_dir: storage.upload_dir.unwrap_or(defaults.storage.upload_dir),
                result_dir: storage.result_dir.unwrap_or(defaults.storage.result_dir),
                history_path: storage.history_path.unwrap_or(defaults.storage.history_path),
            },
            detector: DetectorSettings {
                backend: detector.backend.unwrap_or(defaults.detector.backend),
                model_path: detector.model_path.unwrap_or(defaults.detector.model_path),
                class_names: detector
                    .class_names
                    .unwrap_or(defaults.detector.class_names),
                inference_size: detector
                    .inference_size
                    .unwrap_or(defaults.detector.inference_size),
                confidence_threshold: detector
                    .confidence_threshold
                    .unwrap_or(defaults.detector.confidence_threshold),
                iou_threshold: detector
                    .iou_threshold
                    .unwrap_or(defaults.detector.iou_threshold),
            },
            camera: file.camera.unwrap_or(defaults.camera),
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Some(addr) = env_non_empty("FIREWATCH_API_ADDR") {
            self.api_addr = addr;
        }
        if let Some(url) = env_non_empty("FIREWATCH_PUBLIC_URL") {
            self.public_url = url;
        }
        if let Some(bytes) = env_non_empty("FIREWATCH_MAX_UPLOAD_BYTES") {
            self.max_upload_bytes = bytes
                .parse()
                .map_err(|_| anyhow!("FIREWATCH_MAX_UPLOAD_BYTES must be an integer byte count"))?;
        }
        if let Some(dir) = env_non_empty("FIREWATCH_UPLOAD_DIR") {
            self.storage.upload_dir = PathBuf::from(dir);
        }
        if let Some(dir) = env_non_empty("FIREWATCH_RESULT_DIR") {
            self.storage.result_dir = PathBuf::from(dir);
        }
        if let Some(path) = env_non_empty("FIREWATCH_HISTORY_PATH") {
            self.storage.history_path = PathBuf::from(path);
        }
        if let Some(backend) = env_non_empty("FIREWATCH_BACKEND") {
            self.detector.backend = backend;
        }
        if let Some(path) = env_non_empty("FIREWATCH_MODEL_PATH") {
            self.detector.model_path = PathBuf::from(path);
        }
        if let Some(conf) = env_non_empty("FIREWATCH_CONFIDENCE") {
            self.detector.confidence_threshold = conf
                .parse()
                .map_err(|_| anyhow!("FIREWATCH_CONFIDENCE must be a number in (0, 1]"))?;
        }
        if let Some(device) = env_non_empty("FIREWATCH_CAMERA_DEVICE") {
            self.camera.device = device;
        }
        if let Some(fps) = env_non_empty("FIREWATCH_CAMERA_FPS") {
            self.camera.target_fps = fps
                .parse()
                .map_err(|_| anyhow!("FIREWATCH_CAMERA_FPS must be a positive integer"))?;
        }
        Ok(())
    }

    pub fn validate(&mut self) -> Result<()> {
        let det = &self.detector;
        if !(det.confidence_threshold > 0.0 && det.confidence_threshold <= 1.0) {
            return Err(anyhow!(
                "confidence threshold must be in (0, 1], got {}",
                det.confidence_threshold
            ));
        }
        if !(det.iou_threshold > 0.0 && det.iou_threshold <= 1.0) {
            return Err(anyhow!(
                "iou threshold must be in (0, 1], got {}",
                det.iou_threshold
            ));
        }
        if det.inference_size == 0 || det.inference_size % 32 != 0 {
            return Err(anyhow!(
                "inference size must be a positive multiple of 32, got {}",
                det.inference_size
            ));
        }
        if det.class_names.is_empty() {
            return Err(anyhow!("detector needs at least one class name"));
        }
        if self.camera.target_fps == 0 {
            return Err(anyhow!("camera target_fps must be at least 1"));
        }
        if !(self.public_url.starts_with("http://") || self.public_url.starts_with("https://")) {
            return Err(anyhow!(
                "public url must start with http:// or https://, got '{}'",
                self.public_url
            ));
        }
        self.public_url = self.public_url.trim_end_matches('/').to_string();
        Ok(())
    }
}

fn env_non_empty(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn read_config_file(path: &Path) -> Result<FirewatchConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let cfg = serde_json::from_str(&raw)
        .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?;
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() -> Result<()> {
        let mut cfg = FirewatchConfig::default();
        cfg.validate()?;
        assert_eq!(cfg.detector.params(), InferenceParams::default());
        assert_eq!(cfg.public_url, "http://localhost:5000");
        Ok(())
    }

    #[test]
    fn default_backend_follows_build_features() {
        let cfg = FirewatchConfig::default();
        let expected = if cfg!(feature = "backend-tract") {
            "tract"
        } else {
            "stub"
        };
        assert_eq!(cfg.detector.backend, expected);
    }

    #[test]
    fn rejects_out_of_range_values() {
        let mut cfg = FirewatchConfig::default();
        cfg.detector.confidence_threshold = 0.0;
        assert!(cfg.validate().is_err());

        let mut cfg = FirewatchConfig::default();
        cfg.detector.inference_size = 630;
        assert!(cfg.validate().is_err());

        let mut cfg = FirewatchConfig::default();
        cfg.public_url = "localhost:5000".to_string();
        assert!(cfg.validate().is_err());

        let mut cfg = FirewatchConfig::default();
        cfg.camera.target_fps = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn public_url_trailing_slash_is_trimmed() -> Result<()> {
        let mut cfg = FirewatchConfig {
            public_url: "https://fire.example/".to_string(),
            ..FirewatchConfig::default()
        };
        cfg.validate()?;
        assert_eq!(cfg.public_url, "https://fire.example");
        Ok(())
    }

    #[test]
    fn storage_under_root() {
        let s = StorageSettings::under(Path::new("/srv/fw"));
        assert_eq!(s.history_path, Path::new("/srv/fw/history/detections.json"));
        assert_eq!(s.result_dir, Path::new("/srv/fw/results"));
    }
}
