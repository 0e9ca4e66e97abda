use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Result};
use image::RgbImage;

use super::backend::{DetectorBackend, InferenceParams};
use super::result::DetectionResult;

/// Shared handle to a detector backend.
pub type SharedDetector = Arc<Mutex<dyn DetectorBackend>>;

/// Thread-safe registry of detector backends.
///
/// Backends are wrapped in `Mutex` because `DetectorBackend::detect` takes `&mut self`.
pub struct BackendRegistry {
    backends: HashMap<String, SharedDetector>,
    default_name: Option<String>,
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self {
            backends: HashMap::new(),
            default_name: None,
        }
    }

    /// Register a backend. The first registered backend becomes the default.
    pub fn register<B: DetectorBackend + 'static>(&mut self, backend: B) {
        let name = backend.name().to_string();
        if self.default_name.is_none() {
            self.default_name = Some(name.clone());
        }
        self.backends.insert(name, Arc::new(Mutex::new(backend)));
    }

    /// Set default backend by name.
    pub fn set_default(&mut self, name: &str) -> Result<()> {
        if !self.backends.contains_key(name) {
            return Err(anyhow!("backend '{}' not registered", name));
        }
        self.default_name = Some(name.to_string());
        Ok(())
    }

    /// Get backend by name.
    pub fn get(&self, name: &str) -> Option<SharedDetector> {
        self.backends.get(name).cloned()
    }

    /// Get default backend.
    pub fn default_backend(&self) -> Option<SharedDetector> {
        self.default_name.as_ref().and_then(|name| self.get(name))
    }

    /// Name of the default backend, if any.
    pub fn default_name(&self) -> Option<&str> {
        self.default_name.as_deref()
    }

    /// List registered backends, sorted.
    pub fn list(&self) -> Vec<String> {
        let mut names: Vec<String> = self.backends.keys().cloned().collect();
        names.sort();
        names
    }
}

impl Default for BackendRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Lock a shared detector and run it once.
pub fn run_detector(
    detector: &SharedDetector,
    image: &RgbImage,
    params: InferenceParams,
) -> Result<DetectionResult> {
    let mut guard = detector
        .lock()
        .map_err(|_| anyhow!("detector lock poisoned"))?;
    guard.detect(image, params)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::{BoxPrediction, StubBackend};

    struct NamedStub(&'static str);

    impl DetectorBackend for NamedStub {
        fn name(&self) -> &'static str {
            self.0
        }

        fn detect(&mut self, _image: &RgbImage, _params: InferenceParams) -> Result<DetectionResult> {
            Ok(DetectionResult::default())
        }
    }

    #[test]
    fn first_registered_backend_is_default() -> Result<()> {
        let mut registry = BackendRegistry::new();
        registry.register(NamedStub("alpha"));
        registry.register(NamedStub("beta"));
        assert_eq!(registry.default_name(), Some("alpha"));
        assert_eq!(registry.list(), vec!["alpha", "beta"]);

        registry.set_default("beta")?;
        assert_eq!(registry.default_name(), Some("beta"));
        assert!(registry.set_default("gamma").is_err());
        Ok(())
    }

    #[test]
    fn run_detector_goes_through_the_lock() -> Result<()> {
        let mut registry = BackendRegistry::new();
        registry.register(StubBackend::scripted(
            &["fire"],
            vec![BoxPrediction::new([1.0, 1.0, 4.0, 4.0], 0, 0.8)],
        ));
        let detector = registry.default_backend().ok_or_else(|| anyhow!("no default"))?;
        let result = run_detector(&detector, &RgbImage::new(8, 8), InferenceParams::default())?;
        assert_eq!(result.boxes.len(), 1);
        Ok(())
    }
}
