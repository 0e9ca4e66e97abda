use anyhow::Result;
use image::RgbImage;

use crate::detect::backend::{DetectorBackend, InferenceParams};
use crate::detect::result::{class_names, BoxPrediction, DetectionResult};

/// Stub backend for testing and model-less runs.
///
/// Returns the same scripted boxes for every image, filtered by the
/// confidence threshold the way a real model would filter them.
pub struct StubBackend {
    labels: Vec<String>,
    boxes: Vec<BoxPrediction>,
    calls: u64,
}

impl StubBackend {
    /// A backend that never detects anything.
    pub fn new<S: AsRef<str>>(labels: &[S]) -> Self {
        Self::scripted(labels, Vec::new())
    }

    pub fn scripted<S: AsRef<str>>(labels: &[S], boxes: Vec<BoxPrediction>) -> Self {
        Self {
            labels: labels.iter().map(|l| l.as_ref().to_string()).collect(),
            boxes,
            calls: 0,
        }
    }

    /// Number of `detect` calls served.
    pub fn calls(&self) -> u64 {
        self.calls
    }
}

impl Default for StubBackend {
    fn default() -> Self {
        Self::new(&["fire", "smoke"])
    }
}

impl DetectorBackend for StubBackend {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn detect(&mut self, _image: &RgbImage, params: InferenceParams) -> Result<DetectionResult> {
        self.calls += 1;
        let boxes = self
            .boxes
            .iter()
            .filter(|b| params.accepts(b.confidence))
            .cloned()
            .collect();
        Ok(DetectionResult::new(boxes, class_names(&self.labels)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stub_backend_applies_threshold() -> Result<()> {
        let mut backend = StubBackend::scripted(
            &["fire", "smoke"],
            vec![
                BoxPrediction::new([10.0, 10.0, 50.0, 50.0], 0, 0.9),
                BoxPrediction::new([0.0, 0.0, 5.0, 5.0], 1, 0.4),
            ],
        );

        let result = backend.detect(&RgbImage::new(64, 64), InferenceParams::default())?;
        assert_eq!(result.boxes.len(), 1);
        assert_eq!(result.label(result.boxes[0].class_id), "fire");
        assert_eq!(backend.calls(), 1);

        let lenient = InferenceParams {
            confidence_threshold: 0.25,
            ..InferenceParams::default()
        };
        let result = backend.detect(&RgbImage::new(64, 64), lenient)?;
        assert_eq!(result.boxes.len(), 2);
        Ok(())
    }

    #[test]
    fn score_equal_to_threshold_is_dropped() -> Result<()> {
        let mut backend = StubBackend::scripted(
            &["fire", "smoke"],
            vec![
                BoxPrediction::new([1.0, 1.0, 9.0, 9.0], 0, 0.5),
                BoxPrediction::new([2.0, 2.0, 8.0, 8.0], 1, 0.5001),
            ],
        );

        let result = backend.detect(&RgbImage::new(16, 16), InferenceParams::default())?;
        assert_eq!(result.boxes.len(), 1);
        assert_eq!(result.boxes[0].class_id, 1);
        Ok(())
    }

    #[test]
    fn default_stub_detects_nothing() -> Result<()> {
        let mut backend = StubBackend::default();
        let result = backend.detect(&RgbImage::new(4, 4), InferenceParams::default())?;
        assert!(result.is_empty());
        assert_eq!(result.names.len(), 2);
        Ok(())
    }
}
