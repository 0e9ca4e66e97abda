use anyhow::Result;
use image::RgbImage;

use crate::detect::result::DetectionResult;

/// Knobs passed to every detection call.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct InferenceParams {
    /// Square model input edge in pixels.
    pub size: u32,
    /// Only boxes scoring strictly above this are returned.
    pub confidence_threshold: f32,
    /// Overlap above which lower-scoring boxes of the same class are suppressed.
    pub iou_threshold: f32,
}

impl Default for InferenceParams {
    fn default() -> Self {
        Self {
            size: 640,
            confidence_threshold: 0.5,
            iou_threshold: 0.45,
        }
    }
}

impl InferenceParams {
    pub fn accepts(&self, confidence: f32) -> bool {
        confidence > self.confidence_threshold
    }
}

/// Detector backend trait.
///
/// A backend turns one decoded RGB image into labelled boxes. It is treated as
/// an opaque capability by the rest of the crate: the pipeline and the live
/// stream only see `DetectionResult`.
///
/// Backends are driven through `&mut self` and shared behind a `Mutex`, so a
/// single model instance serves one image at a time.
pub trait DetectorBackend: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Run detection on an image.
    ///
    /// Returned boxes are in source-image pixel coordinates and all score
    /// above `params.confidence_threshold`.
    fn detect(&mut self, image: &RgbImage, params: InferenceParams) -> Result<DetectionResult>;

    /// Optional warm-up hook.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}
