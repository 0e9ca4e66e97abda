#![cfg(feature = "backend-tract")]

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{anyhow, Context, Result};
use image::RgbImage;
use tract_onnx::prelude::*;

use crate::detect::backend::{DetectorBackend, InferenceParams};
use crate::detect::postprocess::{decode_yolo, letterbox};
use crate::detect::result::{class_names, DetectionResult};

/// Tract-based backend for YOLO-style ONNX object detectors.
///
/// The model is compiled for a fixed square input; requests asking for a
/// different `InferenceParams::size` are rejected rather than recompiled.
pub struct TractBackend {
    model: SimplePlan<TypedFact, Box<dyn TypedOp>>,
    size: u32,
    names: BTreeMap<usize, String>,
}

impl TractBackend {
    /// Load an ONNX model from disk and prepare it for inference.
    pub fn new<P: AsRef<Path>, S: AsRef<str>>(model_path: P, size: u32, labels: &[S]) -> Result<Self> {
        let model_path = model_path.as_ref();
        if labels.is_empty() {
            return Err(anyhow!("tract backend needs at least one class label"));
        }
        let model = tract_onnx::onnx()
            .model_for_path(model_path)
            .with_context(|| format!("failed to load ONNX model from {}", model_path.display()))?
            .with_input_fact(
                0,
                InferenceFact::dt_shape(
                    f32::datum_type(),
                    tvec!(1, 3, size as usize, size as usize),
                ),
            )
            .context("failed to set input fact")?
            .into_optimized()
            .context("failed to optimize ONNX model")?
            .into_runnable()
            .context("failed to build runnable ONNX model")?;

        log::info!(
            "tract backend loaded {} ({}x{}, {} classes)",
            model_path.display(),
            size,
            size,
            labels.len()
        );

        Ok(Self {
            model,
            size,
            names: class_names(labels),
        })
    }

    fn build_input(&self, canvas: &RgbImage) -> Tensor {
        let size = self.size as usize;
        tract_ndarray::Array4::from_shape_fn((1, 3, size, size), |(_, channel, y, x)| {
            canvas.get_pixel(x as u32, y as u32)[channel] as f32 / 255.0
        })
        .into_tensor()
    }
}

impl DetectorBackend for TractBackend {
    fn name(&self) -> &'static str {
        "tract"
    }

    fn detect(&mut self, image: &RgbImage, params: InferenceParams) -> Result<DetectionResult> {
        if params.size != self.size {
            return Err(anyhow!(
                "inference size {} does not match compiled model input {}",
                params.size,
                self.size
            ));
        }
        let (canvas, placement) = letterbox(image, self.size)?;
        let input = self.build_input(&canvas);
        let outputs = self
            .model
            .run(tvec!(input.into()))
            .context("ONNX inference failed")?;
        let output = outputs
            .first()
            .ok_or_else(|| anyhow!("model produced no outputs"))?;
        let view = output
            .to_array_view::<f32>()
            .context("model output tensor was not f32")?;
        let shape = view.shape().to_vec();
        let values: Vec<f32> = view.iter().copied().collect();

        let boxes = decode_yolo(&values, &shape, self.names.len(), params, &placement)?;
        Ok(DetectionResult::new(boxes, self.names.clone()))
    }

    fn warm_up(&mut self) -> Result<()> {
        let blank = RgbImage::new(self.size, self.size);
        self.detect(
            &blank,
            InferenceParams {
                size: self.size,
                ..InferenceParams::default()
            },
        )
        .map(|_| ())
    }
}
