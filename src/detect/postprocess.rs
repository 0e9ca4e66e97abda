//! Model-independent pre/post-processing for YOLO-style detectors.
//!
//! - `letterbox`: aspect-preserving resize onto a square grey canvas.
//! - `decode_yolo`: raw `[1, 4 + nc, N]` (or `[1, N, 4 + nc]`) output to boxes.
//! - `non_max_suppression`: class-wise greedy NMS.

use anyhow::{anyhow, Result};
use image::imageops::{self, FilterType};
use image::{Rgb, RgbImage};

use super::backend::InferenceParams;
use super::result::BoxPrediction;

/// Grey used by ultralytics for letterbox padding.
pub const LETTERBOX_FILL: u8 = 114;

/// How a source image was placed on the model canvas.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Letterbox {
    pub scale: f32,
    pub pad_x: f32,
    pub pad_y: f32,
    pub source_width: u32,
    pub source_height: u32,
}

impl Letterbox {
    /// Map a canvas-space `[x1, y1, x2, y2]` back onto the source image, clipped.
    pub fn to_source(&self, xyxy: [f32; 4]) -> [f32; 4] {
        let max_x = self.source_width as f32;
        let max_y = self.source_height as f32;
        [
            ((xyxy[0] - self.pad_x) / self.scale).clamp(0.0, max_x),
            ((xyxy[1] - self.pad_y) / self.scale).clamp(0.0, max_y),
            ((xyxy[2] - self.pad_x) / self.scale).clamp(0.0, max_x),
            ((xyxy[3] - self.pad_y) / self.scale).clamp(0.0, max_y),
        ]
    }
}

pub fn letterbox(image: &RgbImage, size: u32) -> Result<(RgbImage, Letterbox)> {
    let (width, height) = image.dimensions();
    if width == 0 || height == 0 {
        return Err(anyhow!("cannot letterbox an empty image"));
    }
    if size == 0 {
        return Err(anyhow!("letterbox size must be positive"));
    }
    let scale = (size as f32 / width as f32).min(size as f32 / height as f32);
    let new_w = ((width as f32 * scale).round() as u32).clamp(1, size);
    let new_h = ((height as f32 * scale).round() as u32).clamp(1, size);
    let pad_x = (size - new_w) / 2;
    let pad_y = (size - new_h) / 2;

    let resized = imageops::resize(image, new_w, new_h, FilterType::Triangle);
    let mut canvas = RgbImage::from_pixel(size, size, Rgb([LETTERBOX_FILL; 3]));
    imageops::replace(&mut canvas, &resized, pad_x as i64, pad_y as i64);

    Ok((
        canvas,
        Letterbox {
            scale,
            pad_x: pad_x as f32,
            pad_y: pad_y as f32,
            source_width: width,
            source_height: height,
        },
    ))
}

/// Decode a YOLOv8-style head output.
///
/// Each candidate carries `cx, cy, w, h` in canvas pixels followed by one
/// score per class. The layout is inferred from which axis equals `4 + nc`.
pub fn decode_yolo(
    output: &[f32],
    shape: &[usize],
    num_classes: usize,
    params: InferenceParams,
    letterbox: &Letterbox,
) -> Result<Vec<BoxPrediction>> {
    if num_classes == 0 {
        return Err(anyhow!("model must have at least one class"));
    }
    let dims: Vec<usize> = shape.iter().copied().filter(|&d| d != 1).collect();
    let channels = 4 + num_classes;
    let (candidates, channels_first) = match dims.as_slice() {
        [a, b] if *a == channels => (*b, true),
        [a, b] if *b == channels => (*a, false),
        // Single candidate collapses one axis away.
        [a] if *a == channels => (1, true),
        _ => {
            return Err(anyhow!(
                "unexpected model output shape {:?} for {} classes",
                shape,
                num_classes
            ))
        }
    };
    if output.len() != candidates * channels {
        return Err(anyhow!(
            "model output has {} values, expected {}",
            output.len(),
            candidates * channels
        ));
    }

    let at = |channel: usize, idx: usize| -> f32 {
        if channels_first {
            output[channel * candidates + idx]
        } else {
            output[idx * channels + channel]
        }
    };

    let mut boxes = Vec::new();
    for idx in 0..candidates {
        let (class_id, score) = (0..num_classes)
            .map(|class| (class, at(4 + class, idx)))
            .fold((0, f32::NEG_INFINITY), |best, cur| {
                if cur.1 > best.1 {
                    cur
                } else {
                    best
                }
            });
        if !score.is_finite() || !params.accepts(score) {
            continue;
        }
        let (cx, cy, w, h) = (at(0, idx), at(1, idx), at(2, idx), at(3, idx));
        let canvas_box = [cx - w / 2.0, cy - h / 2.0, cx + w / 2.0, cy + h / 2.0];
        let candidate = BoxPrediction::new(letterbox.to_source(canvas_box), class_id, score);
        if candidate.area() > 0.0 {
            boxes.push(candidate);
        }
    }

    Ok(non_max_suppression(boxes, params.iou_threshold))
}

pub fn iou(a: &BoxPrediction, b: &BoxPrediction) -> f32 {
    let x1 = a.xyxy[0].max(b.xyxy[0]);
    let y1 = a.xyxy[1].max(b.xyxy[1]);
    let x2 = a.xyxy[2].min(b.xyxy[2]);
    let y2 = a.xyxy[3].min(b.xyxy[3]);
    let inter = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
    let union = a.area() + b.area() - inter;
    if union <= 0.0 {
        0.0
    } else {
        inter / union
    }
}

/// Greedy per-class NMS. Output is sorted by descending confidence.
pub fn non_max_suppression(mut boxes: Vec<BoxPrediction>, iou_threshold: f32) -> Vec<BoxPrediction> {
    boxes.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
    let mut kept: Vec<BoxPrediction> = Vec::with_capacity(boxes.len());
    for candidate in boxes {
        let suppressed = kept
            .iter()
            .any(|k| k.class_id == candidate.class_id && iou(k, &candidate) > iou_threshold);
        if !suppressed {
            kept.push(candidate);
        }
    }
    kept
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity_letterbox(size: u32) -> Letterbox {
        Letterbox {
            scale: 1.0,
            pad_x: 0.0,
            pad_y: 0.0,
            source_width: size,
            source_height: size,
        }
    }

    #[test]
    fn letterbox_pads_the_short_side() -> Result<()> {
        let image = RgbImage::from_pixel(200, 100, Rgb([255, 0, 0]));
        let (canvas, lb) = letterbox(&image, 64)?;
        assert_eq!(canvas.dimensions(), (64, 64));
        assert!((lb.scale - 0.32).abs() < 1e-6);
        assert_eq!(lb.pad_x, 0.0);
        assert_eq!(lb.pad_y, 16.0);
        assert_eq!(canvas.get_pixel(32, 2), &Rgb([LETTERBOX_FILL; 3]));
        assert_eq!(canvas.get_pixel(32, 32)[0], 255);

        // Canvas box covering the whole image maps back to the full source.
        let back = lb.to_source([0.0, 16.0, 64.0, 48.0]);
        assert_eq!(back, [0.0, 0.0, 200.0, 100.0]);
        Ok(())
    }

    #[test]
    fn nms_keeps_best_of_overlapping_same_class() {
        let boxes = vec![
            BoxPrediction::new([0.0, 0.0, 10.0, 10.0], 0, 0.7),
            BoxPrediction::new([1.0, 1.0, 10.0, 10.0], 0, 0.9),
            BoxPrediction::new([1.0, 1.0, 10.0, 10.0], 1, 0.6),
            BoxPrediction::new([50.0, 50.0, 60.0, 60.0], 0, 0.55),
        ];
        let kept = non_max_suppression(boxes, 0.45);
        assert_eq!(kept.len(), 3);
        assert_eq!(kept[0].confidence, 0.9);
        assert_eq!(kept[1].class_id, 1);
        assert_eq!(kept[2].xyxy[0], 50.0);
    }

    #[test]
    fn decode_channels_first_output() -> Result<()> {
        // Two classes, three candidates laid out [1, 6, 3].
        let cx: [f32; 3] = [30.0, 80.0, 10.0];
        let cy = [30.0, 80.0, 10.0];
        let w = [40.0, 40.0, 4.0];
        let h = [40.0, 40.0, 4.0];
        let fire = [0.9, 0.1, 0.3];
        let smoke = [0.05, 0.6, 0.2];
        let output: Vec<f32> = [cx, cy, w, h, fire, smoke].concat();

        let boxes = decode_yolo(
            &output,
            &[1, 6, 3],
            2,
            InferenceParams::default(),
            &identity_letterbox(640),
        )?;
        assert_eq!(boxes.len(), 2);
        assert_eq!(boxes[0].class_id, 0);
        assert_eq!(boxes[0].xyxy, [10.0, 10.0, 50.0, 50.0]);
        assert_eq!(boxes[1].class_id, 1);
        assert_eq!(boxes[1].xyxy, [60.0, 60.0, 100.0, 100.0]);
        Ok(())
    }

    #[test]
    fn decode_channels_last_output() -> Result<()> {
        let output = vec![
            20.0, 20.0, 10.0, 10.0, 0.8, //
            5.0, 5.0, 2.0, 2.0, 0.1,
        ];
        let boxes = decode_yolo(
            &output,
            &[1, 2, 5],
            1,
            InferenceParams::default(),
            &identity_letterbox(64),
        )?;
        assert_eq!(boxes.len(), 1);
        assert_eq!(boxes[0].xyxy, [15.0, 15.0, 25.0, 25.0]);
        Ok(())
    }

    #[test]
    fn decode_drops_scores_equal_to_threshold() -> Result<()> {
        let output = vec![
            20.0, 20.0, 10.0, 10.0, 0.5, //
            40.0, 40.0, 10.0, 10.0, 0.51,
        ];
        let boxes = decode_yolo(
            &output,
            &[1, 2, 5],
            1,
            InferenceParams::default(),
            &identity_letterbox(64),
        )?;
        assert_eq!(boxes.len(), 1);
        assert_eq!(boxes[0].xyxy, [35.0, 35.0, 45.0, 45.0]);
        Ok(())
    }

    #[test]
    fn decode_rejects_mismatched_shape() {
        let err = decode_yolo(
            &[0.0; 12],
            &[1, 3, 4],
            2,
            InferenceParams::default(),
            &identity_letterbox(64),
        );
        assert!(err.is_err());
    }
}
