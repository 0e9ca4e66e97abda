//! Client-facing detection records.
//!
//! A `Prediction` is what `/predict` returns and what the history ledger
//! stores: a label, a percentage confidence rounded to one decimal, and the
//! integer pixel box. A response is never empty; when the detector finds
//! nothing a single "no detection" sentinel is reported instead.

use serde::{Deserialize, Serialize};

use crate::detect::DetectionResult;

/// Label of the sentinel entry reported when nothing was detected.
pub const NO_DETECTION_LABEL: &str = "no detection";

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    #[serde(rename = "class")]
    pub class_label: String,
    /// Percentage in `0..=100`, one decimal place.
    pub confidence: f64,
    #[serde(rename = "bbox", default, skip_serializing_if = "Option::is_none")]
    pub bounding_box: Option<[i32; 4]>,
}

impl Prediction {
    pub fn no_detection() -> Self {
        Self {
            class_label: NO_DETECTION_LABEL.to_string(),
            confidence: 100.0,
            bounding_box: None,
        }
    }

    pub fn is_sentinel(&self) -> bool {
        self.bounding_box.is_none() && self.class_label == NO_DETECTION_LABEL
    }
}

/// Convert a model score in `0..=1` to a percentage rounded to one decimal.
pub fn confidence_percent(score: f32) -> f64 {
    (f64::from(score) * 1000.0).round() / 10.0
}

/// Build the response list for one detection result, in model order.
pub fn predictions_from(result: &DetectionResult) -> Vec<Prediction> {
    if result.is_empty() {
        return vec![Prediction::no_detection()];
    }
    result
        .boxes
        .iter()
        .map(|b| Prediction {
            class_label: result.label(b.class_id),
            confidence: confidence_percent(b.confidence),
            bounding_box: Some(b.pixel_box()),
        })
        .collect()
}
