use std::collections::BTreeMap;

/// One box produced by a detector, in source-image pixel coordinates.
#[derive(Clone, Debug, PartialEq)]
pub struct BoxPrediction {
    /// `[x1, y1, x2, y2]`, top-left and bottom-right corners.
    pub xyxy: [f32; 4],
    pub class_id: usize,
    /// Model score in `0..=1`.
    pub confidence: f32,
}

impl BoxPrediction {
    pub fn new(xyxy: [f32; 4], class_id: usize, confidence: f32) -> Self {
        Self {
            xyxy,
            class_id,
            confidence,
        }
    }

    pub fn width(&self) -> f32 {
        (self.xyxy[2] - self.xyxy[0]).max(0.0)
    }

    pub fn height(&self) -> f32 {
        (self.xyxy[3] - self.xyxy[1]).max(0.0)
    }

    pub fn area(&self) -> f32 {
        self.width() * self.height()
    }

    /// Corners truncated to integer pixels.
    pub fn pixel_box(&self) -> [i32; 4] {
        [
            self.xyxy[0] as i32,
            self.xyxy[1] as i32,
            self.xyxy[2] as i32,
            self.xyxy[3] as i32,
        ]
    }
}

/// Result of running detection on one image.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DetectionResult {
    /// Boxes at or above the requested confidence threshold, model order.
    pub boxes: Vec<BoxPrediction>,
    /// Class id to human label.
    pub names: BTreeMap<usize, String>,
}

impl DetectionResult {
    pub fn new(boxes: Vec<BoxPrediction>, names: BTreeMap<usize, String>) -> Self {
        Self { boxes, names }
    }

    pub fn is_empty(&self) -> bool {
        self.boxes.is_empty()
    }

    /// Label for a class id; unknown ids render as `class_<id>`.
    pub fn label(&self, class_id: usize) -> String {
        self.names
            .get(&class_id)
            .cloned()
            .unwrap_or_else(|| format!("class_{class_id}"))
    }
}

/// Build a class-name table from an ordered list of labels.
pub fn class_names<S: AsRef<str>>(labels: &[S]) -> BTreeMap<usize, String> {
    labels
        .iter()
        .enumerate()
        .map(|(id, label)| (id, label.as_ref().to_string()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_class_ids_get_a_placeholder_label() {
        let result = DetectionResult::new(Vec::new(), class_names(&["fire", "smoke"]));
        assert_eq!(result.label(1), "smoke");
        assert_eq!(result.label(7), "class_7");
    }

    #[test]
    fn pixel_box_truncates() {
        let b = BoxPrediction::new([10.9, 10.2, 50.7, 49.99], 0, 0.9);
        assert_eq!(b.pixel_box(), [10, 10, 50, 49]);
        assert!((b.area() - 39.8 * 39.79).abs() < 0.01);
    }
}
