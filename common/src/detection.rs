//! Detections, predictions and bounding box geometry.
//!
use serde::{Deserialize, Serialize};

/// Bounding box as `[x_top_left, y_top_left, width, height]` in frame pixel coordinates.
pub type Bbox = [f32; 4];

/// Single object found by a detector in one frame.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct Detection {
    pub class: String,
    pub score: f32,
    pub bbox: Bbox,
}

impl Detection {
    pub fn new(class: impl Into<String>, score: f32, bbox: Bbox) -> Self {
        Self {
            class: class.into(),
            score,
            bbox,
        }
    }
}

/// Ranked recognition result handed to the presentation stage.
///
/// Classifiers only label the whole frame, so `bbox` is only set for results which stem from a
/// detector.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct Prediction {
    pub class: String,
    pub score: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bbox: Option<Bbox>,
}

impl Prediction {
    pub fn new(class: impl Into<String>, score: f32) -> Self {
        Self {
            class: class.into(),
            score,
            bbox: None,
        }
    }
}

impl From<Detection> for Prediction {
    fn from(detection: Detection) -> Self {
        Self {
            class: detection.class,
            score: detection.score,
            bbox: Some(detection.bbox),
        }
    }
}

/// Calculate the area enclosed by a bounding box.
///
/// Boxes with a negative width or height are ill-defined and have an area of zero.
pub fn area(bbox: &Bbox) -> f32 {
    let [_, _, width, height] = *bbox;
    if width < 0.0 || height < 0.0 {
        return 0.0;
    }

    width * height
}

/// Calculate the intersection-over-union metric for two bounding boxes.
///
/// The union is `area(a) + area(b) - intersection`. Boxes without a common area, and pairs of
/// degenerate boxes with an empty union, have an IoU of zero.
pub fn iou(bbox_a: &Bbox, bbox_b: &Bbox) -> f32 {
    let [xa, ya, wa, ha] = *bbox_a;
    let [xb, yb, wb, hb] = *bbox_b;

    // Corner points of the overlap box. Without overlap, the bottom-right corner lies above or to
    // the left of the top-left corner and the clamped extent becomes zero.
    let x_tl = f32::max(xa, xb);
    let y_tl = f32::max(ya, yb);
    let x_br = f32::min(xa + wa, xb + wb);
    let y_br = f32::min(ya + ha, yb + hb);

    let intersection = f32::max(0.0, x_br - x_tl) * f32::max(0.0, y_br - y_tl);
    let union = area(bbox_a) + area(bbox_b) - intersection;
    if union <= 0.0 {
        return 0.0;
    }

    intersection / union
}

#[cfg(test)]
mod test {

    use super::*;
    use crate::Error;

    #[test]
    fn iou_of_box_with_itself_is_one() {
        for bbox in [[0.0, 0.0, 10.0, 10.0], [3.5, 7.0, 2.0, 40.0], [-4.0, -4.0, 8.0, 8.0]] {
            assert_eq!(iou(&bbox, &bbox), 1.0);
        }
    }

    #[test]
    fn iou_of_disjoint_boxes_is_zero() {
        let a = [0.0, 0.0, 10.0, 10.0];
        assert_eq!(iou(&a, &[20.0, 20.0, 5.0, 5.0]), 0.0);
        // Touching edges share no area
        assert_eq!(iou(&a, &[10.0, 0.0, 10.0, 10.0]), 0.0);
    }

    #[test]
    fn iou_of_partial_overlap() {
        let a = [0.0, 0.0, 10.0, 10.0];
        let b = [5.0, 0.0, 10.0, 10.0];
        // 50 / (100 + 100 - 50)
        assert!((iou(&a, &b) - 1.0 / 3.0).abs() < 1e-6);
        assert_eq!(iou(&a, &b), iou(&b, &a));
    }

    #[test]
    fn iou_of_nested_boxes_uses_full_union() {
        let outer = [0.0, 0.0, 10.0, 10.0];
        let inner = [2.0, 2.0, 5.0, 5.0];
        // 25 / (100 + 25 - 25)
        assert!((iou(&outer, &inner) - 0.25).abs() < 1e-6);
    }

    #[test]
    fn iou_of_degenerate_boxes_is_zero() {
        let empty = [1.0, 1.0, 0.0, 0.0];
        assert_eq!(iou(&empty, &empty), 0.0);
        assert_eq!(area(&[0.0, 0.0, -3.0, 4.0]), 0.0);
    }

    #[test]
    fn prediction_from_detection_keeps_bbox() {
        let prediction: Prediction = Detection::new("cat", 0.9, [0.0, 0.0, 10.0, 10.0]).into();
        assert_eq!(prediction.class, "cat");
        assert_eq!(prediction.bbox, Some([0.0, 0.0, 10.0, 10.0]));
    }

    #[test]
    fn classification_serializes_without_bbox() -> Result<(), Error> {
        let json = serde_json::to_string(&Prediction::new("tabby", 0.5))?;
        assert_eq!(json, r#"{"class":"tabby","score":0.5}"#);

        let detection: Detection =
            serde_json::from_str(r#"{"class":"cat","score":0.9,"bbox":[0,0,10,10]}"#)?;
        assert_eq!(detection, Detection::new("cat", 0.9, [0.0, 0.0, 10.0, 10.0]));

        Ok(())
    }
}
