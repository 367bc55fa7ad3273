// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Core value types shared by the detection, refinement and projection stages

use crate::taxonomy::CabinetSubtype;
use serde::{Deserialize, Serialize};

/// Axis-aligned box (serialized as `[x, y, width, height]`)
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(from = "[f64; 4]", into = "[f64; 4]")]
pub struct BBox {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl BBox {
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn right(&self) -> f64 {
        self.x + self.width
    }

    pub fn bottom(&self) -> f64 {
        self.y + self.height
    }

    pub fn center(&self) -> (f64, f64) {
        (self.x + self.width / 2.0, self.y + self.height / 2.0)
    }
}

impl From<[f64; 4]> for BBox {
    fn from([x, y, width, height]: [f64; 4]) -> Self {
        Self::new(x, y, width, height)
    }
}

impl From<BBox> for [f64; 4] {
    fn from(b: BBox) -> Self {
        [b.x, b.y, b.width, b.height]
    }
}

/// One model output after label normalization
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Detection {
    pub bbox: BBox,
    /// Detection confidence (0.0 - 1.0), absent for hand-built inputs
    #[serde(default)]
    pub score: Option<f64>,
    /// Zero-based Objects365 class index
    pub label: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub class_name: Option<String>,
}

impl Detection {
    pub fn new(bbox: BBox, score: f64, label: usize) -> Self {
        Self {
            bbox,
            score: Some(score),
            label,
            class_name: None,
        }
    }
}

/// Inference result as produced by the model runner
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProcessedDetections {
    pub detections: Vec<Detection>,
    /// Wall time spent in the forward pass (milliseconds)
    #[serde(default)]
    pub inference_time: f64,
}

/// Natural pixel size of the source image
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct ImageMeta {
    pub width: f64,
    pub height: f64,
}

impl ImageMeta {
    pub fn new(width: f64, height: f64) -> Self {
        Self { width, height }
    }

    pub fn is_valid(&self) -> bool {
        self.width.is_finite() && self.height.is_finite() && self.width > 0.0 && self.height > 0.0
    }
}

/// Client size of the hotspot overlay container
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct ContainerSize {
    pub width: f64,
    pub height: f64,
}

impl ContainerSize {
    pub fn new(width: f64, height: f64) -> Self {
        Self { width, height }
    }
}

/// Box of the displayed image element, relative to the container's top-left corner
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct DisplayRect {
    pub left: f64,
    pub top: f64,
    pub width: f64,
    pub height: f64,
}

/// How a natural-resolution image is drawn inside its container
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RenderMetrics {
    pub offset_x: f64,
    pub offset_y: f64,
    pub scale_x: f64,
    pub scale_y: f64,
    /// Rendered image width (may exceed the container under `cover`)
    pub width: f64,
    pub height: f64,
}

/// Interactive marker over a detected furniture item
///
/// `cx`/`cy` are natural-pixel coordinates on hotspots built by the pipeline and
/// screen coordinates on the projected copies.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Hotspot {
    pub id: u32,
    #[serde(flatten)]
    pub detection: Detection,
    pub cx: f64,
    pub cy: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refined_label: Option<CabinetSubtype>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refined_label_en: Option<String>,
    pub final_label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
}

/// Screen-space outline of a projected hotspot's box
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DebugRect {
    pub id: u32,
    pub left: f64,
    pub top: f64,
    pub width: f64,
    pub height: f64,
    pub label: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bbox_serializes_as_array() {
        let bbox = BBox::new(1.0, 2.0, 3.0, 4.0);
        let json = serde_json::to_string(&bbox).unwrap();
        assert_eq!(json, "[1.0,2.0,3.0,4.0]");
    }

    #[test]
    fn test_detection_accepts_missing_score() {
        let det: Detection = serde_json::from_str(r#"{"bbox":[0,0,10,10],"label":12}"#).unwrap();
        assert_eq!(det.score, None);
        assert_eq!(det.label, 12);
        assert_eq!(det.bbox.center(), (5.0, 5.0));
    }

    #[test]
    fn test_image_meta_validity() {
        assert!(ImageMeta::new(1536.0, 1024.0).is_valid());
        assert!(!ImageMeta::new(0.0, 1024.0).is_valid());
        assert!(!ImageMeta::new(f64::NAN, 10.0).is_valid());
    }
}
