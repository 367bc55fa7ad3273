// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Geometric features of a cabinet box relative to the image frame

use super::RefinementOptions;
use crate::types::{Detection, ImageMeta};
use serde::{Deserialize, Serialize};

/// Size assumed when the caller has no usable image dimensions
pub const DEFAULT_IMAGE_META: ImageMeta = ImageMeta {
    width: 1536.0,
    height: 1024.0,
};

/// Ratios of a box against the image, plus edge-contact flags
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FurnitureFeatures {
    pub width_ratio: f64,
    pub height_ratio: f64,
    pub area_ratio: f64,
    pub aspect_ratio: f64,
    pub vertical_aspect: f64,
    pub center_x_ratio: f64,
    pub center_y_ratio: f64,
    pub top_ratio: f64,
    pub bottom_ratio: f64,
    pub left_ratio: f64,
    pub right_ratio: f64,
    pub touches_floor: bool,
    pub touches_ceiling: bool,
    pub touches_left_wall: bool,
    pub touches_right_wall: bool,
}

/// Aggregate over every cabinet in one refinement call
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefinementContext {
    /// Lowest cabinet bottom edge (max bottom ratio)
    pub floor_line: f64,
    /// Highest cabinet top edge (min top ratio)
    pub ceiling_line: f64,
    pub median_width_ratio: f64,
    pub median_height_ratio: f64,
}

/// Fall back to the default frame when the provided size is missing or degenerate
pub fn effective_image_meta(image: Option<ImageMeta>) -> ImageMeta {
    image.filter(ImageMeta::is_valid).unwrap_or(DEFAULT_IMAGE_META)
}

pub fn derive_features(
    detection: &Detection,
    image: ImageMeta,
    options: &RefinementOptions,
) -> FurnitureFeatures {
    let bbox = detection.bbox;
    let width_ratio = bbox.width / image.width;
    let height_ratio = bbox.height / image.height;
    let left_ratio = bbox.x / image.width;
    let right_ratio = bbox.right() / image.width;
    let top_ratio = bbox.y / image.height;
    let bottom_ratio = bbox.bottom() / image.height;
    let (cx, cy) = bbox.center();

    FurnitureFeatures {
        width_ratio,
        height_ratio,
        area_ratio: (bbox.width * bbox.height) / (image.width * image.height),
        aspect_ratio: width_ratio / height_ratio.max(1e-6),
        vertical_aspect: height_ratio / width_ratio.max(1e-6),
        center_x_ratio: cx / image.width,
        center_y_ratio: cy / image.height,
        top_ratio,
        bottom_ratio,
        left_ratio,
        right_ratio,
        touches_floor: bottom_ratio >= 1.0 - options.floor_contact_padding,
        touches_ceiling: top_ratio <= options.ceiling_contact_padding,
        touches_left_wall: left_ratio <= options.edge_contact_threshold,
        touches_right_wall: right_ratio >= 1.0 - options.edge_contact_threshold,
    }
}

/// Build the shared context; an empty slice yields the neutral frame
pub fn compute_context(features: &[FurnitureFeatures]) -> RefinementContext {
    if features.is_empty() {
        return RefinementContext {
            floor_line: 1.0,
            ceiling_line: 0.0,
            median_width_ratio: 0.0,
            median_height_ratio: 0.0,
        };
    }

    let floor_line = features
        .iter()
        .map(|f| f.bottom_ratio)
        .fold(f64::NEG_INFINITY, f64::max);
    let ceiling_line = features
        .iter()
        .map(|f| f.top_ratio)
        .fold(f64::INFINITY, f64::min);
    let widths: Vec<f64> = features.iter().map(|f| f.width_ratio).collect();
    let heights: Vec<f64> = features.iter().map(|f| f.height_ratio).collect();

    RefinementContext {
        floor_line,
        ceiling_line,
        median_width_ratio: median(&widths),
        median_height_ratio: median(&heights),
    }
}

/// Median with the two middle values averaged for even lengths
pub fn median(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::BBox;
    use approx::assert_relative_eq;

    fn cabinet(x: f64, y: f64, w: f64, h: f64) -> Detection {
        Detection::new(BBox::new(x, y, w, h), 0.9, 12)
    }

    #[test]
    fn test_median_even_and_odd() {
        assert_relative_eq!(median(&[3.0, 1.0, 2.0]), 2.0);
        assert_relative_eq!(median(&[4.0, 1.0, 3.0, 2.0]), 2.5);
        assert_relative_eq!(median(&[]), 0.0);
    }

    #[test]
    fn test_features_against_frame() {
        let image = ImageMeta::new(1000.0, 500.0);
        let f = derive_features(
            &cabinet(0.0, 250.0, 200.0, 250.0),
            image,
            &RefinementOptions::default(),
        );
        assert_relative_eq!(f.width_ratio, 0.2);
        assert_relative_eq!(f.height_ratio, 0.5);
        assert_relative_eq!(f.aspect_ratio, 0.4);
        assert_relative_eq!(f.vertical_aspect, 2.5);
        assert_relative_eq!(f.center_y_ratio, 0.75);
        assert!(f.touches_floor);
        assert!(f.touches_left_wall);
        assert!(!f.touches_right_wall);
        assert!(!f.touches_ceiling);
    }

    #[test]
    fn test_context_lines_and_medians() {
        let image = ImageMeta::new(100.0, 100.0);
        let options = RefinementOptions::default();
        let features: Vec<_> = [
            cabinet(0.0, 10.0, 20.0, 30.0),
            cabinet(0.0, 50.0, 40.0, 45.0),
        ]
        .iter()
        .map(|d| derive_features(d, image, &options))
        .collect();

        let ctx = compute_context(&features);
        assert_relative_eq!(ctx.floor_line, 0.95);
        assert_relative_eq!(ctx.ceiling_line, 0.1);
        assert_relative_eq!(ctx.median_width_ratio, 0.3);
        assert_relative_eq!(ctx.median_height_ratio, 0.375);
    }

    #[test]
    fn test_invalid_image_uses_default_frame() {
        assert_eq!(effective_image_meta(None), DEFAULT_IMAGE_META);
        assert_eq!(
            effective_image_meta(Some(ImageMeta::new(0.0, 0.0))),
            DEFAULT_IMAGE_META
        );
        let ok = ImageMeta::new(10.0, 20.0);
        assert_eq!(effective_image_meta(Some(ok)), ok);
    }
}
