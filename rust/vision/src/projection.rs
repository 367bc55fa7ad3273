// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Coordinate transforms between model, natural and screen space
//!
//! Model space is the square letterboxed input (640x640 by default). Natural
//! space is the source image's pixel grid. Screen space is the hotspot
//! container's client box.

use crate::types::{
    BBox, ContainerSize, DebugRect, DisplayRect, Hotspot, ImageMeta, RenderMetrics,
};
use serde::{Deserialize, Serialize};

/// Aspect-preserving fit of an image into the square model input
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Letterbox {
    pub input_size: f64,
    pub scale: f64,
    pub pad_x: f64,
    pub pad_y: f64,
}

impl Letterbox {
    pub fn fit(image: ImageMeta, input_size: u32) -> Self {
        let input = input_size as f64;
        let scale = (input / image.width).min(input / image.height);
        Self {
            input_size: input,
            scale,
            pad_x: (input - image.width * scale) / 2.0,
            pad_y: (input - image.height * scale) / 2.0,
        }
    }

    /// Model-space box to natural pixels
    pub fn to_natural(&self, bbox: BBox) -> BBox {
        BBox::new(
            (bbox.x - self.pad_x) / self.scale,
            (bbox.y - self.pad_y) / self.scale,
            bbox.width / self.scale,
            bbox.height / self.scale,
        )
    }

    /// Natural-pixel box to model space
    pub fn to_model(&self, bbox: BBox) -> BBox {
        BBox::new(
            bbox.x * self.scale + self.pad_x,
            bbox.y * self.scale + self.pad_y,
            bbox.width * self.scale,
            bbox.height * self.scale,
        )
    }
}

/// CSS `object-fit` of the displayed image element
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ObjectFit {
    #[default]
    Cover,
    Contain,
}

/// Describe how the natural image is drawn inside the container
///
/// Returns `None` until both the image and its displayed box have a size.
pub fn compute_render_metrics(
    image: ImageMeta,
    display: DisplayRect,
    fit: ObjectFit,
) -> Option<RenderMetrics> {
    if !image.is_valid() || display.width <= 0.0 || display.height <= 0.0 {
        return None;
    }

    let scale_x = display.width / image.width;
    let scale_y = display.height / image.height;
    let scale = match fit {
        ObjectFit::Cover => scale_x.max(scale_y),
        ObjectFit::Contain => scale_x.min(scale_y),
    };
    let width = image.width * scale;
    let height = image.height * scale;

    Some(RenderMetrics {
        offset_x: display.left + (display.width - width) / 2.0,
        offset_y: display.top + (display.height - height) / 2.0,
        scale_x: scale,
        scale_y: scale,
        width,
        height,
    })
}

/// Projected copies of the hotspots plus their outlines, both in screen space
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Projection {
    pub projected_hotspots: Vec<Hotspot>,
    pub debug_rects: Vec<DebugRect>,
}

/// Map natural-pixel hotspots onto the container
///
/// With `mirrored` the image is flipped horizontally, so every x is reflected
/// across the container width.
pub fn project_hotspots(
    hotspots: &[Hotspot],
    metrics: &RenderMetrics,
    container: ContainerSize,
    mirrored: bool,
) -> Projection {
    let mut projection = Projection {
        projected_hotspots: Vec::with_capacity(hotspots.len()),
        debug_rects: Vec::with_capacity(hotspots.len()),
    };

    for hotspot in hotspots {
        let displayed_x = metrics.offset_x + hotspot.cx * metrics.scale_x;
        let cy = metrics.offset_y + hotspot.cy * metrics.scale_y;
        let cx = if mirrored {
            container.width - displayed_x
        } else {
            displayed_x
        };

        let bbox = hotspot.detection.bbox;
        let width = bbox.width * metrics.scale_x;
        let height = bbox.height * metrics.scale_y;
        let box_left = metrics.offset_x + bbox.x * metrics.scale_x;
        let left = if mirrored {
            container.width - (box_left + width)
        } else {
            box_left
        };

        projection.debug_rects.push(DebugRect {
            id: hotspot.id,
            left,
            top: metrics.offset_y + bbox.y * metrics.scale_y,
            width,
            height,
            label: hotspot.final_label.clone(),
        });
        projection.projected_hotspots.push(Hotspot {
            cx,
            cy,
            ..hotspot.clone()
        });
    }

    projection
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Detection;
    use approx::assert_relative_eq;

    fn hotspot_at(cx: f64, cy: f64) -> Hotspot {
        Hotspot {
            id: 1,
            detection: Detection::new(BBox::new(cx - 10.0, cy - 10.0, 20.0, 20.0), 0.9, 75),
            cx,
            cy,
            refined_label: None,
            refined_label_en: None,
            final_label: Some("Bed".into()),
            confidence: None,
        }
    }

    #[test]
    fn test_letterbox_landscape() {
        let lb = Letterbox::fit(ImageMeta::new(1536.0, 1024.0), 640);
        assert_relative_eq!(lb.scale, 640.0 / 1536.0);
        assert_relative_eq!(lb.pad_x, 0.0);
        assert_relative_eq!(lb.pad_y, (640.0 - 1024.0 * 640.0 / 1536.0) / 2.0);
    }

    #[test]
    fn test_letterbox_round_trip() {
        let images = [
            ImageMeta::new(1536.0, 1024.0),
            ImageMeta::new(800.0, 1200.0),
            ImageMeta::new(333.0, 333.0),
        ];
        let boxes = [
            BBox::new(0.0, 0.0, 640.0, 640.0),
            BBox::new(12.5, 300.25, 48.0, 90.75),
            BBox::new(600.0, 100.0, 1e-3, 1e-3),
        ];
        for image in images {
            let lb = Letterbox::fit(image, 640);
            for bbox in boxes {
                let back = lb.to_model(lb.to_natural(bbox));
                assert_relative_eq!(back.x, bbox.x, epsilon = 1e-9);
                assert_relative_eq!(back.y, bbox.y, epsilon = 1e-9);
                assert_relative_eq!(back.width, bbox.width, epsilon = 1e-9);
                assert_relative_eq!(back.height, bbox.height, epsilon = 1e-9);
            }
        }
    }

    #[test]
    fn test_cover_crops_and_centers() {
        let metrics = compute_render_metrics(
            ImageMeta::new(1536.0, 1024.0),
            DisplayRect {
                left: 0.0,
                top: 0.0,
                width: 400.0,
                height: 400.0,
            },
            ObjectFit::Cover,
        )
        .unwrap();
        assert_relative_eq!(metrics.scale_x, 400.0 / 1024.0);
        assert_relative_eq!(metrics.height, 400.0);
        assert_relative_eq!(metrics.width, 600.0);
        assert_relative_eq!(metrics.offset_x, -100.0);
        assert_relative_eq!(metrics.offset_y, 0.0);
    }

    #[test]
    fn test_contain_letterboxes() {
        let metrics = compute_render_metrics(
            ImageMeta::new(1536.0, 1024.0),
            DisplayRect {
                left: 10.0,
                top: 0.0,
                width: 300.0,
                height: 300.0,
            },
            ObjectFit::Contain,
        )
        .unwrap();
        assert_relative_eq!(metrics.width, 300.0);
        assert_relative_eq!(metrics.height, 200.0);
        assert_relative_eq!(metrics.offset_x, 10.0);
        assert_relative_eq!(metrics.offset_y, 50.0);
    }

    #[test]
    fn test_metrics_need_sizes() {
        let display = DisplayRect {
            left: 0.0,
            top: 0.0,
            width: 0.0,
            height: 300.0,
        };
        let metrics = compute_render_metrics(ImageMeta::new(10.0, 10.0), display, ObjectFit::Cover);
        assert!(metrics.is_none());
    }

    #[test]
    fn test_mirrored_projection_reflects_x() {
        let metrics = RenderMetrics {
            offset_x: 0.0,
            offset_y: 0.0,
            scale_x: 0.5,
            scale_y: 0.5,
            width: 400.0,
            height: 300.0,
        };
        let container = ContainerSize::new(400.0, 300.0);
        let hotspots = [hotspot_at(200.0, 100.0)];

        let plain = project_hotspots(&hotspots, &metrics, container, false);
        let mirrored = project_hotspots(&hotspots, &metrics, container, true);

        assert_relative_eq!(plain.projected_hotspots[0].cx, 100.0);
        assert_relative_eq!(mirrored.projected_hotspots[0].cx, 400.0 - 100.0);
        assert_relative_eq!(mirrored.projected_hotspots[0].cy, 50.0);

        // outline stays around the reflected anchor
        let rect = &mirrored.debug_rects[0];
        assert_relative_eq!(rect.left + rect.width / 2.0, 300.0);
        assert_eq!(rect.label.as_deref(), Some("Bed"));
    }
}
