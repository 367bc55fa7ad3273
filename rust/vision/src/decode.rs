// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Model output decoding
//!
//! The detector emits flat `boxes` (`x0, y0, x1, y1` per row, in model space),
//! `scores` and one-based `labels`. Decoding applies the score cut, label
//! normalization and the furniture filter; nothing downstream sees other classes.

use crate::error::{Error, Result};
use crate::taxonomy::{class_name, is_furniture_index, normalize_label};
use crate::types::{BBox, Detection};
use serde::{Deserialize, Serialize};

/// Smallest box side kept after decoding
const MIN_BOX_SIDE: f64 = 1e-3;

/// Raw tensors of one forward pass
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawDetections {
    pub boxes: Vec<f32>,
    pub scores: Vec<f32>,
    pub labels: Vec<i64>,
    /// Forward-pass wall time (milliseconds)
    #[serde(default)]
    pub elapsed_ms: f64,
}

/// Turn raw tensors into furniture detections
pub fn decode_detections(raw: &RawDetections, min_confidence: f64) -> Result<Vec<Detection>> {
    let count = raw.scores.len();
    if raw.boxes.len() != count * 4 {
        return Err(Error::MalformedOutput(format!(
            "expected {} box values for {} scores, got {}",
            count * 4,
            count,
            raw.boxes.len()
        )));
    }
    if raw.labels.len() != count {
        return Err(Error::MalformedOutput(format!(
            "expected {} labels, got {}",
            count,
            raw.labels.len()
        )));
    }

    let detections = raw
        .scores
        .iter()
        .zip(raw.boxes.chunks_exact(4))
        .zip(&raw.labels)
        .filter(|((score, _), _)| **score as f64 > min_confidence)
        .filter_map(|((score, corners), label)| {
            let index = normalize_label(*label).filter(|idx| is_furniture_index(*idx))?;
            let [x0, y0, x1, y1] = [corners[0], corners[1], corners[2], corners[3]].map(f64::from);
            Some(Detection {
                bbox: BBox::new(
                    x0.min(x1),
                    y0.min(y1),
                    (x1 - x0).abs().max(MIN_BOX_SIDE),
                    (y1 - y0).abs().max(MIN_BOX_SIDE),
                ),
                score: Some(f64::from(*score)),
                label: index,
                class_name: class_name(index).map(str::to_string),
            })
        })
        .collect();

    Ok(detections)
}
