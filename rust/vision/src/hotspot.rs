// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Detection-to-hotspot pipeline
//!
//! Model-space detections are mapped back to natural pixels, split into
//! cabinet and non-cabinet sets, refined, ranked and thresholded. When nothing
//! survives the thresholds the best few candidates are kept anyway so the
//! image never ends up without markers.

use crate::config::PipelineConfig;
use crate::projection::Letterbox;
use crate::refine::{refine_cabinet_detections, RefinedDetection};
use crate::taxonomy::{describe_index, is_cabinet_shelf_index, is_furniture_index};
use crate::types::{BBox, Detection, Hotspot, ImageMeta, ProcessedDetections};
use serde::{Deserialize, Serialize};

/// Per-candidate line of the debug payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CandidateSummary {
    pub id: u32,
    pub label: usize,
    pub final_label: Option<String>,
    pub score: Option<f64>,
    pub confidence: Option<f64>,
    pub rank: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabelCount {
    pub label: String,
    pub count: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineDebug {
    /// Detections in natural pixel space, before any filtering
    pub pixel_detections: Vec<Detection>,
    /// Class names dropped by the furniture filter
    pub filtered_out: Vec<String>,
    pub refined_detections: Vec<RefinedDetection>,
    pub debug_candidates: Vec<CandidateSummary>,
    pub label_summary: Vec<LabelCount>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HotspotPipelineResult {
    pub hotspots: Vec<Hotspot>,
    pub image_meta: ImageMeta,
    /// Furniture detections that entered ranking
    pub candidate_count: usize,
    pub cabinet_count: usize,
    pub fallback_triggered: bool,
    pub debug: PipelineDebug,
}

struct Candidate {
    detection: Detection,
    refined: Option<RefinedDetection>,
    rank: f64,
}

impl Candidate {
    fn passes(&self, config: &PipelineConfig) -> bool {
        if self.refined.is_some() {
            self.rank >= config.min_cabinet_confidence
        } else {
            self.rank >= config.min_detection_score
        }
    }
}

/// Map a model-space box to natural pixels, clamped to the image
///
/// `max`/`min` instead of `clamp`: a non-finite image size must not panic.
pub fn model_box_to_natural(bbox: BBox, letterbox: &Letterbox, image: ImageMeta) -> BBox {
    let natural = letterbox.to_natural(bbox);
    let x0 = natural.x.max(0.0).min(image.width);
    let y0 = natural.y.max(0.0).min(image.height);
    let x1 = natural.right().max(0.0).min(image.width);
    let y1 = natural.bottom().max(0.0).min(image.height);
    BBox::new(x0, y0, (x1 - x0).max(1e-3), (y1 - y0).max(1e-3))
}

/// Build the hotspot list for one image
pub fn build_hotspots_pipeline(
    image: ImageMeta,
    inference: &ProcessedDetections,
    config: &PipelineConfig,
) -> HotspotPipelineResult {
    // Without a usable size nothing can be mapped back from model space
    if !image.is_valid() {
        tracing::warn!(
            width = image.width,
            height = image.height,
            detections = inference.detections.len(),
            "skipping hotspots for an image without a valid size"
        );
        return HotspotPipelineResult {
            hotspots: Vec::new(),
            image_meta: image,
            candidate_count: 0,
            cabinet_count: 0,
            fallback_triggered: false,
            debug: PipelineDebug::default(),
        };
    }

    let letterbox = Letterbox::fit(image, config.model_input_size);

    // Step 1: model space -> natural pixels
    let pixel_detections: Vec<Detection> = inference
        .detections
        .iter()
        .map(|det| Detection {
            bbox: model_box_to_natural(det.bbox, &letterbox, image),
            ..det.clone()
        })
        .collect();

    // Step 2: furniture filter
    let mut filtered_out = Vec::new();
    let furniture: Vec<&Detection> = pixel_detections
        .iter()
        .filter(|det| {
            let keep = is_furniture_index(det.label);
            if !keep {
                filtered_out.push(describe_index(Some(det.label)));
            }
            keep
        })
        .collect();

    // Step 3: refine cabinets
    let cabinet_inputs: Vec<Detection> = furniture
        .iter()
        .filter(|det| is_cabinet_shelf_index(det.label))
        .map(|det| (*det).clone())
        .collect();
    let cabinet_count = cabinet_inputs.len();
    let refinement = refine_cabinet_detections(&cabinet_inputs, Some(image), &config.refinement);

    // Step 4: rank, keeping input order
    let mut refined_iter = refinement.refined_detections.iter();
    let mut candidates: Vec<Candidate> = furniture
        .iter()
        .filter_map(|det| {
            if !is_cabinet_shelf_index(det.label) {
                return Some(Candidate {
                    detection: (*det).clone(),
                    refined: None,
                    rank: det.score.unwrap_or(0.0),
                });
            }
            // A cabinet without a refinement result is a detection failure
            let refined = refined_iter.next()?;
            Some(Candidate {
                detection: refined.detection.clone(),
                refined: Some(refined.clone()),
                rank: refined.confidence,
            })
        })
        .collect();
    let candidate_count = candidates.len();

    // Step 5: threshold, with a top-K fallback when nothing passes
    let passed: Vec<Candidate>;
    let fallback_triggered;
    if candidates.iter().any(|c| c.passes(config)) {
        passed = candidates.into_iter().filter(|c| c.passes(config)).collect();
        fallback_triggered = false;
    } else {
        candidates.sort_by(|a, b| b.rank.total_cmp(&a.rank));
        candidates.truncate(config.fallback_max_candidates);
        passed = candidates;
        fallback_triggered = true;
    }

    // Step 6: stable ids and natural-pixel centers
    let hotspots: Vec<Hotspot> = passed
        .iter()
        .enumerate()
        .map(|(idx, candidate)| to_hotspot(idx as u32 + 1, candidate))
        .collect();

    let debug_candidates = passed
        .iter()
        .zip(&hotspots)
        .map(|(candidate, hotspot)| CandidateSummary {
            id: hotspot.id,
            label: hotspot.detection.label,
            final_label: hotspot.final_label.clone(),
            score: hotspot.detection.score,
            confidence: hotspot.confidence,
            rank: candidate.rank,
        })
        .collect();

    HotspotPipelineResult {
        image_meta: image,
        candidate_count,
        cabinet_count,
        fallback_triggered,
        debug: PipelineDebug {
            pixel_detections,
            filtered_out,
            refined_detections: refinement.refined_detections,
            debug_candidates,
            label_summary: label_summary(&hotspots),
        },
        hotspots,
    }
}

fn to_hotspot(id: u32, candidate: &Candidate) -> Hotspot {
    let (cx, cy) = candidate.detection.bbox.center();
    let refined = candidate.refined.as_ref();
    let refined_label_en = refined.map(|r| r.refined_label_en.clone());
    Hotspot {
        id,
        detection: candidate.detection.clone(),
        cx,
        cy,
        refined_label: refined.map(|r| r.refined_label),
        final_label: refined_label_en
            .clone()
            .or_else(|| candidate.detection.class_name.clone()),
        refined_label_en,
        confidence: refined.map(|r| r.confidence),
    }
}

/// Histogram of final labels in first-seen order
fn label_summary(hotspots: &[Hotspot]) -> Vec<LabelCount> {
    let mut summary: Vec<LabelCount> = Vec::new();
    for hotspot in hotspots {
        let label = hotspot
            .final_label
            .clone()
            .unwrap_or_else(|| describe_index(Some(hotspot.detection.label)));
        match summary.iter_mut().find(|entry| entry.label == label) {
            Some(entry) => entry.count += 1,
            None => summary.push(LabelCount { label, count: 1 }),
        }
    }
    summary
}
