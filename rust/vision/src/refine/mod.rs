// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Cabinet subtype refinement
//!
//! The detector only knows a coarse `Cabinet/shelf` class. This pass scores each
//! cabinet box against six subtypes using its geometry relative to the image and
//! to the other cabinets in the same frame, then normalizes the scores into a
//! probability distribution.

pub mod features;
pub mod rules;

pub use features::{FurnitureFeatures, RefinementContext};

use crate::taxonomy::{is_cabinet_shelf_index, CabinetSubtype};
use crate::types::{Detection, ImageMeta};
use features::{compute_context, derive_features, effective_image_meta};
use rules::{clamp01, score_subtype, SUBTYPE_RULES};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Score used for detections that carry no confidence
const NEUTRAL_DETECTION_SCORE: f64 = 0.5;

/// Tunable constants of the refinement engine
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RefinementOptions {
    pub detection_score_exponent: f64,
    /// Prior mass for "could be anything", folded into `storageCabinet`
    pub ambiguous_prior: f64,
    pub min_category_floor: f64,
    pub floor_contact_padding: f64,
    pub ceiling_contact_padding: f64,
    pub edge_contact_threshold: f64,
}

impl Default for RefinementOptions {
    fn default() -> Self {
        Self {
            detection_score_exponent: 0.7,
            ambiguous_prior: 0.12,
            min_category_floor: 1e-4,
            floor_contact_padding: 0.08,
            ceiling_contact_padding: 0.04,
            edge_contact_threshold: 0.04,
        }
    }
}

/// Cabinet detection with its subtype decision and diagnostics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefinedDetection {
    #[serde(flatten)]
    pub detection: Detection,
    pub refined_label: CabinetSubtype,
    pub refined_label_en: String,
    /// Korean display label of the subtype
    pub refined_label_ko: String,
    /// Best probability scaled by the detection's base score
    pub confidence: f64,
    pub probabilities: BTreeMap<CabinetSubtype, f64>,
    pub features: FurnitureFeatures,
    pub contributions: BTreeMap<CabinetSubtype, BTreeMap<String, f64>>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefinementOutput {
    pub refined_detections: Vec<RefinedDetection>,
    pub context: Option<RefinementContext>,
}

/// Refine every `Cabinet/shelf` detection in `detections`
///
/// Other classes are ignored. An input without cabinets yields an empty output
/// with no context.
pub fn refine_cabinet_detections(
    detections: &[Detection],
    image: Option<ImageMeta>,
    options: &RefinementOptions,
) -> RefinementOutput {
    let cabinets: Vec<&Detection> = detections
        .iter()
        .filter(|d| is_cabinet_shelf_index(d.label))
        .collect();

    if cabinets.is_empty() {
        return RefinementOutput::default();
    }

    let image = effective_image_meta(image);
    let feature_list: Vec<FurnitureFeatures> = cabinets
        .iter()
        .map(|d| derive_features(d, image, options))
        .collect();
    let context = compute_context(&feature_list);

    let refined_detections = cabinets
        .into_iter()
        .zip(&feature_list)
        .map(|(detection, features)| refine_single(detection, features, &context, options))
        .collect();

    RefinementOutput {
        refined_detections,
        context: Some(context),
    }
}

/// `max(score, 1e-3) ^ exponent`, with a neutral score when absent
pub fn base_score(score: Option<f64>, options: &RefinementOptions) -> f64 {
    score
        .unwrap_or(NEUTRAL_DETECTION_SCORE)
        .max(1e-3)
        .powf(options.detection_score_exponent)
}

fn refine_single(
    detection: &Detection,
    features: &FurnitureFeatures,
    context: &RefinementContext,
    options: &RefinementOptions,
) -> RefinedDetection {
    let base = base_score(detection.score, options);

    let mut raws: Vec<(CabinetSubtype, f64)> = Vec::with_capacity(SUBTYPE_RULES.len());
    let mut contributions = BTreeMap::new();
    for (subtype, rules) in SUBTYPE_RULES {
        let (score, partials) = score_subtype(rules, features, context, options);
        raws.push((*subtype, (score * base).max(0.0)));
        contributions.insert(
            *subtype,
            partials
                .into_iter()
                .map(|(name, value)| (name.to_string(), value))
                .collect(),
        );
    }

    let floor = options.min_category_floor;
    let ambiguous = (options.ambiguous_prior * (1.0 - base)).max(0.0);
    let total: f64 =
        raws.iter().map(|(_, raw)| raw).sum::<f64>() + ambiguous + floor * raws.len() as f64;

    let mut probabilities = BTreeMap::new();
    let mut best = (raws[0].0, f64::NEG_INFINITY);
    for (subtype, raw) in &raws {
        let prior = if *subtype == CabinetSubtype::StorageCabinet {
            ambiguous
        } else {
            0.0
        };
        let probability = (raw + floor + prior) / total;
        probabilities.insert(*subtype, probability);
        // First maximum wins
        if probability > best.1 {
            best = (*subtype, probability);
        }
    }

    let (refined_label, best_probability) = best;
    let mut detection = detection.clone();
    detection.class_name = Some(refined_label.label_en().to_string());

    RefinedDetection {
        detection,
        refined_label,
        refined_label_en: refined_label.label_en().to_string(),
        refined_label_ko: refined_label.label_ko().to_string(),
        confidence: clamp01(best_probability * base),
        probabilities,
        features: *features,
        contributions,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::BBox;
    use approx::assert_relative_eq;

    fn cabinet(bbox: BBox, score: Option<f64>) -> Detection {
        Detection {
            bbox,
            score,
            label: 12,
            class_name: None,
        }
    }

    #[test]
    fn test_empty_input_has_no_context() {
        let out = refine_cabinet_detections(&[], None, &RefinementOptions::default());
        assert!(out.refined_detections.is_empty());
        assert!(out.context.is_none());
    }

    #[test]
    fn test_non_cabinet_classes_are_ignored() {
        let bed = Detection::new(BBox::new(0.0, 0.0, 100.0, 100.0), 0.9, 75);
        let out = refine_cabinet_detections(&[bed], None, &RefinementOptions::default());
        assert!(out.refined_detections.is_empty());
        assert!(out.context.is_none());
    }

    #[test]
    fn test_base_cabinet_touching_floor() {
        // bottom ratio 0.95, height ratio 0.35 on a 1536x1024 frame
        let image = ImageMeta::new(1536.0, 1024.0);
        let det = cabinet(BBox::new(200.0, 614.4, 384.0, 358.4), Some(0.9));
        let out = refine_cabinet_detections(&[det], Some(image), &RefinementOptions::default());

        let refined = &out.refined_detections[0];
        assert_eq!(refined.refined_label, CabinetSubtype::LowerCabinet);
        assert_eq!(refined.detection.class_name.as_deref(), Some("base cabinet"));
        assert_eq!(refined.refined_label_en, "base cabinet");
        assert_eq!(refined.refined_label_ko, "하부장");

        let lower = refined.probabilities[&CabinetSubtype::LowerCabinet];
        for (subtype, p) in &refined.probabilities {
            if *subtype != CabinetSubtype::LowerCabinet {
                assert!(lower > *p, "{} should trail lowerCabinet", subtype);
            }
        }
    }

    #[test]
    fn test_probabilities_sum_to_one_and_confidence_bounded() {
        let options = RefinementOptions::default();
        let boxes = [
            BBox::new(0.0, 0.0, 1e-3, 1e-3),
            BBox::new(0.0, 0.0, 1536.0, 1024.0),
            BBox::new(700.0, 20.0, 120.0, 200.0),
            BBox::new(10.0, 100.0, 300.0, 900.0),
            BBox::new(1400.0, 800.0, 1e-3, 200.0),
        ];
        let scores = [None, Some(0.0), Some(0.2), Some(0.75), Some(1.0)];
        let detections: Vec<_> = boxes
            .iter()
            .zip(scores)
            .map(|(b, s)| cabinet(*b, s))
            .collect();

        let out = refine_cabinet_detections(&detections, None, &options);
        assert_eq!(out.refined_detections.len(), detections.len());
        for refined in &out.refined_detections {
            let sum: f64 = refined.probabilities.values().sum();
            assert_relative_eq!(sum, 1.0, epsilon = 1e-9);
            assert_eq!(refined.probabilities.len(), 6);
            assert!((0.0..=1.0).contains(&refined.confidence));
            assert_eq!(refined.contributions.len(), 6);
        }
    }

    #[test]
    fn test_missing_score_uses_neutral_base() {
        let options = RefinementOptions::default();
        assert_relative_eq!(base_score(None, &options), 0.5f64.powf(0.7));
        assert_relative_eq!(base_score(Some(0.0), &options), 1e-3f64.powf(0.7));
    }

    #[test]
    fn test_low_score_shifts_mass_to_storage() {
        let options = RefinementOptions::default();
        let bbox = BBox::new(600.0, 400.0, 200.0, 300.0);
        let confident = refine_cabinet_detections(&[cabinet(bbox, Some(1.0))], None, &options);
        let unsure = refine_cabinet_detections(&[cabinet(bbox, Some(0.05))], None, &options);
        let storage = CabinetSubtype::StorageCabinet;
        assert!(
            unsure.refined_detections[0].probabilities[&storage]
                > confident.refined_detections[0].probabilities[&storage]
        );
    }

    #[test]
    fn test_context_reported() {
        let options = RefinementOptions::default();
        let image = ImageMeta::new(100.0, 100.0);
        let detections = [
            cabinet(BBox::new(0.0, 10.0, 20.0, 30.0), Some(0.8)),
            cabinet(BBox::new(50.0, 50.0, 40.0, 45.0), Some(0.8)),
        ];
        let out = refine_cabinet_detections(&detections, Some(image), &options);
        let ctx = out.context.unwrap();
        assert_relative_eq!(ctx.floor_line, 0.95);
        assert_relative_eq!(ctx.ceiling_line, 0.1);
    }
}
