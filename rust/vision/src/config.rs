// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Pipeline configuration

use crate::refine::RefinementOptions;
use serde::{Deserialize, Serialize};

/// Configuration for the detection-to-hotspot pipeline
///
/// Partial JSON is merged over the defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PipelineConfig {
    /// Square model input edge (pixels)
    pub model_input_size: u32,
    /// Raw score cut applied while decoding model output
    pub model_min_confidence: f64,
    /// Rank threshold for non-cabinet detections
    pub min_detection_score: f64,
    /// Rank threshold for refined cabinet detections
    pub min_cabinet_confidence: f64,
    /// Candidates kept when nothing passes the thresholds
    pub fallback_max_candidates: usize,
    /// Lifetime of a cached detection result (milliseconds)
    pub detection_cache_ttl_ms: u64,
    /// Pause between background prefetch tasks (milliseconds)
    pub prefetch_cooldown_ms: u64,
    /// Background prefetch tasks allowed to run at once
    pub prefetch_concurrency: usize,
    pub refinement: RefinementOptions,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            model_input_size: 640,
            model_min_confidence: 0.5,
            min_detection_score: 0.5,
            min_cabinet_confidence: 0.2,
            fallback_max_candidates: 3,
            detection_cache_ttl_ms: 30 * 60 * 1000,
            prefetch_cooldown_ms: 120,
            prefetch_concurrency: 1,
            refinement: RefinementOptions::default(),
        }
    }
}
