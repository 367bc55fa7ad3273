// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Furniture detection and interactive hotspots for generated interior images
//!
//! This crate provides the client-side pipeline behind furniture hotspots:
//! 1. Decoding Objects365 detector output (letterboxed model space)
//! 2. Refining generic "Cabinet/shelf" detections into six cabinet subtypes
//! 3. Ranking, thresholding and fallback selection of hotspot candidates
//! 4. Projecting hotspots onto the displayed image (object-fit, mirroring)
//! 5. Resolving hotspots into purchasable category codes and server category ids
//!
//! Browser access (image loading, the inference engine, fetch, storage) is
//! injected through the traits in [`host`] and [`model`], so everything here
//! runs natively in tests and on `wasm32-unknown-unknown`.
//!
//! # Usage
//!
//! ```rust,ignore
//! use houme_vision::{build_hotspots_pipeline, compute_render_metrics, project_hotspots};
//!
//! let result = build_hotspots_pipeline(image_meta, &detections, &PipelineConfig::default());
//! let metrics = compute_render_metrics(image_meta, display_rect, ObjectFit::Cover)?;
//! let projection = project_hotspots(&result.hotspots, &metrics, container, mirrored);
//! ```

pub mod cache;
pub mod category;
pub mod config;
pub mod decode;
pub mod error;
pub mod events;
pub mod host;
pub mod hotspot;
pub mod limiter;
pub mod model;
pub mod prefetch;
pub mod preprocess;
pub mod projection;
pub mod refine;
pub mod runner;
pub mod state;
pub mod taxonomy;
pub mod types;

// Re-export commonly used types and functions
pub use cache::{DetectionCache, DetectionCacheEntry};
pub use category::{
    build_detected_code_to_category_id, detection_signature, map_hotspots_to_detected_codes,
    resolve_category_id_for_hotspot, resolve_furniture_code, resolve_furniture_codes,
    select_display_hotspots, FurnitureCodeQuery, ServerCategory,
};
pub use config::PipelineConfig;
pub use decode::{decode_detections, RawDetections};
pub use error::{Error, Result};
pub use events::{EventLevel, EventSink, HotspotLogger, NullSink, TracingSink};
pub use host::{ImageLoader, InferenceRunner, RgbaFrame, SourceImage, Timer};
pub use hotspot::{build_hotspots_pipeline, HotspotPipelineResult};
pub use limiter::ConcurrencyLimiter;
pub use model::{ModelDetector, ModelRegistry};
pub use prefetch::DetectionPrefetcher;
pub use preprocess::{letterbox_tensor, LetterboxedTensor};
pub use projection::{compute_render_metrics, project_hotspots, Letterbox, ObjectFit, Projection};
pub use refine::{refine_cabinet_detections, RefinedDetection, RefinementOptions, RefinementOutput};
pub use runner::{HotspotRunner, RunOutcome};
pub use state::{reduce, HotspotAction, HotspotState, HotspotStore, PipelineStatus};
pub use taxonomy::{to_furniture_category_code, CabinetSubtype, FurnitureCategoryCode};
pub use types::{
    BBox, ContainerSize, DebugRect, Detection, DisplayRect, Hotspot, ImageMeta,
    ProcessedDetections, RenderMetrics,
};
