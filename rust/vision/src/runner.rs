// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Async orchestration of one displayed image
//!
//! [`HotspotRunner`] ties the collaborators to the reducer: it admits at most
//! one run per `(image_url, mirrored)` source, falls back to a same-origin blob
//! load when the displayed image is cross-origin tainted, and re-projects the
//! hotspots whenever the layout changes. Completions that arrive after the
//! source changed are dropped.

use crate::config::PipelineConfig;
use crate::error::{Error, Result};
use crate::events::{EventSink, HotspotLogger};
use crate::hotspot::{build_hotspots_pipeline, HotspotPipelineResult};
use crate::host::{ImageLoader, InferenceRunner, SourceImage};
use crate::projection::{compute_render_metrics, project_hotspots, ObjectFit, Projection};
use crate::state::{HotspotAction, HotspotState, HotspotStore, PipelineStatus, RunGuard, RunTicket};
use crate::types::{
    ContainerSize, DisplayRect, Hotspot, ImageMeta, ProcessedDetections, RenderMetrics,
};
use futures::future::{AbortHandle, Abortable};
use serde_json::{json, Value};
use std::cell::RefCell;
use std::rc::Rc;

/// Number of items included in event samples
const SAMPLE_LIMIT: usize = 5;

/// Called with the raw inference result and the hotspots built from it
pub type CompletionCallback = Box<dyn Fn(&ProcessedDetections, &[Hotspot])>;

/// How a call to [`HotspotRunner::run`] ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// No source, already done, or another run in flight
    Skipped,
    Ready,
    Failed,
    /// Aborted or overtaken by a source change
    Cancelled,
}

enum Attempt {
    Finished(HotspotPipelineResult),
    Stale,
}

pub struct HotspotRunner<I: SourceImage> {
    loader: Rc<dyn ImageLoader<I>>,
    runner: Rc<dyn InferenceRunner<I>>,
    config: PipelineConfig,
    logger: RefCell<HotspotLogger>,
    store: RefCell<HotspotStore>,
    guard: RefCell<RunGuard>,
    image_url: RefCell<Option<String>>,
    prefetched: RefCell<Option<ProcessedDetections>>,
    blob_abort: RefCell<Option<AbortHandle>>,
    on_complete: RefCell<Option<Rc<dyn Fn(&ProcessedDetections, &[Hotspot])>>>,
}

impl<I: SourceImage> HotspotRunner<I> {
    pub fn new(
        loader: Rc<dyn ImageLoader<I>>,
        runner: Rc<dyn InferenceRunner<I>>,
        sink: Rc<dyn EventSink>,
        config: PipelineConfig,
    ) -> Self {
        let logger = HotspotLogger::new(sink, false);
        Self {
            loader,
            runner,
            config,
            store: RefCell::new(HotspotStore::new(logger.clone())),
            logger: RefCell::new(logger),
            guard: RefCell::new(RunGuard::default()),
            image_url: RefCell::new(None),
            prefetched: RefCell::new(None),
            blob_abort: RefCell::new(None),
            on_complete: RefCell::new(None),
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Snapshot of the current state; arrays are shared, not copied
    pub fn state(&self) -> HotspotState {
        self.store.borrow().state().clone()
    }

    pub fn is_loading(&self) -> bool {
        matches!(
            self.store.borrow().state().status,
            PipelineStatus::Loading | PipelineStatus::Processing
        )
    }

    pub fn set_on_complete(&self, callback: Option<CompletionCallback>) {
        *self.on_complete.borrow_mut() = callback.map(Rc::from);
    }

    /// Switch to a new source; a change resets the pipeline and cancels pending work
    pub fn set_source(&self, image_url: &str, mirrored: bool) {
        let changed = self.guard.borrow_mut().set_source(image_url, mirrored);
        if !changed {
            return;
        }
        *self.image_url.borrow_mut() = Some(image_url.to_string());
        *self.prefetched.borrow_mut() = None;
        let logger = self.logger.borrow().with_mirrored(mirrored);
        self.store.borrow_mut().set_logger(logger.clone());
        *self.logger.borrow_mut() = logger;
        self.cancel_blob_load();
        self.dispatch(HotspotAction::PipelineReset);
    }

    /// Detections computed elsewhere for the current source
    pub fn set_prefetched(&self, detections: Option<ProcessedDetections>) {
        *self.prefetched.borrow_mut() = detections;
    }

    /// Drop everything, e.g. when hotspots are disabled
    pub fn reset(&self) {
        self.guard.borrow_mut().invalidate();
        self.cancel_blob_load();
        self.dispatch(HotspotAction::PipelineReset);
    }

    pub fn set_render_metrics(&self, metrics: Option<RenderMetrics>) {
        self.dispatch(HotspotAction::SetRenderMetrics(metrics));
        self.reproject();
    }

    /// Measure the displayed image element and store the resulting metrics
    pub fn measure(&self, natural: ImageMeta, display: DisplayRect, fit: ObjectFit) {
        self.set_render_metrics(compute_render_metrics(natural, display, fit));
    }

    pub fn set_container_size(&self, size: ContainerSize) {
        self.dispatch(HotspotAction::SetContainerSize(size));
        self.reproject();
    }

    /// Detect furniture on the displayed image
    pub async fn run(&self, image: &I) -> RunOutcome {
        let Some(ticket) = self.guard.borrow_mut().try_begin() else {
            return RunOutcome::Skipped;
        };
        self.dispatch(HotspotAction::InferenceStarted);

        let prefetched = self.prefetched.borrow().clone();
        let attempt = match prefetched {
            Some(detections) => {
                self.logger().info("inference-cache-hit", json!({}));
                Ok(Attempt::Finished(self.complete(image.natural_size(), &detections)))
            }
            None => self.execute(ticket, image, "inference-start").await,
        };

        let outcome = match attempt {
            Ok(Attempt::Finished(_)) => RunOutcome::Ready,
            Ok(Attempt::Stale) => RunOutcome::Cancelled,
            Err(err) => self.recover(ticket, err).await,
        };
        self.guard
            .borrow_mut()
            .finish(ticket, outcome == RunOutcome::Ready);
        outcome
    }

    async fn recover(&self, ticket: RunTicket, err: Error) -> RunOutcome {
        if !self.is_current(ticket) {
            return RunOutcome::Cancelled;
        }
        // Cancellation is silent
        if err.is_abort() {
            return RunOutcome::Cancelled;
        }
        let logger = self.logger();
        logger.warn(
            "inference-error-detail",
            json!({ "name": err.name(), "message": err.to_string() }),
        );

        if !err.is_security() {
            logger.warn("inference-failed", json!({ "error": err.to_string() }));
            self.dispatch(HotspotAction::PipelineError(Some(err)));
            return RunOutcome::Failed;
        }

        let Some(image_url) = self.image_url.borrow().clone() else {
            return RunOutcome::Cancelled;
        };
        let blob_image = match self.load_blob(&image_url).await {
            Ok(image) => image,
            Err(err) if err.is_abort() => return RunOutcome::Cancelled,
            Err(_) if !self.is_current(ticket) => return RunOutcome::Cancelled,
            Err(err) => {
                logger.warn("cors-image-unavailable", json!({ "error": err.to_string() }));
                self.dispatch(HotspotAction::PipelineError(Some(err)));
                return RunOutcome::Failed;
            }
        };
        if !self.is_current(ticket) {
            return RunOutcome::Cancelled;
        }

        match self.execute(ticket, &blob_image, "cors-inference-start").await {
            Ok(Attempt::Finished(_)) => RunOutcome::Ready,
            Ok(Attempt::Stale) => RunOutcome::Cancelled,
            Err(err) if err.is_abort() || !self.is_current(ticket) => RunOutcome::Cancelled,
            Err(err) => {
                logger.warn("inference-retry-failed", json!({ "error": err.to_string() }));
                self.dispatch(HotspotAction::PipelineError(Some(err)));
                RunOutcome::Failed
            }
        }
    }

    /// Blob fallback load, cancelled by the next source change
    async fn load_blob(&self, image_url: &str) -> Result<I> {
        self.cancel_blob_load();
        let (handle, registration) = AbortHandle::new_pair();
        *self.blob_abort.borrow_mut() = Some(handle);
        let loaded = Abortable::new(self.loader.load_via_blob(image_url), registration).await;
        self.blob_abort.borrow_mut().take();
        loaded?
    }

    async fn execute(&self, ticket: RunTicket, image: &I, event: &str) -> Result<Attempt> {
        let natural = image.natural_size();
        self.logger().info(
            event,
            json!({ "naturalWidth": natural.width, "naturalHeight": natural.height }),
        );

        let detections = self.runner.run_inference(image).await?;
        if !self.is_current(ticket) {
            tracing::debug!("discarding detections for a replaced source");
            return Ok(Attempt::Stale);
        }

        let samples = &detections.detections[..detections.detections.len().min(SAMPLE_LIMIT)];
        self.logger().info(
            "raw-detections",
            json!({ "totalDetections": detections.detections.len(), "samples": samples }),
        );
        Ok(Attempt::Finished(self.complete(natural, &detections)))
    }

    fn complete(
        &self,
        natural: ImageMeta,
        detections: &ProcessedDetections,
    ) -> HotspotPipelineResult {
        let result = self.process_detections(natural, detections);
        // Released before the call so the callback may replace itself
        let callback = self.on_complete.borrow().clone();
        if let Some(callback) = callback {
            callback(detections, &result.hotspots);
        }
        result
    }

    fn process_detections(
        &self,
        natural: ImageMeta,
        detections: &ProcessedDetections,
    ) -> HotspotPipelineResult {
        let result = build_hotspots_pipeline(natural, detections, &self.config);
        let logger = self.logger();
        let debug = &result.debug;

        let pixel_samples: Vec<Value> = debug
            .pixel_detections
            .iter()
            .take(SAMPLE_LIMIT)
            .map(|det| {
                json!({
                    "id": det.label,
                    "bbox": det.bbox,
                    "score": det.score,
                    "className": det.class_name,
                })
            })
            .collect();
        logger.info(
            "pixel-detections",
            json!({ "totalDetections": debug.pixel_detections.len(), "samples": pixel_samples }),
        );

        if !debug.filtered_out.is_empty() {
            logger.info(
                "filtered-out-labels",
                json!({ "dropped": debug.filtered_out, "allowedCount": result.candidate_count }),
            );
        }

        if !debug.refined_detections.is_empty() {
            let refined_samples: Vec<Value> = debug
                .refined_detections
                .iter()
                .take(SAMPLE_LIMIT)
                .map(|det| {
                    json!({
                        "id": det.detection.label,
                        "refinedLabel": det.refined_label,
                        "refinedLabelKo": det.refined_label_ko,
                        "confidence": det.confidence,
                        "bbox": det.detection.bbox,
                    })
                })
                .collect();
            logger.info(
                "refine-detections",
                json!({
                    "totalDetections": debug.refined_detections.len(),
                    "samples": refined_samples,
                }),
            );
        }

        if result.fallback_triggered {
            logger.warn(
                "furniture-cabinet-refine-miss",
                json!({ "cabinetCount": result.cabinet_count }),
            );
        }

        logger.info(
            "hotspot-candidates",
            json!({ "totalCandidates": result.candidate_count, "items": debug.debug_candidates }),
        );
        logger.info(
            "label-summary",
            json!({ "count": debug.label_summary.len(), "labels": debug.label_summary }),
        );

        self.dispatch(HotspotAction::HotspotsReady {
            hotspots: result.hotspots.clone(),
            image_meta: result.image_meta,
        });
        self.reproject();
        result
    }

    /// Project the current hotspots onto the current layout
    ///
    /// Nothing happens before the first hotspot set arrives. Without render
    /// metrics the projection is empty.
    fn reproject(&self) {
        let (projection, image_meta, container, metrics) = {
            let store = self.store.borrow();
            let state = store.state();
            let Some(image_meta) = state.image_meta else {
                return;
            };
            if state.status == PipelineStatus::Loading {
                return;
            }
            let projection = match &state.render_metrics {
                Some(metrics) => project_hotspots(
                    &state.hotspots,
                    metrics,
                    state.container_size,
                    self.logger.borrow().mirrored(),
                ),
                None => Projection::default(),
            };
            (projection, image_meta, state.container_size, state.render_metrics)
        };

        if !projection.projected_hotspots.is_empty() {
            let samples: Vec<Value> = projection
                .projected_hotspots
                .iter()
                .take(SAMPLE_LIMIT)
                .map(|item| {
                    json!({
                        "id": item.id,
                        "cx": item.cx,
                        "cy": item.cy,
                        "bbox": item.detection.bbox,
                    })
                })
                .collect();
            self.logger().info(
                "projected-hotspots",
                json!({
                    "containerSize": container,
                    "imageMeta": image_meta,
                    "renderMetrics": metrics,
                    "samples": samples,
                }),
            );
        }
        self.dispatch(HotspotAction::ProjectedReady(projection));
    }

    fn dispatch(&self, action: HotspotAction) {
        self.store.borrow_mut().dispatch(action);
    }

    fn logger(&self) -> HotspotLogger {
        self.logger.borrow().clone()
    }

    fn is_current(&self, ticket: RunTicket) -> bool {
        self.guard.borrow().is_current(ticket)
    }

    fn cancel_blob_load(&self) {
        if let Some(handle) = self.blob_abort.borrow_mut().take() {
            handle.abort();
        }
    }
}
