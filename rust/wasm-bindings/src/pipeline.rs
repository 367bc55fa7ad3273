// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Stateful hotspot pipeline for one displayed image plus background prefetch

use crate::browser::{
    BrowserImageLoader, BrowserTimer, CacheStorageModelCache, FetchModelSource, HtmlImage,
    JsEventSink, JsSessionFactory,
};
use crate::cache::DetectionCacheJs;
use crate::utils::{from_js, from_js_opt, to_js, BindingError};
use houme_vision::model::DEFAULT_MODEL_PATH;
use houme_vision::{
    ContainerSize, DebugRect, DetectionCache, DetectionPrefetcher, DisplayRect, EventSink, Hotspot,
    HotspotRunner, ImageMeta, ModelDetector, ModelRegistry, ObjectFit, PipelineConfig,
    PipelineStatus, ProcessedDetections, RenderMetrics, RunOutcome,
};
use js_sys::{Function, Promise};
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::rc::Rc;
use wasm_bindgen::prelude::*;
use wasm_bindgen_futures::spawn_local;
use web_sys::HtmlImageElement;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct StateView<'a> {
    status: PipelineStatus,
    is_loading: bool,
    hotspots: &'a [Hotspot],
    debug_rects: &'a [DebugRect],
    image_meta: Option<ImageMeta>,
    render_metrics: Option<RenderMetrics>,
    container_size: ContainerSize,
    error: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PrefetchImage {
    image_id: u64,
    image_url: String,
}

fn outcome_name(outcome: RunOutcome) -> &'static str {
    match outcome {
        RunOutcome::Skipped => "skipped",
        RunOutcome::Ready => "ready",
        RunOutcome::Failed => "failed",
        RunOutcome::Cancelled => "cancelled",
    }
}

/// Furniture hotspots for the displayed image
///
/// The inference engine stays on the JS side: `createSession(bytes)` must
/// resolve to an object with `run(data, dims)`.
///
/// Example:
/// ```javascript
/// const pipeline = new HotspotPipeline(createSession, (name, payload, level) => log(name, payload));
/// pipeline.setSource(imageUrl, mirrored);
/// pipeline.setContainerSize(container.clientWidth, container.clientHeight);
/// pipeline.measure(img.naturalWidth, img.naturalHeight, displayRect, 'cover');
/// const outcome = await pipeline.run(img);
/// const { hotspots, debugRects } = pipeline.state();
/// ```
#[wasm_bindgen]
pub struct HotspotPipeline {
    config: PipelineConfig,
    model_path: String,
    registry: Rc<ModelRegistry<JsSessionFactory>>,
    sink: Rc<dyn EventSink>,
    cache: Rc<RefCell<DetectionCache>>,
    runner: Rc<HotspotRunner<HtmlImage>>,
    prefetcher: Rc<DetectionPrefetcher<HtmlImage>>,
}

type Registry = ModelRegistry<JsSessionFactory>;

fn detector(
    registry: &Rc<Registry>,
    model_path: &str,
    config: &PipelineConfig,
) -> Rc<ModelDetector<JsSessionFactory>> {
    Rc::new(ModelDetector::new(
        Rc::clone(registry),
        model_path,
        config.model_input_size,
        config.model_min_confidence,
        Rc::new(BrowserTimer),
    ))
}

impl HotspotPipeline {
    /// Rebuild the runner and prefetcher around the current config and cache
    fn rebuild(&mut self) {
        let detector = detector(&self.registry, &self.model_path, &self.config);
        let loader = Rc::new(BrowserImageLoader);
        self.runner = Rc::new(HotspotRunner::new(
            loader.clone(),
            detector.clone(),
            Rc::clone(&self.sink),
            self.config.clone(),
        ));
        self.prefetcher = Rc::new(DetectionPrefetcher::new(
            loader,
            detector,
            Rc::new(BrowserTimer),
            Rc::clone(&self.cache),
            self.config.clone(),
        ));
    }
}

#[wasm_bindgen]
impl HotspotPipeline {
    #[wasm_bindgen(constructor)]
    pub fn new(
        create_session: Function,
        on_event: Option<Function>,
        model_path: Option<String>,
    ) -> HotspotPipeline {
        let config = PipelineConfig::default();
        let model_path = model_path.unwrap_or_else(|| DEFAULT_MODEL_PATH.to_string());
        let registry = Rc::new(
            Registry::new(
                JsSessionFactory::new(create_session),
                Rc::new(FetchModelSource),
            )
            .with_byte_cache(Rc::new(CacheStorageModelCache::default())),
        );
        let sink: Rc<dyn EventSink> = Rc::new(JsEventSink::new(on_event));
        let cache = Rc::new(RefCell::new(DetectionCache::new(
            config.detection_cache_ttl_ms as f64,
        )));

        let detector = detector(&registry, &model_path, &config);
        let loader = Rc::new(BrowserImageLoader);
        Self {
            runner: Rc::new(HotspotRunner::new(
                loader.clone(),
                detector.clone(),
                Rc::clone(&sink),
                config.clone(),
            )),
            prefetcher: Rc::new(DetectionPrefetcher::new(
                loader,
                detector,
                Rc::new(BrowserTimer),
                Rc::clone(&cache),
                config.clone(),
            )),
            config,
            model_path,
            registry,
            sink,
            cache,
        }
    }

    /// Set pipeline configuration from JSON; resets the current image
    #[wasm_bindgen(js_name = setConfig)]
    pub fn set_config(&mut self, config_json: &str) -> Result<(), JsError> {
        let config: PipelineConfig = serde_json::from_str(config_json)
            .map_err(|e| JsError::new(&BindingError::Config(e).to_string()))?;
        self.config = config;
        self.rebuild();
        Ok(())
    }

    /// Get current configuration as JSON
    #[wasm_bindgen(js_name = getConfig)]
    pub fn get_config(&self) -> String {
        serde_json::to_string(&self.config).unwrap_or_else(|_| "{}".to_string())
    }

    /// Shared detection cache (the same store the prefetcher fills)
    #[wasm_bindgen(getter)]
    pub fn cache(&self) -> DetectionCacheJs {
        DetectionCacheJs::from_shared(Rc::clone(&self.cache))
    }

    /// Replace the detection cache, e.g. one restored with `DetectionCache.fromJson`
    #[wasm_bindgen(js_name = useCache)]
    pub fn use_cache(&mut self, cache: &DetectionCacheJs) {
        self.cache = cache.shared();
        self.rebuild();
    }

    #[wasm_bindgen(js_name = setSource)]
    pub fn set_source(&self, image_url: &str, mirrored: bool) {
        self.runner.set_source(image_url, mirrored);
    }

    /// Detections computed earlier for the current source (`null` clears)
    #[wasm_bindgen(js_name = setPrefetched)]
    pub fn set_prefetched(&self, detections: JsValue) -> Result<(), JsError> {
        let detections: Option<ProcessedDetections> = from_js_opt(detections, "detections")?;
        self.runner.set_prefetched(detections);
        Ok(())
    }

    #[wasm_bindgen(js_name = setContainerSize)]
    pub fn set_container_size(&self, width: f64, height: f64) {
        self.runner.set_container_size(ContainerSize::new(width, height));
    }

    #[wasm_bindgen(js_name = setRenderMetrics)]
    pub fn set_render_metrics(&self, metrics: JsValue) -> Result<(), JsError> {
        let metrics: Option<RenderMetrics> = from_js_opt(metrics, "renderMetrics")?;
        self.runner.set_render_metrics(metrics);
        Ok(())
    }

    /// Measure the displayed `<img>` box (relative to the container)
    #[wasm_bindgen]
    pub fn measure(
        &self,
        natural_width: f64,
        natural_height: f64,
        display_rect: JsValue,
        fit: Option<String>,
    ) -> Result<(), JsError> {
        let display: DisplayRect = from_js(display_rect, "displayRect")?;
        let fit: ObjectFit = match fit {
            Some(fit) => from_js(JsValue::from_str(&fit), "fit")?,
            None => ObjectFit::default(),
        };
        self.runner
            .measure(ImageMeta::new(natural_width, natural_height), display, fit);
        Ok(())
    }

    /// Clear hotspots and cancel pending work
    #[wasm_bindgen]
    pub fn reset(&self) {
        self.runner.reset();
    }

    /// Register `(detections, hotspots) => void`, called after each completed run
    #[wasm_bindgen(js_name = onComplete)]
    pub fn on_complete(&self, callback: Option<Function>) {
        let Some(callback) = callback else {
            self.runner.set_on_complete(None);
            return;
        };
        let forward = move |detections: &ProcessedDetections, hotspots: &[Hotspot]| {
            let detections = to_js(detections).unwrap_or(JsValue::NULL);
            let hotspots = to_js(hotspots).unwrap_or(JsValue::NULL);
            if let Err(e) = callback.call2(&JsValue::NULL, &detections, &hotspots) {
                web_sys::console::warn_2(&"[furniture-hotspots] onComplete threw".into(), &e);
            }
        };
        self.runner.set_on_complete(Some(Box::new(forward)));
    }

    /// Detect furniture on the displayed image
    ///
    /// Resolves to `"ready"`, `"failed"`, `"cancelled"` or `"skipped"`.
    #[wasm_bindgen]
    pub fn run(&self, image: HtmlImageElement) -> Promise {
        let runner = Rc::clone(&self.runner);
        Promise::new(&mut |resolve, reject| {
            let runner = Rc::clone(&runner);
            let image = HtmlImage::new(image.clone());
            let reject = reject.clone();
            spawn_local(async move {
                let outcome = runner.run(&image).await;
                let outcome = JsValue::from_str(outcome_name(outcome));
                if let Err(e) = resolve.call1(&JsValue::NULL, &outcome) {
                    let _ = reject.call1(&JsValue::NULL, &e);
                }
            });
        })
    }

    /// Current projected hotspots, debug rects and status
    #[wasm_bindgen]
    pub fn state(&self) -> Result<JsValue, JsError> {
        let state = self.runner.state();
        to_js(&StateView {
            status: state.status,
            is_loading: self.runner.is_loading(),
            hotspots: &state.projected_hotspots,
            debug_rects: &state.debug_rects,
            image_meta: state.image_meta,
            render_metrics: state.render_metrics,
            container_size: state.container_size,
            error: state.error.as_ref().map(ToString::to_string),
        })
    }

    /// Fetch the model and create its session ahead of the first run
    #[wasm_bindgen]
    pub fn preload(&self) -> Promise {
        let detector = detector(&self.registry, &self.model_path, &self.config);
        Promise::new(&mut |resolve, reject| {
            let detector = Rc::clone(&detector);
            let reject = reject.clone();
            spawn_local(async move {
                match detector.preload().await {
                    Ok(()) => {
                        let _ = resolve.call0(&JsValue::NULL);
                    }
                    Err(e) => {
                        let err = JsValue::from(BindingError::Pipeline(e));
                        let _ = reject.call1(&JsValue::NULL, &err);
                    }
                }
            });
        })
    }

    /// Queue images (`[{ imageId, imageUrl }]`) for background detection
    ///
    /// Resolves to the number of accepted images once the queue is drained.
    #[wasm_bindgen]
    pub fn prefetch(&self, images: JsValue) -> Result<Promise, JsError> {
        let images: Vec<PrefetchImage> = from_js(images, "images")?;
        let accepted = self
            .prefetcher
            .schedule_all(images.iter().map(|img| (img.image_id, img.image_url.as_str())));
        let prefetcher = Rc::clone(&self.prefetcher);
        Ok(Promise::new(&mut |resolve, _reject| {
            let prefetcher = Rc::clone(&prefetcher);
            spawn_local(async move {
                prefetcher.drain().await;
                let _ = resolve.call1(&JsValue::NULL, &JsValue::from_f64(accepted as f64));
            });
        }))
    }

    /// Detect one image now; resolves to its cache entry or `null`
    #[wasm_bindgen(js_name = prefetchNow)]
    pub fn prefetch_now(&self, image_id: u64, image_url: String) -> Promise {
        let prefetcher = Rc::clone(&self.prefetcher);
        Promise::new(&mut |resolve, reject| {
            let prefetcher = Rc::clone(&prefetcher);
            let image_url = image_url.clone();
            let reject = reject.clone();
            spawn_local(async move {
                let entry = prefetcher.prefetch_now(image_id, &image_url).await;
                let value = match entry.as_ref().map(to_js).transpose() {
                    Ok(value) => value.unwrap_or(JsValue::NULL),
                    Err(e) => {
                        let _ = reject.call1(&JsValue::NULL, &JsValue::from(e));
                        return;
                    }
                };
                if let Err(e) = resolve.call1(&JsValue::NULL, &value) {
                    let _ = reject.call1(&JsValue::NULL, &e);
                }
            });
        })
    }
}
