// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Browser implementations of the pipeline collaborators

use crate::utils::{is_abort_error, is_security_error, js_message};
use futures_util::future::LocalBoxFuture;
use futures_util::FutureExt;
use houme_vision::decode::RawDetections;
use houme_vision::events::{EventLevel, EventSink};
use houme_vision::host::{ImageLoader, RgbaFrame, SourceImage, Timer};
use houme_vision::model::{
    FetchedModel, InferenceSession, ModelByteCache, ModelSource, SessionFactory,
};
use houme_vision::{Error, ImageMeta, LetterboxedTensor, Result};
use js_sys::{Array, Function, Promise, Uint8Array};
use serde_json::Value;
use wasm_bindgen::prelude::*;
use wasm_bindgen::JsCast;
use wasm_bindgen_futures::JsFuture;
use web_sys::{
    AbortController, AbortSignal, Blob, Cache, CanvasRenderingContext2d, HtmlCanvasElement,
    HtmlImageElement, RequestCredentials, RequestInit, RequestMode, Response, Url, Window,
};

/// Cache Storage bucket holding model binaries
pub const MODEL_CACHE_NAME: &str = "houme-onnx-models-v1";

fn window() -> Result<Window> {
    web_sys::window().ok_or_else(|| Error::ImageLoad("no global window".into()))
}

async fn fetch_response(
    url: &str,
    init: Option<&RequestInit>,
) -> std::result::Result<Response, JsValue> {
    let window = web_sys::window().ok_or_else(|| JsValue::from_str("no global window"))?;
    let request = match init {
        Some(init) => window.fetch_with_str_and_init(url, init),
        None => window.fetch_with_str(url),
    };
    JsFuture::from(request).await?.dyn_into::<Response>()
}

/// Aborts the request when dropped before `disarm`
struct AbortOnDrop(Option<AbortController>);

impl AbortOnDrop {
    fn new() -> Result<Self> {
        AbortController::new()
            .map(|controller| Self(Some(controller)))
            .map_err(|e| Error::ImageLoad(js_message(&e)))
    }

    fn signal(&self) -> Option<AbortSignal> {
        self.0.as_ref().map(AbortController::signal)
    }

    fn disarm(mut self) {
        self.0.take();
    }
}

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        if let Some(controller) = self.0.take() {
            controller.abort();
        }
    }
}

/// A decoded `<img>` element
pub struct HtmlImage {
    element: HtmlImageElement,
    /// Object URL to revoke once the image is dropped
    object_url: Option<String>,
}

impl HtmlImage {
    pub fn new(element: HtmlImageElement) -> Self {
        Self {
            element,
            object_url: None,
        }
    }

    pub fn element(&self) -> &HtmlImageElement {
        &self.element
    }
}

impl Drop for HtmlImage {
    fn drop(&mut self) {
        if let Some(url) = self.object_url.take() {
            let _ = Url::revoke_object_url(&url);
        }
    }
}

impl SourceImage for HtmlImage {
    fn natural_size(&self) -> ImageMeta {
        let width = match self.element.natural_width() {
            0 => self.element.width(),
            w => w,
        };
        let height = match self.element.natural_height() {
            0 => self.element.height(),
            h => h,
        };
        ImageMeta::new(f64::from(width), f64::from(height))
    }

    fn rgba_pixels(&self) -> Result<RgbaFrame> {
        let ImageMeta { width, height } = self.natural_size();
        let (width, height) = (width as u32, height as u32);
        if width == 0 || height == 0 {
            return Err(Error::InvalidImage("image has no pixels yet".into()));
        }

        let document = window()?
            .document()
            .ok_or_else(|| Error::InvalidImage("no document".into()))?;
        let canvas: HtmlCanvasElement = document
            .create_element("canvas")
            .and_then(|el| el.dyn_into::<HtmlCanvasElement>().map_err(JsValue::from))
            .map_err(|e| Error::InvalidImage(js_message(&e)))?;
        canvas.set_width(width);
        canvas.set_height(height);

        let context = canvas
            .get_context("2d")
            .ok()
            .flatten()
            .and_then(|ctx| ctx.dyn_into::<CanvasRenderingContext2d>().ok())
            .ok_or_else(|| Error::InvalidImage("2d context unavailable".into()))?;
        context
            .draw_image_with_html_image_element(&self.element, 0.0, 0.0)
            .map_err(|e| Error::InvalidImage(js_message(&e)))?;

        // Reading back a cross-origin image throws a SecurityError
        let data = context
            .get_image_data(0.0, 0.0, f64::from(width), f64::from(height))
            .map_err(|e| {
                if is_security_error(&e) {
                    Error::Security(js_message(&e))
                } else {
                    Error::InvalidImage(js_message(&e))
                }
            })?;

        Ok(RgbaFrame {
            data: data.data().0,
            width,
            height,
        })
    }
}

/// Loads images through `<img>` elements
#[derive(Debug, Clone, Copy, Default)]
pub struct BrowserImageLoader;

impl BrowserImageLoader {
    async fn decode(element: &HtmlImageElement) -> Result<()> {
        JsFuture::from(element.decode())
            .await
            .map(|_| ())
            .map_err(|e| Error::ImageLoad(js_message(&e)))
    }

    async fn load_direct(url: &str) -> Result<HtmlImage> {
        let element = HtmlImageElement::new().map_err(|e| Error::ImageLoad(js_message(&e)))?;
        element.set_cross_origin(Some("anonymous"));
        element.set_src(url);
        Self::decode(&element).await?;
        Ok(HtmlImage::new(element))
    }

    /// Same-origin copy of a cross-origin image
    ///
    /// Dropping the returned future aborts the request.
    async fn load_blob(url: &str) -> Result<HtmlImage> {
        let abort = AbortOnDrop::new()?;
        let init = RequestInit::new();
        init.set_method("GET");
        init.set_mode(RequestMode::Cors);
        init.set_credentials(RequestCredentials::Omit);
        init.set_signal(abort.signal().as_ref());

        let response = fetch_response(url, Some(&init)).await.map_err(|e| {
            if is_abort_error(&e) {
                Error::Aborted
            } else {
                Error::ImageLoad(js_message(&e))
            }
        })?;
        if !response.ok() {
            return Err(Error::ImageLoad(format!(
                "{} {}",
                response.status(),
                response.status_text()
            )));
        }
        let blob: Blob = response
            .blob()
            .map(JsFuture::from)
            .map_err(|e| Error::ImageLoad(js_message(&e)))?
            .await
            .and_then(|b| b.dyn_into::<Blob>())
            .map_err(|e| {
                if is_abort_error(&e) {
                    Error::Aborted
                } else {
                    Error::ImageLoad(js_message(&e))
                }
            })?;
        abort.disarm();

        let object_url =
            Url::create_object_url_with_blob(&blob).map_err(|e| Error::ImageLoad(js_message(&e)))?;
        let element = HtmlImageElement::new().map_err(|e| Error::ImageLoad(js_message(&e)))?;
        let image = HtmlImage {
            element,
            object_url: Some(object_url.clone()),
        };
        image.element.set_src(&object_url);
        Self::decode(&image.element).await?;
        Ok(image)
    }
}

impl ImageLoader<HtmlImage> for BrowserImageLoader {
    fn load<'a>(&'a self, url: &'a str) -> LocalBoxFuture<'a, Result<HtmlImage>> {
        Self::load_direct(url).boxed_local()
    }

    fn load_via_blob<'a>(&'a self, url: &'a str) -> LocalBoxFuture<'a, Result<HtmlImage>> {
        Self::load_blob(url).boxed_local()
    }
}

/// Epoch clock with `setTimeout` sleeps
///
/// Epoch time keeps cache timestamps comparable across page loads.
#[derive(Debug, Clone, Copy, Default)]
pub struct BrowserTimer;

impl Timer for BrowserTimer {
    fn now_ms(&self) -> f64 {
        js_sys::Date::now()
    }

    fn sleep(&self, ms: u64) -> LocalBoxFuture<'static, ()> {
        let ms = u32::try_from(ms).unwrap_or(u32::MAX);
        gloo_timers::future::TimeoutFuture::new(ms).boxed_local()
    }
}

/// Forwards pipeline events to a JS callback `(name, payload, level)`
///
/// Without a callback, events go to the console.
pub struct JsEventSink {
    callback: Option<Function>,
}

impl JsEventSink {
    pub fn new(callback: Option<Function>) -> Self {
        Self { callback }
    }
}

impl EventSink for JsEventSink {
    fn log_event(&self, name: &str, payload: &Value, level: EventLevel) {
        let payload_js = crate::utils::to_js(payload).unwrap_or(JsValue::NULL);
        if let Some(callback) = &self.callback {
            let args = Array::of3(
                &JsValue::from_str(name),
                &payload_js,
                &JsValue::from_str(level.as_str()),
            );
            if callback.apply(&JsValue::NULL, &args).is_ok() {
                return;
            }
        }
        let label = JsValue::from_str(&format!("[furniture-hotspots] {}", name));
        match level {
            EventLevel::Info => web_sys::console::info_2(&label, &payload_js),
            EventLevel::Warn => web_sys::console::warn_2(&label, &payload_js),
        }
    }
}

/// `fetch()`-backed model source
#[derive(Debug, Clone, Copy, Default)]
pub struct FetchModelSource;

impl ModelSource for FetchModelSource {
    fn fetch<'a>(&'a self, path: &'a str) -> LocalBoxFuture<'a, Result<FetchedModel>> {
        async move {
            let response = fetch_response(path, None)
                .await
                .map_err(|e| Error::ModelFetch(js_message(&e)))?;
            if !response.ok() {
                return Err(Error::ModelFetch(format!(
                    "{} {}",
                    response.status(),
                    response.status_text()
                )));
            }
            let content_type = response.headers().get("content-type").ok().flatten();
            let buffer = response
                .array_buffer()
                .map(JsFuture::from)
                .map_err(|e| Error::ModelFetch(js_message(&e)))?
                .await
                .map_err(|e| Error::ModelFetch(js_message(&e)))?;
            Ok(FetchedModel {
                bytes: Uint8Array::new(&buffer).to_vec(),
                content_type,
            })
        }
        .boxed_local()
    }
}

/// Model bytes persisted in Cache Storage; every failure is swallowed
#[derive(Debug, Clone)]
pub struct CacheStorageModelCache {
    name: String,
}

impl Default for CacheStorageModelCache {
    fn default() -> Self {
        Self::new(MODEL_CACHE_NAME)
    }
}

impl CacheStorageModelCache {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    async fn open(&self) -> Option<Cache> {
        let caches = web_sys::window()?.caches().ok()?;
        JsFuture::from(caches.open(&self.name))
            .await
            .ok()?
            .dyn_into::<Cache>()
            .ok()
    }

    async fn read_bytes(&self, path: &str) -> Option<Vec<u8>> {
        let cache = self.open().await?;
        let hit = JsFuture::from(cache.match_with_str(path)).await.ok()?;
        let response = hit.dyn_into::<Response>().ok()?;
        let buffer = JsFuture::from(response.array_buffer().ok()?).await.ok()?;
        Some(Uint8Array::new(&buffer).to_vec())
    }

    async fn write_bytes(&self, path: &str, bytes: &[u8]) -> Option<()> {
        let cache = self.open().await?;
        let body = Uint8Array::from(bytes);
        let response = Response::new_with_opt_buffer_source(Some(&body)).ok()?;
        JsFuture::from(cache.put_with_str(path, &response)).await.ok()?;
        Some(())
    }

    async fn delete_entry(&self, path: &str) -> Option<()> {
        let cache = self.open().await?;
        JsFuture::from(cache.delete_with_str(path)).await.ok()?;
        Some(())
    }
}

impl ModelByteCache for CacheStorageModelCache {
    fn read<'a>(&'a self, path: &'a str) -> LocalBoxFuture<'a, Option<Vec<u8>>> {
        self.read_bytes(path).boxed_local()
    }

    fn write<'a>(&'a self, path: &'a str, bytes: &'a [u8]) -> LocalBoxFuture<'a, ()> {
        self.write_bytes(path, bytes).map(|_| ()).boxed_local()
    }

    fn delete<'a>(&'a self, path: &'a str) -> LocalBoxFuture<'a, ()> {
        self.delete_entry(path).map(|_| ()).boxed_local()
    }
}

/// Inference session living on the JS side (e.g. onnxruntime-web)
///
/// `run(data: Float32Array, dims: number[])` must resolve to
/// `{ boxes: Float32Array, scores: Float32Array, labels: BigInt64Array }`.
pub struct JsInferenceSession {
    session: JsValue,
    run: Function,
}

impl JsInferenceSession {
    async fn forward(&self, input: &LetterboxedTensor) -> Result<RawDetections> {
        let started = js_sys::Date::now();
        let data = js_sys::Float32Array::from(input.data.as_slice());
        let dims: Array = input
            .shape()
            .iter()
            .map(|d| JsValue::from_f64(*d as f64))
            .collect();

        let promise = self
            .run
            .call2(&self.session, &data, &dims)
            .map_err(|e| Error::Inference(js_message(&e)))?;
        let output = JsFuture::from(Promise::resolve(&promise))
            .await
            .map_err(|e| Error::Inference(js_message(&e)))?;

        let field = |name: &str| {
            js_sys::Reflect::get(&output, &JsValue::from_str(name))
                .ok()
                .filter(|v| !v.is_undefined())
                .ok_or_else(|| Error::MalformedOutput(format!("missing output tensor '{}'", name)))
        };
        let boxes = js_sys::Float32Array::new(&field("boxes")?).to_vec();
        let scores = js_sys::Float32Array::new(&field("scores")?).to_vec();
        let labels = js_sys::BigInt64Array::new(&field("labels")?).to_vec();

        Ok(RawDetections {
            boxes,
            scores,
            labels,
            elapsed_ms: js_sys::Date::now() - started,
        })
    }
}

impl InferenceSession for JsInferenceSession {
    fn run<'a>(
        &'a self,
        input: &'a LetterboxedTensor,
    ) -> LocalBoxFuture<'a, Result<RawDetections>> {
        self.forward(input).boxed_local()
    }
}

/// Builds sessions through a JS `create(bytes: Uint8Array) => Promise<session>`
pub struct JsSessionFactory {
    create: Function,
}

impl JsSessionFactory {
    pub fn new(create: Function) -> Self {
        Self { create }
    }

    async fn build(&self, bytes: Vec<u8>) -> Result<JsInferenceSession> {
        let array = Uint8Array::from(bytes.as_slice());
        let promise = self
            .create
            .call1(&JsValue::NULL, &array)
            .map_err(|e| Error::Session(js_message(&e)))?;
        let session = JsFuture::from(Promise::resolve(&promise))
            .await
            .map_err(|e| Error::Session(js_message(&e)))?;
        let run = js_sys::Reflect::get(&session, &JsValue::from_str("run"))
            .ok()
            .and_then(|f| f.dyn_into::<Function>().ok())
            .ok_or_else(|| Error::Session("session has no run() method".into()))?;
        Ok(JsInferenceSession { session, run })
    }
}

impl SessionFactory for JsSessionFactory {
    type Session = JsInferenceSession;

    fn create(&self, bytes: Vec<u8>) -> LocalBoxFuture<'_, Result<JsInferenceSession>> {
        self.build(bytes).boxed_local()
    }
}

#[cfg(all(test, target_arch = "wasm32"))]
mod tests {
    use super::*;
    use wasm_bindgen_test::*;

    wasm_bindgen_test_configure!(run_in_browser);

    #[wasm_bindgen_test]
    fn test_dropping_the_guard_aborts_the_signal() {
        let guard = AbortOnDrop::new().unwrap();
        let signal = guard.signal().unwrap();
        assert!(!signal.aborted());
        drop(guard);
        assert!(signal.aborted());
    }

    #[wasm_bindgen_test]
    fn test_disarmed_guard_leaves_the_request_alone() {
        let guard = AbortOnDrop::new().unwrap();
        let signal = guard.signal().unwrap();
        guard.disarm();
        assert!(!signal.aborted());
    }
}
