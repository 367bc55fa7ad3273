// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Detector model loading and execution
//!
//! The inference engine itself is a host collaborator ([`SessionFactory`] /
//! [`InferenceSession`]). This module owns everything around it: fetching and
//! validating the model binary, the persistent byte cache, memoized loading
//! and per-model serialization of forward passes.

pub mod binary;
pub mod registry;

pub use binary::{ensure_binary_content_type, ensure_model_binary};
pub use registry::{LoadedModel, ModelRegistry};

use crate::decode::{decode_detections, RawDetections};
use crate::error::Result;
use crate::host::{InferenceRunner, SourceImage, Timer};
use crate::preprocess::{letterbox_tensor, LetterboxedTensor};
use crate::types::ProcessedDetections;
use futures::future::LocalBoxFuture;
use futures::FutureExt;
use std::rc::Rc;

/// Default location of the Objects365 detector
pub const DEFAULT_MODEL_PATH: &str = "/models/dfine_s_obj365.onnx";

/// Model body plus the response content type, if any
#[derive(Debug, Clone, PartialEq)]
pub struct FetchedModel {
    pub bytes: Vec<u8>,
    pub content_type: Option<String>,
}

/// Network access to model binaries
pub trait ModelSource {
    fn fetch<'a>(&'a self, path: &'a str) -> LocalBoxFuture<'a, Result<FetchedModel>>;
}

/// Persistent byte cache that survives reloads
///
/// Best effort: implementations swallow their own failures.
pub trait ModelByteCache {
    fn read<'a>(&'a self, path: &'a str) -> LocalBoxFuture<'a, Option<Vec<u8>>>;
    fn write<'a>(&'a self, path: &'a str, bytes: &'a [u8]) -> LocalBoxFuture<'a, ()>;
    fn delete<'a>(&'a self, path: &'a str) -> LocalBoxFuture<'a, ()>;
}

/// One loaded model; not safe for concurrent forward passes
pub trait InferenceSession {
    fn run<'a>(&'a self, input: &'a LetterboxedTensor) -> LocalBoxFuture<'a, Result<RawDetections>>;
}

pub trait SessionFactory {
    type Session: InferenceSession + 'static;

    /// Build a session from validated model bytes
    fn create(&self, bytes: Vec<u8>) -> LocalBoxFuture<'_, Result<Self::Session>>;
}

/// [`InferenceRunner`] backed by a registry-managed model
pub struct ModelDetector<F: SessionFactory> {
    registry: Rc<ModelRegistry<F>>,
    model_path: String,
    input_size: u32,
    min_confidence: f64,
    timer: Rc<dyn Timer>,
}

impl<F: SessionFactory + 'static> ModelDetector<F> {
    pub fn new(
        registry: Rc<ModelRegistry<F>>,
        model_path: impl Into<String>,
        input_size: u32,
        min_confidence: f64,
        timer: Rc<dyn Timer>,
    ) -> Self {
        Self {
            registry,
            model_path: model_path.into(),
            input_size,
            min_confidence,
            timer,
        }
    }

    pub fn model_path(&self) -> &str {
        &self.model_path
    }

    /// Start (or join) the model load without running anything
    pub async fn preload(&self) -> Result<()> {
        self.registry.load(&self.model_path).await.map(|_| ())
    }

    async fn detect<I: SourceImage>(&self, image: &I) -> Result<ProcessedDetections> {
        let model = self.registry.load(&self.model_path).await?;
        let _turn = model.queue().acquire().await;

        let started = self.timer.now_ms();
        let frame = image.rgba_pixels()?;
        let tensor = letterbox_tensor(&frame.data, frame.width, frame.height, self.input_size)?;
        let raw = model.session().run(&tensor).await?;
        let detections = decode_detections(&raw, self.min_confidence)?;

        tracing::debug!(
            kept = detections.len(),
            raw = raw.scores.len(),
            "decoded model output"
        );
        Ok(ProcessedDetections {
            detections,
            inference_time: self.timer.now_ms() - started,
        })
    }
}

impl<F, I> InferenceRunner<I> for ModelDetector<F>
where
    F: SessionFactory + 'static,
    I: SourceImage,
{
    fn run_inference<'a>(
        &'a self,
        image: &'a I,
    ) -> LocalBoxFuture<'a, Result<ProcessedDetections>> {
        self.detect(image).boxed_local()
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::error::Error;
    use rustc_hash::FxHashMap;
    use std::cell::{Cell, RefCell};

    pub struct FakeSource {
        pub body: RefCell<Vec<u8>>,
        pub content_type: Option<String>,
        pub fail: Cell<bool>,
        pub fetches: Cell<usize>,
    }

    impl FakeSource {
        pub fn binary() -> Self {
            Self {
                body: RefCell::new(vec![0x08, 0x07, 0x12, 0x00, 0x42]),
                content_type: Some("application/octet-stream".into()),
                fail: Cell::new(false),
                fetches: Cell::new(0),
            }
        }
    }

    impl ModelSource for FakeSource {
        fn fetch<'a>(&'a self, _path: &'a str) -> LocalBoxFuture<'a, Result<FetchedModel>> {
            async move {
                self.fetches.set(self.fetches.get() + 1);
                tokio::task::yield_now().await;
                if self.fail.get() {
                    return Err(Error::ModelFetch("503 Service Unavailable".into()));
                }
                Ok(FetchedModel {
                    bytes: self.body.borrow().clone(),
                    content_type: self.content_type.clone(),
                })
            }
            .boxed_local()
        }
    }

    #[derive(Default)]
    pub struct MemoryCache {
        pub entries: RefCell<FxHashMap<String, Vec<u8>>>,
        pub deletes: Cell<usize>,
    }

    impl ModelByteCache for MemoryCache {
        fn read<'a>(&'a self, path: &'a str) -> LocalBoxFuture<'a, Option<Vec<u8>>> {
            let hit = self.entries.borrow().get(path).cloned();
            async move { hit }.boxed_local()
        }

        fn write<'a>(&'a self, path: &'a str, bytes: &'a [u8]) -> LocalBoxFuture<'a, ()> {
            self.entries
                .borrow_mut()
                .insert(path.to_string(), bytes.to_vec());
            async {}.boxed_local()
        }

        fn delete<'a>(&'a self, path: &'a str) -> LocalBoxFuture<'a, ()> {
            self.entries.borrow_mut().remove(path);
            self.deletes.set(self.deletes.get() + 1);
            async {}.boxed_local()
        }
    }

    /// Session replaying one raw output and tracking overlapping runs
    pub struct FakeSession {
        pub raw: RawDetections,
        pub active: Rc<Cell<usize>>,
        pub max_active: Rc<Cell<usize>>,
    }

    impl InferenceSession for FakeSession {
        fn run<'a>(
            &'a self,
            input: &'a LetterboxedTensor,
        ) -> LocalBoxFuture<'a, Result<RawDetections>> {
            async move {
                assert_eq!(input.shape()[1], 3);
                self.active.set(self.active.get() + 1);
                self.max_active
                    .set(self.max_active.get().max(self.active.get()));
                tokio::task::yield_now().await;
                self.active.set(self.active.get() - 1);
                Ok(self.raw.clone())
            }
            .boxed_local()
        }
    }

    pub struct FakeFactory {
        pub raw: RawDetections,
        pub creates: Cell<usize>,
        pub fail: Cell<bool>,
        pub max_active: Rc<Cell<usize>>,
    }

    impl FakeFactory {
        pub fn new(raw: RawDetections) -> Self {
            Self {
                raw,
                creates: Cell::new(0),
                fail: Cell::new(false),
                max_active: Rc::new(Cell::new(0)),
            }
        }
    }

    impl SessionFactory for FakeFactory {
        type Session = FakeSession;

        fn create(&self, _bytes: Vec<u8>) -> LocalBoxFuture<'_, Result<FakeSession>> {
            async move {
                self.creates.set(self.creates.get() + 1);
                if self.fail.get() {
                    return Err(Error::Session("unsupported opset".into()));
                }
                Ok(FakeSession {
                    raw: self.raw.clone(),
                    active: Rc::new(Cell::new(0)),
                    max_active: Rc::clone(&self.max_active),
                })
            }
            .boxed_local()
        }
    }
}
