// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Memoized model loading
//!
//! Concurrent callers for the same path share one in-flight load. A failed load
//! clears its slot so the next caller retries from scratch.

use super::binary::{ensure_binary_content_type, ensure_model_binary};
use super::{InferenceSession, ModelByteCache, ModelSource, SessionFactory};
use crate::error::Result;
use crate::limiter::ConcurrencyLimiter;
use futures::future::{LocalBoxFuture, Shared};
use futures::FutureExt;
use rustc_hash::FxHashMap;
use std::cell::{Cell, RefCell};
use std::rc::Rc;

/// A created session plus the queue that serializes its forward passes
pub struct LoadedModel<S> {
    session: S,
    queue: ConcurrencyLimiter,
}

impl<S: InferenceSession> LoadedModel<S> {
    fn new(session: S) -> Self {
        Self {
            session,
            queue: ConcurrencyLimiter::new(1),
        }
    }

    pub fn session(&self) -> &S {
        &self.session
    }

    pub fn queue(&self) -> &ConcurrencyLimiter {
        &self.queue
    }
}

type LoadFuture<S> = Shared<LocalBoxFuture<'static, Result<Rc<LoadedModel<S>>>>>;

enum Slot<S> {
    Loading { generation: u64, load: LoadFuture<S> },
    Ready(Rc<LoadedModel<S>>),
}

pub struct ModelRegistry<F: SessionFactory> {
    factory: Rc<F>,
    source: Rc<dyn ModelSource>,
    cache: Option<Rc<dyn ModelByteCache>>,
    slots: RefCell<FxHashMap<String, Slot<F::Session>>>,
    next_generation: Cell<u64>,
}

impl<F: SessionFactory + 'static> ModelRegistry<F> {
    pub fn new(factory: F, source: Rc<dyn ModelSource>) -> Self {
        Self {
            factory: Rc::new(factory),
            source,
            cache: None,
            slots: RefCell::new(FxHashMap::default()),
            next_generation: Cell::new(0),
        }
    }

    /// Persist fetched binaries and try them before the network
    pub fn with_byte_cache(mut self, cache: Rc<dyn ModelByteCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn is_loaded(&self, path: &str) -> bool {
        matches!(self.slots.borrow().get(path), Some(Slot::Ready(_)))
    }

    /// Forget a model; an in-flight load for it finishes without being stored
    pub fn evict(&self, path: &str) {
        self.slots.borrow_mut().remove(path);
    }

    /// Load `path`, joining an in-flight load when there is one
    pub async fn load(&self, path: &str) -> Result<Rc<LoadedModel<F::Session>>> {
        let (generation, load) = {
            let mut slots = self.slots.borrow_mut();
            match slots.get(path) {
                Some(Slot::Ready(model)) => return Ok(Rc::clone(model)),
                Some(Slot::Loading { generation, load }) => (*generation, load.clone()),
                None => {
                    let generation = self.next_generation.get();
                    self.next_generation.set(generation + 1);
                    let load = self.start_load(path).shared();
                    slots.insert(
                        path.to_string(),
                        Slot::Loading {
                            generation,
                            load: load.clone(),
                        },
                    );
                    (generation, load)
                }
            }
        };

        let result = load.await;

        let mut slots = self.slots.borrow_mut();
        let current = matches!(
            slots.get(path),
            Some(Slot::Loading { generation: g, .. }) if *g == generation
        );
        if current {
            match &result {
                Ok(model) => {
                    slots.insert(path.to_string(), Slot::Ready(Rc::clone(model)));
                }
                Err(err) => {
                    tracing::warn!(path, error = %err, "model load failed");
                    slots.remove(path);
                }
            }
        }
        result
    }

    fn start_load(
        &self,
        path: &str,
    ) -> LocalBoxFuture<'static, Result<Rc<LoadedModel<F::Session>>>> {
        let factory = Rc::clone(&self.factory);
        let source = Rc::clone(&self.source);
        let cache = self.cache.clone();
        let path = path.to_string();
        async move {
            let bytes = fetch_model_bytes(source.as_ref(), cache.as_deref(), &path).await?;
            tracing::info!(path = %path, size = bytes.len(), "creating inference session");
            let session = factory.create(bytes).await?;
            Ok(Rc::new(LoadedModel::new(session)))
        }
        .boxed_local()
    }
}

/// Cached bytes when they look valid, otherwise a validated network fetch
pub async fn fetch_model_bytes(
    source: &dyn ModelSource,
    cache: Option<&dyn ModelByteCache>,
    path: &str,
) -> Result<Vec<u8>> {
    if let Some(cache) = cache {
        if let Some(bytes) = cache.read(path).await {
            match ensure_model_binary(&bytes) {
                Ok(()) => return Ok(bytes),
                Err(err) => {
                    tracing::warn!(path, error = %err, "dropping cached model binary");
                    cache.delete(path).await;
                }
            }
        }
    }

    let fetched = source.fetch(path).await?;
    ensure_binary_content_type(fetched.content_type.as_deref())?;
    ensure_model_binary(&fetched.bytes)?;

    if let Some(cache) = cache {
        cache.write(path, &fetched.bytes).await;
    }
    Ok(fetched.bytes)
}
