// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Background detection for images the user has not opened yet
//!
//! Requests are queued by image id and processed under a shared concurrency
//! limit. Results land in the [`DetectionCache`]; failures are logged and
//! dropped.

use crate::cache::{DetectionCache, DetectionCacheEntry};
use crate::category::map_hotspots_to_detected_codes;
use crate::config::PipelineConfig;
use crate::error::Result;
use crate::hotspot::build_hotspots_pipeline;
use crate::host::{ImageLoader, InferenceRunner, SourceImage, Timer};
use crate::limiter::ConcurrencyLimiter;
use futures::channel::oneshot;
use futures::stream::{FuturesUnordered, StreamExt};
use rustc_hash::FxHashSet;
use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::Rc;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrefetchRequest {
    pub image_id: u64,
    pub image_url: String,
}

pub struct DetectionPrefetcher<I: SourceImage> {
    loader: Rc<dyn ImageLoader<I>>,
    runner: Rc<dyn InferenceRunner<I>>,
    timer: Rc<dyn Timer>,
    cache: Rc<RefCell<DetectionCache>>,
    config: PipelineConfig,
    limiter: ConcurrencyLimiter,
    queue: RefCell<VecDeque<PrefetchRequest>>,
    /// Ids that are queued or in flight
    pending: RefCell<FxHashSet<u64>>,
    draining: Cell<bool>,
    /// Callers of `drain` waiting on the running drain
    drain_waiters: RefCell<Vec<oneshot::Sender<()>>>,
}

/// Ends a drain; waiters are released, or woken to take over if the drain was dropped
struct DrainGuard<'a> {
    draining: &'a Cell<bool>,
    waiters: &'a RefCell<Vec<oneshot::Sender<()>>>,
    completed: bool,
}

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        self.draining.set(false);
        let waiters = std::mem::take(&mut *self.waiters.borrow_mut());
        if self.completed {
            for waiter in waiters {
                let _ = waiter.send(());
            }
        }
    }
}

impl<I: SourceImage> DetectionPrefetcher<I> {
    pub fn new(
        loader: Rc<dyn ImageLoader<I>>,
        runner: Rc<dyn InferenceRunner<I>>,
        timer: Rc<dyn Timer>,
        cache: Rc<RefCell<DetectionCache>>,
        config: PipelineConfig,
    ) -> Self {
        let limiter = ConcurrencyLimiter::new(config.prefetch_concurrency);
        Self {
            loader,
            runner,
            timer,
            cache,
            config,
            limiter,
            queue: RefCell::new(VecDeque::new()),
            pending: RefCell::new(FxHashSet::default()),
            draining: Cell::new(false),
            drain_waiters: RefCell::new(Vec::new()),
        }
    }

    pub fn cache(&self) -> &Rc<RefCell<DetectionCache>> {
        &self.cache
    }

    pub fn queued(&self) -> usize {
        self.queue.borrow().len()
    }

    pub fn is_pending(&self, image_id: u64) -> bool {
        self.pending.borrow().contains(&image_id)
    }

    /// Queue one image; returns whether it was accepted
    pub fn schedule(&self, image_id: u64, image_url: &str) -> bool {
        if image_id == 0 || image_url.is_empty() || self.is_pending(image_id) {
            return false;
        }
        let now = self.timer.now_ms();
        if self.cache.borrow().is_fresh(image_id, image_url, now) {
            return false;
        }
        self.pending.borrow_mut().insert(image_id);
        self.queue.borrow_mut().push_back(PrefetchRequest {
            image_id,
            image_url: image_url.to_string(),
        });
        true
    }

    pub fn schedule_all<'a>(&self, images: impl IntoIterator<Item = (u64, &'a str)>) -> usize {
        images
            .into_iter()
            .filter(|(id, url)| self.schedule(*id, url))
            .count()
    }

    /// Process the queue until it is empty
    ///
    /// Requests scheduled while draining are picked up by the running drain. A
    /// concurrent call waits for that drain to finish.
    pub async fn drain(&self) {
        while self.draining.replace(true) {
            let (tx, rx) = oneshot::channel();
            self.drain_waiters.borrow_mut().push(tx);
            if rx.await.is_ok() {
                return;
            }
            // The running drain was dropped; try to take over
        }

        let mut guard = DrainGuard {
            draining: &self.draining,
            waiters: &self.drain_waiters,
            completed: false,
        };
        let mut in_flight = FuturesUnordered::new();
        loop {
            while let Some(request) = self.next_request() {
                in_flight.push(self.process(request));
            }
            if in_flight.next().await.is_none() {
                break;
            }
        }
        guard.completed = true;
    }

    /// Detect one image right away, sharing the limit with the background queue
    ///
    /// Returns the cached entry when it is still fresh. Skips the cooldown.
    pub async fn prefetch_now(
        &self,
        image_id: u64,
        image_url: &str,
    ) -> Option<DetectionCacheEntry> {
        let now = self.timer.now_ms();
        if let Some(entry) = self.cache.borrow_mut().get(image_id, image_url, now) {
            return Some(entry.clone());
        }
        let _permit = self.limiter.acquire().await;
        match self.detect(image_url).await {
            Ok(entry) => {
                self.cache.borrow_mut().save(image_id, entry.clone());
                Some(entry)
            }
            Err(err) => {
                tracing::warn!(image_id, error = %err, "immediate detection failed");
                None
            }
        }
    }

    fn next_request(&self) -> Option<PrefetchRequest> {
        self.queue.borrow_mut().pop_front()
    }

    async fn process(&self, request: PrefetchRequest) {
        let PrefetchRequest {
            image_id,
            image_url,
        } = request;
        {
            let _permit = self.limiter.acquire().await;
            let now = self.timer.now_ms();
            let fresh = self.cache.borrow().is_fresh(image_id, &image_url, now);
            if !fresh {
                match self.detect(&image_url).await {
                    Ok(entry) => {
                        tracing::debug!(
                            image_id,
                            hotspots = entry.hotspots.len(),
                            "prefetched detections"
                        );
                        self.cache.borrow_mut().save(image_id, entry);
                    }
                    Err(err) => {
                        tracing::warn!(image_id, error = %err, "detection prefetch failed");
                    }
                }
                if self.config.prefetch_cooldown_ms > 0 {
                    self.timer.sleep(self.config.prefetch_cooldown_ms).await;
                }
            }
        }
        self.pending.borrow_mut().remove(&image_id);
    }

    async fn detect(&self, image_url: &str) -> Result<DetectionCacheEntry> {
        let image = match self.loader.load(image_url).await {
            Ok(image) => image,
            Err(err) if err.is_abort() => return Err(err),
            Err(err) => {
                tracing::debug!(error = %err, "direct image load failed, fetching blob");
                self.loader.load_via_blob(image_url).await?
            }
        };
        let image_meta = image.natural_size();

        let processed = match self.runner.run_inference(&image).await {
            Err(err) if err.is_security() => {
                let image = self.loader.load_via_blob(image_url).await?;
                self.runner.run_inference(&image).await?
            }
            other => other?,
        };

        let result = build_hotspots_pipeline(image_meta, &processed, &self.config);
        let detected_codes = map_hotspots_to_detected_codes(&result.hotspots);
        Ok(DetectionCacheEntry {
            image_url: image_url.to_string(),
            processed_detections: processed,
            hotspots: result.hotspots,
            detected_codes: Some(detected_codes),
            updated_at: self.timer.now_ms(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::host::testing::{FakeImage, FakeLoader, FakeRunner, FakeTimer};
    use crate::taxonomy::FurnitureCategoryCode;
    use crate::types::{BBox, Detection, ImageMeta, ProcessedDetections};
    use futures::future::join;

    struct Fixture {
        loader: Rc<FakeLoader>,
        runner: Rc<FakeRunner>,
        timer: Rc<FakeTimer>,
        prefetcher: DetectionPrefetcher<FakeImage>,
    }

    fn bed() -> ProcessedDetections {
        ProcessedDetections {
            detections: vec![Detection::new(BBox::new(100.0, 200.0, 300.0, 150.0), 0.9, 75)],
            inference_time: 20.0,
        }
    }

    fn fixture(loader: FakeLoader, results: Vec<Result<ProcessedDetections>>) -> Fixture {
        let loader = Rc::new(loader);
        let runner = Rc::new(FakeRunner::new(results));
        let timer = Rc::new(FakeTimer::at(1_000.0));
        let prefetcher = DetectionPrefetcher::new(
            loader.clone(),
            runner.clone(),
            timer.clone(),
            Rc::new(RefCell::new(DetectionCache::default())),
            PipelineConfig::default(),
        );
        Fixture {
            loader,
            runner,
            timer,
            prefetcher,
        }
    }

    fn loader() -> FakeLoader {
        FakeLoader::new(ImageMeta::new(1280.0, 640.0))
    }

    #[test]
    fn test_schedule_dedupes_and_skips() {
        let f = fixture(loader(), vec![]);
        assert!(f.prefetcher.schedule(1, "a.png"));
        assert!(!f.prefetcher.schedule(1, "a.png"));
        assert!(!f.prefetcher.schedule(0, "b.png"));
        assert!(!f.prefetcher.schedule(2, ""));
        assert_eq!(f.prefetcher.queued(), 1);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn test_drain_fills_cache() {
        let f = fixture(loader(), vec![Ok(bed()), Ok(bed())]);
        assert_eq!(f.prefetcher.schedule_all([(1, "a.png"), (2, "b.png")]), 2);

        f.prefetcher.drain().await;

        let mut cache = f.prefetcher.cache().borrow_mut();
        let entry = cache.get(1, "a.png", 1_000.0).unwrap();
        assert_eq!(entry.hotspots.len(), 1);
        assert_eq!(entry.detected_codes, Some(vec![FurnitureCategoryCode::Single]));
        assert!(cache.get(2, "b.png", 1_000.0).is_some());
        drop(cache);

        assert_eq!(*f.timer.sleeps.borrow(), vec![120, 120]);
        assert!(!f.prefetcher.is_pending(1));
    }

    #[tokio::test(flavor = "current_thread")]
    async fn test_fresh_entry_is_not_rescheduled() {
        let f = fixture(loader(), vec![Ok(bed())]);
        f.prefetcher.schedule(1, "a.png");
        f.prefetcher.drain().await;
        assert!(!f.prefetcher.schedule(1, "a.png"));

        f.timer.advance(1_800_001.0);
        assert!(f.prefetcher.schedule(1, "a.png"));
    }

    #[tokio::test(flavor = "current_thread")]
    async fn test_requests_added_during_drain_are_processed() {
        let f = fixture(loader(), vec![Ok(bed()), Ok(bed())]);
        f.prefetcher.schedule(1, "a.png");

        let late = async {
            assert!(f.prefetcher.schedule(2, "b.png"));
            // A concurrent drain waits for the running one
            f.prefetcher.drain().await;
            f.prefetcher.cache().borrow().len()
        };
        let ((), seen_by_late) = join(f.prefetcher.drain(), late).await;

        assert_eq!(seen_by_late, 2);
        assert_eq!(f.runner.calls.get(), 2);
        assert_eq!(f.prefetcher.cache().borrow().len(), 2);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn test_overlapping_drains_finish_after_the_work() {
        let f = fixture(loader(), vec![Ok(bed()), Ok(bed()), Ok(bed())]);
        f.prefetcher.schedule_all([(1, "a.png"), (2, "b.png")]);

        let first = async {
            f.prefetcher.drain().await;
            f.prefetcher.cache().borrow().len()
        };
        let second = async {
            f.prefetcher.schedule(3, "c.png");
            f.prefetcher.drain().await;
            f.prefetcher.cache().borrow().len()
        };
        let (seen_first, seen_second) = join(first, second).await;

        assert_eq!(seen_first, 3);
        assert_eq!(seen_second, 3);
        assert!(!f.prefetcher.is_pending(3));
    }

    #[tokio::test(flavor = "current_thread")]
    async fn test_waiting_drain_takes_over_a_dropped_one() {
        use futures::FutureExt;

        let f = fixture(loader(), vec![Ok(bed())]);
        f.prefetcher.schedule(1, "a.png");

        // Start a drain and abandon it mid-flight
        {
            let mut abandoned = Box::pin(f.prefetcher.drain());
            assert!((&mut abandoned).now_or_never().is_none());
        }

        f.prefetcher.schedule(2, "b.png");
        f.prefetcher.drain().await;
        assert!(f.prefetcher.cache().borrow().is_fresh(2, "b.png", 1_000.0));
    }

    #[tokio::test(flavor = "current_thread")]
    async fn test_tainted_image_retries_through_blob() {
        let mut tainted = loader();
        tainted.tainted = true;
        let f = fixture(tainted, vec![Ok(bed())]);

        let entry = f.prefetcher.prefetch_now(3, "c.png").await.unwrap();

        assert_eq!(entry.hotspots.len(), 1);
        assert_eq!(f.loader.blob_calls.get(), 1);
        // No cooldown on immediate requests
        assert!(f.timer.sleeps.borrow().is_empty());
    }

    #[tokio::test(flavor = "current_thread")]
    async fn test_direct_load_failure_falls_back_to_blob() {
        let mut broken = loader();
        broken.fail_direct = true;
        let f = fixture(broken, vec![Ok(bed())]);

        assert!(f.prefetcher.prefetch_now(4, "d.png").await.is_some());
        assert_eq!(f.loader.direct_calls.get(), 1);
        assert_eq!(f.loader.blob_calls.get(), 1);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn test_failures_are_swallowed() {
        let f = fixture(loader(), vec![Err(Error::Inference("oom".into()))]);
        f.prefetcher.schedule(5, "e.png");

        f.prefetcher.drain().await;

        assert!(f.prefetcher.cache().borrow().is_empty());
        assert!(!f.prefetcher.is_pending(5));
    }
}
