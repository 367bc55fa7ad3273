// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! FIFO async semaphore for a single-threaded executor
//!
//! Released permits are handed directly to the oldest waiter, so arrival order
//! is preserved. A waiter that was dropped before its turn is skipped.

use futures::channel::oneshot;
use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

struct LimiterState {
    available: usize,
    waiters: VecDeque<oneshot::Sender<Permit>>,
}

/// Cloneable handle; clones share the same permits
#[derive(Clone)]
pub struct ConcurrencyLimiter {
    inner: Rc<RefCell<LimiterState>>,
}

/// Held while a task runs; dropping it wakes the next waiter
pub struct Permit {
    inner: Option<Rc<RefCell<LimiterState>>>,
}

impl ConcurrencyLimiter {
    pub fn new(permits: usize) -> Self {
        Self {
            inner: Rc::new(RefCell::new(LimiterState {
                available: permits.max(1),
                waiters: VecDeque::new(),
            })),
        }
    }

    pub fn available(&self) -> usize {
        self.inner.borrow().available
    }

    pub fn waiting(&self) -> usize {
        self.inner
            .borrow()
            .waiters
            .iter()
            .filter(|tx| !tx.is_canceled())
            .count()
    }

    pub async fn acquire(&self) -> Permit {
        loop {
            let rx = {
                let mut state = self.inner.borrow_mut();
                if state.available > 0 && state.waiters.is_empty() {
                    state.available -= 1;
                    return Permit {
                        inner: Some(Rc::clone(&self.inner)),
                    };
                }
                let (tx, rx) = oneshot::channel();
                state.waiters.push_back(tx);
                rx
            };
            if let Ok(permit) = rx.await {
                return permit;
            }
        }
    }

    /// Run `task` while holding a permit
    pub async fn run<F, T>(&self, task: F) -> T
    where
        F: std::future::Future<Output = T>,
    {
        let _permit = self.acquire().await;
        task.await
    }
}

impl Drop for Permit {
    fn drop(&mut self) {
        let Some(inner) = self.inner.take() else {
            return;
        };
        loop {
            let next = inner.borrow_mut().waiters.pop_front();
            let Some(tx) = next else {
                inner.borrow_mut().available += 1;
                return;
            };
            let handoff = Permit {
                inner: Some(Rc::clone(&inner)),
            };
            match tx.send(handoff) {
                Ok(()) => return,
                // Receiver gone; disarm the returned permit and try the next waiter
                Err(mut unused) => {
                    unused.inner = None;
                }
            }
        }
    }
}

impl std::fmt::Debug for ConcurrencyLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.borrow();
        f.debug_struct("ConcurrencyLimiter")
            .field("available", &state.available)
            .field("waiters", &state.waiters.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::future::join_all;
    use futures::FutureExt;
    use std::cell::RefCell;

    #[tokio::test(flavor = "current_thread")]
    async fn test_single_permit_serializes_in_arrival_order() {
        let limiter = ConcurrencyLimiter::new(1);
        let log = Rc::new(RefCell::new(Vec::new()));

        let tasks = (0..4).map(|i| {
            let limiter = limiter.clone();
            let log = Rc::clone(&log);
            async move {
                let _permit = limiter.acquire().await;
                log.borrow_mut().push(format!("start {}", i));
                tokio::task::yield_now().await;
                log.borrow_mut().push(format!("end {}", i));
            }
        });
        join_all(tasks).await;

        let expected: Vec<String> = (0..4)
            .flat_map(|i| [format!("start {}", i), format!("end {}", i)])
            .collect();
        assert_eq!(*log.borrow(), expected);
        assert_eq!(limiter.available(), 1);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn test_dropped_waiter_is_skipped() {
        let limiter = ConcurrencyLimiter::new(1);
        let held = limiter.acquire().await;

        let mut abandoned = Box::pin(limiter.acquire());
        assert!((&mut abandoned).now_or_never().is_none());
        let mut patient = Box::pin(limiter.acquire());
        assert!((&mut patient).now_or_never().is_none());
        drop(abandoned);
        assert_eq!(limiter.waiting(), 1);

        drop(held);
        let permit = patient.await;
        assert_eq!(limiter.available(), 0);
        drop(permit);
        assert_eq!(limiter.available(), 1);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn test_parallel_permits() {
        let limiter = ConcurrencyLimiter::new(2);
        let a = limiter.acquire().await;
        let _b = limiter.acquire().await;
        assert_eq!(limiter.available(), 0);
        drop(a);
        assert_eq!(limiter.available(), 1);
        let value = limiter.run(async { 7 }).await;
        assert_eq!(value, 7);
    }
}
