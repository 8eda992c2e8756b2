//! Bounded token pools that cap in-flight requests per backend.
//!
//! The limiter is the sole backpressure mechanism toward backends: a task
//! must hold a [`Permit`] for the duration of a backend call. Acquisition is
//! cancellation-aware; releasing is the permit drop.

#![deny(rustdoc::broken_intra_doc_links, rustdoc::bare_urls, rust_2018_idioms)]
#![warn(
    missing_debug_implementations,
    clippy::explicit_iter_loop,
    clippy::use_self,
    clippy::clone_on_ref_ptr
)]

use std::collections::HashMap;
use std::sync::Arc;

use snafu::Snafu;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use trace::RequestContext;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("deadline exceeded while waiting for a limiter slot"))]
    Deadline,
}

/// A held slot. Dropping it returns the token to the pool.
#[derive(Debug)]
pub struct Permit {
    _permit: Option<OwnedSemaphorePermit>,
}

/// A bounded token pool for one backend.
///
/// A limiter constructed with capacity 0 is unbounded: [`Limiter::enter`]
/// succeeds immediately and the returned permit is a no-op.
#[derive(Debug, Clone)]
pub struct Limiter {
    semaphore: Option<Arc<Semaphore>>,
    capacity: usize,
}

impl Limiter {
    pub fn new(capacity: usize) -> Self {
        Self {
            semaphore: (capacity > 0).then(|| Arc::new(Semaphore::new(capacity))),
            capacity,
        }
    }

    pub fn unbounded() -> Self {
        Self::new(0)
    }

    /// The configured ceiling; 0 means unbounded.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Acquire one token, waiting until a slot frees up or `ctx` is done.
    pub async fn enter(&self, ctx: &RequestContext) -> Result<Permit, Error> {
        let Some(semaphore) = &self.semaphore else {
            return Ok(Permit { _permit: None });
        };

        let semaphore = Arc::clone(semaphore);
        tokio::select! {
            _ = ctx.done() => DeadlineSnafu.fail(),
            permit = semaphore.acquire_owned() => {
                let permit = permit.expect("limiter semaphore never closed");
                Ok(Permit {
                    _permit: Some(permit),
                })
            }
        }
    }
}

/// [`Limiter`]s keyed by backend name, all sharing one configured capacity.
///
/// Names that were not present at construction behave as unbounded.
#[derive(Debug)]
pub struct ServerLimiter {
    limiters: HashMap<String, Limiter>,
    capacity: usize,
}

impl ServerLimiter {
    pub fn new<S: Into<String>>(servers: impl IntoIterator<Item = S>, capacity: usize) -> Self {
        let limiters = servers
            .into_iter()
            .map(|server| (server.into(), Limiter::new(capacity)))
            .collect();

        Self { limiters, capacity }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Acquire one token for the named backend.
    pub async fn enter(&self, ctx: &RequestContext, name: &str) -> Result<Permit, Error> {
        match self.limiters.get(name) {
            Some(limiter) => limiter.enter(ctx).await,
            None => Ok(Permit { _permit: None }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_holders_never_exceed_capacity() {
        const CAPACITY: usize = 3;
        const TASKS: usize = 20;

        let limiter = Arc::new(Limiter::new(CAPACITY));
        let current = Arc::new(AtomicUsize::new(0));
        let highwater = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::with_capacity(TASKS);
        for _ in 0..TASKS {
            let limiter = Arc::clone(&limiter);
            let current = Arc::clone(&current);
            let highwater = Arc::clone(&highwater);
            handles.push(tokio::spawn(async move {
                let ctx = RequestContext::new();
                let _permit = limiter.enter(&ctx).await.unwrap();

                let now = current.fetch_add(1, Ordering::SeqCst) + 1;
                highwater.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(5)).await;
                current.fetch_sub(1, Ordering::SeqCst);
            }));
        }

        for handle in handles {
            handle.await.unwrap();
        }

        assert!(highwater.load(Ordering::SeqCst) <= CAPACITY);
    }

    #[tokio::test(start_paused = true)]
    async fn enter_respects_deadline() {
        let limiter = Limiter::new(1);
        let ctx = RequestContext::new();
        let _held = limiter.enter(&ctx).await.unwrap();

        let waiter_ctx = ctx.child_with_timeout(Duration::from_millis(50));
        let err = limiter.enter(&waiter_ctx).await.unwrap_err();
        assert!(matches!(err, Error::Deadline));
    }

    #[tokio::test]
    async fn enter_respects_cancellation() {
        let limiter = Limiter::new(1);
        let ctx = RequestContext::new();
        let _held = limiter.enter(&ctx).await.unwrap();

        ctx.cancel();
        let err = limiter.enter(&ctx).await.unwrap_err();
        assert!(matches!(err, Error::Deadline));
    }

    #[tokio::test]
    async fn zero_capacity_is_unbounded() {
        let limiter = Limiter::unbounded();
        assert_eq!(limiter.capacity(), 0);

        let ctx = RequestContext::new();
        let mut permits = Vec::new();
        for _ in 0..100 {
            permits.push(limiter.enter(&ctx).await.unwrap());
        }
    }

    #[tokio::test]
    async fn dropping_permit_frees_slot() {
        let limiter = Limiter::new(1);
        let ctx = RequestContext::new();

        let permit = limiter.enter(&ctx).await.unwrap();
        drop(permit);
        let _again = limiter.enter(&ctx).await.unwrap();
    }

    #[tokio::test]
    async fn unknown_server_is_unbounded() {
        let limiter = ServerLimiter::new(["known"], 1);
        let ctx = RequestContext::new();

        let _known = limiter.enter(&ctx, "known").await.unwrap();
        for _ in 0..10 {
            // held permits are dropped immediately; name was never registered
            let _ = limiter.enter(&ctx, "unknown").await.unwrap();
        }
    }
}
