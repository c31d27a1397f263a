//! Per-destination pacing with adaptive backoff.
//!
//! A [`RateLimiter`] owns the only mutable pacing state in the crate. Callers
//! go through `acquire` / [`RatePermit::release`] around each dispatch and
//! report outcomes with `punish` (after a 429) or `relax` (after a clean 200).

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::{Semaphore, SemaphorePermit};
use tokio::time::Instant;
use tracing::debug;

// Factors expressed in tenths to keep interval arithmetic exact.
const PUNISH_TENTHS: u32 = 16;
const RELAX_TENTHS: u32 = 9;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitSettings {
    pub max_concurrent: usize,
    pub base_interval: Duration,
    pub max_interval: Duration,
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            max_concurrent: 2,
            base_interval: Duration::from_millis(400),
            max_interval: Duration::from_millis(3000),
        }
    }
}

#[derive(Debug)]
struct Pacing {
    min_interval: Duration,
    last_dispatch: Option<Instant>,
}

#[derive(Debug)]
pub struct RateLimiter {
    slots: Semaphore,
    pacing: Mutex<Pacing>,
    base_interval: Duration,
    max_interval: Duration,
}

/// Held while a request is in flight. Dropping it without `release` frees the
/// slot and keeps the dispatch time reserved by `acquire`.
#[must_use]
pub struct RatePermit<'a> {
    limiter: &'a RateLimiter,
    _slot: Option<SemaphorePermit<'a>>,
}

impl RateLimiter {
    pub fn new(settings: &RateLimitSettings) -> Self {
        Self {
            slots: Semaphore::new(settings.max_concurrent.max(1)),
            pacing: Mutex::new(Pacing {
                min_interval: settings.base_interval,
                last_dispatch: None,
            }),
            base_interval: settings.base_interval,
            max_interval: settings.max_interval,
        }
    }

    /// Wait for a free slot and for `min_interval` to pass since the last dispatch.
    /// The dispatch time is reserved under the lock, so concurrent callers queue
    /// up one interval apart instead of waking together.
    pub async fn acquire(&self) -> RatePermit<'_> {
        // The semaphore is never closed, so a failed acquire only means "no slot bookkeeping".
        let slot = self.slots.acquire().await.ok();
        let wait = {
            let mut pacing = self.lock();
            let now = Instant::now();
            let ready = pacing
                .last_dispatch
                .map(|last| (last + pacing.min_interval).max(now))
                .unwrap_or(now);
            pacing.last_dispatch = Some(ready);
            ready - now
        };
        if !wait.is_zero() {
            debug!(wait_ms = wait.as_millis() as u64, "pacing before dispatch");
            tokio::time::sleep(wait).await;
        }
        RatePermit {
            limiter: self,
            _slot: slot,
        }
    }

    /// Stretch the interval after a rate-limit response, up to the cap.
    pub fn punish(&self) {
        let mut pacing = self.lock();
        let next = (pacing.min_interval * PUNISH_TENTHS / 10).min(self.max_interval);
        debug!(from_ms = pacing.min_interval.as_millis() as u64, to_ms = next.as_millis() as u64, "rate limiter punished");
        pacing.min_interval = next;
    }

    /// Decay the interval back toward the base after a clean success.
    pub fn relax(&self) {
        let mut pacing = self.lock();
        pacing.min_interval = (pacing.min_interval * RELAX_TENTHS / 10).max(self.base_interval);
    }

    pub fn min_interval(&self) -> Duration {
        self.lock().min_interval
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Pacing> {
        self.pacing.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl RatePermit<'_> {
    /// Record the dispatch time and free the slot. A later reservation made by
    /// another caller is kept.
    pub fn release(self) {
        let mut pacing = self.limiter.lock();
        let now = Instant::now();
        pacing.last_dispatch = Some(pacing.last_dispatch.map_or(now, |reserved| reserved.max(now)));
    }
}

/// One limiter per destination host, created on first use.
#[derive(Debug, Default)]
pub struct LimiterRegistry {
    settings: RateLimitSettings,
    limiters: Mutex<HashMap<String, Arc<RateLimiter>>>,
}

impl LimiterRegistry {
    pub fn new(settings: RateLimitSettings) -> Self {
        Self {
            settings,
            limiters: Mutex::new(HashMap::new()),
        }
    }

    pub fn for_destination(&self, destination: &str) -> Arc<RateLimiter> {
        let mut map = self.limiters.lock().unwrap_or_else(PoisonError::into_inner);
        map.entry(destination.to_string())
            .or_insert_with(|| Arc::new(RateLimiter::new(&self.settings)))
            .clone()
    }
}
