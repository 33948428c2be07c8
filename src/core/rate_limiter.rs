//! Token-bucket pacing for network-visible interactions.
//!
//! A [`RateLimiter`] refills continuously at `rate` tokens per second up to `burst`
//! tokens. [`RateLimiter::acquire`] sleeps until a token is available instead of
//! spinning, and [`RateLimiter::jitter`] adds a bounded random delay so spacing is
//! not perfectly periodic. A disabled limiter does neither, which lets exactly one
//! layer (engine or session) own pacing.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use rand::Rng;
use tokio::time::Instant;

// Refill arithmetic can leave a bucket a rounding error short of a whole token.
const TOKEN_EPSILON: f64 = 1e-9;
// Sub-millisecond sleeps can complete without the clock moving.
const MIN_WAIT: Duration = Duration::from_millis(1);

struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

struct Bucket {
    rate: f64,
    capacity: f64,
    state: Mutex<BucketState>,
}

impl Bucket {
    fn refill(&self, state: &mut BucketState, now: Instant) {
        let elapsed = now.saturating_duration_since(state.last_refill).as_secs_f64();
        state.last_refill = now;
        state.tokens = elapsed.mul_add(self.rate, state.tokens).min(self.capacity);
    }
}

/// Token-bucket limiter with optional post-acquire jitter.
pub struct RateLimiter {
    bucket: Option<Bucket>,
    max_jitter: Duration,
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("rate", &self.bucket.as_ref().map(|b| b.rate))
            .field("burst", &self.bucket.as_ref().map(|b| b.capacity))
            .field("max_jitter", &self.max_jitter)
            .finish()
    }
}

impl RateLimiter {
    /// Bucket refilling at `rate` per second with `burst` capacity, starting full.
    ///
    /// A non-positive or non-finite rate yields a disabled limiter.
    #[must_use]
    pub fn new(rate: f64, burst: u32, max_jitter: Duration) -> Self {
        if !rate.is_finite() || rate <= 0.0 {
            return Self::disabled();
        }
        let capacity = f64::from(burst.max(1));
        Self {
            bucket: Some(Bucket {
                rate,
                capacity,
                state: Mutex::new(BucketState {
                    tokens: capacity,
                    last_refill: Instant::now(),
                }),
            }),
            max_jitter,
        }
    }

    /// Minimum-gap pacer: one action per `1/rate` seconds plus up to
    /// `jitter_fraction` of that gap as random extra delay.
    #[must_use]
    pub fn paced(rate: f64, jitter_fraction: f64) -> Self {
        if !rate.is_finite() || rate <= 0.0 {
            return Self::disabled();
        }
        let gap = 1.0 / rate.max(0.01);
        let jitter = Duration::from_secs_f64((gap * jitter_fraction.clamp(0.0, 1.0)).max(0.0));
        Self::new(rate, 1, jitter)
    }

    /// Limiter that never waits.
    #[must_use]
    pub const fn disabled() -> Self {
        Self {
            bucket: None,
            max_jitter: Duration::ZERO,
        }
    }

    /// Whether this limiter paces at all.
    #[must_use]
    pub const fn is_enabled(&self) -> bool {
        self.bucket.is_some()
    }

    /// Wait cooperatively until a token is available and take it.
    pub async fn acquire(&self) {
        let Some(bucket) = &self.bucket else {
            return;
        };
        loop {
            let wait = {
                let mut state = bucket.state.lock();
                bucket.refill(&mut state, Instant::now());
                if state.tokens >= 1.0 - TOKEN_EPSILON {
                    state.tokens = (state.tokens - 1.0).max(0.0);
                    return;
                }
                Duration::from_secs_f64((1.0 - state.tokens) / bucket.rate).max(MIN_WAIT)
            };
            tokio::time::sleep(wait).await;
        }
    }

    /// Sleep a uniformly random delay in `[0, max_jitter]`.
    pub async fn jitter(&self) {
        if self.bucket.is_none() || self.max_jitter.is_zero() {
            return;
        }
        let max_ms = u64::try_from(self.max_jitter.as_millis()).unwrap_or(u64::MAX);
        let delay = rand::rng().random_range(0..=max_ms);
        tokio::time::sleep(Duration::from_millis(delay)).await;
    }

    /// [`Self::acquire`] followed by [`Self::jitter`].
    pub async fn acquire_with_jitter(&self) {
        self.acquire().await;
        self.jitter().await;
    }

    /// Tokens currently available after refilling; `None` when disabled.
    #[must_use]
    pub fn available(&self) -> Option<f64> {
        let bucket = self.bucket.as_ref()?;
        let mut state = bucket.state.lock();
        bucket.refill(&mut state, Instant::now());
        Some(state.tokens)
    }
}

/// One lazily created [`RateLimiter`] per key (target resource).
pub struct KeyedRateLimiter {
    rate: f64,
    burst: u32,
    max_jitter: Duration,
    limiters: RwLock<HashMap<String, Arc<RateLimiter>>>,
}

impl KeyedRateLimiter {
    /// Keyed limiter handing out buckets with the same parameters.
    #[must_use]
    pub fn new(rate: f64, burst: u32, max_jitter: Duration) -> Self {
        Self {
            rate,
            burst,
            max_jitter,
            limiters: RwLock::new(HashMap::new()),
        }
    }

    /// Keyed limiter whose buckets never wait.
    #[must_use]
    pub fn disabled() -> Self {
        Self::new(0.0, 1, Duration::ZERO)
    }

    /// Limiter for `key`, created on first use.
    pub fn limiter(&self, key: &str) -> Arc<RateLimiter> {
        {
            let read = self.limiters.read();
            if let Some(limiter) = read.get(key) {
                return Arc::clone(limiter);
            }
        }
        let mut write = self.limiters.write();
        Arc::clone(
            write
                .entry(key.to_string())
                .or_insert_with(|| Arc::new(RateLimiter::new(self.rate, self.burst, self.max_jitter))),
        )
    }

    /// Acquire a token for `key`.
    pub async fn acquire(&self, key: &str) {
        self.limiter(key).acquire().await;
    }
}
