use crate::rate_limit::{OperationType, RateLimitAlgorithm};
use async_trait::async_trait;
use std::time::Duration;
use tokio::{sync::Mutex, time::Instant};
use tracing::debug;

/// Token bucket refilled continuously at `rate` tokens per second, holding at
/// most one second worth of tokens.
#[derive(Debug)]
pub struct TokenBucket {
    rate: u64,
    state: Mutex<BucketState>,
}

#[derive(Debug)]
struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

impl TokenBucket {
    pub fn new(rate: u64) -> Self {
        let rate = rate.max(1);
        Self {
            rate,
            state: Mutex::new(BucketState {
                tokens: rate as f64,
                last_refill: Instant::now(),
            }),
        }
    }

    pub fn rate(&self) -> u64 {
        self.rate
    }

    /// Takes `weight` tokens, sleeping until they are available. Weights
    /// above capacity are clamped so a single large batch cannot block forever.
    pub async fn acquire(&self, weight: u64) -> Duration {
        let wanted = weight.clamp(1, self.rate) as f64;
        let capacity = self.rate as f64;
        let start = Instant::now();

        // The lock is held across the sleep so waiters are served in order.
        let mut state = self.state.lock().await;
        loop {
            let now = Instant::now();
            let elapsed = now.duration_since(state.last_refill).as_secs_f64();
            state.tokens = (state.tokens + elapsed * capacity).min(capacity);
            state.last_refill = now;

            if state.tokens >= wanted {
                state.tokens -= wanted;
                let waited = start.elapsed();
                if !waited.is_zero() {
                    debug!(waited_ms = waited.as_millis() as u64, weight, "Rate limited");
                }
                return waited;
            }

            let missing = wanted - state.tokens;
            tokio::time::sleep(Duration::from_secs_f64(missing / capacity)).await;
        }
    }
}

/// Throttles reads issued against the source.
#[derive(Debug)]
pub struct QpsRateLimiter {
    bucket: TokenBucket,
}

impl QpsRateLimiter {
    pub const DEFAULT_QPS: u64 = 50;

    pub fn new(qps: u64) -> Self {
        Self {
            bucket: TokenBucket::new(qps),
        }
    }
}

#[async_trait]
impl RateLimitAlgorithm for QpsRateLimiter {
    fn name(&self) -> &'static str {
        "QPS"
    }

    async fn apply(&self, operation: OperationType, weight: u64) {
        if operation == OperationType::Select {
            self.bucket.acquire(weight).await;
        }
    }
}

/// Throttles statements written to the target.
#[derive(Debug)]
pub struct TpsRateLimiter {
    bucket: TokenBucket,
}

impl TpsRateLimiter {
    pub const DEFAULT_TPS: u64 = 2000;

    pub fn new(tps: u64) -> Self {
        Self {
            bucket: TokenBucket::new(tps),
        }
    }
}

#[async_trait]
impl RateLimitAlgorithm for TpsRateLimiter {
    fn name(&self) -> &'static str {
        "TPS"
    }

    async fn apply(&self, operation: OperationType, weight: u64) {
        if operation.is_write() {
            self.bucket.acquire(weight).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn burst_up_to_rate_then_waits() {
        let bucket = TokenBucket::new(10);
        let start = Instant::now();

        for _ in 0..10 {
            bucket.acquire(1).await;
        }
        assert!(start.elapsed() < Duration::from_millis(1));

        bucket.acquire(5).await;
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(490), "{elapsed:?}");
        assert!(elapsed <= Duration::from_millis(600), "{elapsed:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn oversized_weight_is_clamped() {
        let bucket = TokenBucket::new(4);
        bucket.acquire(4).await;

        let start = Instant::now();
        bucket.acquire(1_000).await;
        assert!(start.elapsed() <= Duration::from_millis(1100));
    }

    #[tokio::test(start_paused = true)]
    async fn qps_ignores_writes_and_tps_ignores_reads() {
        let qps = QpsRateLimiter::new(1);
        let tps = TpsRateLimiter::new(1);
        let start = Instant::now();

        for _ in 0..5 {
            qps.apply(OperationType::Insert, 1).await;
            tps.apply(OperationType::Select, 1).await;
        }
        assert!(start.elapsed() < Duration::from_millis(1));

        tps.apply(OperationType::Update, 1).await;
        tps.apply(OperationType::Delete, 1).await;
        assert!(start.elapsed() >= Duration::from_millis(990));
    }
}
