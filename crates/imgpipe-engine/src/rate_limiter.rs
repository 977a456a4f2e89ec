//! Deterministic token-bucket rate limiter.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use imgpipe_core::CancellationToken;

type Work = Box<dyn FnOnce() + Send>;

struct Deferred {
    token: CancellationToken,
    work: Work,
}

/// Gates work submission behind a token bucket of capacity `C` refilling
/// at `R` tokens/second, to absorb subscribe/cancel churn without
/// thrashing the fetch queue beneath it.
///
/// Like [`BoundedOperationQueue`](crate::queue::BoundedOperationQueue),
/// this type carries no internal lock: the design requires it be driven
/// exclusively from the serial orchestrator context, so bucket accounting
/// is plain, uncontended arithmetic.
pub struct RateLimiter {
    capacity: f64,
    refill_per_sec: f64,
    tokens: f64,
    last_refill: Instant,
    deferred: VecDeque<Deferred>,
}

/// What [`RateLimiter::execute`] decided to do with one submission.
pub enum RateLimitOutcome {
    /// A token was available; run this immediately.
    RunNow(Work),
    /// No token was available; the work has been queued and will surface
    /// from [`RateLimiter::drain_ready`] once the bucket refills. The
    /// caller should arrange to call `drain_ready` again after
    /// [`RateLimiter::retry_delay`].
    Deferred,
}

impl RateLimiter {
    /// Create a limiter with the given bucket capacity and refill rate.
    pub fn new(capacity: u32, refill_per_sec: f64) -> Self {
        Self {
            capacity: f64::from(capacity),
            refill_per_sec,
            tokens: f64::from(capacity),
            last_refill: Instant::now(),
            deferred: VecDeque::new(),
        }
    }

    fn refill(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_refill);
        self.tokens = (self.tokens + elapsed.as_secs_f64() * self.refill_per_sec).min(self.capacity);
        self.last_refill = now;
    }

    /// How long to wait before trying deferred work again: `1/R` seconds.
    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.refill_per_sec)
    }

    /// Submit `work`, gated on `token`. Consumes one token immediately if
    /// available; otherwise queues `work` for later and returns
    /// [`RateLimitOutcome::Deferred`].
    pub fn execute(&mut self, token: CancellationToken, work: Work) -> RateLimitOutcome {
        self.refill(Instant::now());
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            RateLimitOutcome::RunNow(work)
        } else {
            self.deferred.push_back(Deferred { token, work });
            RateLimitOutcome::Deferred
        }
    }

    /// Drain as many deferred items as the current token count allows.
    /// Items whose token has been cancelled are dropped without running.
    /// Call again after [`retry_delay`](Self::retry_delay) while
    /// `has_deferred()` is `true`.
    pub fn drain_ready(&mut self) -> Vec<Work> {
        self.refill(Instant::now());
        let mut ready = Vec::new();
        while let Some(front) = self.deferred.front() {
            if front.token.is_cancelling() {
                self.deferred.pop_front();
                continue;
            }
            if self.tokens < 1.0 {
                break;
            }
            self.tokens -= 1.0;
            ready.push(self.deferred.pop_front().unwrap().work);
        }
        ready
    }

    /// Whether any work is still waiting for a token.
    pub fn has_deferred(&self) -> bool {
        !self.deferred.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use imgpipe_core::CancellationSource;

    fn run_outcome(outcome: RateLimitOutcome) -> bool {
        match outcome {
            RateLimitOutcome::RunNow(work) => {
                work();
                true
            }
            RateLimitOutcome::Deferred => false,
        }
    }

    #[test]
    fn runs_immediately_while_tokens_available() {
        let mut limiter = RateLimiter::new(2, 10.0);
        let source = CancellationSource::new();
        assert!(run_outcome(limiter.execute(source.token(), Box::new(|| {}))));
        assert!(run_outcome(limiter.execute(source.token(), Box::new(|| {}))));
    }

    #[test]
    fn defers_once_bucket_is_empty() {
        let mut limiter = RateLimiter::new(1, 1.0);
        let source = CancellationSource::new();
        assert!(run_outcome(limiter.execute(source.token(), Box::new(|| {}))));
        let outcome = limiter.execute(source.token(), Box::new(|| {}));
        assert!(matches!(outcome, RateLimitOutcome::Deferred));
        assert!(limiter.has_deferred());
    }

    #[test]
    fn cancelled_deferred_work_is_dropped_without_running() {
        let mut limiter = RateLimiter::new(1, 1000.0);
        let source = CancellationSource::new();
        let _ = limiter.execute(source.token(), Box::new(|| {}));
        let ran = std::sync::Arc::new(std::sync::atomic::AtomicBool::new(false));
        let ran2 = std::sync::Arc::clone(&ran);
        let outcome = limiter.execute(source.token(), Box::new(move || {
            ran2.store(true, std::sync::atomic::Ordering::SeqCst);
        }));
        assert!(matches!(outcome, RateLimitOutcome::Deferred));
        source.cancel();
        std::thread::sleep(Duration::from_millis(5));
        let ready = limiter.drain_ready();
        assert!(ready.is_empty());
        assert!(!ran.load(std::sync::atomic::Ordering::SeqCst));
    }

    #[test]
    fn deferred_work_runs_once_bucket_refills() {
        let mut limiter = RateLimiter::new(1, 1000.0);
        let source = CancellationSource::new();
        let _ = limiter.execute(source.token(), Box::new(|| {}));
        let outcome = limiter.execute(source.token(), Box::new(|| {}));
        assert!(matches!(outcome, RateLimitOutcome::Deferred));
        std::thread::sleep(Duration::from_millis(5));
        let ready = limiter.drain_ready();
        assert_eq!(ready.len(), 1);
    }
}
