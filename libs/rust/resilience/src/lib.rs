//! Resilience utilities for talking to rate-limited RPC providers:
//! retry with exponential backoff, a consecutive-failure circuit breaker,
//! and a semaphore bulkhead that bounds concurrent fan-out.
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use rand::{thread_rng, Rng};
use thiserror::Error;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ResilienceError { #[error("circuit open")] CircuitOpen }

#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_retries: usize,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub jitter: f64, // 0.0 - 1.0
}
impl Default for RetryConfig { fn default() -> Self { Self { max_retries: 2, base_delay: Duration::from_millis(200), max_delay: Duration::from_secs(2), jitter: 0.25 } } }

impl RetryConfig {
    /// No retries at all; the first error is returned as-is.
    pub fn none() -> Self { Self { max_retries: 0, ..Self::default() } }

    /// Upper bound on the summed backoff sleeps of one exhausted retry loop.
    pub fn max_total_delay(&self) -> Duration {
        let jitter = self.jitter.clamp(0.0, 1.0);
        (0..self.max_retries)
            .map(|attempt| {
                let capped = self.capped_delay(attempt);
                capped + Duration::from_nanos((capped.as_nanos() as f64 * jitter).ceil() as u64)
            })
            .sum()
    }

    fn capped_delay(&self, attempt: usize) -> Duration {
        std::cmp::min(self.base_delay.mul_f64(2f64.powi(attempt.min(16) as i32)), self.max_delay)
    }

    fn delay_for(&self, attempt: usize) -> Duration {
        let mut delay = self.capped_delay(attempt);
        if self.jitter > 0.0 {
            let jitter_ms = (delay.as_millis() as f64 * self.jitter.min(1.0)) as i64;
            let offset: i64 = thread_rng().gen_range(-jitter_ms..=jitter_ms);
            let base_ms = delay.as_millis() as i64 + offset;
            delay = Duration::from_millis(base_ms.max(0) as u64);
        }
        delay
    }
}

/// Retries `op` while `retryable` accepts the error and `cfg.max_retries`
/// is not exhausted; anything else is returned immediately.
pub async fn retry_async_if<F, Fut, T, E, P>(cfg: &RetryConfig, mut op: F, retryable: P) -> Result<T, E>
where
    F: FnMut(usize) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    P: Fn(&E) -> bool,
{
    let mut attempt = 0;
    loop {
        match op(attempt).await {
            Ok(v) => return Ok(v),
            Err(e) if attempt >= cfg.max_retries || !retryable(&e) => return Err(e),
            Err(_) => {
                let delay = cfg.delay_for(attempt);
                debug!(attempt, delay_ms = delay.as_millis() as u64, "operation failed, retrying");
                tokio::time::sleep(delay).await;
            }
        }
        attempt += 1;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState { Closed, Open, HalfOpen }

/// Opens after `failure_threshold` consecutive failures and lets a single
/// trial through once `half_open_after` has elapsed.
///
/// Admission hands out a [`BreakerPermit`]. A trial permit dropped without an
/// outcome (for example when the caller's deadline cancels the call) counts as
/// a failed trial, so the breaker never waits on a trial that will not report.
#[derive(Debug)]
pub struct CircuitBreaker {
    state: Mutex<State>,
    half_open_after: Duration,
    failure_threshold: u32,
}

#[derive(Debug)]
struct State { failures: u32, opened_at: Option<Instant>, trial: bool }

impl CircuitBreaker {
    pub fn new(failure_threshold: u32, half_open_after: Duration) -> Self {
        Self { state: Mutex::new(State { failures: 0, opened_at: None, trial: false }), half_open_after, failure_threshold: failure_threshold.max(1) }
    }

    /// Admits a call, or fails fast while open or while a trial is in flight.
    pub fn check(&self) -> Result<BreakerPermit<'_>, ResilienceError> {
        let mut st = self.state.lock();
        let trial = match st.opened_at {
            None => false,
            Some(opened) if opened.elapsed() >= self.half_open_after && !st.trial => {
                debug!("half-open trial");
                st.trial = true;
                true
            }
            Some(_) => return Err(ResilienceError::CircuitOpen),
        };
        Ok(BreakerPermit { breaker: self, trial, resolved: false })
    }

    pub fn state(&self) -> BreakerState {
        let st = self.state.lock();
        match st.opened_at {
            None => BreakerState::Closed,
            Some(opened) if st.trial || opened.elapsed() >= self.half_open_after => BreakerState::HalfOpen,
            Some(_) => BreakerState::Open,
        }
    }

    fn on_success(&self) {
        let mut st = self.state.lock();
        if st.opened_at.is_some() { debug!("circuit closed"); }
        st.failures = 0; st.opened_at = None; st.trial = false;
    }

    fn on_failure(&self) {
        let mut st = self.state.lock();
        st.failures = st.failures.saturating_add(1);
        if st.trial {
            st.trial = false;
            st.opened_at = Some(Instant::now());
            warn!("half-open trial failed, circuit re-opened");
        } else if st.failures >= self.failure_threshold && st.opened_at.is_none() {
            st.opened_at = Some(Instant::now());
            warn!(failures = st.failures, "circuit opened");
        }
    }

    fn on_abandoned_trial(&self) {
        let mut st = self.state.lock();
        if st.trial {
            st.trial = false;
            st.opened_at = Some(Instant::now());
            warn!("half-open trial abandoned, circuit re-opened");
        }
    }
}

/// One admitted call. Report the outcome with [`success`](Self::success) or
/// [`failure`](Self::failure); dropping it unreported only matters for trials.
#[derive(Debug)]
#[must_use = "report the call outcome on the permit"]
pub struct BreakerPermit<'a> {
    breaker: &'a CircuitBreaker,
    trial: bool,
    resolved: bool,
}

impl BreakerPermit<'_> {
    pub fn is_trial(&self) -> bool { self.trial }

    pub fn success(mut self) {
        self.resolved = true;
        self.breaker.on_success();
    }

    pub fn failure(mut self) {
        self.resolved = true;
        self.breaker.on_failure();
    }
}

impl Drop for BreakerPermit<'_> {
    fn drop(&mut self) {
        if !self.resolved && self.trial { self.breaker.on_abandoned_trial(); }
    }
}

/// Bounds the number of concurrently running futures. Callers beyond the
/// limit wait for a permit instead of being rejected.
#[derive(Debug, Clone)]
pub struct Bulkhead {
    name: Arc<str>,
    permits: Arc<Semaphore>,
    max_concurrent: usize,
    in_flight: Arc<AtomicUsize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BulkheadStats { pub in_flight: usize, pub max_concurrent: usize }

impl Bulkhead {
    pub fn new(name: impl Into<Arc<str>>, max_concurrent: usize) -> Self {
        let max_concurrent = max_concurrent.max(1);
        Self { name: name.into(), permits: Arc::new(Semaphore::new(max_concurrent)), max_concurrent, in_flight: Arc::new(AtomicUsize::new(0)) }
    }

    pub fn name(&self) -> &str { &self.name }

    pub async fn run<Fut, T>(&self, fut: Fut) -> T
    where Fut: Future<Output = T> {
        // The semaphore is never closed; if it were, run unbounded rather than drop work.
        let _permit = self.permits.acquire().await.ok();
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        let _guard = InFlight(&self.in_flight);
        fut.await
    }

    pub fn stats(&self) -> BulkheadStats { BulkheadStats { in_flight: self.in_flight.load(Ordering::SeqCst), max_concurrent: self.max_concurrent } }
}

struct InFlight<'a>(&'a AtomicUsize);
impl Drop for InFlight<'_> { fn drop(&mut self) { self.0.fetch_sub(1, Ordering::SeqCst); } }
