//! Circuit breaker for external source calls.
//!
//! Each source identifier gets an independent breaker with three states:
//!
//! - **Closed**: calls pass through; consecutive failures count toward the
//!   threshold, any success resets the counter
//! - **Open**: calls are rejected immediately with `SourceError::Unavailable`
//!   until the cool-down elapses
//! - **HalfOpen**: exactly one probe call is allowed through; success closes
//!   the breaker, failure reopens it and restarts the cool-down
//!
//! Breakers are shared across concurrent pipeline runs, so all mutable state
//! lives in atomics: failures from different customers' runs accumulate
//! toward the same threshold.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU32, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tracing::{debug, info, warn};

use domain::SourceError;

/// Breaker state, stored as a u8 atomic
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

const STATE_CLOSED: u8 = 0;
const STATE_OPEN: u8 = 1;
const STATE_HALF_OPEN: u8 = 2;

impl CircuitState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            STATE_OPEN => Self::Open,
            STATE_HALF_OPEN => Self::HalfOpen,
            _ => Self::Closed,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            Self::Closed => STATE_CLOSED,
            Self::Open => STATE_OPEN,
            Self::HalfOpen => STATE_HALF_OPEN,
        }
    }
}

/// Failure-isolation state for a single source identifier
pub struct CircuitBreaker {
    source: String,
    failure_threshold: u32,
    cooldown: Duration,

    state: AtomicU8,
    /// Consecutive failures while Closed
    failures: AtomicU32,
    /// When the breaker last opened, as millis since `created`
    opened_at_ms: AtomicU64,
    /// Whether the single HalfOpen probe slot is taken
    probe_in_flight: AtomicBool,
    created: Instant,
}

impl CircuitBreaker {
    pub fn new(source: impl Into<String>, failure_threshold: u32, cooldown: Duration) -> Self {
        let source = source.into();
        info!(
            source = %source,
            threshold = failure_threshold,
            cooldown_secs = cooldown.as_secs(),
            "Circuit breaker initialized"
        );
        Self {
            source,
            failure_threshold,
            cooldown,
            state: AtomicU8::new(STATE_CLOSED),
            failures: AtomicU32::new(0),
            opened_at_ms: AtomicU64::new(0),
            probe_in_flight: AtomicBool::new(false),
            created: Instant::now(),
        }
    }

    /// Current breaker state
    pub fn state(&self) -> CircuitState {
        CircuitState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Consecutive failure count (Closed state only)
    pub fn failure_count(&self) -> u32 {
        self.failures.load(Ordering::Acquire)
    }

    /// Execute `op` under breaker protection.
    ///
    /// Returns `SourceError::Unavailable` without invoking `op` when the
    /// breaker is Open (inside the cool-down) or when another probe already
    /// holds the HalfOpen slot. Otherwise runs `op` and records the outcome.
    pub async fn call<T, F, Fut>(&self, op: F) -> Result<T, SourceError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, SourceError>>,
    {
        self.try_acquire()?;

        match op().await {
            Ok(value) => {
                self.record_success();
                Ok(value)
            }
            Err(err) => {
                self.record_failure();
                Err(err)
            }
        }
    }

    /// Check whether a call may proceed, transitioning Open -> HalfOpen when
    /// the cool-down has elapsed. The caller that wins the transition (or
    /// finds a free probe slot) becomes the probe.
    fn try_acquire(&self) -> Result<(), SourceError> {
        match self.state() {
            CircuitState::Closed => Ok(()),
            CircuitState::Open => {
                // Claiming the probe slot before publishing HalfOpen keeps
                // the probe unique even when two callers race the cool-down
                if self.cooldown_elapsed()
                    && self
                        .probe_in_flight
                        .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                        .is_ok()
                {
                    self.state.store(STATE_HALF_OPEN, Ordering::Release);
                    info!(source = %self.source, "Circuit breaker half-open, probing recovery");
                    return Ok(());
                }
                debug!(source = %self.source, "Circuit breaker open, rejecting call");
                Err(SourceError::Unavailable {
                    source_name: self.source.clone(),
                })
            }
            CircuitState::HalfOpen => {
                if self
                    .probe_in_flight
                    .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                    .is_ok()
                {
                    return Ok(());
                }
                debug!(source = %self.source, "Probe already in flight, rejecting call");
                Err(SourceError::Unavailable {
                    source_name: self.source.clone(),
                })
            }
        }
    }

    fn record_success(&self) {
        match self.state() {
            CircuitState::HalfOpen => {
                self.state.store(STATE_CLOSED, Ordering::Release);
                self.failures.store(0, Ordering::Release);
                self.probe_in_flight.store(false, Ordering::Release);
                info!(source = %self.source, "Circuit breaker closed, source recovered");
            }
            CircuitState::Closed => {
                self.failures.store(0, Ordering::Release);
                debug!(source = %self.source, "Call succeeded");
            }
            CircuitState::Open => {}
        }
    }

    fn record_failure(&self) {
        match self.state() {
            CircuitState::HalfOpen => {
                self.open();
                warn!(source = %self.source, "Probe failed, circuit breaker reopened");
            }
            CircuitState::Closed => {
                let failures = self.failures.fetch_add(1, Ordering::AcqRel) + 1;
                warn!(
                    source = %self.source,
                    failures,
                    threshold = self.failure_threshold,
                    "Source call failed"
                );
                if failures >= self.failure_threshold {
                    self.open();
                    warn!(
                        source = %self.source,
                        failures,
                        "Circuit breaker opened, failure threshold exceeded"
                    );
                }
            }
            CircuitState::Open => {}
        }
    }

    fn open(&self) {
        self.state.store(STATE_OPEN, Ordering::Release);
        self.opened_at_ms
            .store(self.created.elapsed().as_millis() as u64, Ordering::Release);
        self.probe_in_flight.store(false, Ordering::Release);
    }

    fn cooldown_elapsed(&self) -> bool {
        let opened_at = Duration::from_millis(self.opened_at_ms.load(Ordering::Acquire));
        self.created.elapsed().saturating_sub(opened_at) >= self.cooldown
    }
}

/// Arena of breakers keyed by source identifier.
///
/// Shared behind an `Arc` by every pipeline run so that failures across
/// different customers' runs accumulate on the same breaker.
pub struct BreakerRegistry {
    breakers: DashMap<String, Arc<CircuitBreaker>>,
    failure_threshold: u32,
    cooldown: Duration,
}

impl BreakerRegistry {
    pub fn new(failure_threshold: u32, cooldown: Duration) -> Self {
        Self {
            breakers: DashMap::new(),
            failure_threshold,
            cooldown,
        }
    }

    /// Fetch or lazily create the breaker for a source identifier
    pub fn breaker(&self, source: &str) -> Arc<CircuitBreaker> {
        self.breakers
            .entry(source.to_string())
            .or_insert_with(|| {
                Arc::new(CircuitBreaker::new(
                    source,
                    self.failure_threshold,
                    self.cooldown,
                ))
            })
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn failing() -> impl Future<Output = Result<(), SourceError>> {
        async {
            Err(SourceError::Failed {
                source_name: "test".to_string(),
                reason: "boom".to_string(),
            })
        }
    }

    #[tokio::test]
    async fn test_opens_after_threshold_failures() {
        let breaker = CircuitBreaker::new("usage-trends", 5, Duration::from_secs(60));

        for _ in 0..5 {
            let result = breaker.call(failing).await;
            assert!(result.is_err());
        }

        assert_eq!(breaker.state(), CircuitState::Open);
    }

    #[tokio::test]
    async fn test_open_rejects_without_invoking_source() {
        let breaker = CircuitBreaker::new("usage-trends", 5, Duration::from_secs(60));
        for _ in 0..5 {
            let _ = breaker.call(failing).await;
        }
        assert_eq!(breaker.state(), CircuitState::Open);

        // 6th call inside the cool-down must fail fast, source untouched
        let invoked = AtomicUsize::new(0);
        let result = breaker
            .call(|| async {
                invoked.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .await;

        assert!(matches!(result, Err(SourceError::Unavailable { .. })));
        assert_eq!(invoked.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_success_resets_consecutive_failures() {
        let breaker = CircuitBreaker::new("knowledge", 5, Duration::from_secs(60));

        for _ in 0..4 {
            let _ = breaker.call(failing).await;
        }
        assert_eq!(breaker.failure_count(), 4);

        breaker.call(|| async { Ok(()) }).await.unwrap();
        assert_eq!(breaker.failure_count(), 0);
        assert_eq!(breaker.state(), CircuitState::Closed);

        // Four more failures still don't open it
        for _ in 0..4 {
            let _ = breaker.call(failing).await;
        }
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_half_open_probe_closes_on_success() {
        let breaker = CircuitBreaker::new("usage-trends", 2, Duration::from_millis(10));
        for _ in 0..2 {
            let _ = breaker.call(failing).await;
        }
        assert_eq!(breaker.state(), CircuitState::Open);

        tokio::time::sleep(Duration::from_millis(20)).await;

        breaker.call(|| async { Ok(()) }).await.unwrap();
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(breaker.failure_count(), 0);
    }

    #[tokio::test]
    async fn test_half_open_probe_reopens_on_failure() {
        let breaker = CircuitBreaker::new("usage-trends", 2, Duration::from_millis(10));
        for _ in 0..2 {
            let _ = breaker.call(failing).await;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;

        let result = breaker.call(failing).await;
        assert!(result.is_err());
        assert_eq!(breaker.state(), CircuitState::Open);

        // Cool-down restarted: immediate retry is rejected
        let result = breaker.call(|| async { Ok(()) }).await;
        assert!(matches!(result, Err(SourceError::Unavailable { .. })));
    }

    #[tokio::test]
    async fn test_concurrent_failures_accumulate_on_shared_breaker() {
        let registry = Arc::new(BreakerRegistry::new(5, Duration::from_secs(60)));

        // Five concurrent pipeline runs each fail once against the same source
        let mut handles = Vec::new();
        for _ in 0..5 {
            let registry = registry.clone();
            handles.push(tokio::spawn(async move {
                let breaker = registry.breaker("usage-trends");
                let _ = breaker.call(failing).await;
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(registry.breaker("usage-trends").state(), CircuitState::Open);
    }

    #[tokio::test]
    async fn test_registry_keeps_sources_independent() {
        let registry = BreakerRegistry::new(2, Duration::from_secs(60));

        let usage = registry.breaker("usage-trends");
        for _ in 0..2 {
            let _ = usage.call(failing).await;
        }

        assert_eq!(registry.breaker("usage-trends").state(), CircuitState::Open);
        assert_eq!(registry.breaker("knowledge").state(), CircuitState::Closed);
    }
}
