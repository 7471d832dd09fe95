//! External source traits and the resilient gateway facade.
//!
//! Stages never talk to a source directly: every call goes through
//! [`Gateway::call_or_degraded`], which routes it through the source's
//! circuit breaker with a per-call timeout and converts any failure into a
//! typed degraded result. Downstream stages continue with reduced evidence
//! instead of seeing an error.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};

use domain::{CustomerId, EngineConfig, KnowledgeSnippet, SourceError, UsageRecord};

use crate::breaker::{BreakerRegistry, CircuitBreaker, CircuitState};

/// Source identifier for the usage-trend source
pub const USAGE_SOURCE: &str = "usage-trends";
/// Source identifier for the knowledge source
pub const KNOWLEDGE_SOURCE: &str = "knowledge";

/// Usage-trend source: aggregated feature usage over a lookback window
#[async_trait]
pub trait UsageSource: Send + Sync {
    async fn get_trends(
        &self,
        customer_id: CustomerId,
        days: u32,
    ) -> Result<Vec<UsageRecord>, SourceError>;
}

/// Knowledge source: relevance-ranked snippet search
#[async_trait]
pub trait KnowledgeSource: Send + Sync {
    async fn search(&self, query: &str, top_k: usize)
    -> Result<Vec<KnowledgeSnippet>, SourceError>;
}

/// Outcome of a gateway-routed call: either the live value, or the typed
/// fallback with `degraded` set
#[derive(Debug, Clone)]
pub struct SourceResult<T> {
    pub value: T,
    pub degraded: bool,
}

impl<T> SourceResult<T> {
    pub fn fresh(value: T) -> Self {
        Self {
            value,
            degraded: false,
        }
    }

    pub fn fallback(value: T) -> Self {
        Self {
            value,
            degraded: true,
        }
    }
}

/// Routes source calls through per-source circuit breakers with timeouts
pub struct Gateway {
    breakers: BreakerRegistry,
    call_timeout: Duration,
}

impl Gateway {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            breakers: BreakerRegistry::new(
                config.failure_threshold,
                Duration::from_secs(config.breaker_cooldown_secs),
            ),
            call_timeout: Duration::from_millis(config.source_call_timeout_ms),
        }
    }

    /// Breaker handle for a source, mainly for observability and tests
    pub fn breaker(&self, source_id: &str) -> Arc<CircuitBreaker> {
        self.breakers.breaker(source_id)
    }

    pub fn breaker_state(&self, source_id: &str) -> CircuitState {
        self.breakers.breaker(source_id).state()
    }

    /// Run `op` through the source's breaker with the per-call timeout.
    /// A timeout counts as a failure toward the breaker threshold.
    pub async fn try_call<T, F, Fut>(&self, source_id: &str, op: F) -> Result<T, SourceError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, SourceError>>,
    {
        let breaker = self.breakers.breaker(source_id);
        let timeout = self.call_timeout;
        let source = source_id.to_string();

        breaker
            .call(|| async move {
                match tokio::time::timeout(timeout, op()).await {
                    Ok(result) => result,
                    Err(_) => Err(SourceError::Timeout {
                        source_name: source,
                        timeout_ms: timeout.as_millis() as u64,
                    }),
                }
            })
            .await
    }

    /// Like [`try_call`], but failures become a degraded `fallback` value
    /// instead of an error. This is the graceful-degradation contract every
    /// stage relies on.
    ///
    /// [`try_call`]: Self::try_call
    pub async fn call_or_degraded<T, F, Fut>(&self, source_id: &str, fallback: T, op: F) -> SourceResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, SourceError>>,
    {
        match self.try_call(source_id, op).await {
            Ok(value) => {
                debug!(source = source_id, "Source call succeeded");
                SourceResult::fresh(value)
            }
            Err(err) => {
                warn!(source = source_id, error = %err, "Source call degraded to fallback");
                SourceResult::fallback(fallback)
            }
        }
    }
}
