//! Engine configuration.
//!
//! Every temporal window, threshold, and cap the pipeline applies is policy
//! held here rather than a constant buried in a stage. Defaults match the
//! production values; tests and the CLI override individual knobs with the
//! builder methods.

use serde::{Deserialize, Serialize};

/// Tunable policy for the whole pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Overall pipeline deadline in milliseconds
    pub deadline_ms: u64,
    /// Per-call timeout for gateway-routed source calls
    pub source_call_timeout_ms: u64,

    /// Consecutive failures before a breaker opens
    pub failure_threshold: u32,
    /// Seconds an open breaker waits before allowing a probe
    pub breaker_cooldown_secs: u64,

    /// TTL for profile-shaped cache entries (changes with user interaction)
    pub profile_ttl_secs: u64,
    /// TTL for aggregated usage-trend cache entries (changes slowly)
    pub trends_ttl_secs: u64,

    /// Usage lookback window in days
    pub usage_lookback_days: u32,
    /// Interaction-history lookback in months
    pub interaction_lookback_months: u32,
    /// Prior-recommendation lookback in months
    pub prior_lookback_months: u32,

    /// Days after a decline during which an exact match is suppressed
    pub declined_window_days: i64,
    /// Days after an acceptance during which an exact match is suppressed
    pub accepted_window_days: i64,
    /// Days within which a near-match is annotated rather than dropped
    pub near_match_window_days: i64,
    /// Token-set Jaccard similarity at or above which two descriptions
    /// count as a near match
    pub near_match_threshold: f64,

    /// Sentiment score below which aggressive upsells are suppressed
    pub sentiment_gate: f64,
    /// Largest tier jump an upsell may imply under negative sentiment
    pub max_tier_jump: u32,
    /// Largest estimated price delta an upsell may imply under negative
    /// sentiment
    pub price_delta_ceiling: f64,

    /// Minimum confidence for a candidate to survive validation
    pub min_confidence: f64,
    /// Most adoption recommendations returned per run
    pub max_adoption: usize,
    /// Most upsell recommendations returned per run
    pub max_upsell: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            deadline_ms: 2000,
            source_call_timeout_ms: 500,
            failure_threshold: 5,
            breaker_cooldown_secs: 60,
            profile_ttl_secs: 300,
            trends_ttl_secs: 3600,
            usage_lookback_days: 90,
            interaction_lookback_months: 12,
            prior_lookback_months: 12,
            declined_window_days: 90,
            accepted_window_days: 30,
            near_match_window_days: 30,
            near_match_threshold: 0.8,
            sentiment_gate: -0.3,
            max_tier_jump: 1,
            price_delta_ceiling: 500.0,
            min_confidence: 0.6,
            max_adoption: 5,
            max_upsell: 3,
        }
    }
}

impl EngineConfig {
    /// Configure the overall pipeline deadline (default: 2000ms)
    pub fn with_deadline_ms(mut self, deadline_ms: u64) -> Self {
        self.deadline_ms = deadline_ms;
        self
    }

    /// Configure the breaker failure threshold (default: 5)
    pub fn with_failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold;
        self
    }

    /// Configure the breaker cool-down (default: 60s)
    pub fn with_breaker_cooldown_secs(mut self, secs: u64) -> Self {
        self.breaker_cooldown_secs = secs;
        self
    }

    /// Configure the minimum surviving confidence (default: 0.6)
    pub fn with_min_confidence(mut self, min: f64) -> Self {
        self.min_confidence = min;
        self
    }

    /// Configure the near-match similarity threshold (default: 0.8)
    pub fn with_near_match_threshold(mut self, threshold: f64) -> Self {
        self.near_match_threshold = threshold;
        self
    }

    /// Configure per-category result caps (defaults: 5 adoption, 3 upsell)
    pub fn with_category_caps(mut self, max_adoption: usize, max_upsell: usize) -> Self {
        self.max_adoption = max_adoption;
        self.max_upsell = max_upsell;
        self
    }
}
