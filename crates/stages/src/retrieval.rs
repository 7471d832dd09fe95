//! Retrieval stage: usage trends + grounding knowledge, fetched concurrently.
//!
//! ## Algorithm
//! 1. Fetch usage trends (gateway + long-TTL cache) and run a broad
//!    knowledge search (gateway) concurrently, each with a per-call timeout
//! 2. When usage data arrived, run a refined knowledge search built from the
//!    observed intensity mix, merge and deduplicate by snippet id
//! 3. Compute a combined confidence from usage availability, snippet
//!    relevance, and pattern clarity
//!
//! If either source degrades the stage continues with what it has; if both
//! degrade it still returns a maximally uncertain bundle rather than
//! aborting the pipeline.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info};

use domain::{CustomerId, EngineConfig, IntensityTier, KnowledgeSnippet, UsageRecord};
use gateway::{Gateway, KNOWLEDGE_SOURCE, KnowledgeSource, ReadThroughCache, USAGE_SOURCE, UsageSource};

use crate::types::EvidenceBundle;

/// Broad query for the first knowledge pass, before usage data narrows it
const BASE_KNOWLEDGE_QUERY: &str = "feature adoption best practices troubleshooting";
const BASE_TOP_K: usize = 10;
const REFINED_TOP_K: usize = 5;

/// Cache key for usage trends: the lookback window is part of the identity
pub type TrendsKey = (CustomerId, u32);

/// First pipeline stage: builds the evidence bundle
pub struct RetrievalStage {
    gateway: Arc<Gateway>,
    trends_cache: Arc<ReadThroughCache<TrendsKey, Vec<UsageRecord>>>,
    usage: Arc<dyn UsageSource>,
    knowledge: Arc<dyn KnowledgeSource>,
    trends_ttl: Duration,
}

impl RetrievalStage {
    pub fn new(
        gateway: Arc<Gateway>,
        usage: Arc<dyn UsageSource>,
        knowledge: Arc<dyn KnowledgeSource>,
        config: &EngineConfig,
    ) -> Self {
        Self {
            gateway,
            trends_cache: Arc::new(ReadThroughCache::new()),
            usage,
            knowledge,
            trends_ttl: Duration::from_secs(config.trends_ttl_secs),
        }
    }

    /// Fetch evidence for a customer over the lookback window.
    ///
    /// Never fails: source trouble shows up as `usage_degraded` /
    /// `knowledge_degraded` and a lower combined confidence.
    pub async fn run(&self, customer_id: CustomerId, days: u32) -> EvidenceBundle {
        let (usage_result, knowledge_result) = tokio::join!(
            self.fetch_usage(customer_id, days),
            self.fetch_knowledge(BASE_KNOWLEDGE_QUERY, BASE_TOP_K),
        );

        let usage = usage_result.value;
        let mut snippets = knowledge_result.value;

        // Second, narrower pass once we know which features matter
        if !usage.is_empty() {
            let refined_query = build_search_query(&usage);
            debug!(customer = %customer_id, query = %refined_query, "Refined knowledge search");
            if let Ok(refined) = self
                .gateway
                .try_call(KNOWLEDGE_SOURCE, || {
                    self.knowledge.search(&refined_query, REFINED_TOP_K)
                })
                .await
            {
                snippets = dedup_snippets(snippets, refined);
            }
        }

        let confidence = combined_confidence(&usage, &snippets);
        info!(
            customer = %customer_id,
            usage_records = usage.len(),
            snippets = snippets.len(),
            confidence,
            usage_degraded = usage_result.degraded,
            knowledge_degraded = knowledge_result.degraded,
            "Retrieval stage complete"
        );

        EvidenceBundle {
            customer_id,
            usage,
            snippets,
            confidence,
            usage_degraded: usage_result.degraded,
            knowledge_degraded: knowledge_result.degraded,
        }
    }

    async fn fetch_usage(
        &self,
        customer_id: CustomerId,
        days: u32,
    ) -> gateway::SourceResult<Vec<UsageRecord>> {
        // Only successful loads are cached, so a degraded fetch never
        // occupies the freshness window
        let loaded = self
            .trends_cache
            .get_or_load((customer_id, days), self.trends_ttl, || {
                self.gateway
                    .try_call(USAGE_SOURCE, || self.usage.get_trends(customer_id, days))
            })
            .await;

        match loaded {
            Ok(records) => gateway::SourceResult::fresh(records),
            Err(err) => {
                debug!(customer = %customer_id, error = %err, "Usage trends degraded");
                gateway::SourceResult::fallback(Vec::new())
            }
        }
    }

    async fn fetch_knowledge(
        &self,
        query: &str,
        top_k: usize,
    ) -> gateway::SourceResult<Vec<KnowledgeSnippet>> {
        self.gateway
            .call_or_degraded(KNOWLEDGE_SOURCE, Vec::new(), || {
                self.knowledge.search(query, top_k)
            })
            .await
    }
}

/// Build the refined query from the observed intensity mix
fn build_search_query(usage: &[UsageRecord]) -> String {
    let low: Vec<&str> = usage
        .iter()
        .filter(|u| matches!(u.intensity, IntensityTier::Unused | IntensityTier::Low))
        .map(|u| u.feature.as_str())
        .take(3)
        .collect();
    let high: Vec<&str> = usage
        .iter()
        .filter(|u| u.intensity == IntensityTier::High)
        .map(|u| u.feature.as_str())
        .take(2)
        .collect();

    let mut parts = Vec::new();
    if !low.is_empty() {
        parts.push(format!("adoption best practices for {}", low.join(" ")));
    }
    if !high.is_empty() {
        parts.push(format!(
            "upsell opportunities for customers using {}",
            high.join(" ")
        ));
    }
    if parts.is_empty() {
        parts.push("product adoption recommendations".to_string());
    }
    parts.join(" ")
}

/// Merge two result lists, keeping the first occurrence of each snippet id,
/// sorted by relevance descending
fn dedup_snippets(
    initial: Vec<KnowledgeSnippet>,
    refined: Vec<KnowledgeSnippet>,
) -> Vec<KnowledgeSnippet> {
    let mut seen: HashSet<String> = HashSet::new();
    let mut merged: Vec<KnowledgeSnippet> = Vec::new();

    for snippet in initial.into_iter().chain(refined) {
        if seen.insert(snippet.id.clone()) {
            merged.push(snippet);
        }
    }

    merged.sort_by(|a, b| {
        b.relevance
            .partial_cmp(&a.relevance)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    merged
}

/// Combined confidence in the bundle:
/// usage availability (<=0.4, count/10) + mean snippet relevance (<=0.4) +
/// pattern clarity (0.2 when both high and low intensity present, 0.1 when
/// any usage exists)
fn combined_confidence(usage: &[UsageRecord], snippets: &[KnowledgeSnippet]) -> f64 {
    if usage.is_empty() && snippets.is_empty() {
        return 0.0;
    }

    let usage_score = (usage.len() as f64 / 10.0).min(0.4);

    let knowledge_score = if snippets.is_empty() {
        0.0
    } else {
        let avg: f64 = snippets.iter().map(|s| s.relevance).sum::<f64>() / snippets.len() as f64;
        avg * 0.4
    };

    let pattern_score = if usage.is_empty() {
        0.0
    } else {
        let has_high = usage.iter().any(|u| u.intensity == IntensityTier::High);
        let has_low = usage
            .iter()
            .any(|u| matches!(u.intensity, IntensityTier::Unused | IntensityTier::Low));
        if has_high && has_low { 0.2 } else { 0.1 }
    };

    (usage_score + knowledge_score + pattern_score).min(1.0)
}
