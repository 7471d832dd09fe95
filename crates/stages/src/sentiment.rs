//! Sentiment stage: aggregate customer mood from interaction history.
//!
//! Runs concurrently with the retrieval stage and has no dependency on its
//! output. The score is a recency-weighted mean of per-interaction sentiment
//! values; the factors name what drove it so the reasoning stage and the
//! audit trail can explain suppression decisions.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use tracing::info;

use domain::{CustomerId, EngineConfig, InteractionEvent, ResolutionState};

use crate::types::{OpenIssue, SentimentAssessment, SentimentTrend};

/// Interaction-history collaborator, implemented by the hosting service
#[async_trait]
pub trait InteractionStore: Send + Sync {
    async fn get_recent(
        &self,
        customer_id: CustomerId,
        months: u32,
    ) -> anyhow::Result<Vec<InteractionEvent>>;
}

/// Days of history considered "recent" for open issues and confidence
const RECENT_DAYS: i64 = 30;
/// Weight decay applied per step back in time
const RECENCY_DECAY: f64 = 0.9;
/// Sentiment delta between oldest and newest thirds that counts as a trend
const TREND_BAND: f64 = 0.2;

/// Second pipeline stage: computes the sentiment assessment
pub struct SentimentStage {
    store: Arc<dyn InteractionStore>,
    lookback_months: u32,
}

impl SentimentStage {
    pub fn new(store: Arc<dyn InteractionStore>, config: &EngineConfig) -> Self {
        Self {
            store,
            lookback_months: config.interaction_lookback_months,
        }
    }

    /// Assess a customer's sentiment over the lookback window.
    /// No history yields the neutral assessment, not an error.
    pub async fn run(&self, customer_id: CustomerId) -> anyhow::Result<SentimentAssessment> {
        let interactions = self
            .store
            .get_recent(customer_id, self.lookback_months)
            .await?;

        if interactions.is_empty() {
            info!(customer = %customer_id, "No interaction history, neutral sentiment");
            return Ok(SentimentAssessment::neutral());
        }

        let score = weighted_score(&interactions);
        let trend = detect_trend(&interactions);
        let factors = identify_factors(&interactions, trend);
        let open_issues = extract_open_issues(&interactions);
        let confidence = assessment_confidence(&interactions);

        info!(
            customer = %customer_id,
            score,
            confidence,
            interactions = interactions.len(),
            open_issues = open_issues.len(),
            "Sentiment stage complete"
        );

        Ok(SentimentAssessment {
            score,
            trend,
            factors,
            open_issues,
            interaction_count: interactions.len(),
            confidence,
        })
    }
}

/// Recency-weighted mean: most recent event has weight 1.0, each older event
/// decays by 0.9. Clamped to [-1, 1].
fn weighted_score(interactions: &[InteractionEvent]) -> f64 {
    let mut sorted: Vec<&InteractionEvent> = interactions.iter().collect();
    sorted.sort_by(|a, b| b.occurred_at.cmp(&a.occurred_at));

    let mut weighted_sum = 0.0;
    let mut total_weight = 0.0;
    for (i, event) in sorted.iter().enumerate() {
        let weight = RECENCY_DECAY.powi(i as i32);
        weighted_sum += event.sentiment * weight;
        total_weight += weight;
    }

    if total_weight == 0.0 {
        return 0.0;
    }
    (weighted_sum / total_weight).clamp(-1.0, 1.0)
}

/// Compare the mean of the three newest events against the three oldest
fn detect_trend(interactions: &[InteractionEvent]) -> SentimentTrend {
    if interactions.len() < 3 {
        return SentimentTrend::Stable;
    }

    let mut sorted: Vec<&InteractionEvent> = interactions.iter().collect();
    sorted.sort_by(|a, b| a.occurred_at.cmp(&b.occurred_at));

    let older: f64 = sorted.iter().take(3).map(|e| e.sentiment).sum::<f64>() / 3.0;
    let recent: f64 = sorted.iter().rev().take(3).map(|e| e.sentiment).sum::<f64>() / 3.0;

    if recent > older + TREND_BAND {
        SentimentTrend::Improving
    } else if recent < older - TREND_BAND {
        SentimentTrend::Declining
    } else {
        SentimentTrend::Stable
    }
}

fn identify_factors(interactions: &[InteractionEvent], trend: SentimentTrend) -> Vec<String> {
    let mut factors = Vec::new();

    let unresolved = interactions
        .iter()
        .filter(|e| e.resolution != ResolutionState::Resolved)
        .count();
    if unresolved > 0 {
        factors.push(format!("unresolved_issues_count_{unresolved}"));
    }

    if interactions
        .iter()
        .any(|e| e.resolution == ResolutionState::Escalated)
    {
        factors.push("recent_escalation".to_string());
    }

    match trend {
        SentimentTrend::Improving => factors.push("improving_sentiment".to_string()),
        SentimentTrend::Declining => factors.push("declining_sentiment".to_string()),
        SentimentTrend::Stable => {}
    }

    if interactions.len() > 10 {
        factors.push("high_interaction_frequency".to_string());
    }

    let mean: f64 =
        interactions.iter().map(|e| e.sentiment).sum::<f64>() / interactions.len() as f64;
    if mean > 0.5 {
        factors.push("positive_support_history".to_string());
    } else if mean < -0.3 {
        factors.push("negative_support_history".to_string());
    }

    factors
}

/// Unresolved or escalated interactions from the recent window
fn extract_open_issues(interactions: &[InteractionEvent]) -> Vec<OpenIssue> {
    let cutoff = Utc::now() - ChronoDuration::days(RECENT_DAYS);
    interactions
        .iter()
        .filter(|e| {
            e.occurred_at > cutoff
                && matches!(
                    e.resolution,
                    ResolutionState::Pending | ResolutionState::Escalated
                )
        })
        .map(|e| OpenIssue {
            event_id: e.id,
            topics: e.topics.clone(),
            state: e.resolution,
            occurred_at: e.occurred_at,
        })
        .collect()
}

/// Confidence = sample size (<=0.5, count/20) + recency (<=0.3,
/// recent-30d count/10) + consistency (<=0.2, shrinking with variance)
fn assessment_confidence(interactions: &[InteractionEvent]) -> f64 {
    let sample_score = (interactions.len() as f64 / 20.0).min(0.5);

    let cutoff = Utc::now() - ChronoDuration::days(RECENT_DAYS);
    let recent_count = interactions.iter().filter(|e| e.occurred_at > cutoff).count();
    let recency_score = (recent_count as f64 / 10.0).min(0.3);

    let consistency_score = if interactions.len() > 1 {
        let mean: f64 =
            interactions.iter().map(|e| e.sentiment).sum::<f64>() / interactions.len() as f64;
        let variance: f64 = interactions
            .iter()
            .map(|e| (e.sentiment - mean).powi(2))
            .sum::<f64>()
            / interactions.len() as f64;
        (0.2 - variance * 0.2).max(0.0)
    } else {
        0.1
    };

    (sample_score + recency_score + consistency_score).min(1.0)
}
