//! Ephemeral types flowing between pipeline stages.
//!
//! None of these are persisted: an `EvidenceBundle` and a
//! `SentimentAssessment` are owned by the single run that produced them and
//! discarded once reasoning consumes them; a `Candidate` either becomes a
//! persistent `Recommendation` after validation or is dropped with its
//! suppression reason recorded in the stage snapshots.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use domain::{EvidenceRef, KnowledgeSnippet, RecommendationCategory, ResolutionState, UsageRecord};

// =============================================================================
// Retrieval Output
// =============================================================================

/// Merged usage + knowledge evidence produced by the retrieval stage
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvidenceBundle {
    pub customer_id: Uuid,
    pub usage: Vec<UsageRecord>,
    pub snippets: Vec<KnowledgeSnippet>,
    /// Combined confidence in the evidence, in [0, 1]
    pub confidence: f64,
    pub usage_degraded: bool,
    pub knowledge_degraded: bool,
}

impl EvidenceBundle {
    /// Whether either source fell back to degraded data
    pub fn degraded(&self) -> bool {
        self.usage_degraded || self.knowledge_degraded
    }
}

// =============================================================================
// Sentiment Output
// =============================================================================

/// Direction of the customer's sentiment over the lookback window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SentimentTrend {
    Improving,
    Stable,
    Declining,
}

/// An unresolved or escalated interaction from the recent window
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenIssue {
    pub event_id: Uuid,
    pub topics: Vec<String>,
    pub state: ResolutionState,
    pub occurred_at: DateTime<Utc>,
}

/// Aggregate sentiment computed from interaction history
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SentimentAssessment {
    /// Recency-weighted mean sentiment, in [-1, 1]
    pub score: f64,
    pub trend: SentimentTrend,
    /// Named contributing factors, e.g. "recent_escalation"
    pub factors: Vec<String>,
    pub open_issues: Vec<OpenIssue>,
    pub interaction_count: usize,
    pub confidence: f64,
}

impl SentimentAssessment {
    /// Neutral assessment used when a customer has no interaction history
    pub fn neutral() -> Self {
        Self {
            score: 0.0,
            trend: SentimentTrend::Stable,
            factors: vec!["no_interaction_history".to_string()],
            open_issues: Vec::new(),
            interaction_count: 0,
            confidence: 0.0,
        }
    }
}

// =============================================================================
// Candidates
// =============================================================================

/// Why a candidate was removed before reaching the caller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SuppressionReason {
    /// Exact match declined within the suppression window
    RecentlyDeclined { days_ago: i64 },
    /// Exact match accepted within the suppression window
    RecentlyAccepted { days_ago: i64 },
    /// Exact match still pending or in delivery
    AlreadyInFlight,
    /// Upsell implying too large a jump while sentiment is negative
    NegativeSentiment,
    /// Content-safety check failed
    SafetyBlocked { category: String },
    /// Confidence below the validation threshold
    LowConfidence { confidence: f64 },
}

/// A not-yet-validated recommendation with a provisional confidence
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Candidate {
    pub category: RecommendationCategory,
    /// Feature or offering this candidate targets; exact-duplicate
    /// matching compares (category, target)
    pub target: String,
    pub description: String,
    pub confidence: f64,
    pub evidence: Vec<EvidenceRef>,
    /// Raw evidence signal used as the first ranking tie-breaker
    pub evidence_strength: f64,
    /// Plan tiers this upsell would move the customer up; 0 for adoption
    pub tier_jump: u32,
    /// Estimated monthly price delta implied; 0 for adoption
    pub price_delta: f64,
    /// Generation order, the final ranking tie-breaker
    pub seq: usize,
    pub suppression: Option<SuppressionReason>,
    /// Caller-visible note, e.g. "previously suggested on 2026-07-01"
    pub annotation: Option<String>,
}

impl Candidate {
    /// Build an adoption candidate with no upsell signals
    pub fn adoption(target: impl Into<String>, description: impl Into<String>, confidence: f64) -> Self {
        Self {
            category: RecommendationCategory::Adoption,
            target: target.into(),
            description: description.into(),
            confidence,
            evidence: Vec::new(),
            evidence_strength: 0.0,
            tier_jump: 0,
            price_delta: 0.0,
            seq: 0,
            suppression: None,
            annotation: None,
        }
    }

    /// Build an upsell candidate carrying its tier-jump and price signals
    pub fn upsell(
        target: impl Into<String>,
        description: impl Into<String>,
        confidence: f64,
        tier_jump: u32,
        price_delta: f64,
    ) -> Self {
        Self {
            category: RecommendationCategory::Upsell,
            target: target.into(),
            description: description.into(),
            confidence,
            evidence: Vec::new(),
            evidence_strength: 0.0,
            tier_jump,
            price_delta,
            seq: 0,
            suppression: None,
            annotation: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_neutral_assessment() {
        let assessment = SentimentAssessment::neutral();
        assert_eq!(assessment.score, 0.0);
        assert_eq!(assessment.confidence, 0.0);
        assert_eq!(assessment.trend, SentimentTrend::Stable);
        assert!(assessment.factors.contains(&"no_interaction_history".to_string()));
    }

    #[test]
    fn test_bundle_degraded_flag() {
        let bundle = EvidenceBundle {
            customer_id: Uuid::new_v4(),
            usage: Vec::new(),
            snippets: Vec::new(),
            confidence: 0.0,
            usage_degraded: true,
            knowledge_degraded: false,
        };
        assert!(bundle.degraded());
    }
}
