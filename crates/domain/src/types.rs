//! Core domain types for the recommendation engine.
//!
//! This module defines the entities shared across the pipeline:
//! - Identifier aliases for domain clarity (CustomerId, RecommendationId)
//! - Input records fetched from external sources (usage, knowledge, interactions)
//! - Persistent outputs (Recommendation, StageContribution)
//! - The result envelope returned to callers (RecommendationSet)

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

// =============================================================================
// Identifier Aliases
// =============================================================================
// These make the domain clearer and prevent mixing up customers with runs

/// Unique identifier for a customer account
pub type CustomerId = Uuid;

/// Unique identifier for a persisted recommendation
pub type RecommendationId = Uuid;

/// Unique identifier for a stage contribution record
pub type ContributionId = Uuid;

// =============================================================================
// Customer Profile
// =============================================================================

/// Minimal customer profile read from the directory collaborator.
///
/// Only the fields the pipeline needs: the plan tier feeds upsell
/// tier-jump estimation, the name feeds log lines and descriptions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CustomerProfile {
    pub id: CustomerId,
    pub name: String,
    /// Current subscription tier, 1 = entry plan.
    pub plan_tier: u8,
    pub industry: String,
}

// =============================================================================
// Usage & Knowledge Inputs
// =============================================================================

/// Usage intensity classification for a feature over the lookback window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IntensityTier {
    Unused,
    Low,
    Medium,
    High,
}

/// Aggregated usage of a single feature, as reported by the usage-trend source
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageRecord {
    pub feature: String,
    pub usage_count: u32,
    pub last_used: DateTime<Utc>,
    pub intensity: IntensityTier,
    /// Aggregation period label, e.g. "weekly"
    pub window: String,
}

/// A knowledge-base snippet returned by the knowledge source
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeSnippet {
    pub id: String,
    pub title: String,
    pub text: String,
    /// Relevance to the search query, in [0, 1]
    pub relevance: f64,
    pub category: String,
    pub source_ref: String,
    pub retrieved_at: DateTime<Utc>,
}

// =============================================================================
// Interaction History
// =============================================================================

/// Channel of a customer interaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventType {
    Ticket,
    Chat,
    Call,
}

/// Outcome state of an interaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResolutionState {
    Resolved,
    Pending,
    Escalated,
}

/// A single historical support interaction
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InteractionEvent {
    pub id: Uuid,
    pub customer_id: CustomerId,
    pub kind: EventType,
    pub occurred_at: DateTime<Utc>,
    /// Sentiment of this interaction, in [-1, 1]
    pub sentiment: f64,
    pub topics: Vec<String>,
    pub resolution: ResolutionState,
    pub duration_secs: Option<u32>,
}

// =============================================================================
// Recommendations
// =============================================================================

/// Category of a recommendation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RecommendationCategory {
    Adoption,
    Upsell,
}

/// Outcome state machine for a delivered recommendation.
///
/// The pipeline only ever creates recommendations in `Pending`; all later
/// transitions are driven by the outcome-tracking collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OutcomeState {
    Pending,
    Delivered,
    Accepted,
    Declined,
    Excluded,
}

impl OutcomeState {
    /// Whether this state admits no further transitions
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Accepted | Self::Declined | Self::Excluded)
    }

    /// Whether the state machine allows moving from `self` to `next`.
    ///
    /// Pending -> Delivered | Excluded
    /// Delivered -> Accepted | Declined | Excluded
    pub fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Delivered)
                | (Self::Pending, Self::Excluded)
                | (Self::Delivered, Self::Accepted)
                | (Self::Delivered, Self::Declined)
                | (Self::Delivered, Self::Excluded)
        )
    }
}

/// Reference to a piece of source data backing a recommendation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvidenceRef {
    pub source_type: String,
    pub source_id: String,
    pub description: String,
}

/// A validated, persistent recommendation.
///
/// Invariant: `confidence` is in [0.6, 1.0] for any recommendation that
/// reaches a caller; sub-threshold candidates never survive validation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Recommendation {
    pub id: RecommendationId,
    pub customer_id: CustomerId,
    pub category: RecommendationCategory,
    /// The feature or offering this suggestion targets; duplicate
    /// suppression matches on (category, target).
    pub target: String,
    pub description: String,
    pub confidence: f64,
    /// Structured per-stage reasoning summary, referencing the four
    /// contribution records written for the run that produced this.
    pub reasoning_chain: Value,
    pub evidence: Vec<EvidenceRef>,
    pub generated_at: DateTime<Utc>,
    pub outcome: OutcomeState,
    pub delivered_by: Option<String>,
    pub outcome_at: Option<DateTime<Utc>>,
}

// =============================================================================
// Stage Contributions (audit trail)
// =============================================================================

/// The pipeline stage that produced a contribution record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StageType {
    Retrieval,
    Sentiment,
    Reasoning,
    Validation,
}

/// Write-once audit record of one stage's execution within a pipeline run.
///
/// `recommendation_id` stays `None` until the run's recommendations exist,
/// then is backfilled before the single persistence write.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageContribution {
    pub id: ContributionId,
    pub recommendation_id: Option<RecommendationId>,
    pub stage: StageType,
    pub input: Value,
    pub output: Value,
    pub confidence: f64,
    pub elapsed_ms: u64,
    pub created_at: DateTime<Utc>,
}

// =============================================================================
// Pipeline Result
// =============================================================================

/// Counts from the validation stage, carried in run metadata
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ValidationSummary {
    pub total_candidates: usize,
    pub suppressed: usize,
    pub safety_blocked: usize,
    pub low_confidence: usize,
    pub over_cap: usize,
    pub validated: usize,
}

/// Execution metadata for a single pipeline run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunMetadata {
    pub run_id: Uuid,
    pub customer_id: CustomerId,
    pub parallel_phase_ms: u64,
    pub reasoning_ms: u64,
    pub validation_ms: u64,
    pub latency_target_met: bool,
    pub validation_summary: ValidationSummary,
}

/// Final result returned to the caller of the orchestrator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecommendationSet {
    pub adoption: Vec<Recommendation>,
    pub upsell: Vec<Recommendation>,
    pub generation_time_ms: u64,
    /// True when any stage operated on fallback or partial evidence
    pub degraded: bool,
    pub metadata: RunMetadata,
}
