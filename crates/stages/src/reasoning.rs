//! Reasoning stage: candidate generation, suppression, and ranking.
//!
//! ## Algorithm
//! 1. Generate raw candidates through the pluggable `CandidateGenerator`
//! 2. Apply duplicate suppression against the customer's prior
//!    recommendations: exact target matches recently declined, recently
//!    accepted, or still in flight are dropped; near matches and old
//!    declines are kept but annotated
//! 3. Apply sentiment-aware filtering: under negative sentiment, upsells
//!    implying more than a one-tier jump or a large price increase are
//!    dropped and adoption candidates are re-ranked ahead
//! 4. Rank survivors by confidence descending with a stable tie-break
//!    (evidence strength, then generation sequence), so repeated runs on
//!    identical input produce identical ordering

use std::sync::Arc;

use chrono::{DateTime, Utc};
use rayon::prelude::*;
use tracing::{debug, info};

use domain::{CustomerProfile, EngineConfig, OutcomeState, Recommendation, RecommendationCategory};

use crate::generator::CandidateGenerator;
use crate::similarity::token_set_jaccard;
use crate::types::{Candidate, EvidenceBundle, SentimentAssessment, SuppressionReason};

/// Ranked survivors plus the candidates removed with their reasons
#[derive(Debug, Clone)]
pub struct ReasoningOutcome {
    pub ranked: Vec<Candidate>,
    pub suppressed: Vec<Candidate>,
}

/// Third pipeline stage: turns evidence into an ordered candidate list
pub struct ReasoningStage {
    generator: Arc<dyn CandidateGenerator>,
    config: EngineConfig,
}

impl ReasoningStage {
    pub fn new(generator: Arc<dyn CandidateGenerator>, config: EngineConfig) -> Self {
        Self { generator, config }
    }

    pub fn run(
        &self,
        profile: &CustomerProfile,
        evidence: &EvidenceBundle,
        sentiment: &SentimentAssessment,
        prior: &[Recommendation],
        now: DateTime<Utc>,
    ) -> anyhow::Result<ReasoningOutcome> {
        let candidates = self.generator.generate(profile, evidence, sentiment);
        debug!(
            customer = %profile.id,
            candidates = candidates.len(),
            prior = prior.len(),
            "Reasoning stage starting"
        );

        // Each candidate's decision only reads the shared history, so the
        // scan parallelizes cleanly; collect() preserves input order
        let decided: Vec<Candidate> = candidates
            .into_par_iter()
            .map(|candidate| self.apply_history(candidate, prior, now))
            .collect();

        let (mut kept, mut suppressed): (Vec<Candidate>, Vec<Candidate>) =
            decided.into_iter().partition(|c| c.suppression.is_none());

        self.apply_sentiment_gate(&mut kept, &mut suppressed, sentiment);
        rank(&mut kept, sentiment.score < self.config.sentiment_gate);

        info!(
            customer = %profile.id,
            ranked = kept.len(),
            suppressed = suppressed.len(),
            sentiment = sentiment.score,
            "Reasoning stage complete"
        );

        Ok(ReasoningOutcome {
            ranked: kept,
            suppressed,
        })
    }

    /// Duplicate suppression against prior recommendations.
    ///
    /// Exact matches (same category + same target) consult the outcome:
    /// in-flight and recently declined/accepted drop the candidate; a
    /// decline older than the window re-suggests with an annotation.
    /// Near matches (token similarity at or above the threshold) within
    /// their window are kept but annotated with the prior date.
    fn apply_history(
        &self,
        mut candidate: Candidate,
        prior: &[Recommendation],
        now: DateTime<Utc>,
    ) -> Candidate {
        let exact: Vec<&Recommendation> = prior
            .iter()
            .filter(|p| {
                p.category == candidate.category
                    && p.target.eq_ignore_ascii_case(&candidate.target)
            })
            .collect();

        let mut old_decline: Option<i64> = None;
        for previous in &exact {
            let outcome_date = previous.outcome_at.unwrap_or(previous.generated_at);
            let days_ago = (now - outcome_date).num_days();

            match previous.outcome {
                OutcomeState::Pending | OutcomeState::Delivered => {
                    candidate.suppression = Some(SuppressionReason::AlreadyInFlight);
                    return candidate;
                }
                OutcomeState::Declined if days_ago < self.config.declined_window_days => {
                    candidate.suppression =
                        Some(SuppressionReason::RecentlyDeclined { days_ago });
                    return candidate;
                }
                OutcomeState::Accepted if days_ago < self.config.accepted_window_days => {
                    candidate.suppression =
                        Some(SuppressionReason::RecentlyAccepted { days_ago });
                    return candidate;
                }
                OutcomeState::Declined => {
                    old_decline = Some(days_ago.max(old_decline.unwrap_or(0)));
                }
                _ => {}
            }
        }

        if let Some(days_ago) = old_decline {
            candidate.annotation = Some(format!(
                "previously declined {days_ago} days ago; re-suggesting as customer context may have changed"
            ));
            return candidate;
        }

        // Near match: textual similarity against recent non-exact priors
        let near = prior
            .iter()
            .filter(|p| {
                (now - p.generated_at).num_days() < self.config.near_match_window_days
                    && !(p.category == candidate.category
                        && p.target.eq_ignore_ascii_case(&candidate.target))
            })
            .map(|p| (token_set_jaccard(&candidate.description, &p.description), p))
            .filter(|(similarity, _)| *similarity >= self.config.near_match_threshold)
            .max_by(|(a, pa), (b, pb)| {
                a.partial_cmp(b)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then_with(|| pa.generated_at.cmp(&pb.generated_at))
            });

        if let Some((_, previous)) = near {
            candidate.annotation = Some(format!(
                "previously suggested on {}",
                previous.generated_at.format("%Y-%m-%d")
            ));
        }

        candidate
    }

    /// Under negative sentiment, drop upsells that imply more than a
    /// one-tier jump or a price increase above the configured ceiling
    fn apply_sentiment_gate(
        &self,
        kept: &mut Vec<Candidate>,
        suppressed: &mut Vec<Candidate>,
        sentiment: &SentimentAssessment,
    ) {
        if sentiment.score >= self.config.sentiment_gate {
            return;
        }

        let mut surviving = Vec::with_capacity(kept.len());
        for mut candidate in kept.drain(..) {
            let aggressive = candidate.category == RecommendationCategory::Upsell
                && (candidate.tier_jump > self.config.max_tier_jump
                    || candidate.price_delta > self.config.price_delta_ceiling);
            if aggressive {
                debug!(
                    candidate = %candidate.target,
                    tier_jump = candidate.tier_jump,
                    price_delta = candidate.price_delta,
                    sentiment = sentiment.score,
                    "Suppressing aggressive upsell under negative sentiment"
                );
                candidate.suppression = Some(SuppressionReason::NegativeSentiment);
                suppressed.push(candidate);
            } else {
                surviving.push(candidate);
            }
        }
        *kept = surviving;
    }
}

/// Confidence descending, ties broken by evidence strength then generation
/// sequence. Under negative sentiment, adoption candidates are stably moved
/// ahead of the remaining upsells.
fn rank(candidates: &mut [Candidate], adoption_first: bool) {
    candidates.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| {
                b.evidence_strength
                    .partial_cmp(&a.evidence_strength)
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
            .then_with(|| a.seq.cmp(&b.seq))
    });

    if adoption_first {
        candidates.sort_by_key(|c| c.category != RecommendationCategory::Adoption);
    }
}
