//! Candidate generation capability.
//!
//! The reasoning stage depends only on the [`CandidateGenerator`] contract
//! (evidence + sentiment in, scored candidates out), so the scoring model is
//! swappable. The default [`HeuristicGenerator`] derives candidates directly
//! from the evidence:
//!
//! ## Algorithm
//! 1. Adoption: for each unused/low-intensity feature, find the best
//!    matching knowledge snippet and build a suggestion from it
//! 2. Upsell: when high-intensity usage exists, pair the strongest features
//!    with upsell-oriented snippets (at most 3)
//! 3. Confidence per candidate: snippet relevance (<=0.4) + usage clarity
//!    (<=0.3) + sentiment contribution (<=0.3), capped at 1.0
//! 4. Assign generation sequence numbers for deterministic tie-breaking

use tracing::debug;

use domain::{
    CustomerProfile, EvidenceRef, IntensityTier, KnowledgeSnippet, UsageRecord,
};

use crate::types::{Candidate, EvidenceBundle, SentimentAssessment};

/// Pluggable scoring capability consumed by the reasoning stage
pub trait CandidateGenerator: Send + Sync {
    /// Generate scored, unfiltered candidates from the run's evidence.
    /// Output order must be deterministic for identical input.
    fn generate(
        &self,
        profile: &CustomerProfile,
        evidence: &EvidenceBundle,
        sentiment: &SentimentAssessment,
    ) -> Vec<Candidate>;
}

/// Evidence-driven heuristic generator (the default capability)
pub struct HeuristicGenerator {
    /// Estimated monthly price of one plan-tier step, used for the upsell
    /// price-delta signal
    tier_step_price: f64,
    /// Most upsell opportunities generated per run
    max_upsell_opportunities: usize,
}

impl HeuristicGenerator {
    pub fn new() -> Self {
        Self {
            tier_step_price: 250.0,
            max_upsell_opportunities: 3,
        }
    }

    /// Configure the per-tier price estimate (default: 250.0)
    pub fn with_tier_step_price(mut self, price: f64) -> Self {
        self.tier_step_price = price;
        self
    }

    fn adoption_candidates(
        &self,
        evidence: &EvidenceBundle,
        sentiment_score: f64,
    ) -> Vec<Candidate> {
        let mut candidates = Vec::new();

        let low_adoption: Vec<&UsageRecord> = evidence
            .usage
            .iter()
            .filter(|u| matches!(u.intensity, IntensityTier::Unused | IntensityTier::Low))
            .collect();

        for feature in low_adoption {
            let Some(snippet) = best_matching_snippet(&feature.feature, &evidence.snippets) else {
                continue;
            };

            let description = adoption_text(&feature.feature, snippet, feature.usage_count);
            let confidence =
                candidate_confidence(snippet.relevance, feature.usage_count, sentiment_score);

            let mut candidate = Candidate::adoption(feature.feature.as_str(), description, confidence);
            candidate.evidence = vec![
                EvidenceRef {
                    source_type: "usage-trends".to_string(),
                    source_id: feature.feature.clone(),
                    description: format!("Usage data for {}", feature.feature),
                },
                EvidenceRef {
                    source_type: "knowledge".to_string(),
                    source_id: snippet.id.clone(),
                    description: snippet.title.clone(),
                },
            ];
            candidate.evidence_strength =
                snippet.relevance + (feature.usage_count as f64 / 100.0).min(1.0);
            candidates.push(candidate);
        }

        // Highest confidence first; equal confidences keep generation order
        candidates.sort_by(|a, b| {
            b.confidence
                .partial_cmp(&a.confidence)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        candidates
    }

    fn upsell_candidates(
        &self,
        profile: &CustomerProfile,
        evidence: &EvidenceBundle,
        sentiment_score: f64,
    ) -> Vec<Candidate> {
        let mut high_usage: Vec<&UsageRecord> = evidence
            .usage
            .iter()
            .filter(|u| u.intensity == IntensityTier::High)
            .collect();
        // Strongest engagement first, name as the stable tie-break
        high_usage.sort_by(|a, b| {
            b.usage_count
                .cmp(&a.usage_count)
                .then_with(|| a.feature.cmp(&b.feature))
        });

        let mut upsell_snippets: Vec<&KnowledgeSnippet> = evidence
            .snippets
            .iter()
            .filter(|s| {
                s.category.to_lowercase().contains("upsell")
                    || s.title.to_lowercase().contains("enterprise")
                    || s.text.to_lowercase().contains("premium")
            })
            .collect();
        upsell_snippets.sort_by(|a, b| {
            b.relevance
                .partial_cmp(&a.relevance)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.id.cmp(&b.id))
        });

        if high_usage.is_empty() || upsell_snippets.is_empty() {
            return Vec::new();
        }

        let top_features: Vec<&UsageRecord> = high_usage.into_iter().take(2).collect();
        let feature_names: Vec<String> =
            top_features.iter().map(|f| f.feature.clone()).collect();
        let total_usage: u32 = top_features.iter().map(|f| f.usage_count).sum();

        let mut candidates = Vec::new();
        for snippet in upsell_snippets.into_iter().take(self.max_upsell_opportunities) {
            let tier_jump = tier_jump_for(snippet, profile.plan_tier);
            let description = upsell_text(&feature_names, snippet);
            let confidence = candidate_confidence(snippet.relevance, total_usage, sentiment_score);

            let mut candidate = Candidate::upsell(
                snippet.title.as_str(),
                description,
                confidence,
                tier_jump,
                tier_jump as f64 * self.tier_step_price,
            );
            candidate.evidence = vec![
                EvidenceRef {
                    source_type: "usage-trends".to_string(),
                    source_id: "usage_aggregate".to_string(),
                    description: format!("High usage of {}", feature_names.join(", ")),
                },
                EvidenceRef {
                    source_type: "knowledge".to_string(),
                    source_id: snippet.id.clone(),
                    description: snippet.title.clone(),
                },
            ];
            candidate.evidence_strength =
                snippet.relevance + (total_usage as f64 / 100.0).min(1.0);
            candidates.push(candidate);
        }

        candidates
    }
}

impl Default for HeuristicGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl CandidateGenerator for HeuristicGenerator {
    fn generate(
        &self,
        profile: &CustomerProfile,
        evidence: &EvidenceBundle,
        sentiment: &SentimentAssessment,
    ) -> Vec<Candidate> {
        let mut candidates = self.adoption_candidates(evidence, sentiment.score);
        candidates.extend(self.upsell_candidates(profile, evidence, sentiment.score));

        for (seq, candidate) in candidates.iter_mut().enumerate() {
            candidate.seq = seq;
        }

        debug!(
            customer = %profile.id,
            count = candidates.len(),
            "Generated candidates from evidence"
        );
        candidates
    }
}

/// Best snippet for a feature: name appears in the title or text, or the
/// snippet is adoption-oriented. Highest relevance wins; the first listed
/// snippet wins ties so repeated runs agree.
fn best_matching_snippet<'a>(
    feature: &str,
    snippets: &'a [KnowledgeSnippet],
) -> Option<&'a KnowledgeSnippet> {
    let needle = feature.to_lowercase();
    snippets
        .iter()
        .filter(|s| {
            s.title.to_lowercase().contains(&needle)
                || s.text.to_lowercase().contains(&needle)
                || s.category.to_lowercase().contains("adoption")
        })
        .fold(None, |best: Option<&KnowledgeSnippet>, s| match best {
            Some(b) if b.relevance >= s.relevance => Some(b),
            _ => Some(s),
        })
}

/// Confidence = relevance (<=0.4) + usage clarity (<=0.3) + sentiment
/// contribution (<=0.3, from score mapped into [0, 1]), capped at 1.0
fn candidate_confidence(relevance: f64, usage_count: u32, sentiment_score: f64) -> f64 {
    let knowledge = relevance * 0.4;
    let usage = (usage_count as f64 / 100.0).min(0.3);
    let sentiment = ((sentiment_score + 1.0) / 2.0) * 0.3;
    (knowledge + usage + sentiment).min(1.0)
}

fn first_sentence(text: &str) -> &str {
    text.split('.').next().unwrap_or("").trim()
}

fn adoption_text(feature: &str, snippet: &KnowledgeSnippet, usage_count: u32) -> String {
    let insight = first_sentence(&snippet.text);
    if usage_count == 0 {
        format!(
            "Enable '{feature}' to unlock new capabilities. {insight}. \
             This feature is currently not activated for your account."
        )
    } else {
        format!(
            "Increase usage of '{feature}' to maximize value. \
             Your team has used it {usage_count} times recently. {insight}."
        )
    }
}

fn upsell_text(feature_names: &[String], snippet: &KnowledgeSnippet) -> String {
    let benefit = first_sentence(&snippet.text);
    let features = feature_names.join(" and ");
    format!(
        "Based on your high usage of {features}, consider upgrading to unlock \
         advanced capabilities. {benefit}. Your current engagement level \
         indicates strong ROI potential."
    )
}

/// Tiers above the customer's current plan this snippet's offering implies
fn tier_jump_for(snippet: &KnowledgeSnippet, current_tier: u8) -> u32 {
    let haystack = format!("{} {}", snippet.title, snippet.text).to_lowercase();
    let target_tier: u8 = if haystack.contains("enterprise") {
        3
    } else if haystack.contains("premium") {
        2
    } else {
        current_tier + 1
    };
    (target_tier as i32 - current_tier as i32).max(1) as u32
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use domain::RecommendationCategory;
    use uuid::Uuid;

    fn profile() -> CustomerProfile {
        CustomerProfile {
            id: Uuid::new_v4(),
            name: "Acme Manufacturing".to_string(),
            plan_tier: 1,
            industry: "Manufacturing".to_string(),
        }
    }

    fn usage(feature: &str, count: u32, intensity: IntensityTier) -> UsageRecord {
        UsageRecord {
            feature: feature.to_string(),
            usage_count: count,
            last_used: Utc::now(),
            intensity,
            window: "weekly".to_string(),
        }
    }

    fn snippet(id: &str, title: &str, text: &str, relevance: f64, category: &str) -> KnowledgeSnippet {
        KnowledgeSnippet {
            id: id.to_string(),
            title: title.to_string(),
            text: text.to_string(),
            relevance,
            category: category.to_string(),
            source_ref: format!("kb/{id}"),
            retrieved_at: Utc::now(),
        }
    }

    fn bundle(usage: Vec<UsageRecord>, snippets: Vec<KnowledgeSnippet>) -> EvidenceBundle {
        EvidenceBundle {
            customer_id: Uuid::new_v4(),
            usage,
            snippets,
            confidence: 0.8,
            usage_degraded: false,
            knowledge_degraded: false,
        }
    }

    #[test]
    fn test_unused_feature_yields_adoption_candidate() {
        let evidence = bundle(
            vec![usage("AdvancedReporting", 0, IntensityTier::Unused)],
            vec![snippet(
                "kb-1",
                "Getting started with AdvancedReporting",
                "AdvancedReporting surfaces trends across teams. Start with the weekly digest.",
                0.9,
                "Best Practices",
            )],
        );

        let candidates =
            HeuristicGenerator::new().generate(&profile(), &evidence, &SentimentAssessment::neutral());

        assert_eq!(candidates.len(), 1);
        let c = &candidates[0];
        assert_eq!(c.category, RecommendationCategory::Adoption);
        assert_eq!(c.target, "AdvancedReporting");
        assert!(c.description.contains("Enable 'AdvancedReporting'"));
        assert!(c.description.contains("not activated"));
        assert_eq!(c.evidence.len(), 2);
    }

    #[test]
    fn test_low_usage_feature_gets_increase_text() {
        let evidence = bundle(
            vec![usage("Alerts", 4, IntensityTier::Low)],
            vec![snippet("kb-2", "Alerting basics", "Alerts catch issues early.", 0.7, "Adoption")],
        );

        let candidates =
            HeuristicGenerator::new().generate(&profile(), &evidence, &SentimentAssessment::neutral());

        assert_eq!(candidates.len(), 1);
        assert!(candidates[0].description.contains("Increase usage of 'Alerts'"));
        assert!(candidates[0].description.contains("4 times"));
    }

    #[test]
    fn test_high_usage_yields_upsell_with_tier_signals() {
        let evidence = bundle(
            vec![
                usage("Dashboard", 80, IntensityTier::High),
                usage("Exports", 50, IntensityTier::High),
            ],
            vec![snippet(
                "kb-3",
                "Enterprise plan overview",
                "The enterprise plan removes seat limits. Premium support included.",
                0.85,
                "Upsell",
            )],
        );

        let candidates =
            HeuristicGenerator::new().generate(&profile(), &evidence, &SentimentAssessment::neutral());

        assert_eq!(candidates.len(), 1);
        let c = &candidates[0];
        assert_eq!(c.category, RecommendationCategory::Upsell);
        assert!(c.description.contains("Dashboard and Exports"));
        // Tier 1 -> enterprise (3) is a two-step jump
        assert_eq!(c.tier_jump, 2);
        assert_eq!(c.price_delta, 500.0);
    }

    #[test]
    fn test_no_upsell_without_high_usage() {
        let evidence = bundle(
            vec![usage("Dashboard", 2, IntensityTier::Low)],
            vec![snippet("kb-3", "Enterprise plan overview", "Premium support.", 0.9, "Upsell")],
        );

        let candidates =
            HeuristicGenerator::new().generate(&profile(), &evidence, &SentimentAssessment::neutral());
        assert!(
            candidates
                .iter()
                .all(|c| c.category != RecommendationCategory::Upsell)
        );
    }

    #[test]
    fn test_confidence_formula_components() {
        // relevance 1.0 -> 0.4; count 100 -> 0.3; sentiment 1.0 -> 0.3
        assert!((candidate_confidence(1.0, 100, 1.0) - 1.0).abs() < 1e-9);
        // neutral sentiment contributes half of its band
        assert!((candidate_confidence(0.5, 0, 0.0) - 0.35).abs() < 1e-9);
        // negative sentiment contributes nothing
        assert!((candidate_confidence(0.0, 0, -1.0)).abs() < 1e-9);
    }

    #[test]
    fn test_generation_is_deterministic() {
        let evidence = bundle(
            vec![
                usage("AdvancedReporting", 0, IntensityTier::Unused),
                usage("Dashboard", 90, IntensityTier::High),
                usage("Alerts", 3, IntensityTier::Low),
            ],
            vec![
                snippet("kb-1", "AdvancedReporting guide", "Surfacing trends.", 0.9, "Adoption"),
                snippet("kb-2", "Alerts adoption", "Catch issues early.", 0.7, "Adoption"),
                snippet("kb-3", "Enterprise overview", "Premium support.", 0.8, "Upsell"),
            ],
        );
        let sentiment = SentimentAssessment::neutral();
        let generator = HeuristicGenerator::new();
        let p = profile();

        let first = generator.generate(&p, &evidence, &sentiment);
        let second = generator.generate(&p, &evidence, &sentiment);

        let targets_first: Vec<&str> = first.iter().map(|c| c.target.as_str()).collect();
        let targets_second: Vec<&str> = second.iter().map(|c| c.target.as_str()).collect();
        assert_eq!(targets_first, targets_second);
        for (a, b) in first.iter().zip(second.iter()) {
            assert_eq!(a.seq, b.seq);
            assert_eq!(a.confidence, b.confidence);
        }
    }
}
