//! Validation stage: content safety, confidence floor, category caps.
//!
//! Candidates are checked in ranked order with a bounded number of safety
//! checks in flight. Each survivor is pushed into a progress sink as soon as
//! it clears the checks, so the orchestrator can salvage whatever validation
//! has produced when the overall deadline lands mid-stage.
//!
//! A candidate whose safety check errors is blocked, not passed: all
//! generated text must clear the check before reaching an agent.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use tracing::{debug, info, warn};

use domain::{EngineConfig, RecommendationCategory, ValidationSummary};

use crate::types::{Candidate, SuppressionReason};

/// How many safety checks run concurrently
const SAFETY_CONCURRENCY: usize = 4;

/// Result of a content-safety check
#[derive(Debug, Clone)]
pub struct SafetyVerdict {
    pub pass: bool,
    pub category: Option<String>,
}

/// Content-safety capability, implemented by the hosting service
#[async_trait]
pub trait ContentSafety: Send + Sync {
    async fn check(&self, text: &str) -> anyhow::Result<SafetyVerdict>;
}

/// Incrementally filled survivor list, shared with the orchestrator so a
/// deadline mid-validation can still return the prefix already validated
#[derive(Default)]
pub struct ValidationProgress {
    validated: Mutex<Vec<Candidate>>,
}

impl ValidationProgress {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&self, candidate: Candidate) {
        self.validated.lock().expect("progress lock poisoned").push(candidate);
    }

    /// Survivors validated so far, in ranked order
    pub fn snapshot(&self) -> Vec<Candidate> {
        self.validated.lock().expect("progress lock poisoned").clone()
    }
}

/// Final candidates plus everything blocked, with counts
#[derive(Debug, Clone)]
pub struct ValidationOutcome {
    pub validated: Vec<Candidate>,
    pub blocked: Vec<Candidate>,
    pub summary: ValidationSummary,
}

/// Fourth pipeline stage: gates candidates before they become recommendations
pub struct ValidationStage {
    safety: Arc<dyn ContentSafety>,
    config: EngineConfig,
}

impl ValidationStage {
    pub fn new(safety: Arc<dyn ContentSafety>, config: EngineConfig) -> Self {
        Self { safety, config }
    }

    pub async fn run(
        &self,
        candidates: Vec<Candidate>,
        progress: &ValidationProgress,
    ) -> ValidationOutcome {
        let total = candidates.len();
        let mut survivors: Vec<Candidate> = Vec::with_capacity(total);
        let mut blocked: Vec<Candidate> = Vec::new();
        let mut safety_blocked = 0usize;
        let mut low_confidence = 0usize;

        let mut checks = stream::iter(candidates.into_iter().map(|candidate| {
            let safety = self.safety.clone();
            async move {
                let verdict = safety.check(&candidate.description).await;
                (candidate, verdict)
            }
        }))
        .buffered(SAFETY_CONCURRENCY);

        while let Some((mut candidate, verdict)) = checks.next().await {
            match verdict {
                Ok(v) if !v.pass => {
                    let category = v.category.unwrap_or_else(|| "unspecified".to_string());
                    warn!(
                        candidate = %candidate.target,
                        category = %category,
                        "Content safety blocked candidate"
                    );
                    candidate.suppression = Some(SuppressionReason::SafetyBlocked { category });
                    safety_blocked += 1;
                    blocked.push(candidate);
                }
                Err(err) => {
                    // Fail closed: an unverifiable description never ships
                    warn!(
                        candidate = %candidate.target,
                        error = %err,
                        "Content safety check failed, blocking candidate"
                    );
                    candidate.suppression = Some(SuppressionReason::SafetyBlocked {
                        category: "unavailable".to_string(),
                    });
                    safety_blocked += 1;
                    blocked.push(candidate);
                }
                Ok(_) if candidate.confidence < self.config.min_confidence => {
                    debug!(
                        candidate = %candidate.target,
                        confidence = candidate.confidence,
                        threshold = self.config.min_confidence,
                        "Dropping low-confidence candidate"
                    );
                    candidate.suppression = Some(SuppressionReason::LowConfidence {
                        confidence: candidate.confidence,
                    });
                    low_confidence += 1;
                    blocked.push(candidate);
                }
                Ok(_) => {
                    progress.push(candidate.clone());
                    survivors.push(candidate);
                }
            }
        }

        let (validated, over_cap) = self.select_final(survivors);

        info!(
            total,
            validated = validated.len(),
            safety_blocked,
            low_confidence,
            over_cap,
            "Validation stage complete"
        );

        ValidationOutcome {
            summary: ValidationSummary {
                total_candidates: total,
                suppressed: 0, // reasoning-stage drops are filled in by the orchestrator
                safety_blocked,
                low_confidence,
                over_cap,
                validated: validated.len(),
            },
            validated,
            blocked,
        }
    }

    /// Keep at most the configured number of candidates per category,
    /// preserving ranked order. Also used by the orchestrator to cap a
    /// partial progress snapshot after a deadline.
    pub fn select_final(&self, survivors: Vec<Candidate>) -> (Vec<Candidate>, usize) {
        let mut adoption = 0usize;
        let mut upsell = 0usize;
        let mut selected = Vec::with_capacity(survivors.len());
        let mut over_cap = 0usize;

        for candidate in survivors {
            let within_cap = match candidate.category {
                RecommendationCategory::Adoption => {
                    adoption += 1;
                    adoption <= self.config.max_adoption
                }
                RecommendationCategory::Upsell => {
                    upsell += 1;
                    upsell <= self.config.max_upsell
                }
            };
            if within_cap {
                selected.push(candidate);
            } else {
                over_cap += 1;
            }
        }

        (selected, over_cap)
    }
}
