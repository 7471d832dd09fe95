//! # Recommendation Orchestrator
//!
//! Drives the four-stage pipeline end to end for one customer:
//! 1. Resolve the customer profile (short-TTL cache in front of the directory)
//! 2. Run Retrieval and Sentiment concurrently and join both
//! 3. Run Reasoning on the joint outputs plus the prior-recommendation window
//! 4. Run Validation, salvaging partial results if the deadline lands mid-stage
//! 5. Record one contribution per stage, backfill the recommendation id,
//!    persist everything as a single logical write, return the result set
//!
//! The overall deadline is enforced at every phase boundary. Stages already
//! in flight when it expires are left to finish on their own task and their
//! results are discarded, so gateway breaker counters still settle.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use serde_json::json;
use tracing::{error, info, warn};
use uuid::Uuid;

use domain::{
    CustomerId, CustomerProfile, EngineConfig, EngineError, EngineResult, OutcomeState,
    Recommendation, RecommendationCategory, RecommendationSet, RunMetadata, StageContribution,
    StageType, ValidationSummary,
};
use gateway::ReadThroughCache;
use stages::{
    Candidate, EvidenceBundle, ReasoningOutcome, ReasoningStage, RetrievalStage,
    SentimentAssessment, SentimentStage, ValidationOutcome, ValidationProgress, ValidationStage,
};

use crate::store::{CustomerDirectory, RecommendationStore};

/// Pipeline run states, in execution order. `Failed` is terminal; the
/// degraded side-state is a flag on the result, not a state here, since it
/// never blocks progression.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Started,
    RetrievingAndSensing,
    Reasoning,
    Validating,
    Completed,
    Failed,
}

/// Main orchestrator coordinating the recommendation pipeline
pub struct Orchestrator {
    retrieval: Arc<RetrievalStage>,
    sentiment: Arc<SentimentStage>,
    reasoning: Arc<ReasoningStage>,
    validation: Arc<ValidationStage>,
    directory: Arc<dyn CustomerDirectory>,
    store: Arc<dyn RecommendationStore>,
    profile_cache: ReadThroughCache<CustomerId, Option<CustomerProfile>>,
    config: EngineConfig,
}

impl Orchestrator {
    pub fn new(
        retrieval: Arc<RetrievalStage>,
        sentiment: Arc<SentimentStage>,
        reasoning: Arc<ReasoningStage>,
        validation: Arc<ValidationStage>,
        directory: Arc<dyn CustomerDirectory>,
        store: Arc<dyn RecommendationStore>,
        config: EngineConfig,
    ) -> Self {
        info!("Orchestrator initialized with 4 stages");
        Self {
            retrieval,
            sentiment,
            reasoning,
            validation,
            directory,
            store,
            profile_cache: ReadThroughCache::new(),
            config,
        }
    }

    /// Main entry point: generate validated recommendations for a customer.
    ///
    /// Returns the final set with per-phase timings and a `degraded` flag
    /// when any stage ran on fallback or partial evidence. Errors only for
    /// unknown customers, a blown deadline before validation started, or an
    /// unrecoverable stage/persistence failure.
    pub async fn generate(&self, customer_id: CustomerId) -> EngineResult<RecommendationSet> {
        let start = Instant::now();
        let deadline = Duration::from_millis(self.config.deadline_ms);
        let run_id = Uuid::new_v4();

        self.enter(run_id, RunState::Started);
        let profile = self.lookup_profile(customer_id).await?;
        info!(run = %run_id, customer = %profile.name, "Generating recommendations");

        // Phase 1: Retrieval and Sentiment in parallel
        self.enter(run_id, RunState::RetrievingAndSensing);
        let (evidence, sentiment, retrieval_ms, sentiment_ms) = self
            .run_parallel_phase(customer_id, start, deadline)
            .await?;

        let mut degraded = evidence.degraded();
        if degraded {
            info!(run = %run_id, "Continuing on fallback evidence (degraded)");
        }

        let mut contributions = Vec::with_capacity(4);
        contributions.push(retrieval_contribution(customer_id, &self.config, &evidence, retrieval_ms));
        contributions.push(sentiment_contribution(customer_id, &self.config, &sentiment, sentiment_ms));

        // Phase 2: Reasoning on the joint outputs
        if start.elapsed() >= deadline {
            warn!(run = %run_id, "Deadline exceeded before reasoning started");
            return Err(EngineError::Timeout {
                deadline_ms: self.config.deadline_ms,
            });
        }
        self.enter(run_id, RunState::Reasoning);

        let prior = self
            .store
            .get_prior(customer_id, self.config.prior_lookback_months)
            .await
            .map_err(|e| EngineError::Internal(format!("prior-recommendation lookup: {e}")))?;

        let reasoning_start = Instant::now();
        let outcome = self
            .reasoning
            .run(&profile, &evidence, &sentiment, &prior, Utc::now())
            .map_err(|e| EngineError::Internal(format!("reasoning stage: {e}")))?;
        let reasoning_ms = reasoning_start.elapsed().as_millis() as u64;

        if let Err(reason) = check_candidates(&outcome.ranked) {
            self.enter(run_id, RunState::Failed);
            error!(run = %run_id, %reason, "Discarding run, reasoning produced malformed output");
            return Err(EngineError::Inconsistent(reason));
        }
        contributions.push(reasoning_contribution(&evidence, &sentiment, &outcome, prior.len(), reasoning_ms));

        // Phase 3: Validation, with partial salvage at the deadline
        if start.elapsed() >= deadline {
            warn!(run = %run_id, "Deadline exceeded before validation started");
            return Err(EngineError::Timeout {
                deadline_ms: self.config.deadline_ms,
            });
        }
        self.enter(run_id, RunState::Validating);

        let (mut validation_outcome, validation_ms, partial) = self
            .run_validation(&outcome, start, deadline)
            .await?;
        if partial {
            warn!(run = %run_id, "Deadline landed mid-validation, returning partial results");
            degraded = true;
        }

        validation_outcome.summary.suppressed = outcome.suppressed.len();
        validation_outcome.summary.total_candidates =
            outcome.ranked.len() + outcome.suppressed.len();
        contributions.push(validation_contribution(&outcome, &validation_outcome, validation_ms));

        // Phase 4: materialize, backfill, persist as one logical write
        let recommendations = self.build_recommendations(
            customer_id,
            &evidence,
            &sentiment,
            &validation_outcome,
            &contributions,
        );
        if let Some(first) = recommendations.first() {
            for contribution in &mut contributions {
                contribution.recommendation_id = Some(first.id);
            }
        }

        if let Err(e) = self
            .store
            .persist(recommendations.clone(), contributions)
            .await
        {
            self.enter(run_id, RunState::Failed);
            error!(run = %run_id, error = %e, "Persistence failed, discarding run");
            return Err(EngineError::Internal(format!(
                "persistence failed, run discarded: {e}"
            )));
        }

        let generation_time_ms = start.elapsed().as_millis() as u64;
        let (adoption, upsell): (Vec<Recommendation>, Vec<Recommendation>) = recommendations
            .into_iter()
            .partition(|r| r.category == RecommendationCategory::Adoption);

        self.enter(run_id, RunState::Completed);
        info!(
            run = %run_id,
            customer = %customer_id,
            adoption = adoption.len(),
            upsell = upsell.len(),
            generation_time_ms,
            degraded,
            "Recommendation generation complete"
        );

        Ok(RecommendationSet {
            adoption,
            upsell,
            generation_time_ms,
            degraded,
            metadata: RunMetadata {
                run_id,
                customer_id,
                parallel_phase_ms: retrieval_ms.max(sentiment_ms),
                reasoning_ms,
                validation_ms,
                latency_target_met: generation_time_ms <= self.config.deadline_ms,
                validation_summary: validation_outcome.summary,
            },
        })
    }

    fn enter(&self, run_id: Uuid, state: RunState) {
        info!(run = %run_id, state = ?state, "Pipeline state");
    }

    async fn lookup_profile(&self, customer_id: CustomerId) -> EngineResult<CustomerProfile> {
        let ttl = Duration::from_secs(self.config.profile_ttl_secs);
        self.profile_cache
            .get_or_load(customer_id, ttl, || self.directory.get_profile(customer_id))
            .await
            .map_err(|e| EngineError::Internal(format!("customer directory: {e}")))?
            .ok_or(EngineError::CustomerNotFound(customer_id))
    }

    /// Launch Retrieval and Sentiment on their own tasks and await both.
    ///
    /// If one stage fails the other still runs to completion before the
    /// error is reported. On deadline expiry the tasks are left running
    /// (their results are discarded) and `Timeout` is returned.
    async fn run_parallel_phase(
        &self,
        customer_id: CustomerId,
        start: Instant,
        deadline: Duration,
    ) -> EngineResult<(EvidenceBundle, SentimentAssessment, u64, u64)> {
        let retrieval_task = tokio::spawn({
            let retrieval = self.retrieval.clone();
            let days = self.config.usage_lookback_days;
            async move {
                let stage_start = Instant::now();
                let bundle = retrieval.run(customer_id, days).await;
                (bundle, stage_start.elapsed().as_millis() as u64)
            }
        });
        let sentiment_task = tokio::spawn({
            let sentiment = self.sentiment.clone();
            async move {
                let stage_start = Instant::now();
                let assessment = sentiment.run(customer_id).await;
                (assessment, stage_start.elapsed().as_millis() as u64)
            }
        });

        let remaining = deadline.saturating_sub(start.elapsed());
        let joined = tokio::time::timeout(remaining, async {
            tokio::join!(retrieval_task, sentiment_task)
        })
        .await;

        let (retrieval_join, sentiment_join) = match joined {
            Ok(pair) => pair,
            Err(_) => {
                warn!(customer = %customer_id, "Deadline exceeded during parallel phase");
                return Err(EngineError::Timeout {
                    deadline_ms: self.config.deadline_ms,
                });
            }
        };

        let (evidence, retrieval_ms) = retrieval_join
            .map_err(|e| EngineError::Internal(format!("retrieval task panicked: {e}")))?;
        let (sentiment_result, sentiment_ms) = sentiment_join
            .map_err(|e| EngineError::Internal(format!("sentiment task panicked: {e}")))?;
        let sentiment = sentiment_result
            .map_err(|e| EngineError::Internal(format!("sentiment stage: {e}")))?;

        Ok((evidence, sentiment, retrieval_ms, sentiment_ms))
    }

    /// Run validation under the remaining deadline budget. If the deadline
    /// lands mid-stage, salvage the survivors validated so far and apply
    /// the category caps to that prefix.
    async fn run_validation(
        &self,
        reasoning: &ReasoningOutcome,
        start: Instant,
        deadline: Duration,
    ) -> EngineResult<(ValidationOutcome, u64, bool)> {
        let progress = Arc::new(ValidationProgress::new());
        let validation_task = tokio::spawn({
            let validation = self.validation.clone();
            let progress = progress.clone();
            let candidates = reasoning.ranked.clone();
            async move {
                let stage_start = Instant::now();
                let outcome = validation.run(candidates, &progress).await;
                (outcome, stage_start.elapsed().as_millis() as u64)
            }
        });

        let remaining = deadline.saturating_sub(start.elapsed());
        match tokio::time::timeout(remaining, validation_task).await {
            Ok(Ok((outcome, elapsed_ms))) => Ok((outcome, elapsed_ms, false)),
            Ok(Err(e)) => Err(EngineError::Internal(format!(
                "validation task panicked: {e}"
            ))),
            Err(_) => {
                let survivors = progress.snapshot();
                let (validated, over_cap) = self.validation.select_final(survivors);
                let summary = ValidationSummary {
                    total_candidates: reasoning.ranked.len(),
                    suppressed: 0,
                    safety_blocked: 0,
                    low_confidence: 0,
                    over_cap,
                    validated: validated.len(),
                };
                let outcome = ValidationOutcome {
                    validated,
                    blocked: Vec::new(),
                    summary,
                };
                Ok((outcome, remaining.as_millis() as u64, true))
            }
        }
    }

    /// Turn validated candidates into persistent recommendations, each
    /// carrying a reasoning chain that references the run's contributions
    fn build_recommendations(
        &self,
        customer_id: CustomerId,
        evidence: &EvidenceBundle,
        sentiment: &SentimentAssessment,
        validation: &ValidationOutcome,
        contributions: &[StageContribution],
    ) -> Vec<Recommendation> {
        let generated_at = Utc::now();
        let contribution_ids: Vec<Uuid> = contributions.iter().map(|c| c.id).collect();

        validation
            .validated
            .iter()
            .map(|candidate| {
                let mut chain = json!({
                    "contributions": contribution_ids,
                    "retrieval": {
                        "usage_records": evidence.usage.len(),
                        "snippets": evidence.snippets.len(),
                        "confidence": evidence.confidence,
                        "degraded": evidence.degraded(),
                    },
                    "sentiment": {
                        "score": sentiment.score,
                        "trend": sentiment.trend,
                        "factors": sentiment.factors,
                    },
                    "reasoning": {
                        "evidence_strength": candidate.evidence_strength,
                        "generation_seq": candidate.seq,
                    },
                    "validation": {
                        "confidence_floor": self.config.min_confidence,
                    },
                });
                if let Some(note) = &candidate.annotation {
                    chain["reasoning"]["annotation"] = json!(note);
                }

                Recommendation {
                    id: Uuid::new_v4(),
                    customer_id,
                    category: candidate.category,
                    target: candidate.target.clone(),
                    description: candidate.description.clone(),
                    confidence: candidate.confidence,
                    reasoning_chain: chain,
                    evidence: candidate.evidence.clone(),
                    generated_at,
                    outcome: OutcomeState::Pending,
                    delivered_by: None,
                    outcome_at: None,
                }
            })
            .collect()
    }
}

/// Reject malformed reasoning output before it can be persisted
fn check_candidates(candidates: &[Candidate]) -> Result<(), String> {
    for candidate in candidates {
        if !candidate.confidence.is_finite() || !(0.0..=1.0).contains(&candidate.confidence) {
            return Err(format!(
                "candidate '{}' has confidence {} outside [0, 1]",
                candidate.target, candidate.confidence
            ));
        }
        if candidate.description.trim().is_empty() {
            return Err(format!("candidate '{}' has an empty description", candidate.target));
        }
        if candidate.description.len() > 1000 {
            return Err(format!(
                "candidate '{}' description exceeds 1000 characters",
                candidate.target
            ));
        }
    }
    Ok(())
}

fn retrieval_contribution(
    customer_id: CustomerId,
    config: &EngineConfig,
    evidence: &EvidenceBundle,
    elapsed_ms: u64,
) -> StageContribution {
    StageContribution {
        id: Uuid::new_v4(),
        recommendation_id: None,
        stage: StageType::Retrieval,
        input: json!({
            "customer_id": customer_id,
            "days": config.usage_lookback_days,
        }),
        output: json!({
            "usage_records": evidence.usage.len(),
            "snippets": evidence.snippets.len(),
            "usage_degraded": evidence.usage_degraded,
            "knowledge_degraded": evidence.knowledge_degraded,
            "confidence": evidence.confidence,
        }),
        confidence: evidence.confidence,
        elapsed_ms,
        created_at: Utc::now(),
    }
}

fn sentiment_contribution(
    customer_id: CustomerId,
    config: &EngineConfig,
    sentiment: &SentimentAssessment,
    elapsed_ms: u64,
) -> StageContribution {
    StageContribution {
        id: Uuid::new_v4(),
        recommendation_id: None,
        stage: StageType::Sentiment,
        input: json!({
            "customer_id": customer_id,
            "months": config.interaction_lookback_months,
        }),
        output: json!({
            "score": sentiment.score,
            "trend": sentiment.trend,
            "factors": sentiment.factors,
            "interaction_count": sentiment.interaction_count,
            "open_issues": sentiment.open_issues.len(),
        }),
        confidence: sentiment.confidence,
        elapsed_ms,
        created_at: Utc::now(),
    }
}

fn reasoning_contribution(
    evidence: &EvidenceBundle,
    sentiment: &SentimentAssessment,
    outcome: &ReasoningOutcome,
    prior_checked: usize,
    elapsed_ms: u64,
) -> StageContribution {
    let suppression_reasons: Vec<_> = outcome
        .suppressed
        .iter()
        .map(|c| json!({ "target": c.target, "reason": c.suppression }))
        .collect();

    StageContribution {
        id: Uuid::new_v4(),
        recommendation_id: None,
        stage: StageType::Reasoning,
        input: json!({
            "usage_records": evidence.usage.len(),
            "snippets": evidence.snippets.len(),
            "sentiment_score": sentiment.score,
            "prior_checked": prior_checked,
        }),
        output: json!({
            "ranked": outcome.ranked.len(),
            "suppressed": suppression_reasons,
            "annotated": outcome.ranked.iter().filter(|c| c.annotation.is_some()).count(),
        }),
        // Ranking carries per-candidate confidence; the stage itself has none
        confidence: 0.0,
        elapsed_ms,
        created_at: Utc::now(),
    }
}

fn validation_contribution(
    reasoning: &ReasoningOutcome,
    validation: &ValidationOutcome,
    elapsed_ms: u64,
) -> StageContribution {
    let blocked: Vec<_> = validation
        .blocked
        .iter()
        .map(|c| json!({ "target": c.target, "reason": c.suppression }))
        .collect();

    StageContribution {
        id: Uuid::new_v4(),
        recommendation_id: None,
        stage: StageType::Validation,
        input: json!({ "candidates": reasoning.ranked.len() }),
        output: json!({
            "summary": validation.summary,
            "blocked": blocked,
        }),
        // Validation is a binary gate
        confidence: 1.0,
        elapsed_ms,
        created_at: Utc::now(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{InMemoryDirectory, InMemoryStore};
    use async_trait::async_trait;
    use chrono::Duration as ChronoDuration;
    use domain::{
        EventType, IntensityTier, InteractionEvent, KnowledgeSnippet, ResolutionState,
        SourceError, UsageRecord,
    };
    use gateway::{Gateway, KnowledgeSource, UsageSource};
    use stages::{ContentSafety, HeuristicGenerator, InteractionStore, SafetyVerdict};

    // ============================================================================
    // Test Fixtures
    // ============================================================================

    struct FixtureUsage {
        records: Vec<UsageRecord>,
        delay: Duration,
    }

    #[async_trait]
    impl UsageSource for FixtureUsage {
        async fn get_trends(
            &self,
            _customer_id: CustomerId,
            _days: u32,
        ) -> Result<Vec<UsageRecord>, SourceError> {
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            Ok(self.records.clone())
        }
    }

    struct DownUsage;

    #[async_trait]
    impl UsageSource for DownUsage {
        async fn get_trends(
            &self,
            _customer_id: CustomerId,
            _days: u32,
        ) -> Result<Vec<UsageRecord>, SourceError> {
            Err(SourceError::Unavailable {
                source_name: "usage-trends".to_string(),
            })
        }
    }

    struct FixtureKnowledge {
        snippets: Vec<KnowledgeSnippet>,
    }

    #[async_trait]
    impl KnowledgeSource for FixtureKnowledge {
        async fn search(
            &self,
            _query: &str,
            _top_k: usize,
        ) -> Result<Vec<KnowledgeSnippet>, SourceError> {
            Ok(self.snippets.clone())
        }
    }

    struct DownKnowledge;

    #[async_trait]
    impl KnowledgeSource for DownKnowledge {
        async fn search(
            &self,
            _query: &str,
            _top_k: usize,
        ) -> Result<Vec<KnowledgeSnippet>, SourceError> {
            Err(SourceError::Unavailable {
                source_name: "knowledge".to_string(),
            })
        }
    }

    struct FixtureInteractions(Vec<InteractionEvent>);

    #[async_trait]
    impl InteractionStore for FixtureInteractions {
        async fn get_recent(
            &self,
            _customer_id: CustomerId,
            _months: u32,
        ) -> anyhow::Result<Vec<InteractionEvent>> {
            Ok(self.0.clone())
        }
    }

    struct AllowAllSafety;

    #[async_trait]
    impl ContentSafety for AllowAllSafety {
        async fn check(&self, _text: &str) -> anyhow::Result<SafetyVerdict> {
            Ok(SafetyVerdict {
                pass: true,
                category: None,
            })
        }
    }

    /// Delegates reads to an inner store but refuses every write
    struct FailingStore(Arc<InMemoryStore>);

    #[async_trait]
    impl RecommendationStore for FailingStore {
        async fn get_prior(
            &self,
            customer_id: CustomerId,
            months: u32,
        ) -> anyhow::Result<Vec<Recommendation>> {
            self.0.get_prior(customer_id, months).await
        }

        async fn persist(
            &self,
            _recommendations: Vec<Recommendation>,
            _contributions: Vec<StageContribution>,
        ) -> anyhow::Result<()> {
            anyhow::bail!("storage write rejected")
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

    fn interaction(customer_id: CustomerId, days_ago: i64, sentiment: f64) -> InteractionEvent {
        InteractionEvent {
            id: Uuid::new_v4(),
            customer_id,
            kind: EventType::Chat,
            occurred_at: Utc::now() - ChronoDuration::days(days_ago),
            sentiment,
            topics: vec!["Onboarding".to_string()],
            resolution: ResolutionState::Resolved,
            duration_secs: Some(900),
        }
    }

    /// Evidence shaped like the happy-path account: one heavily used
    /// feature, one untouched one, grounding articles for both
    fn scenario_usage() -> Vec<UsageRecord> {
        vec![
            usage("Dashboard", 120, IntensityTier::High),
            usage("AdvancedReporting", 0, IntensityTier::Unused),
        ]
    }

    fn scenario_snippets() -> Vec<KnowledgeSnippet> {
        vec![
            snippet(
                "kb-1",
                "Getting started with AdvancedReporting",
                "AdvancedReporting surfaces trends across teams. Roll it out one workspace at a time.",
                0.95,
                "Adoption",
            ),
            snippet(
                "kb-2",
                "Enterprise plan overview",
                "The enterprise plan removes seat limits. Premium support is included.",
                0.85,
                "Upsell",
            ),
        ]
    }

    struct TestWorld {
        orchestrator: Orchestrator,
        store: Arc<InMemoryStore>,
        customer: CustomerId,
    }

    async fn build_world(
        usage_source: Arc<dyn UsageSource>,
        knowledge_source: Arc<dyn KnowledgeSource>,
        interactions: Vec<InteractionEvent>,
        config: EngineConfig,
    ) -> TestWorld {
        let customer = Uuid::new_v4();
        let directory = Arc::new(InMemoryDirectory::new());
        directory
            .insert(CustomerProfile {
                id: customer,
                name: "Acme Manufacturing".to_string(),
                plan_tier: 1,
                industry: "Manufacturing".to_string(),
            })
            .await;

        let store = Arc::new(InMemoryStore::new());
        let gateway = Arc::new(Gateway::new(&config));

        let orchestrator = Orchestrator::new(
            Arc::new(RetrievalStage::new(
                gateway,
                usage_source,
                knowledge_source,
                &config,
            )),
            Arc::new(SentimentStage::new(
                Arc::new(FixtureInteractions(interactions)),
                &config,
            )),
            Arc::new(ReasoningStage::new(
                Arc::new(HeuristicGenerator::new()),
                config.clone(),
            )),
            Arc::new(ValidationStage::new(Arc::new(AllowAllSafety), config.clone())),
            directory,
            store.clone(),
            config,
        );

        TestWorld {
            orchestrator,
            store,
            customer,
        }
    }

    fn positive_interactions(customer: CustomerId) -> Vec<InteractionEvent> {
        vec![
            interaction(customer, 5, 0.6),
            interaction(customer, 20, 0.6),
            interaction(customer, 40, 0.6),
        ]
    }

    fn negative_interactions(customer: CustomerId) -> Vec<InteractionEvent> {
        vec![
            interaction(customer, 5, -0.5),
            interaction(customer, 20, -0.5),
            interaction(customer, 40, -0.5),
        ]
    }

    // ============================================================================
    // End-to-end Tests
    // ============================================================================

    #[tokio::test]
    async fn test_happy_path_produces_adoption_for_unused_feature() {
        let customer = Uuid::new_v4();
        let world = build_world(
            Arc::new(FixtureUsage {
                records: scenario_usage(),
                delay: Duration::ZERO,
            }),
            Arc::new(FixtureKnowledge {
                snippets: scenario_snippets(),
            }),
            positive_interactions(customer),
            EngineConfig::default(),
        )
        .await;

        let set = world.orchestrator.generate(world.customer).await.unwrap();

        assert!(!set.degraded);
        assert!(
            set.adoption
                .iter()
                .any(|r| r.target == "AdvancedReporting"),
            "expected an adoption recommendation for the unused feature"
        );
        assert!(set.adoption.iter().all(|r| r.confidence >= 0.6));
        assert!(set.upsell.iter().all(|r| r.confidence >= 0.6));
        assert_eq!(set.metadata.validation_summary.suppressed, 0);
        assert!(set.adoption.len() <= 5);
        assert!(set.upsell.len() <= 3);
        assert!(
            set.adoption
                .iter()
                .chain(set.upsell.iter())
                .all(|r| r.outcome == OutcomeState::Pending)
        );
    }

    #[tokio::test]
    async fn test_contributions_written_in_stage_order_and_backfilled() {
        let customer = Uuid::new_v4();
        let world = build_world(
            Arc::new(FixtureUsage {
                records: scenario_usage(),
                delay: Duration::ZERO,
            }),
            Arc::new(FixtureKnowledge {
                snippets: scenario_snippets(),
            }),
            positive_interactions(customer),
            EngineConfig::default(),
        )
        .await;

        let set = world.orchestrator.generate(world.customer).await.unwrap();

        let contributions = world.store.contributions().await;
        let stages: Vec<StageType> = contributions.iter().map(|c| c.stage).collect();
        assert_eq!(
            stages,
            vec![
                StageType::Retrieval,
                StageType::Sentiment,
                StageType::Reasoning,
                StageType::Validation,
            ]
        );

        let first_rec = set
            .adoption
            .first()
            .or(set.upsell.first())
            .expect("run produced recommendations");
        // The reasoning chain points back at the contribution ids, and the
        // contributions point at the run's primary recommendation
        for contribution in &contributions {
            assert!(contribution.recommendation_id.is_some());
        }
        let chain_ids = first_rec.reasoning_chain["contributions"]
            .as_array()
            .expect("chain lists contribution ids");
        assert_eq!(chain_ids.len(), 4);
    }

    #[tokio::test]
    async fn test_unknown_customer_is_rejected() {
        let customer = Uuid::new_v4();
        let world = build_world(
            Arc::new(FixtureUsage {
                records: Vec::new(),
                delay: Duration::ZERO,
            }),
            Arc::new(FixtureKnowledge { snippets: Vec::new() }),
            positive_interactions(customer),
            EngineConfig::default(),
        )
        .await;

        let result = world.orchestrator.generate(Uuid::new_v4()).await;
        assert!(matches!(result, Err(EngineError::CustomerNotFound(_))));
    }

    #[tokio::test]
    async fn test_both_sources_down_yields_degraded_empty_result() {
        let customer = Uuid::new_v4();
        let world = build_world(
            Arc::new(DownUsage),
            Arc::new(DownKnowledge),
            positive_interactions(customer),
            EngineConfig::default(),
        )
        .await;

        let set = world.orchestrator.generate(world.customer).await.unwrap();

        assert!(set.degraded);
        assert!(set.adoption.is_empty());
        assert!(set.upsell.is_empty());
        // The audit trail is still written for the degraded run
        assert_eq!(world.store.contributions().await.len(), 4);
    }

    #[tokio::test]
    async fn test_declined_upsell_not_reoffered_within_window() {
        let customer = Uuid::new_v4();
        let world = build_world(
            Arc::new(FixtureUsage {
                records: scenario_usage(),
                delay: Duration::ZERO,
            }),
            Arc::new(FixtureKnowledge {
                snippets: scenario_snippets(),
            }),
            positive_interactions(customer),
            EngineConfig::default(),
        )
        .await;

        // The customer declined this exact upsell ten days ago
        let declined_at = Utc::now() - ChronoDuration::days(10);
        world
            .store
            .seed_recommendation(Recommendation {
                id: Uuid::new_v4(),
                customer_id: world.customer,
                category: RecommendationCategory::Upsell,
                target: "Enterprise plan overview".to_string(),
                description: "Upgrade to the enterprise plan.".to_string(),
                confidence: 0.8,
                reasoning_chain: json!({}),
                evidence: Vec::new(),
                generated_at: declined_at,
                outcome: OutcomeState::Declined,
                delivered_by: Some("agent-42".to_string()),
                outcome_at: Some(declined_at),
            })
            .await;

        let set = world.orchestrator.generate(world.customer).await.unwrap();

        assert!(
            !set.upsell
                .iter()
                .any(|r| r.target == "Enterprise plan overview"),
            "declined upsell must not be re-offered within 90 days"
        );
        assert!(set.metadata.validation_summary.suppressed >= 1);
    }

    #[tokio::test]
    async fn test_accepted_adoption_not_repeated_within_window() {
        let customer = Uuid::new_v4();
        let world = build_world(
            Arc::new(FixtureUsage {
                records: scenario_usage(),
                delay: Duration::ZERO,
            }),
            Arc::new(FixtureKnowledge {
                snippets: scenario_snippets(),
            }),
            positive_interactions(customer),
            EngineConfig::default(),
        )
        .await;

        let accepted_at = Utc::now() - ChronoDuration::days(5);
        world
            .store
            .seed_recommendation(Recommendation {
                id: Uuid::new_v4(),
                customer_id: world.customer,
                category: RecommendationCategory::Adoption,
                target: "AdvancedReporting".to_string(),
                description: "Enable 'AdvancedReporting' to unlock new capabilities.".to_string(),
                confidence: 0.8,
                reasoning_chain: json!({}),
                evidence: Vec::new(),
                generated_at: accepted_at,
                outcome: OutcomeState::Accepted,
                delivered_by: Some("agent-7".to_string()),
                outcome_at: Some(accepted_at),
            })
            .await;

        let set = world.orchestrator.generate(world.customer).await.unwrap();

        assert!(
            !set.adoption.iter().any(|r| r.target == "AdvancedReporting"),
            "a feature adopted 5 days ago must not be re-suggested"
        );
    }

    #[tokio::test]
    async fn test_negative_sentiment_blocks_multi_tier_upsell() {
        let customer = Uuid::new_v4();
        let world = build_world(
            Arc::new(FixtureUsage {
                records: scenario_usage(),
                delay: Duration::ZERO,
            }),
            Arc::new(FixtureKnowledge {
                snippets: scenario_snippets(),
            }),
            negative_interactions(customer),
            EngineConfig::default(),
        )
        .await;

        let set = world.orchestrator.generate(world.customer).await.unwrap();

        // Tier 1 -> enterprise is a two-tier jump; blocked at score -0.5
        assert!(
            set.upsell.is_empty(),
            "no aggressive upsell may survive negative sentiment"
        );
    }

    #[tokio::test]
    async fn test_deadline_before_validation_returns_timeout() {
        let customer = Uuid::new_v4();
        let config = EngineConfig::default().with_deadline_ms(50);
        let world = build_world(
            Arc::new(FixtureUsage {
                records: scenario_usage(),
                delay: Duration::from_millis(300),
            }),
            Arc::new(FixtureKnowledge {
                snippets: scenario_snippets(),
            }),
            positive_interactions(customer),
            config,
        )
        .await;

        let result = world.orchestrator.generate(world.customer).await;
        assert!(matches!(result, Err(EngineError::Timeout { deadline_ms: 50 })));
        // Nothing persisted for a timed-out run
        assert!(world.store.recommendations().await.is_empty());
        assert!(world.store.contributions().await.is_empty());
    }

    #[tokio::test]
    async fn test_persistence_failure_discards_run() {
        let customer = Uuid::new_v4();
        let config = EngineConfig::default();
        let directory = Arc::new(InMemoryDirectory::new());
        directory
            .insert(CustomerProfile {
                id: customer,
                name: "Globex Retail".to_string(),
                plan_tier: 1,
                industry: "Retail".to_string(),
            })
            .await;

        let inner = Arc::new(InMemoryStore::new());
        let gateway = Arc::new(Gateway::new(&config));
        let orchestrator = Orchestrator::new(
            Arc::new(RetrievalStage::new(
                gateway,
                Arc::new(FixtureUsage {
                    records: scenario_usage(),
                    delay: Duration::ZERO,
                }),
                Arc::new(FixtureKnowledge {
                    snippets: scenario_snippets(),
                }),
                &config,
            )),
            Arc::new(SentimentStage::new(
                Arc::new(FixtureInteractions(positive_interactions(customer))),
                &config,
            )),
            Arc::new(ReasoningStage::new(
                Arc::new(HeuristicGenerator::new()),
                config.clone(),
            )),
            Arc::new(ValidationStage::new(Arc::new(AllowAllSafety), config.clone())),
            directory,
            Arc::new(FailingStore(inner.clone())),
            config,
        );

        let result = orchestrator.generate(customer).await;
        assert!(matches!(result, Err(EngineError::Internal(_))));
        assert!(inner.recommendations().await.is_empty());
    }

    #[tokio::test]
    async fn test_profile_cache_absorbs_repeat_lookups() {
        let customer = Uuid::new_v4();
        let world = build_world(
            Arc::new(FixtureUsage {
                records: scenario_usage(),
                delay: Duration::ZERO,
            }),
            Arc::new(FixtureKnowledge {
                snippets: scenario_snippets(),
            }),
            positive_interactions(customer),
            EngineConfig::default(),
        )
        .await;

        // Two back-to-back runs for the same customer both succeed; the
        // second resolves the profile from the short-TTL cache
        world.orchestrator.generate(world.customer).await.unwrap();
        let second = world.orchestrator.generate(world.customer).await.unwrap();
        assert!(second.generation_time_ms <= EngineConfig::default().deadline_ms);
    }
}
