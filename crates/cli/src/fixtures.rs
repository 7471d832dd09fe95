//! Demo world for the CLI harness.
//!
//! Seeds two customers with contrasting shapes so every pipeline behavior is
//! reachable from the command line:
//!
//! - **acme**: heavy Dashboard use, AdvancedReporting untouched, friendly
//!   support history, one declined upsell from ten days ago (shows duplicate
//!   suppression)
//! - **globex**: heavy use across the board but a sour support history with
//!   an open escalation (shows the sentiment gate)

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use uuid::Uuid;

use domain::{
    CustomerId, CustomerProfile, EngineConfig, EventType, IntensityTier, InteractionEvent,
    KnowledgeSnippet, OutcomeState, Recommendation, RecommendationCategory, ResolutionState,
    SourceError, UsageRecord,
};
use gateway::{Gateway, KnowledgeSource, UsageSource};
use server::{InMemoryDirectory, InMemoryStore, Orchestrator};
use stages::{
    ContentSafety, HeuristicGenerator, InteractionStore, ReasoningStage, RetrievalStage,
    SafetyVerdict, SentimentStage, ValidationStage,
};

pub struct DemoWorld {
    pub orchestrator: Orchestrator,
    pub store: Arc<InMemoryStore>,
    pub customers: Vec<(String, CustomerId)>,
}

impl DemoWorld {
    /// Resolve a customer argument: a seeded short name or a raw UUID
    pub fn resolve(&self, name_or_id: &str) -> Option<CustomerId> {
        if let Some((_, id)) = self
            .customers
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(name_or_id))
        {
            return Some(*id);
        }
        name_or_id.parse().ok()
    }
}

struct DemoUsage {
    by_customer: HashMap<CustomerId, Vec<UsageRecord>>,
}

#[async_trait]
impl UsageSource for DemoUsage {
    async fn get_trends(
        &self,
        customer_id: CustomerId,
        _days: u32,
    ) -> Result<Vec<UsageRecord>, SourceError> {
        Ok(self.by_customer.get(&customer_id).cloned().unwrap_or_default())
    }
}

struct DemoKnowledge {
    snippets: Vec<KnowledgeSnippet>,
}

#[async_trait]
impl KnowledgeSource for DemoKnowledge {
    async fn search(
        &self,
        query: &str,
        top_k: usize,
    ) -> Result<Vec<KnowledgeSnippet>, SourceError> {
        // Crude relevance: keep snippets sharing a token with the query
        let query_lower = query.to_lowercase();
        let mut hits: Vec<KnowledgeSnippet> = self
            .snippets
            .iter()
            .filter(|s| {
                query_lower
                    .split_whitespace()
                    .any(|t| s.title.to_lowercase().contains(t) || s.text.to_lowercase().contains(t))
            })
            .cloned()
            .collect();
        hits.truncate(top_k);
        Ok(hits)
    }
}

struct DemoInteractions {
    by_customer: HashMap<CustomerId, Vec<InteractionEvent>>,
}

#[async_trait]
impl InteractionStore for DemoInteractions {
    async fn get_recent(
        &self,
        customer_id: CustomerId,
        _months: u32,
    ) -> anyhow::Result<Vec<InteractionEvent>> {
        Ok(self.by_customer.get(&customer_id).cloned().unwrap_or_default())
    }
}

/// Blocks a small denylist, standing in for the real safety service
struct DenylistSafety;

#[async_trait]
impl ContentSafety for DenylistSafety {
    async fn check(&self, text: &str) -> anyhow::Result<SafetyVerdict> {
        let lowered = text.to_lowercase();
        for term in ["exploit", "lawsuit", "threat"] {
            if lowered.contains(term) {
                return Ok(SafetyVerdict {
                    pass: false,
                    category: Some("business-risk".to_string()),
                });
            }
        }
        Ok(SafetyVerdict {
            pass: true,
            category: None,
        })
    }
}

fn usage(feature: &str, count: u32, intensity: IntensityTier) -> UsageRecord {
    UsageRecord {
        feature: feature.to_string(),
        usage_count: count,
        last_used: Utc::now() - ChronoDuration::days(2),
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

fn interaction(
    customer_id: CustomerId,
    days_ago: i64,
    sentiment: f64,
    resolution: ResolutionState,
    topic: &str,
) -> InteractionEvent {
    InteractionEvent {
        id: Uuid::new_v4(),
        customer_id,
        kind: EventType::Ticket,
        occurred_at: Utc::now() - ChronoDuration::days(days_ago),
        sentiment,
        topics: vec![topic.to_string()],
        resolution,
        duration_secs: Some(1200),
    }
}

pub async fn build_demo_world(config: EngineConfig) -> DemoWorld {
    let acme = Uuid::new_v4();
    let globex = Uuid::new_v4();

    let directory = Arc::new(InMemoryDirectory::new());
    directory
        .insert(CustomerProfile {
            id: acme,
            name: "Acme Manufacturing".to_string(),
            plan_tier: 1,
            industry: "Manufacturing".to_string(),
        })
        .await;
    directory
        .insert(CustomerProfile {
            id: globex,
            name: "Globex Retail".to_string(),
            plan_tier: 1,
            industry: "Retail".to_string(),
        })
        .await;

    let usage_source = Arc::new(DemoUsage {
        by_customer: HashMap::from([
            (
                acme,
                vec![
                    usage("Dashboard", 140, IntensityTier::High),
                    usage("AdvancedReporting", 0, IntensityTier::Unused),
                    usage("Alerts", 6, IntensityTier::Low),
                ],
            ),
            (
                globex,
                vec![
                    usage("Dashboard", 210, IntensityTier::High),
                    usage("Exports", 95, IntensityTier::High),
                    usage("Workflows", 0, IntensityTier::Unused),
                ],
            ),
        ]),
    });

    let knowledge_source = Arc::new(DemoKnowledge {
        snippets: vec![
            snippet(
                "kb-reporting",
                "Getting started with AdvancedReporting",
                "AdvancedReporting surfaces adoption trends across teams. Roll it out one workspace at a time.",
                0.95,
                "Adoption",
            ),
            snippet(
                "kb-alerts",
                "Alerting adoption playbook",
                "Alerts catch regressions before customers do. Start with three high-signal rules.",
                0.8,
                "Adoption",
            ),
            snippet(
                "kb-workflows",
                "Workflows adoption guide",
                "Workflows remove repeated manual steps. Pilot with the operations team.",
                0.85,
                "Adoption",
            ),
            snippet(
                "kb-enterprise",
                "Enterprise plan overview",
                "The enterprise plan removes seat limits and adds premium support. Upsell fits accounts with sustained high usage.",
                0.9,
                "Upsell",
            ),
        ],
    });

    let interactions = Arc::new(DemoInteractions {
        by_customer: HashMap::from([
            (
                acme,
                vec![
                    interaction(acme, 4, 0.7, ResolutionState::Resolved, "Onboarding"),
                    interaction(acme, 25, 0.5, ResolutionState::Resolved, "Dashboard"),
                    interaction(acme, 60, 0.4, ResolutionState::Resolved, "Training"),
                ],
            ),
            (
                globex,
                vec![
                    interaction(globex, 3, -0.7, ResolutionState::Escalated, "Billing dispute"),
                    interaction(globex, 12, -0.5, ResolutionState::Pending, "API outage"),
                    interaction(globex, 50, 0.0, ResolutionState::Resolved, "Feature request"),
                ],
            ),
        ]),
    });

    let store = Arc::new(InMemoryStore::new());
    // Acme turned this down ten days ago; the pipeline must not re-offer it
    let declined_at = Utc::now() - ChronoDuration::days(10);
    store
        .seed_recommendation(Recommendation {
            id: Uuid::new_v4(),
            customer_id: acme,
            category: RecommendationCategory::Upsell,
            target: "Enterprise plan overview".to_string(),
            description: "Based on your high usage of Dashboard, consider upgrading to unlock advanced capabilities.".to_string(),
            confidence: 0.82,
            reasoning_chain: serde_json::json!({}),
            evidence: Vec::new(),
            generated_at: declined_at,
            outcome: OutcomeState::Declined,
            delivered_by: Some("agent-17".to_string()),
            outcome_at: Some(declined_at),
        })
        .await;

    let gateway = Arc::new(Gateway::new(&config));
    let orchestrator = Orchestrator::new(
        Arc::new(RetrievalStage::new(
            gateway,
            usage_source,
            knowledge_source,
            &config,
        )),
        Arc::new(SentimentStage::new(interactions, &config)),
        Arc::new(ReasoningStage::new(
            Arc::new(HeuristicGenerator::new()),
            config.clone(),
        )),
        Arc::new(ValidationStage::new(Arc::new(DenylistSafety), config.clone())),
        directory,
        store.clone(),
        config,
    );

    DemoWorld {
        orchestrator,
        store,
        customers: vec![("acme".to_string(), acme), ("globex".to_string(), globex)],
    }
}
