//! Persistence and directory collaborator interfaces.
//!
//! The engine consumes these narrow contracts; the hosting service wires in
//! real implementations. [`InMemoryStore`] and [`InMemoryDirectory`] back
//! the CLI harness and tests.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use tokio::sync::Mutex;
use tracing::debug;

use domain::{CustomerId, CustomerProfile, Recommendation, StageContribution};

/// Customer profile lookup, fronted by the short-TTL cache in the
/// orchestrator
#[async_trait]
pub trait CustomerDirectory: Send + Sync {
    async fn get_profile(&self, customer_id: CustomerId)
    -> anyhow::Result<Option<CustomerProfile>>;
}

/// Recommendation persistence collaborator.
///
/// `persist` commits a run's recommendations and contributions as one
/// logical write: either everything lands or nothing does. The pipeline
/// never updates or deletes what it wrote.
#[async_trait]
pub trait RecommendationStore: Send + Sync {
    /// Prior recommendations for a customer within a trailing window
    async fn get_prior(
        &self,
        customer_id: CustomerId,
        months: u32,
    ) -> anyhow::Result<Vec<Recommendation>>;

    /// Persist a completed run atomically
    async fn persist(
        &self,
        recommendations: Vec<Recommendation>,
        contributions: Vec<StageContribution>,
    ) -> anyhow::Result<()>;
}

// =============================================================================
// In-memory implementations
// =============================================================================

#[derive(Default)]
struct StoreInner {
    recommendations: Vec<Recommendation>,
    contributions: Vec<StageContribution>,
}

/// Store used by tests and the CLI harness. The single lock gives the same
/// all-or-nothing `persist` a transactional backend would.
#[derive(Default)]
pub struct InMemoryStore {
    inner: Mutex<StoreInner>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a historical recommendation directly, for seeding fixtures
    pub async fn seed_recommendation(&self, recommendation: Recommendation) {
        self.inner.lock().await.recommendations.push(recommendation);
    }

    pub async fn recommendations(&self) -> Vec<Recommendation> {
        self.inner.lock().await.recommendations.clone()
    }

    pub async fn contributions(&self) -> Vec<StageContribution> {
        self.inner.lock().await.contributions.clone()
    }
}

#[async_trait]
impl RecommendationStore for InMemoryStore {
    async fn get_prior(
        &self,
        customer_id: CustomerId,
        months: u32,
    ) -> anyhow::Result<Vec<Recommendation>> {
        let cutoff = Utc::now() - ChronoDuration::days(30 * months as i64);
        let inner = self.inner.lock().await;
        let prior: Vec<Recommendation> = inner
            .recommendations
            .iter()
            .filter(|r| r.customer_id == customer_id && r.generated_at >= cutoff)
            .cloned()
            .collect();
        debug!(customer = %customer_id, months, count = prior.len(), "Fetched prior recommendations");
        Ok(prior)
    }

    async fn persist(
        &self,
        recommendations: Vec<Recommendation>,
        contributions: Vec<StageContribution>,
    ) -> anyhow::Result<()> {
        let mut inner = self.inner.lock().await;
        inner.recommendations.extend(recommendations);
        inner.contributions.extend(contributions);
        Ok(())
    }
}

/// Directory used by tests and the CLI harness
#[derive(Default)]
pub struct InMemoryDirectory {
    profiles: Mutex<HashMap<CustomerId, CustomerProfile>>,
}

impl InMemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, profile: CustomerProfile) {
        self.profiles.lock().await.insert(profile.id, profile);
    }
}

#[async_trait]
impl CustomerDirectory for InMemoryDirectory {
    async fn get_profile(
        &self,
        customer_id: CustomerId,
    ) -> anyhow::Result<Option<CustomerProfile>> {
        Ok(self.profiles.lock().await.get(&customer_id).cloned())
    }
}
