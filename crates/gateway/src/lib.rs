//! # Gateway Crate
//!
//! Resilience layer between the pipeline stages and external data sources.
//!
//! ## Main Components
//!
//! - **breaker**: Per-source circuit breakers (closed/open/half-open) shared
//!   across concurrent pipeline runs
//! - **cache**: Read-through cache with per-key TTL for profile and
//!   usage-trend lookups
//! - **sources**: The `UsageSource`/`KnowledgeSource` traits and the
//!   `Gateway` facade that converts failures into typed degraded results
//!
//! ## Example Usage
//!
//! ```ignore
//! use gateway::{Gateway, USAGE_SOURCE};
//!
//! let gateway = Gateway::new(&config);
//! let trends = gateway
//!     .call_or_degraded(USAGE_SOURCE, Vec::new(), || source.get_trends(id, 90))
//!     .await;
//! if trends.degraded {
//!     // continue with reduced evidence
//! }
//! ```

// Public modules
pub mod breaker;
pub mod cache;
pub mod sources;

// Re-export commonly used types
pub use breaker::{BreakerRegistry, CircuitBreaker, CircuitState};
pub use cache::ReadThroughCache;
pub use sources::{
    Gateway, KNOWLEDGE_SOURCE, KnowledgeSource, SourceResult, USAGE_SOURCE, UsageSource,
};
