//! # Domain Crate
//!
//! Core entities, error taxonomy, and configuration for the customer
//! recommendation engine.
//!
//! ## Main Components
//!
//! - **types**: Entities flowing through the pipeline (UsageRecord,
//!   KnowledgeSnippet, InteractionEvent, Recommendation, StageContribution)
//! - **error**: Engine-boundary and source error types
//! - **config**: Tunable policy (windows, thresholds, caps)
//!
//! ## Example Usage
//!
//! ```ignore
//! use domain::{EngineConfig, OutcomeState, RecommendationCategory};
//!
//! let config = EngineConfig::default().with_deadline_ms(1500);
//! assert!(OutcomeState::Pending.can_transition_to(OutcomeState::Delivered));
//! ```

// Public modules
pub mod config;
pub mod error;
pub mod types;

// Re-export commonly used types for convenience
pub use config::EngineConfig;
pub use error::{EngineError, EngineResult, SourceError};
pub use types::{
    // Identifier aliases
    ContributionId,
    CustomerId,
    RecommendationId,
    // Core types
    CustomerProfile,
    EvidenceRef,
    InteractionEvent,
    KnowledgeSnippet,
    Recommendation,
    RecommendationSet,
    RunMetadata,
    StageContribution,
    UsageRecord,
    ValidationSummary,
    // Enums
    EventType,
    IntensityTier,
    OutcomeState,
    RecommendationCategory,
    ResolutionState,
    StageType,
};
