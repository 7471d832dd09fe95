//! # Stages Crate
//!
//! The four analysis stages of the recommendation pipeline.
//!
//! ## Components
//!
//! ### Retrieval (parallel phase)
//! Fetches usage trends and grounding knowledge concurrently through the
//! gateway and merges them into an evidence bundle with a combined
//! confidence.
//!
//! ### Sentiment (parallel phase)
//! Computes a recency-weighted sentiment score and named contributing
//! factors from interaction history.
//!
//! ### Reasoning (sequential, after the parallel phase)
//! Generates scored candidates through the pluggable `CandidateGenerator`,
//! applies duplicate suppression against prior recommendations and
//! sentiment-aware filtering, and ranks deterministically.
//!
//! ### Validation (sequential, last)
//! Content-safety checks, the 0.6 confidence floor, and per-category caps.
//!
//! ## Example Usage
//!
//! ```ignore
//! use stages::{ReasoningStage, HeuristicGenerator};
//!
//! let reasoning = ReasoningStage::new(Arc::new(HeuristicGenerator::new()), config);
//! let outcome = reasoning.run(&profile, &evidence, &sentiment, &prior, Utc::now())?;
//! ```

// Public modules
pub mod generator;
pub mod reasoning;
pub mod retrieval;
pub mod sentiment;
pub mod similarity;
pub mod types;
pub mod validation;

// Re-export commonly used types
pub use generator::{CandidateGenerator, HeuristicGenerator};
pub use reasoning::{ReasoningOutcome, ReasoningStage};
pub use retrieval::RetrievalStage;
pub use sentiment::{InteractionStore, SentimentStage};
pub use types::{
    Candidate, EvidenceBundle, OpenIssue, SentimentAssessment, SentimentTrend, SuppressionReason,
};
pub use validation::{
    ContentSafety, SafetyVerdict, ValidationOutcome, ValidationProgress, ValidationStage,
};
