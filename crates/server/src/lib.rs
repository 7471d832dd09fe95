//! Server crate for the recommendation engine.
//!
//! This crate contains the orchestrator that drives the four-stage pipeline
//! and the persistence collaborator interfaces it writes through.

pub mod orchestrator;
pub mod store;

pub use orchestrator::{Orchestrator, RunState};
pub use store::{CustomerDirectory, InMemoryDirectory, InMemoryStore, RecommendationStore};
