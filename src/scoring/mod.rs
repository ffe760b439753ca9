// =============================================================================
// Scoring — factor inputs, subscores, and the gatekeeping engine
// =============================================================================

pub mod engine;
pub mod inputs;
pub mod subscores;

pub use engine::{Candidate, ScoreOutcome, ScoringEngine};
pub use inputs::{Enrichment, EnrichmentSource, FactorSet, Input, NoEnrichment, Source};
pub use subscores::Subscores;
