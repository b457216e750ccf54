//! The research pipeline: tier plans, step implementations, and the engine
//! that runs them.

pub mod claims;
pub mod compose;
pub mod engine;
pub mod entities;
pub mod extract;
mod proptest;
pub mod search;
pub mod step;
pub mod tiers;
pub mod types;

pub use claims::ConfidencePolicy;
pub use engine::{EngineConfig, EngineResult, PipelineEngine};
pub use step::{PipelineStep, StepReport};
pub use tiers::{Tier, TierPlan};
pub use types::{
    Claim, Confidence, Entity, EntityId, EntityKind, PipelineRun, RunId, RunOutput, RunStatus,
    SearchResult, SourceRef, SourceType, StepContext, StepExecution, StepId,
};
