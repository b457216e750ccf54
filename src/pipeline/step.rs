//! The step contract the engine executes.

use async_trait::async_trait;

use crate::error::Result;
use crate::pipeline::tiers::TierPlan;
use crate::pipeline::types::{StepContext, StepId};

/// What a completed step reports back to the engine.
#[derive(Debug, Clone)]
pub struct StepReport {
    /// Tokens this step consumed (provider-reported or estimated).
    pub tokens_used: u64,
    /// Small structured summary for the run record (counts, flags).
    pub summary: serde_json::Value,
}

impl StepReport {
    pub fn new(tokens_used: u64, summary: serde_json::Value) -> Self {
        Self {
            tokens_used,
            summary,
        }
    }

    /// A step that ran but had nothing to do.
    pub fn skipped(reason: &str) -> Self {
        Self {
            tokens_used: 0,
            summary: serde_json::json!({ "skipped": reason }),
        }
    }
}

/// One individually testable unit of the pipeline.
///
/// Steps execute strictly in plan order, sharing a [`StepContext`]. A step
/// reads only the fields its contract needs and appends its output; it never
/// removes what earlier steps produced.
#[async_trait]
pub trait PipelineStep: Send + Sync {
    fn id(&self) -> StepId;

    /// Whether a failure of this step fails the whole run. Only search is
    /// fatal (nothing downstream can compensate for an empty corpus);
    /// everything else degrades.
    fn fatal_on_error(&self) -> bool {
        false
    }

    /// Optional steps are skipped once the token budget nears its ceiling.
    /// Composition is never optional: a response is always produced.
    fn optional(&self) -> bool {
        false
    }

    async fn execute(&self, ctx: &mut StepContext, plan: &TierPlan) -> Result<StepReport>;
}
