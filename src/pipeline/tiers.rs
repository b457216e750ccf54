//! The tier catalog: four named pipeline configurations.
//!
//! Tiers trade breadth and depth against latency and token cost. The engine
//! is tier-agnostic; everything tier-specific lives in the [`TierPlan`].

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::pipeline::types::StepId;
use crate::provider::SearchDepth;

/// A named pipeline tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    /// Quick factual lookups: search then synthesize.
    Fast,
    /// Standard explanatory queries: adds full-content extraction.
    Balanced,
    /// Precedent-heavy analysis: full entity/claim grounding chain.
    Deep,
    /// Trend and consensus queries: wide search across many sources.
    Broad,
}

impl Tier {
    /// Admission queue priority; higher drains first. Ordered by latency
    /// expectation: fast > balanced > broad > deep.
    pub fn queue_priority(&self) -> u8 {
        match self {
            Self::Fast => 3,
            Self::Balanced => 2,
            Self::Broad => 1,
            Self::Deep => 0,
        }
    }

    /// The execution plan for this tier.
    pub fn plan(&self) -> TierPlan {
        match self {
            Self::Fast => TierPlan {
                tier: *self,
                steps: vec![StepId::Search, StepId::Compose],
                max_results: 5,
                search_depth: SearchDepth::Basic,
                fetch_raw_content: false,
                extract_top_n: 0,
                search_variants: 1,
                token_ceiling: 8_000,
                deadline: Duration::from_secs(10),
            },
            Self::Balanced => TierPlan {
                tier: *self,
                steps: vec![StepId::Search, StepId::Extract, StepId::Compose],
                max_results: 6,
                search_depth: SearchDepth::Advanced,
                fetch_raw_content: true,
                extract_top_n: 2,
                search_variants: 1,
                token_ceiling: 20_000,
                deadline: Duration::from_secs(25),
            },
            Self::Deep => TierPlan {
                tier: *self,
                steps: vec![
                    StepId::Search,
                    StepId::Extract,
                    StepId::EntityExtraction,
                    StepId::EntityValidation,
                    StepId::ClaimExtraction,
                    StepId::Compose,
                ],
                max_results: 8,
                search_depth: SearchDepth::Advanced,
                fetch_raw_content: true,
                extract_top_n: 3,
                search_variants: 2,
                token_ceiling: 48_000,
                deadline: Duration::from_secs(45),
            },
            Self::Broad => TierPlan {
                tier: *self,
                steps: vec![StepId::Search, StepId::Compose],
                max_results: 15,
                search_depth: SearchDepth::Basic,
                fetch_raw_content: false,
                extract_top_n: 0,
                search_variants: 3,
                token_ceiling: 32_000,
                deadline: Duration::from_secs(35),
            },
        }
    }
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Fast => "fast",
            Self::Balanced => "balanced",
            Self::Deep => "deep",
            Self::Broad => "broad",
        };
        write!(f, "{}", s)
    }
}

/// Everything tier-specific the engine and steps need for one run.
#[derive(Debug, Clone)]
pub struct TierPlan {
    pub tier: Tier,
    /// Ordered step list; composition is always last.
    pub steps: Vec<StepId>,
    /// Results requested from the search provider per variant.
    pub max_results: usize,
    pub search_depth: SearchDepth,
    /// Whether search should return full page content inline.
    pub fetch_raw_content: bool,
    /// How many top URLs the extraction step fetches.
    pub extract_top_n: usize,
    /// Number of query variants searched concurrently (broad/deep fan-out).
    pub search_variants: usize,
    /// Token ceiling for the run's budget.
    pub token_ceiling: u64,
    /// Overall run deadline.
    pub deadline: Duration,
}
