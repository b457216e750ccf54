//! The top-level facade: one call from a user question to a grounded answer.
//!
//! `Researcher::answer` is the whole invocation contract. It runs admission,
//! routes the query (direct answer or a research tier), and returns the same
//! [`RunOutput`] shape regardless of which path executed.

use std::sync::Arc;
use tracing::info;

use crate::admission::{AdmissionController, ProviderHealth};
use crate::classify::{ComplexityClassifier, Route};
use crate::enhance::QueryEnhancer;
use crate::error::{Error, Result};
use crate::pipeline::{EngineConfig, PipelineEngine, RunOutput, StepId, Tier};
use crate::progress::ProgressSink;
use crate::provider::{GenerationProvider, GenerationRequest, SearchProvider};
use crate::query::Query;

const DIRECT_SYSTEM_PROMPT: &str = "You are a careful legal research assistant. \
    Answer from general legal knowledge. If the question needs current sources or \
    jurisdiction-specific authority you do not have, say so plainly instead of guessing.";

/// Orchestrates admission, routing, enhancement, and pipeline execution.
pub struct Researcher {
    classifier: ComplexityClassifier,
    enhancer: QueryEnhancer,
    engine: PipelineEngine,
    llm: Arc<dyn GenerationProvider>,
    admission: Arc<dyn AdmissionController>,
    search_health: Option<Arc<ProviderHealth>>,
}

impl Researcher {
    pub fn new(
        search: Arc<dyn SearchProvider>,
        llm: Arc<dyn GenerationProvider>,
        admission: Arc<dyn AdmissionController>,
        config: EngineConfig,
    ) -> Self {
        Self {
            classifier: ComplexityClassifier::new(),
            enhancer: QueryEnhancer::new(llm.clone()),
            engine: PipelineEngine::new(search, llm.clone(), config),
            llm,
            admission,
            search_health: None,
        }
    }

    /// Track search-provider health and refuse research runs while it is in
    /// cooldown, rather than burning the user's quota on a dead provider.
    pub fn with_search_health(mut self, health: Arc<ProviderHealth>) -> Self {
        self.search_health = Some(health);
        self
    }

    /// Force every research query onto one tier, bypassing classification.
    pub fn with_tier_override(mut self, tier: Tier) -> Self {
        self.classifier = ComplexityClassifier::with_override(tier);
        self
    }

    /// Stream per-step progress events for every run.
    pub fn with_progress(mut self, sink: ProgressSink) -> Self {
        self.engine = self.engine.with_progress(sink);
        self
    }

    /// Answer a user question. The classifier runs before admission (it is
    /// deterministic and touches no provider) so the admission queue can order
    /// waiters by tier priority; a refused run therefore still makes zero
    /// provider calls.
    pub async fn answer(&self, user: &str, query: Query) -> Result<RunOutput> {
        let decision = self.classifier.route(&query.text);
        info!(
            route = ?decision.route,
            score = decision.score,
            reason = %decision.reason,
            "query routed"
        );

        let priority_tier = match decision.route {
            Route::Direct => Tier::Fast,
            Route::Research(tier) => tier,
        };
        let quota = self.admission.begin_run(user, priority_tier).await?;

        let outcome = match decision.route {
            Route::Direct => self.answer_direct(&query).await,
            Route::Research(tier) => self.answer_research(tier, query).await,
        };

        match outcome {
            Ok(output) => {
                self.admission.commit_run(quota.ticket).await;
                Ok(output)
            }
            Err(e) => {
                self.admission.rollback_run(quota.ticket).await;
                Err(e)
            }
        }
    }

    async fn answer_direct(&self, query: &Query) -> Result<RunOutput> {
        let request = GenerationRequest::new(format!(
            "Jurisdiction: {}\n\n{}",
            query.jurisdiction, query.text
        ))
        .with_system(DIRECT_SYSTEM_PROMPT)
        .with_max_tokens(1024);

        let response = self.llm.generate(request).await?;
        Ok(RunOutput {
            response: response.content,
            sources: Vec::new(),
            total_tokens: response.tokens_used,
        })
    }

    async fn answer_research(&self, tier: Tier, query: Query) -> Result<RunOutput> {
        if let Some(health) = &self.search_health {
            if !health.available().await {
                return Err(Error::provider("search", "provider in cooldown"));
            }
        }

        let (enhanced, enhance_tokens) = self.enhancer.enhance(&query).await;
        let result = self.engine.run(tier, query, enhanced).await?;

        if let Some(health) = &self.search_health {
            let degraded = result.run.steps.iter().any(|s| {
                s.step == StepId::Search
                    && s.output_summary
                        .get("degraded")
                        .and_then(|v| v.as_bool())
                        .unwrap_or(false)
            });
            if degraded {
                health.record_failure().await;
            } else {
                health.record_success().await;
            }
        }

        let mut output = result.output;
        output.total_tokens += enhance_tokens;
        Ok(output)
    }
}
