//! The tier-agnostic pipeline engine.
//!
//! Executes whatever ordered step list the tier plan supplies, threading one
//! [`StepContext`] through the steps, aggregating token usage, and enforcing
//! the run deadline. Three guarantees hold for every run:
//!
//! 1. Composition always executes, so a response is always produced.
//! 2. A recoverable step failure is absorbed and logged, never surfaced.
//! 3. `total_tokens` is exactly the sum of per-step usage.

use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::error::Result;
use crate::pipeline::claims::{ClaimExtractionStep, ConfidencePolicy};
use crate::pipeline::compose::ComposeStep;
use crate::pipeline::entities::{EntityExtractionStep, EntityValidationStep};
use crate::pipeline::extract::ExtractStep;
use crate::pipeline::search::SearchStep;
use crate::pipeline::step::PipelineStep;
use crate::pipeline::tiers::Tier;
use crate::pipeline::types::{
    PipelineRun, RunOutput, RunStatus, StepContext, StepExecution, StepId,
};
use crate::progress::{ProgressSink, RunEvent, RunEventKind};
use crate::provider::{GenerationProvider, SearchProvider};
use crate::query::Query;
use crate::tokens::TokenBudget;

/// Floor given to the composition step even when the deadline has expired;
/// the deterministic fallback needs no provider call and finishes well inside it.
const COMPOSE_FLOOR: Duration = Duration::from_millis(200);

/// Engine configuration.
#[derive(Debug, Clone, Default)]
pub struct EngineConfig {
    /// How low-confidence claims are treated before composition.
    pub confidence_policy: ConfidencePolicy,
}

/// Result of one engine run: the caller-facing output plus the run record.
#[derive(Debug)]
pub struct EngineResult {
    pub output: RunOutput,
    pub run: PipelineRun,
}

/// Executes tier plans against the provider pair.
pub struct PipelineEngine {
    steps: Vec<Box<dyn PipelineStep>>,
    progress: Option<ProgressSink>,
}

impl PipelineEngine {
    pub fn new(
        search: Arc<dyn SearchProvider>,
        llm: Arc<dyn GenerationProvider>,
        config: EngineConfig,
    ) -> Self {
        let steps: Vec<Box<dyn PipelineStep>> = vec![
            Box::new(SearchStep::new(search.clone())),
            Box::new(ExtractStep::new(search)),
            Box::new(EntityExtractionStep::new(llm.clone())),
            Box::new(EntityValidationStep),
            Box::new(ClaimExtractionStep::new(llm.clone()).with_policy(config.confidence_policy)),
            Box::new(ComposeStep::new(llm)),
        ];
        Self {
            steps,
            progress: None,
        }
    }

    /// Attach a progress sink; the engine emits one event per step plus a
    /// terminal event.
    pub fn with_progress(mut self, sink: ProgressSink) -> Self {
        self.progress = Some(sink);
        self
    }

    fn step(&self, id: StepId) -> Option<&dyn PipelineStep> {
        self.steps.iter().find(|s| s.id() == id).map(|s| s.as_ref())
    }

    fn emit(&self, ctx: &StepContext, kind: RunEventKind) {
        if let Some(sink) = &self.progress {
            sink.emit(RunEvent::new(ctx.run_id, ctx.tier, kind));
        }
    }

    /// Execute one run of the given tier. Always returns an output with a
    /// non-empty response; a failed run yields a clear "no information found"
    /// message rather than an error.
    pub async fn run(
        &self,
        tier: Tier,
        query: Query,
        enhanced_query: String,
    ) -> Result<EngineResult> {
        let plan = tier.plan();
        let mut run = PipelineRun::start(tier, query.clone());
        let mut ctx = StepContext::new(
            run.id,
            tier,
            query,
            enhanced_query,
            TokenBudget::new(plan.token_ceiling),
        );
        let deadline = Instant::now() + plan.deadline;

        info!(run_id = %run.id, tier = %tier, "pipeline run started");
        self.emit(&ctx, RunEventKind::RunStarted);

        let mut fatal = false;

        for &step_id in &plan.steps {
            let Some(step) = self.step(step_id) else {
                continue;
            };
            let is_compose = step_id == StepId::Compose;

            if fatal && !is_compose {
                continue;
            }

            // Budget gate: optional steps stop once consumption nears the
            // ceiling. Composition is exempt so a response is guaranteed.
            if !is_compose && step.optional() && ctx.budget.near_ceiling() {
                info!(
                    run_id = %ctx.run_id,
                    step = %step_id,
                    consumed = ctx.budget.consumed,
                    ceiling = ctx.budget.ceiling,
                    "skipping optional step near token ceiling"
                );
                run.record_step(StepExecution {
                    step: step_id,
                    tokens_used: 0,
                    duration_ms: 0,
                    output_summary: serde_json::json!({ "skipped": "budget" }),
                    error: None,
                });
                self.emit(
                    &ctx,
                    RunEventKind::StepSkipped {
                        step: step_id,
                        reason: "budget".to_string(),
                    },
                );
                continue;
            }

            if !is_compose && ctx.deadline_expired {
                run.record_step(StepExecution {
                    step: step_id,
                    tokens_used: 0,
                    duration_ms: 0,
                    output_summary: serde_json::json!({ "skipped": "deadline" }),
                    error: None,
                });
                self.emit(
                    &ctx,
                    RunEventKind::StepSkipped {
                        step: step_id,
                        reason: "deadline".to_string(),
                    },
                );
                continue;
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            let started = std::time::Instant::now();

            let outcome = if is_compose {
                // Composition gets at least the floor: with an expired
                // deadline the context flag forces the deterministic path.
                if remaining < COMPOSE_FLOOR {
                    ctx.deadline_expired = true;
                }
                match tokio::time::timeout(
                    remaining.max(COMPOSE_FLOOR),
                    step.execute(&mut ctx, &plan),
                )
                .await
                {
                    Ok(result) => result,
                    Err(_) => {
                        // Mid-compose timeout: rerun on the deterministic path.
                        ctx.deadline_expired = true;
                        step.execute(&mut ctx, &plan).await
                    }
                }
            } else {
                match tokio::time::timeout(remaining, step.execute(&mut ctx, &plan)).await {
                    Ok(result) => result,
                    Err(_) => {
                        ctx.deadline_expired = true;
                        Err(crate::error::Error::timeout(plan.deadline.as_millis() as u64))
                    }
                }
            };

            let duration_ms = started.elapsed().as_millis() as u64;

            match outcome {
                Ok(report) => {
                    ctx.budget.charge(report.tokens_used);
                    self.emit(
                        &ctx,
                        RunEventKind::StepCompleted {
                            step: step_id,
                            tokens_used: report.tokens_used,
                        },
                    );
                    run.record_step(StepExecution {
                        step: step_id,
                        tokens_used: report.tokens_used,
                        duration_ms,
                        output_summary: report.summary,
                        error: None,
                    });
                }
                Err(e) => {
                    // Structured enough to reconstruct the failure without
                    // re-running.
                    warn!(
                        run_id = %ctx.run_id,
                        step = %step_id,
                        tier = %ctx.tier,
                        tokens_so_far = ctx.budget.consumed,
                        error = %e,
                        "step failed"
                    );
                    self.emit(
                        &ctx,
                        RunEventKind::StepFailed {
                            step: step_id,
                            error: e.to_string(),
                        },
                    );
                    run.record_step(StepExecution {
                        step: step_id,
                        tokens_used: 0,
                        duration_ms,
                        output_summary: serde_json::json!({}),
                        error: Some(e.to_string()),
                    });
                    // Non-recoverable errors jump straight to composition
                    // with whatever partial data exists.
                    if step.fatal_on_error() || !e.is_recoverable() {
                        fatal = true;
                    }
                }
            }

            // An empty corpus after search is the one condition nothing
            // downstream can compensate for.
            if step_id == StepId::Search && ctx.results.is_empty() {
                fatal = true;
            }
        }

        let output = if fatal && ctx.results.is_empty() {
            run.finish(RunStatus::Failed);
            RunOutput {
                response: format!(
                    "No information was found for \"{}\" in {}. Try rephrasing the \
                     question or broadening the jurisdiction.",
                    ctx.query.text, ctx.query.jurisdiction
                ),
                sources: Vec::new(),
                total_tokens: run.total_tokens,
            }
        } else {
            run.finish(RunStatus::Success);
            RunOutput {
                response: ctx.answer.clone().unwrap_or_else(|| {
                    crate::pipeline::compose::fallback_answer(&ctx)
                }),
                sources: ctx.sources.clone(),
                total_tokens: run.total_tokens,
            }
        };

        info!(
            run_id = %run.id,
            tier = %tier,
            status = ?run.status,
            total_tokens = run.total_tokens,
            "pipeline run finished"
        );
        self.emit(
            &ctx,
            RunEventKind::RunFinished {
                success: run.status == RunStatus::Success,
                total_tokens: run.total_tokens,
            },
        );

        Ok(EngineResult { output, run })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::provider::{
        ExtractedPage, GenerationRequest, GenerationResponse, SearchDepth, SearchHit,
    };
    use async_trait::async_trait;

    struct StubSearch {
        hits: Vec<SearchHit>,
    }

    #[async_trait]
    impl SearchProvider for StubSearch {
        async fn search(
            &self,
            _query: &str,
            max_results: usize,
            _depth: SearchDepth,
            _fetch_raw_content: bool,
        ) -> Result<Vec<SearchHit>> {
            Ok(self.hits.iter().take(max_results).cloned().collect())
        }

        async fn extract(&self, urls: &[String]) -> Result<Vec<ExtractedPage>> {
            Ok(urls
                .iter()
                .map(|u| ExtractedPage::ok(u, "full text"))
                .collect())
        }
    }

    struct StubLlm;

    #[async_trait]
    impl GenerationProvider for StubLlm {
        async fn generate(&self, _request: GenerationRequest) -> Result<GenerationResponse> {
            Ok(GenerationResponse {
                content: "Grounded answer citing [1].".to_string(),
                tokens_used: 200,
            })
        }

        async fn generate_json(
            &self,
            _request: GenerationRequest,
            _schema: &serde_json::Value,
        ) -> Result<(serde_json::Value, u64)> {
            Ok((serde_json::json!([]), 50))
        }
    }

    struct HeavySearch;

    #[async_trait]
    impl SearchProvider for HeavySearch {
        async fn search(
            &self,
            _query: &str,
            _max_results: usize,
            _depth: SearchDepth,
            _fetch_raw_content: bool,
        ) -> Result<Vec<SearchHit>> {
            // Enough snippet content to consume nearly the balanced ceiling.
            Ok(vec![SearchHit {
                title: "Exhaustive treatise".to_string(),
                url: "https://example.com/treatise".to_string(),
                content: "x".repeat(80_000),
                raw_content: None,
                score: 0.9,
                published_date: None,
            }])
        }

        async fn extract(&self, urls: &[String]) -> Result<Vec<ExtractedPage>> {
            Ok(urls
                .iter()
                .map(|u| ExtractedPage::ok(u, "full text"))
                .collect())
        }
    }

    struct SlowExtractSearch;

    #[async_trait]
    impl SearchProvider for SlowExtractSearch {
        async fn search(
            &self,
            _query: &str,
            max_results: usize,
            _depth: SearchDepth,
            _fetch_raw_content: bool,
        ) -> Result<Vec<SearchHit>> {
            Ok(hits(3).into_iter().take(max_results).collect())
        }

        async fn extract(&self, urls: &[String]) -> Result<Vec<ExtractedPage>> {
            tokio::time::sleep(std::time::Duration::from_secs(600)).await;
            Ok(urls
                .iter()
                .map(|u| ExtractedPage::ok(u, "full text"))
                .collect())
        }
    }

    struct CountingLlm {
        calls: std::sync::atomic::AtomicUsize,
    }

    impl CountingLlm {
        fn new() -> Self {
            Self {
                calls: std::sync::atomic::AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl GenerationProvider for CountingLlm {
        async fn generate(&self, _request: GenerationRequest) -> Result<GenerationResponse> {
            self.calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            Ok(GenerationResponse {
                content: "answer".to_string(),
                tokens_used: 100,
            })
        }

        async fn generate_json(
            &self,
            _request: GenerationRequest,
            _schema: &serde_json::Value,
        ) -> Result<(serde_json::Value, u64)> {
            self.calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            Ok((serde_json::json!([]), 10))
        }
    }

    struct DownSearch;

    #[async_trait]
    impl SearchProvider for DownSearch {
        async fn search(
            &self,
            _query: &str,
            _max_results: usize,
            _depth: SearchDepth,
            _fetch_raw_content: bool,
        ) -> Result<Vec<SearchHit>> {
            Err(Error::provider("tavily", "503"))
        }

        async fn extract(&self, _urls: &[String]) -> Result<Vec<ExtractedPage>> {
            Err(Error::provider("tavily", "503"))
        }
    }

    fn hits(n: usize) -> Vec<SearchHit> {
        (0..n)
            .map(|i| SearchHit {
                title: format!("Result {}", i),
                url: format!("https://example.com/{}", i),
                content: "snippet text".to_string(),
                raw_content: None,
                score: 1.0 - i as f64 * 0.1,
                published_date: None,
            })
            .collect()
    }

    #[tokio::test]
    async fn test_fast_tier_happy_path() {
        let engine = PipelineEngine::new(
            Arc::new(StubSearch { hits: hits(5) }),
            Arc::new(StubLlm),
            EngineConfig::default(),
        );
        let result = engine
            .run(
                Tier::Fast,
                Query::new(
                    "What is the statute of limitations for breach of contract?",
                    "Zimbabwe",
                ),
                "statute of limitations breach of contract Zimbabwe".to_string(),
            )
            .await
            .unwrap();

        assert_eq!(result.run.status, RunStatus::Success);
        assert!(!result.output.response.is_empty());
        assert!(result.output.sources.len() >= 3 && result.output.sources.len() <= 5);
        assert!(result.output.total_tokens < Tier::Fast.plan().token_ceiling);
    }

    #[tokio::test]
    async fn test_total_tokens_is_sum_of_steps() {
        let engine = PipelineEngine::new(
            Arc::new(StubSearch { hits: hits(3) }),
            Arc::new(StubLlm),
            EngineConfig::default(),
        );
        let result = engine
            .run(Tier::Fast, Query::new("q", "US"), "q US".to_string())
            .await
            .unwrap();

        let step_sum: u64 = result.run.steps.iter().map(|s| s.tokens_used).sum();
        assert_eq!(result.output.total_tokens, step_sum);
    }

    #[tokio::test]
    async fn test_search_down_yields_no_information_response() {
        let engine = PipelineEngine::new(
            Arc::new(DownSearch),
            Arc::new(StubLlm),
            EngineConfig::default(),
        );
        let result = engine
            .run(Tier::Fast, Query::new("q", "US"), "q US".to_string())
            .await
            .unwrap();

        assert_eq!(result.run.status, RunStatus::Failed);
        assert!(result.output.response.contains("No information"));
        assert!(result.output.sources.is_empty());
    }

    #[tokio::test]
    async fn test_progress_events_terminate() {
        let (sink, mut rx) = crate::progress::ProgressSink::channel();
        let engine = PipelineEngine::new(
            Arc::new(StubSearch { hits: hits(3) }),
            Arc::new(StubLlm),
            EngineConfig::default(),
        )
        .with_progress(sink);

        engine
            .run(Tier::Fast, Query::new("q", "US"), "q US".to_string())
            .await
            .unwrap();

        let mut saw_terminal = false;
        while let Ok(event) = rx.try_recv() {
            if event.is_terminal() {
                saw_terminal = true;
            }
        }
        assert!(saw_terminal);
    }

    #[tokio::test]
    async fn test_optional_step_skipped_near_ceiling() {
        // One enormous search snippet pushes consumption past 90% of the
        // balanced ceiling; extraction must be skipped, composition must not.
        let engine = PipelineEngine::new(
            Arc::new(HeavySearch),
            Arc::new(StubLlm),
            EngineConfig::default(),
        );
        let result = engine
            .run(Tier::Balanced, Query::new("q", "US"), "q US".to_string())
            .await
            .unwrap();

        assert_eq!(result.run.status, RunStatus::Success);
        let extract = result
            .run
            .steps
            .iter()
            .find(|s| s.step == StepId::Extract)
            .unwrap();
        assert_eq!(extract.output_summary["skipped"], "budget");
        assert_eq!(extract.tokens_used, 0);
        let compose = result.run.steps.last().unwrap();
        assert_eq!(compose.step, StepId::Compose);
        assert!(compose.error.is_none());
        assert!(!result.output.response.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_expiry_falls_back_without_provider() {
        // Extraction hangs past the balanced deadline: the step times out,
        // and composition takes the deterministic path with zero LLM calls.
        let llm = Arc::new(CountingLlm::new());
        let engine = PipelineEngine::new(
            Arc::new(SlowExtractSearch),
            llm.clone(),
            EngineConfig::default(),
        );
        let result = engine
            .run(Tier::Balanced, Query::new("q", "US"), "q US".to_string())
            .await
            .unwrap();

        let extract = result
            .run
            .steps
            .iter()
            .find(|s| s.step == StepId::Extract)
            .unwrap();
        assert!(extract.error.is_some());
        let compose = result.run.steps.last().unwrap();
        assert_eq!(compose.step, StepId::Compose);
        assert_eq!(compose.output_summary["fallback"], "deadline");
        assert_eq!(llm.calls.load(std::sync::atomic::Ordering::SeqCst), 0);
        assert_eq!(result.run.status, RunStatus::Success);
        assert!(result.output.response.contains("Result 0"));
    }

    #[tokio::test]
    async fn test_deep_tier_executes_grounding_chain() {
        let engine = PipelineEngine::new(
            Arc::new(StubSearch { hits: hits(4) }),
            Arc::new(StubLlm),
            EngineConfig::default(),
        );
        let result = engine
            .run(Tier::Deep, Query::new("find cases", "US"), "find cases US".to_string())
            .await
            .unwrap();

        let executed: Vec<StepId> = result.run.steps.iter().map(|s| s.step).collect();
        assert!(executed.contains(&StepId::EntityExtraction));
        assert!(executed.contains(&StepId::EntityValidation));
        assert!(executed.contains(&StepId::ClaimExtraction));
        assert_eq!(executed.last(), Some(&StepId::Compose));
    }
}
