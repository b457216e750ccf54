//! Extraction step: full-content fetch for the top search URLs.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::error::Result;
use crate::pipeline::step::{PipelineStep, StepReport};
use crate::pipeline::tiers::TierPlan;
use crate::pipeline::types::{StepContext, StepId};
use crate::provider::{ExtractedPage, SearchProvider};
use crate::tokens::estimate_tokens;

/// Fetches full content for the top-N search results. Partial success is the
/// expected case: every page carries its own success/failure flag, and one
/// failed URL never fails the step.
pub struct ExtractStep {
    provider: Arc<dyn SearchProvider>,
}

impl ExtractStep {
    pub fn new(provider: Arc<dyn SearchProvider>) -> Self {
        Self { provider }
    }
}

#[async_trait]
impl PipelineStep for ExtractStep {
    fn id(&self) -> StepId {
        StepId::Extract
    }

    fn optional(&self) -> bool {
        true
    }

    async fn execute(&self, ctx: &mut StepContext, plan: &TierPlan) -> Result<StepReport> {
        let urls: Vec<String> = ctx
            .results
            .iter()
            .take(plan.extract_top_n)
            .map(|r| r.url.clone())
            .collect();

        // No URLs is a normal path (degraded search), not an error.
        if urls.is_empty() {
            return Ok(StepReport::skipped("no_urls"));
        }

        let pages = match self.provider.extract(&urls).await {
            Ok(pages) => pages,
            Err(e) => {
                // Whole-batch provider failure: record every URL as failed and
                // let composition fall back to search snippets.
                warn!(run_id = %ctx.run_id, error = %e, "extraction batch failed");
                urls.iter()
                    .map(|u| ExtractedPage::failed(u, e.to_string()))
                    .collect()
            }
        };

        let succeeded = pages.iter().filter(|p| p.succeeded()).count();
        let failed = pages.len() - succeeded;
        let tokens = pages
            .iter()
            .filter_map(|p| p.raw_content.as_deref())
            .map(estimate_tokens)
            .sum::<u64>();

        debug!(
            run_id = %ctx.run_id,
            requested = urls.len(),
            succeeded,
            failed,
            "extraction complete"
        );

        let summary = serde_json::json!({
            "requested": urls.len(),
            "succeeded": succeeded,
            "failed": failed,
        });
        ctx.extractions = pages;

        Ok(StepReport::new(tokens, summary))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::pipeline::types::{RunId, SearchResult, SourceType};
    use crate::pipeline::Tier;
    use crate::provider::{SearchDepth, SearchHit};
    use crate::query::Query;
    use crate::tokens::TokenBudget;

    struct FlakyExtractor;

    #[async_trait]
    impl SearchProvider for FlakyExtractor {
        async fn search(
            &self,
            _query: &str,
            _max_results: usize,
            _depth: SearchDepth,
            _fetch_raw_content: bool,
        ) -> Result<Vec<SearchHit>> {
            Ok(Vec::new())
        }

        async fn extract(&self, urls: &[String]) -> Result<Vec<ExtractedPage>> {
            Ok(urls
                .iter()
                .enumerate()
                .map(|(i, u)| {
                    if i == 0 {
                        ExtractedPage::ok(u, "full text of the first page")
                    } else {
                        ExtractedPage::failed(u, "403 forbidden")
                    }
                })
                .collect())
        }
    }

    struct BrokenExtractor;

    #[async_trait]
    impl SearchProvider for BrokenExtractor {
        async fn search(
            &self,
            _query: &str,
            _max_results: usize,
            _depth: SearchDepth,
            _fetch_raw_content: bool,
        ) -> Result<Vec<SearchHit>> {
            Ok(Vec::new())
        }

        async fn extract(&self, _urls: &[String]) -> Result<Vec<ExtractedPage>> {
            Err(Error::provider("tavily", "connection reset"))
        }
    }

    fn context_with_results(n: usize) -> StepContext {
        let mut ctx = StepContext::new(
            RunId::new(),
            Tier::Balanced,
            Query::new("q", "US"),
            "q US".to_string(),
            TokenBudget::new(20_000),
        );
        ctx.results = (0..n)
            .map(|i| SearchResult {
                title: format!("result {}", i),
                url: format!("https://example.com/{}", i),
                content: "snippet".to_string(),
                raw_content: None,
                score: 0.9,
                published_date: None,
                source_type: SourceType::Other,
            })
            .collect();
        ctx
    }

    #[tokio::test]
    async fn test_partial_failure_preserved() {
        let step = ExtractStep::new(Arc::new(FlakyExtractor));
        let mut ctx = context_with_results(2);
        let plan = Tier::Balanced.plan();

        let report = step.execute(&mut ctx, &plan).await.unwrap();
        assert_eq!(ctx.extractions.len(), 2);
        assert!(ctx.extractions[0].succeeded());
        assert!(!ctx.extractions[1].succeeded());
        assert_eq!(report.summary["succeeded"], 1);
        assert_eq!(report.summary["failed"], 1);
    }

    #[tokio::test]
    async fn test_no_urls_is_skip_not_error() {
        let step = ExtractStep::new(Arc::new(FlakyExtractor));
        let mut ctx = context_with_results(0);
        let plan = Tier::Balanced.plan();

        let report = step.execute(&mut ctx, &plan).await.unwrap();
        assert_eq!(report.tokens_used, 0);
        assert_eq!(report.summary["skipped"], "no_urls");
        assert!(ctx.extractions.is_empty());
    }

    #[tokio::test]
    async fn test_batch_failure_degrades_not_fails() {
        let step = ExtractStep::new(Arc::new(BrokenExtractor));
        let mut ctx = context_with_results(2);
        let plan = Tier::Balanced.plan();

        let report = step.execute(&mut ctx, &plan).await.unwrap();
        assert_eq!(report.summary["failed"], 2);
        assert!(ctx.extractions.iter().all(|p| !p.succeeded()));
    }
}
