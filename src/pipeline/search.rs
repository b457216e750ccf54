//! Search step: provider fan-out and source-type classification.

use async_trait::async_trait;
use futures::future::join_all;
use regex::Regex;
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::LazyLock;
use tracing::{debug, warn};

use crate::error::Result;
use crate::pipeline::step::{PipelineStep, StepReport};
use crate::pipeline::tiers::TierPlan;
use crate::pipeline::types::{SearchResult, SourceType, StepContext, StepId};
use crate::provider::{SearchHit, SearchProvider};
use crate::tokens::estimate_tokens;

/// Hosts that publish primary judicial records. Checked before any content
/// heuristic: a hit on one of these is a court case, full stop.
const JUDICIAL_HOSTS: &[&str] = &[
    "courtlistener.com",
    "caselaw.findlaw.com",
    "justia.com",
    "supremecourt.gov",
    "uscourts.gov",
    "bailii.org",
    "saflii.org",
    "zimlii.org",
    "canlii.org",
    "austlii.edu.au",
    "curia.europa.eu",
];

// Reporter-style citations ("123 F.3d 456", "2019 ZWSC 12") or a versus
// caption in the title.
static CITATION_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(\b\d+\s+[A-Z][A-Za-z.]*\.?\s*(2d|3d|4th)?\s+\d+\b)|(\[\d{4}\]\s+[A-Z]{2,})|(\b\d{4}\s+[A-Z]{2,6}\s+\d+\b)|(\bv\.?\s+[A-Z][A-Za-z]+)")
        .expect("invalid regex")
});

static ACADEMIC_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(\.edu/|ssrn\.com|jstor\.org|scholar\.google|law\s+review|journal\s+of|\buniversity\b|academia\.edu)")
        .expect("invalid regex")
});

static GOVERNMENT_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(\.gov(\.[a-z]{2})?/|\.go\.[a-z]{2}/|legislation\.|gazette|parliament|ministry\s+of|official\s+(register|journal))")
        .expect("invalid regex")
});

static NEWS_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(reuters\.com|apnews\.com|bbc\.(com|co\.uk)|nytimes\.com|theguardian\.com|bloomberg\.com|/news/|newsroom)")
        .expect("invalid regex")
});

/// Classify a hit's source type with the priority cascade.
///
/// Legal authority outranks secondary sources: a document on an academic
/// domain that carries a case citation classifies as a court case.
pub fn classify_source(hit: &SearchHit) -> SourceType {
    let host_haystack = hit.url.to_lowercase();
    if JUDICIAL_HOSTS.iter().any(|h| host_haystack.contains(h)) {
        return SourceType::CourtCase;
    }

    let text = format!("{} {}", hit.title, hit.content);
    if CITATION_PATTERN.is_match(&text) {
        return SourceType::CourtCase;
    }

    let markers = format!("{} {}", hit.url, text);
    if ACADEMIC_PATTERN.is_match(&markers) {
        return SourceType::Academic;
    }
    if GOVERNMENT_PATTERN.is_match(&markers) {
        return SourceType::Government;
    }
    if NEWS_PATTERN.is_match(&markers) {
        return SourceType::News;
    }

    SourceType::Other
}

/// Build the query variants a plan asks for. Variant 0 is always the
/// enhanced query itself; the rest angle toward authority and commentary so
/// wide tiers cover more of the source landscape.
fn query_variants(enhanced: &str, count: usize) -> Vec<String> {
    let mut variants = vec![enhanced.to_string()];
    if count > 1 {
        variants.push(format!("{} case law", enhanced));
    }
    if count > 2 {
        variants.push(format!("{} legislation analysis", enhanced));
    }
    variants.truncate(count.max(1));
    variants
}

/// The search step. One provider call per variant, merged and deduplicated
/// by URL, each result typed by the classification cascade.
pub struct SearchStep {
    provider: Arc<dyn SearchProvider>,
}

impl SearchStep {
    pub fn new(provider: Arc<dyn SearchProvider>) -> Self {
        Self { provider }
    }
}

#[async_trait]
impl PipelineStep for SearchStep {
    fn id(&self) -> StepId {
        StepId::Search
    }

    fn fatal_on_error(&self) -> bool {
        true
    }

    async fn execute(&self, ctx: &mut StepContext, plan: &TierPlan) -> Result<StepReport> {
        let variants = query_variants(&ctx.enhanced_query, plan.search_variants);

        let searches = variants.iter().map(|v| {
            self.provider.search(
                v,
                plan.max_results,
                plan.search_depth,
                plan.fetch_raw_content,
            )
        });
        let outcomes = join_all(searches).await;

        let mut seen: HashSet<String> = HashSet::new();
        let mut results: Vec<SearchResult> = Vec::new();
        let mut failures = 0usize;

        for (variant, outcome) in variants.iter().zip(outcomes) {
            match outcome {
                Ok(hits) => {
                    for hit in hits {
                        if !seen.insert(hit.url.clone()) {
                            continue;
                        }
                        let source_type = classify_source(&hit);
                        results.push(SearchResult {
                            title: hit.title,
                            url: hit.url,
                            content: hit.content,
                            raw_content: hit.raw_content,
                            score: hit.score,
                            published_date: hit.published_date,
                            source_type,
                        });
                    }
                }
                Err(e) => {
                    failures += 1;
                    warn!(
                        run_id = %ctx.run_id,
                        tier = %ctx.tier,
                        variant,
                        error = %e,
                        "search variant failed"
                    );
                }
            }
        }

        // Provider failure degrades the run instead of failing it; downstream
        // steps check the flag and short-circuit.
        if results.is_empty() && failures == variants.len() {
            ctx.search_degraded = true;
        }

        results.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));

        let tokens = results
            .iter()
            .map(|r| estimate_tokens(&r.content))
            .sum::<u64>();
        debug!(
            run_id = %ctx.run_id,
            results = results.len(),
            failures,
            "search complete"
        );

        let summary = serde_json::json!({
            "results": results.len(),
            "variants": variants.len(),
            "failed_variants": failures,
            "degraded": ctx.search_degraded,
        });
        ctx.results = results;

        Ok(StepReport::new(tokens, summary))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hit(title: &str, url: &str, content: &str) -> SearchHit {
        SearchHit {
            title: title.to_string(),
            url: url.to_string(),
            content: content.to_string(),
            raw_content: None,
            score: 0.5,
            published_date: None,
        }
    }

    #[test]
    fn test_judicial_host_wins() {
        let h = hit("Some ruling", "https://www.courtlistener.com/opinion/123", "text");
        assert_eq!(classify_source(&h), SourceType::CourtCase);
    }

    #[test]
    fn test_citation_beats_academic_domain() {
        // Hosted on an academic domain but contains a case citation:
        // legal authority takes precedence over secondary sources.
        let h = hit(
            "Smith v. Jones, 123 F.3d 456",
            "https://law.harvard.edu/casebook/smith",
            "An annotated reading of Smith v. Jones, 123 F.3d 456 (1998).",
        );
        assert_eq!(classify_source(&h), SourceType::CourtCase);
    }

    #[test]
    fn test_academic_classification() {
        let h = hit(
            "Contract remedies reconsidered",
            "https://papers.ssrn.com/sol3/paper.cfm?id=1",
            "A law review article on expectation damages.",
        );
        assert_eq!(classify_source(&h), SourceType::Academic);
    }

    #[test]
    fn test_government_classification() {
        let h = hit(
            "Consumer Protection Act",
            "https://www.legislation.gov.uk/ukpga/2015/15",
            "The text of the Act as enacted.",
        );
        assert_eq!(classify_source(&h), SourceType::Government);
    }

    #[test]
    fn test_news_classification() {
        let h = hit(
            "Court strikes down ban",
            "https://www.reuters.com/legal/story",
            "A panel ruled on Tuesday.",
        );
        // "Court strikes down ban" has no citation pattern, so news markers apply.
        assert_eq!(classify_source(&h), SourceType::News);
    }

    #[test]
    fn test_default_other() {
        let h = hit("A blog post", "https://example.com/blog", "Some musings.");
        assert_eq!(classify_source(&h), SourceType::Other);
    }

    #[test]
    fn test_query_variants() {
        let v = query_variants("limitation periods Zimbabwe", 3);
        assert_eq!(v.len(), 3);
        assert_eq!(v[0], "limitation periods Zimbabwe");
        assert!(v[1].contains("case law"));

        assert_eq!(query_variants("q", 1).len(), 1);
        assert_eq!(query_variants("q", 0).len(), 1);
    }
}
