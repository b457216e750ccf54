//! Composition step: synthesize the grounded answer.
//!
//! Prompt layout is deliberate: source material first, grounding rules stated
//! immediately before the generation instruction. Rules buried at the top of
//! a long prompt get forgotten; rules adjacent to the instruction do not.
//!
//! Composition can lose synthesis quality but may never lose source
//! visibility: on any generation failure it returns a deterministic listing
//! built from the raw search data instead of an error.

use async_trait::async_trait;
use regex::Regex;
use std::collections::BTreeMap;
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::LazyLock;
use tracing::{debug, warn};

use crate::error::Result;
use crate::pipeline::entities::clip;
use crate::pipeline::step::{PipelineStep, StepReport};
use crate::pipeline::tiers::{Tier, TierPlan};
use crate::pipeline::types::{SourceRef, StepContext, StepId};
use crate::provider::{GenerationProvider, GenerationRequest};
use crate::tokens::estimate_tokens;

/// Max characters of content quoted per source in the synthesis prompt.
const SOURCE_CLIP: usize = 1_500;

/// Max characters of a snippet in the deterministic fallback.
const SNIPPET_CLIP: usize = 300;

static URL_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"https?://[^\s)\]>'\x22]+").expect("invalid regex"));

/// Remove every URL in `text` that is not in the retrieved set.
///
/// This is the last line of defense for the grounding invariant: whatever the
/// model emitted, no URL outside this run's search results survives.
pub fn scrub_citations(text: &str, retrieved: &HashSet<&str>) -> (String, usize) {
    let mut removed = 0usize;
    let scrubbed = URL_PATTERN
        .replace_all(text, |caps: &regex::Captures<'_>| {
            let raw = caps.get(0).map(|m| m.as_str()).unwrap_or_default();
            let trimmed = raw.trim_end_matches(['.', ',', ';', ':']);
            if retrieved.contains(trimmed) {
                raw.to_string()
            } else {
                removed += 1;
                "[unverified source removed]".to_string()
            }
        })
        .into_owned();
    (scrubbed, removed)
}

/// Deterministic structured fallback: title + URL + snippet per source.
/// Non-empty whenever any source exists.
pub fn fallback_answer(ctx: &StepContext) -> String {
    let mut out = String::from(
        "A synthesized answer could not be produced. The following sources were \
         retrieved for this query:\n",
    );
    for result in &ctx.results {
        out.push_str(&format!(
            "\n- {} ({})\n  {}\n",
            result.title,
            result.url,
            clip(&result.content, SNIPPET_CLIP)
        ));
    }
    out
}

/// Group results by source type for the broad tier's breadth pass.
fn breadth_summary(ctx: &StepContext) -> String {
    let mut groups: BTreeMap<String, Vec<&str>> = BTreeMap::new();
    for result in &ctx.results {
        groups
            .entry(result.source_type.to_string())
            .or_default()
            .push(result.title.as_str());
    }
    let mut out = String::from("Source landscape:\n");
    for (source_type, titles) in groups {
        out.push_str(&format!("- {} ({}): {}\n", source_type, titles.len(), titles.join("; ")));
    }
    out
}

/// The final synthesis step. Always the last step of every plan, and the one
/// step the engine runs unconditionally.
pub struct ComposeStep {
    llm: Arc<dyn GenerationProvider>,
}

impl ComposeStep {
    pub fn new(llm: Arc<dyn GenerationProvider>) -> Self {
        Self { llm }
    }

    fn build_prompt(ctx: &StepContext) -> String {
        let mut prompt = String::new();

        // 1. Source material first.
        for (i, result) in ctx.results.iter().enumerate() {
            let content = ctx.content_for(&result.url).unwrap_or(&result.content);
            prompt.push_str(&format!(
                "[{}] {} ({}, {})\n{}\n\n",
                i + 1,
                result.title,
                result.url,
                result.source_type,
                clip(content, SOURCE_CLIP)
            ));
        }

        if let Some(summary) = &ctx.breadth_summary {
            prompt.push_str(summary);
            prompt.push('\n');
        }

        // 2. Validated claims, when the tier produced them.
        if !ctx.claims.is_empty() {
            prompt.push_str("Validated claims:\n");
            for claim in &ctx.claims {
                prompt.push_str(&format!("- ({}) {}\n", claim.confidence, claim.statement));
            }
            prompt.push('\n');
        }

        // 3. Grounding rules immediately before the instruction.
        prompt.push_str(
            "Rules:\n\
             - Cite only the numbered sources above, as [n].\n\
             - Never invent a citation, URL, or case name.\n\
             - If the sources do not answer part of the question, say so \
             explicitly instead of answering from general knowledge.\n\n",
        );
        prompt.push_str(&format!(
            "Question ({} law): {}\n\nWrite a grounded answer with inline citations.",
            ctx.query.jurisdiction, ctx.query.text
        ));
        prompt
    }
}

#[async_trait]
impl PipelineStep for ComposeStep {
    fn id(&self) -> StepId {
        StepId::Compose
    }

    async fn execute(&self, ctx: &mut StepContext, plan: &TierPlan) -> Result<StepReport> {
        ctx.sources = ctx
            .results
            .iter()
            .map(|r| SourceRef {
                title: r.title.clone(),
                url: r.url.clone(),
            })
            .collect();

        if plan.tier == Tier::Broad && !ctx.results.is_empty() {
            ctx.breadth_summary = Some(breadth_summary(ctx));
        }

        // Deadline already expired: no provider call, straight to fallback.
        if ctx.deadline_expired {
            let answer = fallback_answer(ctx);
            let tokens = estimate_tokens(&answer);
            ctx.answer = Some(answer);
            return Ok(StepReport::new(
                tokens,
                serde_json::json!({ "fallback": "deadline" }),
            ));
        }

        let prompt = Self::build_prompt(ctx);
        let request = GenerationRequest::new(prompt)
            .with_system(
                "You are a legal research assistant. You answer strictly from the \
                 provided sources.",
            )
            .with_max_tokens(2048)
            .with_temperature(0.2);

        match self.llm.generate(request).await {
            Ok(response) => {
                let urls: Vec<String> = ctx.results.iter().map(|r| r.url.clone()).collect();
                let retrieved: HashSet<&str> = urls.iter().map(|s| s.as_str()).collect();
                let (scrubbed, removed) = scrub_citations(&response.content, &retrieved);
                if removed > 0 {
                    warn!(
                        run_id = %ctx.run_id,
                        removed,
                        "scrubbed unverified citation URLs from answer"
                    );
                }
                debug!(run_id = %ctx.run_id, tokens = response.tokens_used, "composition complete");
                ctx.answer = Some(scrubbed);
                Ok(StepReport::new(
                    response.tokens_used,
                    serde_json::json!({ "scrubbed_urls": removed }),
                ))
            }
            Err(e) => {
                // Losing synthesis quality is acceptable; losing all source
                // visibility is not.
                warn!(run_id = %ctx.run_id, error = %e, "generation failed, using structured fallback");
                let answer = fallback_answer(ctx);
                let tokens = estimate_tokens(&answer);
                ctx.answer = Some(answer);
                Ok(StepReport::new(
                    tokens,
                    serde_json::json!({ "fallback": "generation_error" }),
                ))
            }
        }
    }
}
