//! Entity extraction and validation steps.
//!
//! Extraction asks the LLM for entities in a fixed JSON shape; validation
//! then re-checks every entity against the run's retrieved sources with no
//! LLM involved. The split exists because extract-and-trust pipelines were
//! found to propagate fabricated entities into final answers.

use async_trait::async_trait;
use regex::Regex;
use std::sync::Arc;
use std::sync::LazyLock;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::pipeline::step::{PipelineStep, StepReport};
use crate::pipeline::tiers::TierPlan;
use crate::pipeline::types::{Entity, EntityKind, StepContext, StepId};
use crate::provider::{GenerationProvider, GenerationRequest};

/// Max characters of source content quoted per result in the extraction prompt.
const CONTENT_CLIP: usize = 2_000;

/// Reporter-style or neutral citations; validation requires one of these on
/// every court-case entity.
static CASE_CITATION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(\b\d+\s+[A-Z][A-Za-z.]*\.?\s*(2d|3d|4th)?\s+\d+\b)|(\[\d{4}\]\s+[A-Z]{2,})|(\b\d{4}\s+[A-Z]{2,6}\s+\d+\b)")
        .expect("invalid regex")
});

fn entity_schema() -> serde_json::Value {
    serde_json::json!({
        "type": "array",
        "items": {
            "type": "object",
            "required": ["kind", "name", "source_url"],
            "properties": {
                "kind": { "enum": ["court-case", "statute", "academic-source", "government-source", "news-source"] },
                "name": { "type": "string" },
                "citation": { "type": "string" },
                "source_url": { "type": "string" },
                "fields": { "type": "object" }
            }
        }
    })
}

/// Clip text to at most `max` bytes without splitting a UTF-8 character.
pub(crate) fn clip(text: &str, max: usize) -> &str {
    if text.len() <= max {
        return text;
    }
    let mut end = max;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}

fn parse_kind(kind: &str) -> Option<EntityKind> {
    match kind {
        "court-case" => Some(EntityKind::CourtCase),
        "statute" => Some(EntityKind::Statute),
        "academic-source" => Some(EntityKind::AcademicSource),
        "government-source" => Some(EntityKind::GovernmentSource),
        "news-source" => Some(EntityKind::NewsSource),
        _ => None,
    }
}

/// Schema-constrained entity extraction from retrieved content.
pub struct EntityExtractionStep {
    llm: Arc<dyn GenerationProvider>,
}

impl EntityExtractionStep {
    pub fn new(llm: Arc<dyn GenerationProvider>) -> Self {
        Self { llm }
    }

    fn build_prompt(ctx: &StepContext) -> String {
        let mut prompt = String::from(
            "Extract the legal entities (cases, statutes, academic and government \
             sources, news reports) present in the following retrieved material.\n\n",
        );
        for result in &ctx.results {
            let content = ctx.content_for(&result.url).unwrap_or(&result.content);
            let clipped = clip(content, CONTENT_CLIP);
            prompt.push_str(&format!(
                "SOURCE ({}): {}\nURL: {}\n{}\n\n",
                result.source_type, result.title, result.url, clipped
            ));
        }
        prompt.push_str(
            "Only list entities that literally appear in the material above. \
             Every entity's source_url must be one of the URLs above. \
             Include a formal citation for every court case.",
        );
        prompt
    }
}

#[async_trait]
impl PipelineStep for EntityExtractionStep {
    fn id(&self) -> StepId {
        StepId::EntityExtraction
    }

    fn optional(&self) -> bool {
        true
    }

    async fn execute(&self, ctx: &mut StepContext, _plan: &TierPlan) -> Result<StepReport> {
        if ctx.results.is_empty() {
            return Ok(StepReport::skipped("no_search_results"));
        }

        let prompt = Self::build_prompt(ctx);
        let request = GenerationRequest::new(prompt)
            .with_max_tokens(2048)
            .with_temperature(0.0);

        let (value, tokens) = self.llm.generate_json(request, &entity_schema()).await?;

        let items = value
            .as_array()
            .ok_or_else(|| Error::validation("entity output was not a JSON array"))?;

        let mut entities = Vec::new();
        for item in items {
            let Some(kind) = item.get("kind").and_then(|v| v.as_str()).and_then(parse_kind)
            else {
                continue;
            };
            let Some(name) = item.get("name").and_then(|v| v.as_str()) else {
                continue;
            };
            let Some(source_url) = item.get("source_url").and_then(|v| v.as_str()) else {
                continue;
            };

            let mut entity = Entity::new(kind, name, source_url);
            if let Some(citation) = item.get("citation").and_then(|v| v.as_str()) {
                entity = entity.with_citation(citation);
            }
            if let Some(fields) = item.get("fields").and_then(|v| v.as_object()) {
                entity.fields = fields.clone();
            }
            entities.push(entity);
        }

        debug!(run_id = %ctx.run_id, entities = entities.len(), "entity extraction complete");

        let summary = serde_json::json!({ "extracted": entities.len() });
        ctx.entities = entities;

        Ok(StepReport::new(tokens, summary))
    }
}

/// Why an entity was rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RejectReason {
    MissingSourceUrl,
    UnknownSourceUrl,
    MissingCitation,
    EmptyName,
}

impl std::fmt::Display for RejectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::MissingSourceUrl => "missing source url",
            Self::UnknownSourceUrl => "source url not in retrieved set",
            Self::MissingCitation => "court case without citation",
            Self::EmptyName => "empty name",
        };
        write!(f, "{}", s)
    }
}

/// Validate one entity against the run's retrieved URL set.
pub fn validate_entity(entity: &Entity, retrieved: &std::collections::HashSet<&str>) -> std::result::Result<(), RejectReason> {
    if entity.name.trim().is_empty() {
        return Err(RejectReason::EmptyName);
    }
    if entity.source_url.trim().is_empty() {
        return Err(RejectReason::MissingSourceUrl);
    }
    if !retrieved.contains(entity.source_url.as_str()) {
        return Err(RejectReason::UnknownSourceUrl);
    }
    if entity.kind == EntityKind::CourtCase {
        let has_citation = entity
            .citation
            .as_deref()
            .is_some_and(|c| CASE_CITATION.is_match(c));
        if !has_citation {
            return Err(RejectReason::MissingCitation);
        }
    }
    Ok(())
}

/// Rule-based validation gate. Entities failing any check are dropped, never
/// silently kept.
pub struct EntityValidationStep;

#[async_trait]
impl PipelineStep for EntityValidationStep {
    fn id(&self) -> StepId {
        StepId::EntityValidation
    }

    async fn execute(&self, ctx: &mut StepContext, _plan: &TierPlan) -> Result<StepReport> {
        let urls: Vec<String> = ctx.results.iter().map(|r| r.url.clone()).collect();
        let retrieved: std::collections::HashSet<&str> = urls.iter().map(|s| s.as_str()).collect();
        let before = ctx.entities.len();

        let (kept, dropped): (Vec<_>, Vec<_>) = std::mem::take(&mut ctx.entities)
            .into_iter()
            .map(|e| {
                let verdict = validate_entity(&e, &retrieved);
                (e, verdict)
            })
            .partition(|(_, verdict)| verdict.is_ok());

        for (entity, verdict) in &dropped {
            if let Err(reason) = verdict {
                warn!(
                    run_id = %ctx.run_id,
                    entity = %entity.name,
                    kind = %entity.kind,
                    reason = %reason,
                    "entity dropped by validation"
                );
            }
        }

        ctx.entities = kept.into_iter().map(|(e, _)| e).collect();

        let summary = serde_json::json!({
            "validated": ctx.entities.len(),
            "dropped": before - ctx.entities.len(),
        });

        Ok(StepReport::new(0, summary))
    }
}
