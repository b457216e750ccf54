//! Claim extraction: validated entities become citable statements.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::error::Result;
use crate::pipeline::step::{PipelineStep, StepReport};
use crate::pipeline::tiers::TierPlan;
use crate::pipeline::types::{Claim, Confidence, StepContext, StepId};
use crate::provider::{GenerationProvider, GenerationRequest};

/// What to do with low-confidence claims.
///
/// The policy is configurable rather than fixed: some deployments prefer
/// annotated low-confidence claims in the answer, others exclude them.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfidencePolicy {
    /// Keep low-confidence claims; composition marks them as tentative.
    #[default]
    Annotate,
    /// Remove low-confidence claims before composition.
    DropLow,
}

fn claim_schema() -> serde_json::Value {
    serde_json::json!({
        "type": "array",
        "items": {
            "type": "object",
            "required": ["statement", "entity_indices"],
            "properties": {
                "statement": { "type": "string" },
                "entity_indices": { "type": "array", "items": { "type": "integer" } },
                "confidence": { "enum": ["high", "medium", "low"] }
            }
        }
    })
}

fn parse_confidence(s: Option<&str>) -> Confidence {
    match s {
        Some("high") => Confidence::High,
        Some("low") => Confidence::Low,
        _ => Confidence::Medium,
    }
}

/// Converts validated entities into claims. A claim citing no surviving
/// entity is discarded here, before composition ever sees it: the second
/// and final grounding gate.
pub struct ClaimExtractionStep {
    llm: Arc<dyn GenerationProvider>,
    policy: ConfidencePolicy,
}

impl ClaimExtractionStep {
    pub fn new(llm: Arc<dyn GenerationProvider>) -> Self {
        Self {
            llm,
            policy: ConfidencePolicy::default(),
        }
    }

    pub fn with_policy(mut self, policy: ConfidencePolicy) -> Self {
        self.policy = policy;
        self
    }

    fn build_prompt(ctx: &StepContext) -> String {
        let mut prompt = String::from(
            "Given these validated legal entities, state the factual claims they \
             support, one claim per assertion. Reference entities by index.\n\n",
        );
        for (i, entity) in ctx.entities.iter().enumerate() {
            prompt.push_str(&format!(
                "[{}] {} \"{}\"{} (source: {})\n",
                i,
                entity.kind,
                entity.name,
                entity
                    .citation
                    .as_deref()
                    .map(|c| format!(", {}", c))
                    .unwrap_or_default(),
                entity.source_url
            ));
        }
        prompt.push_str(
            "\nOnly make claims these entities directly support. \
             Every claim must reference at least one entity index.",
        );
        prompt
    }
}

#[async_trait]
impl PipelineStep for ClaimExtractionStep {
    fn id(&self) -> StepId {
        StepId::ClaimExtraction
    }

    fn optional(&self) -> bool {
        true
    }

    async fn execute(&self, ctx: &mut StepContext, _plan: &TierPlan) -> Result<StepReport> {
        if ctx.entities.is_empty() {
            return Ok(StepReport::skipped("no_entities"));
        }

        let request = GenerationRequest::new(Self::build_prompt(ctx))
            .with_max_tokens(1500)
            .with_temperature(0.0);

        let (value, tokens) = self.llm.generate_json(request, &claim_schema()).await?;

        let mut claims: Vec<Claim> = Vec::new();
        let mut ungrounded = 0usize;
        for item in value.as_array().map(|a| a.as_slice()).unwrap_or_default() {
            let Some(statement) = item.get("statement").and_then(|v| v.as_str()) else {
                continue;
            };
            let entity_ids: Vec<_> = item
                .get("entity_indices")
                .and_then(|v| v.as_array())
                .map(|indices| {
                    indices
                        .iter()
                        .filter_map(|i| i.as_u64())
                        .filter_map(|i| ctx.entities.get(i as usize))
                        .map(|e| e.id)
                        .collect()
                })
                .unwrap_or_default();

            // Grounding gate: a claim with no valid source entities is dropped.
            if entity_ids.is_empty() {
                ungrounded += 1;
                warn!(run_id = %ctx.run_id, statement, "ungrounded claim discarded");
                continue;
            }

            let confidence = parse_confidence(item.get("confidence").and_then(|v| v.as_str()));
            claims.push(Claim::new(statement, entity_ids).with_confidence(confidence));
        }

        let before_policy = claims.len();
        if self.policy == ConfidencePolicy::DropLow {
            claims.retain(|c| c.confidence > Confidence::Low);
        }

        debug!(
            run_id = %ctx.run_id,
            claims = claims.len(),
            ungrounded,
            dropped_low = before_policy - claims.len(),
            "claim extraction complete"
        );

        let summary = serde_json::json!({
            "claims": claims.len(),
            "discarded_ungrounded": ungrounded,
            "dropped_low_confidence": before_policy - claims.len(),
        });
        ctx.claims = claims;

        Ok(StepReport::new(tokens, summary))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::pipeline::types::{Entity, EntityKind, RunId, SearchResult, SourceType};
    use crate::pipeline::Tier;
    use crate::query::Query;
    use crate::tokens::TokenBudget;
    use serde_json::json;

    struct CannedJson(serde_json::Value);

    #[async_trait]
    impl GenerationProvider for CannedJson {
        async fn generate(
            &self,
            _request: GenerationRequest,
        ) -> Result<crate::provider::GenerationResponse> {
            Err(Error::provider("fake", "not used"))
        }

        async fn generate_json(
            &self,
            _request: GenerationRequest,
            _schema: &serde_json::Value,
        ) -> Result<(serde_json::Value, u64)> {
            Ok((self.0.clone(), 42))
        }
    }

    fn context_with_entities() -> StepContext {
        let mut ctx = StepContext::new(
            RunId::new(),
            Tier::Deep,
            Query::new("q", "US"),
            "q US".to_string(),
            TokenBudget::new(48_000),
        );
        ctx.results = vec![SearchResult {
            title: "t".to_string(),
            url: "https://a.example/1".to_string(),
            content: "c".to_string(),
            raw_content: None,
            score: 0.9,
            published_date: None,
            source_type: SourceType::CourtCase,
        }];
        ctx.entities = vec![
            Entity::new(EntityKind::CourtCase, "Smith v. Jones", "https://a.example/1")
                .with_citation("123 F.3d 456"),
            Entity::new(EntityKind::Statute, "Limitation Act", "https://a.example/1"),
        ];
        ctx
    }

    #[tokio::test]
    async fn test_claims_carry_entity_ids() {
        let llm = Arc::new(CannedJson(json!([
            { "statement": "The limitation period is six years.", "entity_indices": [1], "confidence": "high" }
        ])));
        let step = ClaimExtractionStep::new(llm);
        let mut ctx = context_with_entities();
        let plan = Tier::Deep.plan();

        step.execute(&mut ctx, &plan).await.unwrap();
        assert_eq!(ctx.claims.len(), 1);
        assert_eq!(ctx.claims[0].source_entity_ids, vec![ctx.entities[1].id]);
        assert_eq!(ctx.claims[0].confidence, Confidence::High);
    }

    #[tokio::test]
    async fn test_ungrounded_claim_discarded() {
        let llm = Arc::new(CannedJson(json!([
            { "statement": "Grounded.", "entity_indices": [0] },
            { "statement": "Invented.", "entity_indices": [] },
            { "statement": "Out of range.", "entity_indices": [99] }
        ])));
        let step = ClaimExtractionStep::new(llm);
        let mut ctx = context_with_entities();
        let plan = Tier::Deep.plan();

        let report = step.execute(&mut ctx, &plan).await.unwrap();
        assert_eq!(ctx.claims.len(), 1);
        assert_eq!(ctx.claims[0].statement, "Grounded.");
        assert_eq!(report.summary["discarded_ungrounded"], 2);
    }

    #[tokio::test]
    async fn test_drop_low_policy() {
        let llm = Arc::new(CannedJson(json!([
            { "statement": "Solid.", "entity_indices": [0], "confidence": "high" },
            { "statement": "Shaky.", "entity_indices": [0], "confidence": "low" }
        ])));
        let step = ClaimExtractionStep::new(llm).with_policy(ConfidencePolicy::DropLow);
        let mut ctx = context_with_entities();
        let plan = Tier::Deep.plan();

        step.execute(&mut ctx, &plan).await.unwrap();
        assert_eq!(ctx.claims.len(), 1);
        assert_eq!(ctx.claims[0].statement, "Solid.");
    }

    #[tokio::test]
    async fn test_no_entities_skips() {
        let llm = Arc::new(CannedJson(json!([])));
        let step = ClaimExtractionStep::new(llm);
        let mut ctx = context_with_entities();
        ctx.entities.clear();
        let plan = Tier::Deep.plan();

        let report = step.execute(&mut ctx, &plan).await.unwrap();
        assert_eq!(report.summary["skipped"], "no_entities");
    }
}
