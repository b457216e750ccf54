//! Core types for pipeline runs: results, entities, claims, and run records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use uuid::Uuid;

use crate::pipeline::tiers::Tier;
use crate::query::Query;
use crate::tokens::TokenBudget;

/// Unique identifier for a pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RunId(pub Uuid);

impl RunId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for an extracted entity within a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntityId(pub Uuid);

impl EntityId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for EntityId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for EntityId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifiers for the pipeline step kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepId {
    Search,
    Extract,
    EntityExtraction,
    EntityValidation,
    ClaimExtraction,
    Compose,
}

impl std::fmt::Display for StepId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Search => "search",
            Self::Extract => "extract",
            Self::EntityExtraction => "entity_extraction",
            Self::EntityValidation => "entity_validation",
            Self::ClaimExtraction => "claim_extraction",
            Self::Compose => "compose",
        };
        write!(f, "{}", s)
    }
}

/// Derived classification of a search result's source.
///
/// Assigned by the search step's rule cascade, never provider-supplied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SourceType {
    CourtCase,
    Academic,
    Government,
    News,
    Other,
}

impl std::fmt::Display for SourceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::CourtCase => "court-case",
            Self::Academic => "academic",
            Self::Government => "government",
            Self::News => "news",
            Self::Other => "other",
        };
        write!(f, "{}", s)
    }
}

/// A search result after source typing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    pub title: String,
    pub url: String,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw_content: Option<String>,
    pub score: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub published_date: Option<String>,
    pub source_type: SourceType,
}

/// Kind of a structured entity extracted from source content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EntityKind {
    CourtCase,
    Statute,
    AcademicSource,
    GovernmentSource,
    NewsSource,
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::CourtCase => "court-case",
            Self::Statute => "statute",
            Self::AcademicSource => "academic-source",
            Self::GovernmentSource => "government-source",
            Self::NewsSource => "news-source",
        };
        write!(f, "{}", s)
    }
}

/// A structured fact extracted from retrieved content.
///
/// Entities never outlive a single run; their only durable trace is the
/// citations in the composed answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub id: EntityId,
    pub kind: EntityKind,
    /// Display name: case name, statute title, article title.
    pub name: String,
    /// Formal citation where the kind carries one (required for court cases).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub citation: Option<String>,
    /// Kind-specific fields (court, year, section, authors, ...).
    #[serde(default)]
    pub fields: serde_json::Map<String, serde_json::Value>,
    /// Back-reference to the search result this entity came from.
    pub source_url: String,
}

impl Entity {
    pub fn new(kind: EntityKind, name: impl Into<String>, source_url: impl Into<String>) -> Self {
        Self {
            id: EntityId::new(),
            kind,
            name: name.into(),
            citation: None,
            fields: serde_json::Map::new(),
            source_url: source_url.into(),
        }
    }

    pub fn with_citation(mut self, citation: impl Into<String>) -> Self {
        self.citation = Some(citation.into());
        self
    }
}

/// Confidence level attached to a claim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Confidence {
    Low,
    Medium,
    High,
}

impl std::fmt::Display for Confidence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        };
        write!(f, "{}", s)
    }
}

/// A citable statement grounded in one or more validated entities.
///
/// Claims with no surviving source entities are discarded before composition;
/// this is the final grounding gate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Claim {
    pub id: Uuid,
    pub statement: String,
    pub source_entity_ids: Vec<EntityId>,
    pub confidence: Confidence,
}

impl Claim {
    pub fn new(statement: impl Into<String>, source_entity_ids: Vec<EntityId>) -> Self {
        Self {
            id: Uuid::new_v4(),
            statement: statement.into(),
            source_entity_ids,
            confidence: Confidence::Medium,
        }
    }

    pub fn with_confidence(mut self, confidence: Confidence) -> Self {
        self.confidence = confidence;
        self
    }

    pub fn is_grounded(&self) -> bool {
        !self.source_entity_ids.is_empty()
    }
}

/// Record of one executed (or skipped) step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepExecution {
    pub step: StepId,
    pub tokens_used: u64,
    pub duration_ms: u64,
    /// Small structured summary of what the step produced (counts, flags).
    pub output_summary: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Status of a pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Success,
    Failed,
}

/// One execution instance of a tier's pipeline. Owned exclusively by the
/// engine for its lifetime and discarded after the result is returned.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineRun {
    pub id: RunId,
    pub tier: Tier,
    pub query: Query,
    pub steps: Vec<StepExecution>,
    pub total_tokens: u64,
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

impl PipelineRun {
    pub fn start(tier: Tier, query: Query) -> Self {
        Self {
            id: RunId::new(),
            tier,
            query,
            steps: Vec::new(),
            total_tokens: 0,
            status: RunStatus::Running,
            started_at: Utc::now(),
            finished_at: None,
        }
    }

    pub fn record_step(&mut self, execution: StepExecution) {
        self.total_tokens += execution.tokens_used;
        self.steps.push(execution);
    }

    pub fn finish(&mut self, status: RunStatus) {
        self.status = status;
        self.finished_at = Some(Utc::now());
    }
}

/// Reference to a source cited in the final answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceRef {
    pub title: String,
    pub url: String,
}

/// The tier-independent result contract returned to callers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunOutput {
    /// Final natural-language answer (or structured fallback text).
    pub response: String,
    /// Sources actually cited or surfaced, all drawn from retrieved URLs.
    pub sources: Vec<SourceRef>,
    /// Sum of per-step token usage.
    pub total_tokens: u64,
}

/// Mutable state threaded through the steps of one run.
///
/// Each step reads the fields it needs and appends what it produced; step
/// `n+1` consumes a structural superset of step `n`'s output.
#[derive(Debug)]
pub struct StepContext {
    pub run_id: RunId,
    pub tier: Tier,
    pub query: Query,
    /// Self-contained search string from the query enhancer.
    pub enhanced_query: String,
    pub budget: TokenBudget,
    /// Typed results from the search step.
    pub results: Vec<SearchResult>,
    /// Whether the search provider failed (downstream steps short-circuit).
    pub search_degraded: bool,
    /// Per-URL extraction outcomes, partial success preserved.
    pub extractions: Vec<crate::provider::ExtractedPage>,
    /// Entities that survived validation.
    pub entities: Vec<Entity>,
    /// Grounded claims ready for composition.
    pub claims: Vec<Claim>,
    /// Optional grouping summary produced by the broad tier's breadth pass.
    pub breadth_summary: Option<String>,
    /// Final answer once composition has run.
    pub answer: Option<String>,
    /// Sources surfaced alongside the answer, set by composition.
    pub sources: Vec<SourceRef>,
    /// Set when the run deadline expired; composition must not call providers.
    pub deadline_expired: bool,
}

impl StepContext {
    pub fn new(
        run_id: RunId,
        tier: Tier,
        query: Query,
        enhanced_query: String,
        budget: TokenBudget,
    ) -> Self {
        Self {
            run_id,
            tier,
            query,
            enhanced_query,
            budget,
            results: Vec::new(),
            search_degraded: false,
            extractions: Vec::new(),
            entities: Vec::new(),
            claims: Vec::new(),
            breadth_summary: None,
            answer: None,
            sources: Vec::new(),
            deadline_expired: false,
        }
    }

    /// The set of URLs actually returned by this run's search step.
    /// Membership in this set is what "grounded" means for the whole run.
    pub fn retrieved_urls(&self) -> HashSet<&str> {
        self.results.iter().map(|r| r.url.as_str()).collect()
    }

    /// Raw content for a URL, preferring a successful extraction over the
    /// search-time raw content.
    pub fn content_for(&self, url: &str) -> Option<&str> {
        if let Some(page) = self
            .extractions
            .iter()
            .find(|p| p.url == url && p.succeeded())
        {
            return page.raw_content.as_deref();
        }
        self.results
            .iter()
            .find(|r| r.url == url)
            .and_then(|r| r.raw_content.as_deref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context_with_urls(urls: &[&str]) -> StepContext {
        let mut ctx = StepContext::new(
            RunId::new(),
            Tier::Fast,
            Query::new("q", "US"),
            "q US".to_string(),
            TokenBudget::new(1000),
        );
        ctx.results = urls
            .iter()
            .map(|u| SearchResult {
                title: "t".to_string(),
                url: u.to_string(),
                content: "c".to_string(),
                raw_content: None,
                score: 0.5,
                published_date: None,
                source_type: SourceType::Other,
            })
            .collect();
        ctx
    }

    #[test]
    fn test_run_token_aggregation() {
        let mut run = PipelineRun::start(Tier::Fast, Query::new("q", "US"));
        run.record_step(StepExecution {
            step: StepId::Search,
            tokens_used: 100,
            duration_ms: 10,
            output_summary: serde_json::json!({"results": 3}),
            error: None,
        });
        run.record_step(StepExecution {
            step: StepId::Compose,
            tokens_used: 250,
            duration_ms: 20,
            output_summary: serde_json::json!({}),
            error: None,
        });
        assert_eq!(run.total_tokens, 350);
    }

    #[test]
    fn test_retrieved_urls() {
        let ctx = context_with_urls(&["https://a.example/1", "https://b.example/2"]);
        let urls = ctx.retrieved_urls();
        assert!(urls.contains("https://a.example/1"));
        assert!(!urls.contains("https://c.example/3"));
    }

    #[test]
    fn test_content_prefers_extraction() {
        let mut ctx = context_with_urls(&["https://a.example/1"]);
        ctx.results[0].raw_content = Some("search raw".to_string());
        ctx.extractions = vec![crate::provider::ExtractedPage::ok(
            "https://a.example/1",
            "extracted raw",
        )];
        assert_eq!(ctx.content_for("https://a.example/1"), Some("extracted raw"));
    }

    #[test]
    fn test_claim_grounding_flag() {
        let grounded = Claim::new("stmt", vec![EntityId::new()]);
        let orphan = Claim::new("stmt", vec![]);
        assert!(grounded.is_grounded());
        assert!(!orphan.is_grounded());
    }
}
