//! Provider contracts for web search and LLM generation.
//!
//! The pipeline only ever talks to these two traits. The crate ships one
//! reqwest-backed implementation of each ([`TavilySearch`], [`AnthropicGeneration`]);
//! tests inject in-memory fakes. Both contracts must be safe to retry.

mod llm;
mod search;

pub use llm::{AnthropicGeneration, GenerationConfig};
pub use search::{TavilySearch, TavilySearchConfig};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Depth hint passed through to the search provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchDepth {
    Basic,
    Advanced,
}

/// A raw hit from the search provider, before source typing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub title: String,
    pub url: String,
    /// Snippet-level content returned with the hit.
    pub content: String,
    /// Full page content, present only when requested.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw_content: Option<String>,
    /// Provider relevance score, 0.0-1.0.
    pub score: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub published_date: Option<String>,
}

/// Result of a full-content fetch for one URL. Failures are per-URL: one bad
/// page never poisons the batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedPage {
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw_content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ExtractedPage {
    pub fn ok(url: impl Into<String>, raw_content: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            raw_content: Some(raw_content.into()),
            error: None,
        }
    }

    pub fn failed(url: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            raw_content: None,
            error: Some(error.into()),
        }
    }

    pub fn succeeded(&self) -> bool {
        self.raw_content.is_some()
    }
}

/// Web search provider contract.
#[async_trait]
pub trait SearchProvider: Send + Sync {
    /// Run one search. Must be idempotent-safe to retry.
    async fn search(
        &self,
        query: &str,
        max_results: usize,
        depth: SearchDepth,
        fetch_raw_content: bool,
    ) -> Result<Vec<SearchHit>>;

    /// Fetch full content for each URL independently.
    async fn extract(&self, urls: &[String]) -> Result<Vec<ExtractedPage>>;
}

/// A request for text generation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationRequest {
    /// System prompt.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
    /// User prompt.
    pub prompt: String,
    /// Maximum tokens to generate.
    pub max_tokens: u32,
    /// Temperature (0.0 - 1.0).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
}

impl GenerationRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            system: None,
            prompt: prompt.into(),
            max_tokens: 1024,
            temperature: None,
        }
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = Some(temperature.clamp(0.0, 1.0));
        self
    }
}

/// A generation result with provider-reported usage where available.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationResponse {
    pub content: String,
    /// Total tokens (input + output) as reported by the provider, or an
    /// estimate when the provider does not report usage.
    pub tokens_used: u64,
}

/// LLM generation provider contract.
#[async_trait]
pub trait GenerationProvider: Send + Sync {
    /// Generate free-form text.
    async fn generate(&self, request: GenerationRequest) -> Result<GenerationResponse>;

    /// Generate JSON conforming to the given schema. Implementations pass the
    /// schema to the provider's structured-output mechanism where one exists,
    /// otherwise embed it in the prompt and parse the reply.
    async fn generate_json(
        &self,
        request: GenerationRequest,
        schema: &serde_json::Value,
    ) -> Result<(serde_json::Value, u64)>;
}
