//! Tavily search and extraction client.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{Error, Result};

use super::{ExtractedPage, SearchDepth, SearchHit, SearchProvider};

/// Configuration for the Tavily client.
#[derive(Debug, Clone)]
pub struct TavilySearchConfig {
    /// API key
    pub api_key: String,
    /// Base URL override
    pub base_url: Option<String>,
    /// Request timeout in seconds
    pub timeout_secs: u64,
}

impl TavilySearchConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: None,
            timeout_secs: 30,
        }
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }
}

/// Tavily web-search client.
pub struct TavilySearch {
    config: TavilySearchConfig,
    http: Client,
}

impl TavilySearch {
    const DEFAULT_BASE_URL: &'static str = "https://api.tavily.com";

    pub fn new(config: TavilySearchConfig) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| Error::Config(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self { config, http })
    }

    fn base_url(&self) -> &str {
        self.config
            .base_url
            .as_deref()
            .unwrap_or(Self::DEFAULT_BASE_URL)
    }
}

// Tavily API types
#[derive(Debug, Serialize)]
struct TavilySearchRequest<'a> {
    api_key: &'a str,
    query: &'a str,
    max_results: usize,
    search_depth: &'a str,
    include_raw_content: bool,
}

#[derive(Debug, Deserialize)]
struct TavilySearchResponse {
    results: Vec<TavilyResult>,
}

#[derive(Debug, Deserialize)]
struct TavilyResult {
    title: String,
    url: String,
    #[serde(default)]
    content: String,
    #[serde(default)]
    raw_content: Option<String>,
    #[serde(default)]
    score: f64,
    #[serde(default)]
    published_date: Option<String>,
}

#[derive(Debug, Serialize)]
struct TavilyExtractRequest<'a> {
    api_key: &'a str,
    urls: &'a [String],
}

#[derive(Debug, Deserialize)]
struct TavilyExtractResponse {
    #[serde(default)]
    results: Vec<TavilyExtractResult>,
    #[serde(default)]
    failed_results: Vec<TavilyFailedResult>,
}

#[derive(Debug, Deserialize)]
struct TavilyExtractResult {
    url: String,
    raw_content: String,
}

#[derive(Debug, Deserialize)]
struct TavilyFailedResult {
    url: String,
    #[serde(default)]
    error: Option<String>,
}

#[async_trait]
impl SearchProvider for TavilySearch {
    async fn search(
        &self,
        query: &str,
        max_results: usize,
        depth: SearchDepth,
        fetch_raw_content: bool,
    ) -> Result<Vec<SearchHit>> {
        let request = TavilySearchRequest {
            api_key: &self.config.api_key,
            query,
            max_results,
            search_depth: match depth {
                SearchDepth::Basic => "basic",
                SearchDepth::Advanced => "advanced",
            },
            include_raw_content: fetch_raw_content,
        };

        let url = format!("{}/search", self.base_url());

        let response = self
            .http
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| Error::provider("tavily", format!("HTTP request failed: {}", e)))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| Error::provider("tavily", format!("failed to read response: {}", e)))?;

        if !status.is_success() {
            return Err(Error::provider("tavily", format!("{}: {}", status, body)));
        }

        let api_response: TavilySearchResponse = serde_json::from_str(&body)
            .map_err(|e| Error::provider("tavily", format!("failed to parse response: {}", e)))?;

        Ok(api_response
            .results
            .into_iter()
            .map(|r| SearchHit {
                title: r.title,
                url: r.url,
                content: r.content,
                raw_content: r.raw_content,
                score: r.score,
                published_date: r.published_date,
            })
            .collect())
    }

    async fn extract(&self, urls: &[String]) -> Result<Vec<ExtractedPage>> {
        if urls.is_empty() {
            return Ok(Vec::new());
        }

        let request = TavilyExtractRequest {
            api_key: &self.config.api_key,
            urls,
        };

        let url = format!("{}/extract", self.base_url());

        let response = self
            .http
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| Error::provider("tavily", format!("HTTP request failed: {}", e)))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| Error::provider("tavily", format!("failed to read response: {}", e)))?;

        if !status.is_success() {
            return Err(Error::provider("tavily", format!("{}: {}", status, body)));
        }

        let api_response: TavilyExtractResponse = serde_json::from_str(&body)
            .map_err(|e| Error::provider("tavily", format!("failed to parse response: {}", e)))?;

        let mut pages: Vec<ExtractedPage> = api_response
            .results
            .into_iter()
            .map(|r| ExtractedPage::ok(r.url, r.raw_content))
            .collect();
        pages.extend(api_response.failed_results.into_iter().map(|r| {
            let reason = r.error.unwrap_or_else(|| "extraction failed".to_string());
            ExtractedPage::failed(r.url, reason)
        }));

        Ok(pages)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_builder() {
        let config = TavilySearchConfig::new("tvly-key")
            .with_base_url("http://localhost:9999")
            .with_timeout(5);
        assert_eq!(config.api_key, "tvly-key");
        assert_eq!(config.base_url, Some("http://localhost:9999".to_string()));
        assert_eq!(config.timeout_secs, 5);
    }

    #[test]
    fn test_extract_response_parsing() {
        let body = r#"{
            "results": [{"url": "https://a.example/x", "raw_content": "text"}],
            "failed_results": [{"url": "https://b.example/y", "error": "403"}]
        }"#;
        let parsed: TavilyExtractResponse = serde_json::from_str(body).unwrap();
        assert_eq!(parsed.results.len(), 1);
        assert_eq!(parsed.failed_results.len(), 1);
    }
}
