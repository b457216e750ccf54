//! Query enhancement: rewrite elliptical follow-ups into self-contained
//! search strings.
//!
//! Enhancement is best-effort by construction. The enhancer never returns an
//! error: a provider failure, a timeout, or a rewrite that fails validation
//! all collapse to the same deterministic fallback, so repeated failures
//! produce identical search strings.

use std::sync::Arc;
use tracing::{debug, warn};

use crate::provider::{GenerationProvider, GenerationRequest};
use crate::query::{ChatRole, Query};

/// How many trailing conversation turns inform the rewrite.
const HISTORY_WINDOW: usize = 4;

/// Rewrites longer than this are assumed to have drifted off-query.
const MAX_ENHANCED_LEN: usize = 200;

const SYSTEM_PROMPT: &str = "You rewrite legal research questions into self-contained \
    web search queries. Resolve pronouns and references against the conversation. \
    Reply with the rewritten query only, no preamble.";

/// Deterministic enhancement used whenever the LLM path is unavailable or
/// produces an unusable rewrite.
pub fn fallback_enhancement(query: &Query) -> String {
    format!("{} {}", query.text, query.jurisdiction)
}

fn valid_rewrite(rewritten: &str, original: &str) -> bool {
    let rewritten = rewritten.trim();
    !rewritten.is_empty()
        && rewritten.len() <= MAX_ENHANCED_LEN
        && rewritten.len() >= original.len()
}

/// Produces a self-contained search string for a query.
pub struct QueryEnhancer {
    llm: Arc<dyn GenerationProvider>,
}

impl QueryEnhancer {
    pub fn new(llm: Arc<dyn GenerationProvider>) -> Self {
        Self { llm }
    }

    fn build_prompt(query: &Query) -> String {
        let mut prompt = String::new();
        let recent = query.recent_history(HISTORY_WINDOW);
        if !recent.is_empty() {
            prompt.push_str("Conversation so far:\n");
            for turn in recent {
                let speaker = match turn.role {
                    ChatRole::User => "User",
                    ChatRole::Assistant => "Assistant",
                };
                prompt.push_str(&format!("{}: {}\n", speaker, turn.content));
            }
            prompt.push('\n');
        }
        prompt.push_str(&format!(
            "Jurisdiction: {}\nQuestion: {}\n\nRewrite the question as a standalone \
             search query.",
            query.jurisdiction, query.text
        ));
        prompt
    }

    /// Enhance the query, infallibly. Returns the search string and the
    /// tokens spent on the attempt (zero on the fallback path when the
    /// provider never responded).
    pub async fn enhance(&self, query: &Query) -> (String, u64) {
        let request = GenerationRequest::new(Self::build_prompt(query))
            .with_system(SYSTEM_PROMPT)
            .with_max_tokens(120)
            .with_temperature(0.0);

        match self.llm.generate(request).await {
            Ok(response) => {
                let rewritten = response.content.trim().to_string();
                if valid_rewrite(&rewritten, &query.text) {
                    debug!(enhanced = %rewritten, "query enhanced");
                    (rewritten, response.tokens_used)
                } else {
                    warn!(
                        rewritten_len = rewritten.len(),
                        "rewrite failed validation, using fallback"
                    );
                    (fallback_enhancement(query), response.tokens_used)
                }
            }
            Err(e) => {
                warn!(error = %e, "enhancement provider failed, using fallback");
                (fallback_enhancement(query), 0)
            }
        }
    }
}
