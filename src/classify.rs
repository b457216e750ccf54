//! Query complexity classification and tier routing.
//!
//! Maps a raw user query to either a direct-answer path (no search needed) or
//! one of the four pipeline tiers. The classifier is pattern-based and fully
//! synchronous: it must be cheap enough to run on every inbound request before
//! any provider call is made. When signals are ambiguous it leans toward the
//! cheapest non-direct tier rather than escalating.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

use crate::pipeline::Tier;

/// Signals extracted from query analysis that indicate research complexity.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QuerySignals {
    /// Asks to compare alternatives, positions, or jurisdictions
    pub comparison_request: bool,
    /// Asks about trends, consensus, or the state of a debate
    pub trend_analysis: bool,
    /// Asks to locate case law or precedent
    pub precedent_search: bool,
    /// Explicitly wants comprehensive or exhaustive treatment
    pub wants_comprehensive: bool,
    /// Explicitly wants a quick or short answer
    pub wants_quick: bool,
    /// Needs current or recent external facts rather than settled doctrine
    pub needs_current_facts: bool,
    /// Plausibly answerable from general legal knowledge alone
    pub general_knowledge: bool,
    /// Query is long enough to suggest a multi-part question
    pub long_query: bool,
    /// References a specific statute, section, or case name
    pub cites_authority: bool,
}

impl QuerySignals {
    /// Complexity score; higher means deeper research is warranted.
    pub fn score(&self) -> i32 {
        let mut score = 0;

        if self.wants_comprehensive {
            score += 3;
        }
        if self.precedent_search {
            score += 3;
        }
        if self.comparison_request {
            score += 2;
        }
        if self.trend_analysis {
            score += 2;
        }
        if self.needs_current_facts {
            score += 2;
        }
        if self.long_query {
            score += 1;
        }
        if self.cites_authority {
            score += 1;
        }

        if self.wants_quick {
            score -= 2;
        }
        if self.general_knowledge {
            score -= 2;
        }

        score
    }

    /// Human-readable list of active signals.
    pub fn active(&self) -> Vec<&'static str> {
        let mut active = Vec::new();
        if self.comparison_request {
            active.push("comparison");
        }
        if self.trend_analysis {
            active.push("trends");
        }
        if self.precedent_search {
            active.push("precedent");
        }
        if self.wants_comprehensive {
            active.push("comprehensive");
        }
        if self.wants_quick {
            active.push("quick");
        }
        if self.needs_current_facts {
            active.push("current_facts");
        }
        if self.general_knowledge {
            active.push("general_knowledge");
        }
        if self.long_query {
            active.push("long_query");
        }
        if self.cites_authority {
            active.push("cites_authority");
        }
        active
    }
}

/// Where a query should be routed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Route {
    /// Answer directly from the model, no pipeline run.
    Direct,
    /// Run the research pipeline at the given tier.
    Research(Tier),
}

/// Routing decision with the signals and score that produced it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteDecision {
    pub route: Route,
    /// Human-readable reason for the decision.
    pub reason: String,
    pub score: i32,
    pub signals: QuerySignals,
}

static COMPARISON_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(compare|versus|\bvs\.?\b|difference\s+between|contrast|better\s+or)")
        .expect("invalid regex")
});

static TREND_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(trends?|consensus|landscape|across\s+(jurisdictions|states|countries)|majority\s+(view|rule)|how\s+(have|has)\b.*\bchanged)")
        .expect("invalid regex")
});

static PRECEDENT_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(find\s+(cases?|precedents?|authority)|case\s*law|precedents?\b|courts?\s+(have\s+)?(held|ruled|decided)|leading\s+case)")
        .expect("invalid regex")
});

static COMPREHENSIVE_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(comprehensive|in[- ]depth|detailed\s+analysis|thorough|exhaustive|full\s+(analysis|review)|memo(randum)?)")
        .expect("invalid regex")
});

static QUICK_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(quick(ly)?|brief(ly)?|short|in\s+a\s+sentence|simply|just\s+tell)")
        .expect("invalid regex")
});

static CURRENT_FACTS_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(recent(ly)?|latest|current(ly)?|new\s+(law|act|rule|regulation)|this\s+year|20\d\d|amend(ed|ment))")
        .expect("invalid regex")
});

static GENERAL_KNOWLEDGE_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(what\s+(is|are)\s+(a|an|the)\s+\w+\s*\??$|what\s+does\b.*\bmean\s*\??\s*$|define|meaning\s+of|difference\s+between\s+a\b)")
        .expect("invalid regex")
});

static AUTHORITY_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(section\s+\d+|§\s*\d+|\bs\.?\s*\d+\b|act\s+of\s+\d{4}|\bv\.?\s+[A-Z]|article\s+\d+)")
        .expect("invalid regex")
});

/// Queries longer than this many characters count as long.
const LONG_QUERY_CHARS: usize = 160;

/// Pattern-based complexity classifier.
#[derive(Debug, Clone, Default)]
pub struct ComplexityClassifier {
    /// Explicit caller override; wins over any scoring.
    pub tier_override: Option<Tier>,
}

impl ComplexityClassifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Force a tier regardless of query content.
    pub fn with_override(tier: Tier) -> Self {
        Self {
            tier_override: Some(tier),
        }
    }

    /// Extract signals from query text.
    pub fn analyze(&self, query: &str) -> QuerySignals {
        QuerySignals {
            comparison_request: COMPARISON_PATTERN.is_match(query),
            trend_analysis: TREND_PATTERN.is_match(query),
            precedent_search: PRECEDENT_PATTERN.is_match(query),
            wants_comprehensive: COMPREHENSIVE_PATTERN.is_match(query),
            wants_quick: QUICK_PATTERN.is_match(query),
            needs_current_facts: CURRENT_FACTS_PATTERN.is_match(query),
            general_knowledge: GENERAL_KNOWLEDGE_PATTERN.is_match(query),
            long_query: query.len() > LONG_QUERY_CHARS,
            cites_authority: AUTHORITY_PATTERN.is_match(query),
        }
    }

    /// Route a query to the direct path or a pipeline tier.
    pub fn route(&self, query: &str) -> RouteDecision {
        let signals = self.analyze(query);
        let score = signals.score();

        if let Some(tier) = self.tier_override {
            return RouteDecision {
                route: Route::Research(tier),
                reason: format!("tier_override:{}", tier),
                score,
                signals,
            };
        }

        // Trend/consensus queries go wide rather than deep, whatever the score.
        let route = if signals.general_knowledge && !signals.needs_current_facts && score <= 0 {
            Route::Direct
        } else if signals.trend_analysis {
            Route::Research(Tier::Broad)
        } else if signals.precedent_search || signals.wants_comprehensive || score >= 5 {
            Route::Research(Tier::Deep)
        } else if score >= 2 {
            Route::Research(Tier::Balanced)
        } else {
            // Uncertain: lean fast, not deep.
            Route::Research(Tier::Fast)
        };

        let active = signals.active();
        let reason = if active.is_empty() {
            format!("score:{}", score)
        } else {
            format!("score:{}:{}", score, active.join("+"))
        };

        RouteDecision {
            route,
            reason,
            score,
            signals,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_general_knowledge_goes_direct() {
        let classifier = ComplexityClassifier::new();
        let decision = classifier.route("What is a tort?");
        assert_eq!(decision.route, Route::Direct);
    }

    #[test]
    fn test_definition_phrasing_goes_direct() {
        let classifier = ComplexityClassifier::new();
        for query in [
            "What does habeas corpus mean?",
            "What does estoppel mean",
            "meaning of res judicata",
        ] {
            let decision = classifier.route(query);
            assert!(decision.signals.general_knowledge, "query: {}", query);
            assert_eq!(decision.route, Route::Direct, "query: {}", query);
        }
    }

    #[test]
    fn test_default_leans_fast() {
        let classifier = ComplexityClassifier::new();
        let decision =
            classifier.route("What is the statute of limitations for breach of contract?");
        assert_eq!(decision.route, Route::Research(Tier::Fast));
    }

    #[test]
    fn test_precedent_search_goes_deep() {
        let classifier = ComplexityClassifier::new();
        let decision = classifier.route("Find cases where courts held employers liable");
        assert_eq!(decision.route, Route::Research(Tier::Deep));
        assert!(decision.signals.precedent_search);
    }

    #[test]
    fn test_trend_query_goes_broad() {
        let classifier = ComplexityClassifier::new();
        let decision =
            classifier.route("What are the trends in data privacy regulation across jurisdictions?");
        assert_eq!(decision.route, Route::Research(Tier::Broad));
        assert!(decision.signals.trend_analysis);
    }

    #[test]
    fn test_comparison_goes_balanced() {
        let classifier = ComplexityClassifier::new();
        let decision = classifier.route("Compare the notice requirements for eviction");
        assert_eq!(decision.route, Route::Research(Tier::Balanced));
    }

    #[test]
    fn test_override_wins() {
        let classifier = ComplexityClassifier::with_override(Tier::Deep);
        let decision = classifier.route("quick question: what is a lease?");
        assert_eq!(decision.route, Route::Research(Tier::Deep));
        assert!(decision.reason.starts_with("tier_override"));
    }

    #[test]
    fn test_quick_signal_lowers_score() {
        let classifier = ComplexityClassifier::new();
        let signals = classifier.analyze("quickly compare these");
        assert!(signals.wants_quick);
        assert!(signals.comparison_request);
        assert_eq!(signals.score(), 0);
    }
}
