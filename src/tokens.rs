//! Token estimation and per-run budget accounting.
//!
//! Providers do not always report usage (and the search provider never does),
//! so budget accounting falls back to a character-based estimate. The estimate
//! only needs to be stable and monotone, not exact: it gates optional steps,
//! it does not bill anyone.

use serde::{Deserialize, Serialize};

/// Approximate tokens per character for English prose.
const CHARS_PER_TOKEN: usize = 4;

/// Fraction of the ceiling at which optional steps stop being scheduled.
const NEAR_CEILING_RATIO: f64 = 0.9;

/// Estimate the token count of a text.
pub fn estimate_tokens(text: &str) -> u64 {
    (text.len().div_ceil(CHARS_PER_TOKEN)) as u64
}

/// Additive token budget for one pipeline run.
///
/// Every step charges its usage here. The engine stops scheduling optional
/// steps once consumption approaches the tier ceiling; the final composition
/// step always runs regardless.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenBudget {
    /// Tier-specific ceiling.
    pub ceiling: u64,
    /// Tokens consumed so far across all executed steps.
    pub consumed: u64,
}

impl TokenBudget {
    pub fn new(ceiling: u64) -> Self {
        Self {
            ceiling,
            consumed: 0,
        }
    }

    /// Record tokens used by a step. Charging is always allowed; the budget
    /// is a soft limit consulted before scheduling, not a hard gate.
    pub fn charge(&mut self, tokens: u64) {
        self.consumed = self.consumed.saturating_add(tokens);
    }

    /// Tokens left before the ceiling, zero if already past it.
    pub fn remaining(&self) -> u64 {
        self.ceiling.saturating_sub(self.consumed)
    }

    /// Whether consumption is close enough to the ceiling that optional
    /// steps should be skipped.
    pub fn near_ceiling(&self) -> bool {
        self.consumed as f64 >= self.ceiling as f64 * NEAR_CEILING_RATIO
    }

    /// Whether the ceiling has been crossed.
    pub fn exhausted(&self) -> bool {
        self.consumed >= self.ceiling
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_estimate_rounds_up() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("abc"), 1);
        assert_eq!(estimate_tokens("abcd"), 1);
        assert_eq!(estimate_tokens("abcde"), 2);
    }

    #[test]
    fn test_budget_charging() {
        let mut budget = TokenBudget::new(100);
        assert_eq!(budget.remaining(), 100);
        assert!(!budget.near_ceiling());

        budget.charge(85);
        assert_eq!(budget.remaining(), 15);
        assert!(!budget.near_ceiling());

        budget.charge(10);
        assert!(budget.near_ceiling());
        assert!(!budget.exhausted());

        budget.charge(10);
        assert!(budget.exhausted());
        assert_eq!(budget.remaining(), 0);
    }

    #[test]
    fn test_charge_saturates() {
        let mut budget = TokenBudget::new(10);
        budget.charge(u64::MAX);
        budget.charge(1);
        assert_eq!(budget.consumed, u64::MAX);
    }
}
