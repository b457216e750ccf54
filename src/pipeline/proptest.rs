//! Property-based tests for the pipeline's accounting and grounding rules.
//!
//! These verify the invariants the rest of the crate leans on:
//!
//! - token estimation and budget charging are monotonic and saturating
//! - a run's total token count is exactly the sum of its step counts
//! - the citation scrubber never lets an unretrieved URL through
//! - claim grounding is equivalent to having at least one source entity
