use std::collections::HashSet;

use async_trait::async_trait;

use agmem_types::{MergeVerdict, Result};

/// Quality-judgement backend used by auto-merge conflict resolution and
/// judge-backed scoring. Optional everywhere; absence means conflicts are
/// reported unresolved and scoring falls back to the heuristic.
#[async_trait]
pub trait Judge: Send + Sync {
    /// Decide between two conflicting statements under `criteria`.
    async fn compare(&self, a: &str, b: &str, criteria: &str) -> Result<MergeVerdict>;

    /// Score a statement along one dimension, in [0, 1].
    async fn score(&self, subject: &str, dimension: &str) -> Result<f64>;
}

/// Deterministic fallback judge.
///
/// Token containment decides comparisons: a statement whose tokens cover the
/// other's is treated as the more complete one; otherwise both are kept.
pub struct HeuristicJudge;

fn tokens(text: &str) -> HashSet<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_string())
        .collect()
}

#[async_trait]
impl Judge for HeuristicJudge {
    async fn compare(&self, a: &str, b: &str, _criteria: &str) -> Result<MergeVerdict> {
        let ta = tokens(a);
        let tb = tokens(b);
        if ta == tb {
            return Ok(MergeVerdict::KeepTarget);
        }
        if ta.is_superset(&tb) {
            return Ok(MergeVerdict::KeepSource);
        }
        if tb.is_superset(&ta) {
            return Ok(MergeVerdict::KeepTarget);
        }
        Ok(MergeVerdict::KeepBoth)
    }

    async fn score(&self, subject: &str, _dimension: &str) -> Result<f64> {
        // Specificity proxy: more distinct tokens score higher, capped at 1.
        let count = tokens(subject).len() as f64;
        Ok((count / 32.0).min(1.0))
    }
}
