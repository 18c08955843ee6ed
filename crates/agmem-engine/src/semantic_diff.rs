use std::collections::BTreeMap;
use std::sync::Arc;

use agmem_store::{queries, Store};
use agmem_types::{context, cosine_similarity, Ctx, Error, Message, Result};
use serde::{Deserialize, Serialize};

use crate::embedding::EmbeddingGate;

/// Sequence similarity at or above which two runs count as equivalent.
const EQUIVALENT_THRESHOLD: f64 = 0.9;
/// Below this the runs are divergent.
const DIVERGENT_THRESHOLD: f64 = 0.5;
/// Token-delta fraction still considered a "small" outcome difference.
const SMALL_OUTCOME_FRACTION: f64 = 0.1;

/// Compare two conversations along actions, reasoning, and outcomes.
pub struct SemanticDiffEngine {
    store: Arc<Store>,
    embeddings: Arc<EmbeddingGate>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionDiff {
    /// Tool-name multisets per conversation.
    pub tools_a: BTreeMap<String, usize>,
    pub tools_b: BTreeMap<String, usize>,
    /// LCS similarity over the tool-name sequences, in [0, 1].
    pub sequence_similarity: f64,
    pub errors_a: usize,
    pub errors_b: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Efficiency {
    ABetter,
    BBetter,
    Tie,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutcomeDiff {
    pub tokens_a: i64,
    pub tokens_b: i64,
    pub tool_calls_a: usize,
    pub tool_calls_b: usize,
    pub error_delta: i64,
    /// Token-count minimality.
    pub efficiency: Efficiency,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiffVerdict {
    Equivalent,
    Partial,
    Divergent,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SemanticDiffReport {
    pub conversation_a: String,
    pub conversation_b: String,
    /// Length of the shared (role, normalized content) prefix.
    pub divergence_point: usize,
    pub actions: ActionDiff,
    /// Mean cosine over paired `thinking` fields; absent without an embedder
    /// or without thinking on both sides.
    pub reasoning_similarity: Option<f64>,
    pub outcome: OutcomeDiff,
    pub verdict: DiffVerdict,
}

impl SemanticDiffEngine {
    pub fn new(store: Arc<Store>, embeddings: Arc<EmbeddingGate>) -> Self {
        Self { store, embeddings }
    }

    pub async fn diff(
        &self,
        ctx: &Ctx,
        conversation_a: &str,
        conversation_b: &str,
        branch: &str,
    ) -> Result<SemanticDiffReport> {
        let ctx = ctx.or_timeout(context::SEARCH_DEADLINE);
        ctx.check()?;

        let (messages_a, messages_b) = self.store.with_conn(|conn| {
            queries::conversations::get(conn, conversation_a, branch)?.ok_or_else(|| {
                Error::not_found(format!("conversation '{conversation_a}' not on '{branch}'"))
            })?;
            queries::conversations::get(conn, conversation_b, branch)?.ok_or_else(|| {
                Error::not_found(format!("conversation '{conversation_b}' not on '{branch}'"))
            })?;
            Ok((
                queries::messages::list(conn, conversation_a, branch)?,
                queries::messages::list(conn, conversation_b, branch)?,
            ))
        })?;

        let divergence_point = shared_prefix(&messages_a, &messages_b);
        let actions = action_diff(&messages_a, &messages_b);
        let reasoning_similarity = self
            .reasoning_similarity(&ctx, &messages_a, &messages_b)
            .await?;
        let outcome = outcome_diff(&messages_a, &messages_b, &actions);

        let tokens_max = outcome.tokens_a.max(outcome.tokens_b).max(1) as f64;
        let small_outcome = (outcome.tokens_a - outcome.tokens_b).unsigned_abs() as f64
            / tokens_max
            <= SMALL_OUTCOME_FRACTION;
        let verdict = if actions.sequence_similarity >= EQUIVALENT_THRESHOLD && small_outcome {
            DiffVerdict::Equivalent
        } else if actions.sequence_similarity < DIVERGENT_THRESHOLD {
            DiffVerdict::Divergent
        } else {
            DiffVerdict::Partial
        };

        Ok(SemanticDiffReport {
            conversation_a: conversation_a.to_string(),
            conversation_b: conversation_b.to_string(),
            divergence_point,
            actions,
            reasoning_similarity,
            outcome,
            verdict,
        })
    }

    /// Pair `thinking` fields at corresponding positions and average their
    /// embedding cosine.
    async fn reasoning_similarity(
        &self,
        ctx: &Ctx,
        messages_a: &[Message],
        messages_b: &[Message],
    ) -> Result<Option<f64>> {
        if !self.embeddings.is_configured() {
            return Ok(None);
        }

        let mut similarities = Vec::new();
        for (a, b) in messages_a.iter().zip(messages_b.iter()) {
            let (Some(thinking_a), Some(thinking_b)) = (&a.thinking, &b.thinking) else {
                continue;
            };
            let Some(vec_a) = self.embeddings.embed(ctx, thinking_a).await? else {
                continue;
            };
            let Some(vec_b) = self.embeddings.embed(ctx, thinking_b).await? else {
                continue;
            };
            similarities.push(f64::from(cosine_similarity(&vec_a, &vec_b)));
        }

        if similarities.is_empty() {
            Ok(None)
        } else {
            Ok(Some(
                similarities.iter().sum::<f64>() / similarities.len() as f64,
            ))
        }
    }
}

fn normalize(content: &Option<String>) -> String {
    content
        .as_deref()
        .unwrap_or("")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

fn shared_prefix(a: &[Message], b: &[Message]) -> usize {
    a.iter()
        .zip(b.iter())
        .take_while(|(x, y)| x.role == y.role && normalize(&x.content) == normalize(&y.content))
        .count()
}

fn tool_sequence(messages: &[Message]) -> Vec<String> {
    messages
        .iter()
        .flat_map(|m| m.tool_calls.iter().map(|t| t.name.clone()))
        .collect()
}

fn error_count(messages: &[Message]) -> usize {
    messages
        .iter()
        .flat_map(|m| m.tool_calls.iter())
        .filter(|t| t.is_error)
        .count()
}

fn multiset(sequence: &[String]) -> BTreeMap<String, usize> {
    let mut counts = BTreeMap::new();
    for name in sequence {
        *counts.entry(name.clone()).or_insert(0) += 1;
    }
    counts
}

/// Classic LCS length over the two tool-name sequences.
fn lcs_len(a: &[String], b: &[String]) -> usize {
    if a.is_empty() || b.is_empty() {
        return 0;
    }
    let mut prev = vec![0usize; b.len() + 1];
    let mut current = vec![0usize; b.len() + 1];
    for x in a {
        for (j, y) in b.iter().enumerate() {
            current[j + 1] = if x == y {
                prev[j] + 1
            } else {
                prev[j + 1].max(current[j])
            };
        }
        std::mem::swap(&mut prev, &mut current);
    }
    prev[b.len()]
}

fn action_diff(messages_a: &[Message], messages_b: &[Message]) -> ActionDiff {
    let seq_a = tool_sequence(messages_a);
    let seq_b = tool_sequence(messages_b);
    let longest = seq_a.len().max(seq_b.len());
    let sequence_similarity = if longest == 0 {
        1.0
    } else {
        lcs_len(&seq_a, &seq_b) as f64 / longest as f64
    };

    ActionDiff {
        tools_a: multiset(&seq_a),
        tools_b: multiset(&seq_b),
        sequence_similarity,
        errors_a: error_count(messages_a),
        errors_b: error_count(messages_b),
    }
}

fn outcome_diff(messages_a: &[Message], messages_b: &[Message], actions: &ActionDiff) -> OutcomeDiff {
    let tokens_a: i64 = messages_a.iter().map(|m| m.token_count).sum();
    let tokens_b: i64 = messages_b.iter().map(|m| m.token_count).sum();
    let tool_calls_a = messages_a.iter().map(|m| m.tool_calls.len()).sum();
    let tool_calls_b = messages_b.iter().map(|m| m.tool_calls.len()).sum();

    let efficiency = match tokens_a.cmp(&tokens_b) {
        std::cmp::Ordering::Less => Efficiency::ABetter,
        std::cmp::Ordering::Greater => Efficiency::BBetter,
        std::cmp::Ordering::Equal => Efficiency::Tie,
    };

    OutcomeDiff {
        tokens_a,
        tokens_b,
        tool_calls_a,
        tool_calls_b,
        error_delta: actions.errors_a as i64 - actions.errors_b as i64,
        efficiency,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agmem_types::{new_id, Role, ToolCall};
    use chrono::Utc;

    fn message(seq: i64, content: &str, tools: &[(&str, bool)]) -> Message {
        Message {
            id: new_id(),
            conversation_id: "c".to_string(),
            session_id: None,
            agent_id: None,
            role: Role::Assistant,
            content: Some(content.to_string()),
            thinking: None,
            embedding: None,
            tool_calls: tools
                .iter()
                .map(|(name, is_error)| ToolCall {
                    name: name.to_string(),
                    arguments: serde_json::json!({}),
                    output: None,
                    is_error: *is_error,
                })
                .collect(),
            token_count: content.split_whitespace().count() as i64,
            model: None,
            sequence_num: seq,
            branch_name: "main".to_string(),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn lcs_over_tool_sequences() {
        let a: Vec<String> = ["grep", "read", "edit"].iter().map(|s| s.to_string()).collect();
        let b: Vec<String> = ["grep", "edit"].iter().map(|s| s.to_string()).collect();
        assert_eq!(lcs_len(&a, &b), 2);
        assert_eq!(lcs_len(&a, &a), 3);
        assert_eq!(lcs_len(&a, &[]), 0);
    }

    #[test]
    fn shared_prefix_ignores_whitespace() {
        let a = vec![message(1, "Hello   world", &[])];
        let b = vec![message(1, "hello world", &[])];
        assert_eq!(shared_prefix(&a, &b), 1);
    }

    #[test]
    fn identical_actions_are_equivalent_shaped() {
        let a = vec![message(1, "x", &[("grep", false), ("edit", false)])];
        let b = vec![message(1, "x", &[("grep", false), ("edit", false)])];
        let actions = action_diff(&a, &b);
        assert_eq!(actions.sequence_similarity, 1.0);
        assert_eq!(actions.errors_a, 0);

        let outcome = outcome_diff(&a, &b, &actions);
        assert_eq!(outcome.efficiency, Efficiency::Tie);
    }

    #[test]
    fn error_counts_feed_outcome_delta() {
        let a = vec![message(1, "x", &[("bash", true)])];
        let b = vec![message(1, "x", &[("bash", false)])];
        let actions = action_diff(&a, &b);
        assert_eq!(actions.errors_a, 1);
        let outcome = outcome_diff(&a, &b, &actions);
        assert_eq!(outcome.error_delta, 1);
    }
}
