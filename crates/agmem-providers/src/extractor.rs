use std::collections::HashSet;

use async_trait::async_trait;

use agmem_types::{Observation, ObservationType, Result};

/// A fact candidate distilled from raw observations.
#[derive(Debug, Clone)]
pub struct CandidateFact {
    pub text: String,
    pub category: Option<String>,
    pub confidence: f64,
    /// Observation the candidate came from.
    pub source_id: String,
}

/// Consolidation plug point: turns an observation window into fact
/// candidates. The default is heuristic; a judge-backed extractor can be
/// swapped in without touching the engine.
#[async_trait]
pub trait FactExtractor: Send + Sync {
    async fn extract(&self, observations: &[Observation]) -> Result<Vec<CandidateFact>>;
}

/// Default extractor: promotes discovery/decision/insight summaries to fact
/// candidates verbatim, deduplicating within the window.
pub struct HeuristicExtractor;

#[async_trait]
impl FactExtractor for HeuristicExtractor {
    async fn extract(&self, observations: &[Observation]) -> Result<Vec<CandidateFact>> {
        let mut seen = HashSet::new();
        let mut candidates = Vec::new();

        for observation in observations {
            let category = match observation.observation_type {
                ObservationType::Discovery => "discovery",
                ObservationType::Decision => "decision",
                ObservationType::Insight => "insight",
                ObservationType::ToolUse | ObservationType::Error => continue,
            };

            let text = observation.summary.trim();
            if text.is_empty() {
                continue;
            }
            let normalized = text.to_lowercase();
            if !seen.insert(normalized) {
                continue;
            }

            candidates.push(CandidateFact {
                text: text.to_string(),
                category: Some(category.to_string()),
                confidence: 0.7,
                source_id: observation.id.clone(),
            });
        }

        Ok(candidates)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn observation(kind: ObservationType, summary: &str) -> Observation {
        Observation {
            id: agmem_types::new_id(),
            observation_type: kind,
            tool_name: None,
            summary: summary.to_string(),
            embedding: None,
            raw_input: None,
            raw_output: None,
            session_id: None,
            branch_name: "main".to_string(),
            metadata: serde_json::json!({}),
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn promotes_discoveries_and_skips_tool_noise() {
        let extractor = HeuristicExtractor;
        let candidates = extractor
            .extract(&[
                observation(ObservationType::Discovery, "the API rate limit is 60/min"),
                observation(ObservationType::ToolUse, "ran grep"),
                observation(ObservationType::Discovery, "The API rate limit is 60/min"),
            ])
            .await
            .unwrap();

        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].text, "the API rate limit is 60/min");
        assert_eq!(candidates[0].category.as_deref(), Some("discovery"));
    }
}
