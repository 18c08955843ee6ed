use std::collections::BTreeMap;
use std::sync::Arc;

use agmem_providers::{HeuristicJudge, Judge};
use agmem_store::{queries, Store};
use agmem_types::{context, new_id, Ctx, Error, Result, Score};
use chrono::Utc;
use serde::{Deserialize, Serialize};

/// Record and aggregate numeric judgements per (target, dimension).
pub struct ScoringEngine {
    store: Arc<Store>,
    judge: Option<Arc<dyn Judge>>,
}

#[derive(Debug, Clone)]
pub struct RecordScoreRequest {
    pub target_type: String,
    pub target_id: String,
    pub scorer: String,
    pub dimension: String,
    pub value: f64,
    pub explanation: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DimensionStats {
    pub avg: f64,
    pub min: f64,
    pub max: f64,
    pub count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoreSummary {
    pub target_type: String,
    pub target_id: String,
    pub dimensions: BTreeMap<String, DimensionStats>,
}

impl ScoringEngine {
    pub fn new(store: Arc<Store>, judge: Option<Arc<dyn Judge>>) -> Self {
        Self { store, judge }
    }

    pub async fn record(&self, ctx: &Ctx, request: RecordScoreRequest) -> Result<Score> {
        let ctx = ctx.or_timeout(context::WRITE_DEADLINE);
        ctx.check()?;
        if !(0.0..=1.0).contains(&request.value) {
            return Err(Error::invalid_argument(format!(
                "score {} outside [0, 1]",
                request.value
            )));
        }

        let score = Score {
            id: new_id(),
            target_type: request.target_type,
            target_id: request.target_id,
            scorer: request.scorer,
            dimension: request.dimension,
            value: request.value,
            explanation: request.explanation,
            created_at: Utc::now(),
        };
        self.store.with_conn(|conn| queries::scores::insert(conn, &score))?;
        Ok(score)
    }

    /// Score a subject along one dimension using the judge, degrading to the
    /// deterministic heuristic when the judge is absent or failing.
    pub async fn evaluate(
        &self,
        ctx: &Ctx,
        target_type: &str,
        target_id: &str,
        subject: &str,
        dimension: &str,
    ) -> Result<Score> {
        let ctx = ctx.or_timeout(context::WRITE_DEADLINE);
        ctx.check()?;

        let (value, scorer) = match &self.judge {
            Some(judge) => match judge.score(subject, dimension).await {
                Ok(value) => (value.clamp(0.0, 1.0), "judge"),
                Err(err) => {
                    tracing::warn!(error = %err, "judge failed; using heuristic scorer");
                    (HeuristicJudge.score(subject, dimension).await?, "heuristic")
                }
            },
            None => (HeuristicJudge.score(subject, dimension).await?, "heuristic"),
        };
        ctx.check()?;

        self.record(
            &ctx,
            RecordScoreRequest {
                target_type: target_type.to_string(),
                target_id: target_id.to_string(),
                scorer: scorer.to_string(),
                dimension: dimension.to_string(),
                value,
                explanation: None,
            },
        )
        .await
    }

    pub async fn summary(
        &self,
        ctx: &Ctx,
        target_type: &str,
        target_id: &str,
    ) -> Result<ScoreSummary> {
        ctx.check()?;
        let scores = self
            .store
            .with_conn(|conn| queries::scores::list_for_target(conn, target_type, target_id))?;

        let mut dimensions: BTreeMap<String, Vec<f64>> = BTreeMap::new();
        for score in scores {
            dimensions.entry(score.dimension).or_default().push(score.value);
        }

        let dimensions = dimensions
            .into_iter()
            .map(|(dimension, values)| {
                let count = values.len();
                let sum: f64 = values.iter().sum();
                let min = values.iter().cloned().fold(f64::INFINITY, f64::min);
                let max = values.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
                (
                    dimension,
                    DimensionStats {
                        avg: sum / count as f64,
                        min,
                        max,
                        count,
                    },
                )
            })
            .collect();

        Ok(ScoreSummary {
            target_type: target_type.to_string(),
            target_id: target_id.to_string(),
            dimensions,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine() -> ScoringEngine {
        ScoringEngine::new(Arc::new(Store::open_in_memory().unwrap()), None)
    }

    #[tokio::test]
    async fn summary_aggregates_per_dimension() {
        let scoring = engine();
        let ctx = Ctx::background();
        for value in [0.2, 0.4, 0.9] {
            scoring
                .record(
                    &ctx,
                    RecordScoreRequest {
                        target_type: "fact".to_string(),
                        target_id: "f1".to_string(),
                        scorer: "tester".to_string(),
                        dimension: "accuracy".to_string(),
                        value,
                        explanation: None,
                    },
                )
                .await
                .unwrap();
        }

        let summary = scoring.summary(&ctx, "fact", "f1").await.unwrap();
        let stats = &summary.dimensions["accuracy"];
        assert_eq!(stats.count, 3);
        assert!((stats.avg - 0.5).abs() < 1e-9);
        assert_eq!(stats.min, 0.2);
        assert_eq!(stats.max, 0.9);
    }

    #[tokio::test]
    async fn out_of_range_values_are_rejected() {
        let scoring = engine();
        let err = scoring
            .record(
                &Ctx::background(),
                RecordScoreRequest {
                    target_type: "fact".to_string(),
                    target_id: "f1".to_string(),
                    scorer: "tester".to_string(),
                    dimension: "accuracy".to_string(),
                    value: 1.2,
                    explanation: None,
                },
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind(), agmem_types::ErrorKind::InvalidArgument);
    }

    #[tokio::test]
    async fn evaluate_degrades_to_heuristic() {
        let scoring = engine();
        let score = scoring
            .evaluate(
                &Ctx::background(),
                "conversation",
                "c1",
                "a reasonably detailed subject line for scoring",
                "depth",
            )
            .await
            .unwrap();
        assert_eq!(score.scorer, "heuristic");
        assert!((0.0..=1.0).contains(&score.value));
    }
}
