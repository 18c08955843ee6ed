use std::collections::HashMap;
use std::sync::Arc;

use agmem_store::{queries, search as store_search, Store};
use agmem_types::{
    context, Ctx, Error, Result, SearchHit, SearchMode, SearchRequest, SearchScope, TimeRange,
};
use chrono::{DateTime, Utc};
use rusqlite::Connection;

use crate::branch::require_branch;
use crate::embedding::EmbeddingGate;

/// Weight of the lexical component in hybrid fusion.
const HYBRID_BM25_WEIGHT: f64 = 0.6;
/// Weight of the vector component in hybrid fusion.
const HYBRID_COSINE_WEIGHT: f64 = 0.4;
/// Half-life style decay constant, in days.
const DECAY_DAYS: f64 = 30.0;
/// Overfetch factor so post-ranking filters do not starve the result set.
const CANDIDATE_MULTIPLIER: usize = 4;

/// Hybrid BM25+vector retrieval with temporal decay.
pub struct SearchEngine {
    store: Arc<Store>,
    embeddings: Arc<EmbeddingGate>,
}

struct Candidate {
    text: String,
    category: Option<String>,
    created_at: DateTime<Utc>,
}

impl SearchEngine {
    pub fn new(store: Arc<Store>, embeddings: Arc<EmbeddingGate>) -> Self {
        Self { store, embeddings }
    }

    pub async fn search(&self, ctx: &Ctx, request: SearchRequest) -> Result<Vec<SearchHit>> {
        let ctx = ctx.or_timeout(context::SEARCH_DEADLINE);
        ctx.check()?;

        let limit = match request.limit {
            0 => SearchRequest::DEFAULT_LIMIT,
            n if n > SearchRequest::MAX_LIMIT => {
                return Err(Error::resource_exhausted(format!(
                    "limit {n} exceeds maximum {}",
                    SearchRequest::MAX_LIMIT
                )))
            }
            n => n,
        };
        if request.category.is_some() && request.scope != SearchScope::Facts {
            return Err(Error::invalid_argument(
                "category filters only apply to the facts scope",
            ));
        }

        let query = request.query.trim().to_string();

        // Vector component wants the query embedded before any ranking.
        let query_vec = match request.mode {
            SearchMode::Vector | SearchMode::Hybrid if !query.is_empty() => {
                self.embeddings.embed(&ctx, &query).await?
            }
            _ => None,
        };
        ctx.check()?;

        self.store.with_conn(|conn| {
            require_branch(conn, &request.branch)?;
            let candidates = fetch_candidates(conn, &request)?;

            // An empty query is valid: recency listing, no scoring.
            if query.is_empty() {
                return Ok(recency_listing(&candidates, limit));
            }

            let fetch = limit * CANDIDATE_MULTIPLIER;
            let bm25_hits: HashMap<String, f64> = match request.mode {
                SearchMode::Keyword | SearchMode::Hybrid => store_search::fulltext_search(
                    conn,
                    request.scope,
                    &request.branch,
                    &query,
                    fetch,
                )?
                .into_iter()
                .filter(|hit| candidates.contains_key(&hit.id))
                .map(|hit| (hit.id, hit.bm25))
                .collect(),
                SearchMode::Vector => HashMap::new(),
            };

            let cosine_hits: HashMap<String, f64> = match (&request.mode, &query_vec) {
                (SearchMode::Vector | SearchMode::Hybrid, Some(query_vec)) => {
                    store_search::vector_search(
                        conn,
                        request.scope,
                        &request.branch,
                        query_vec,
                        fetch,
                    )?
                    .into_iter()
                    .filter(|hit| candidates.contains_key(&hit.id))
                    .map(|hit| (hit.id, hit.cosine))
                    .collect()
                }
                _ => HashMap::new(),
            };

            // Vector mode without an embedder degrades to recency.
            if request.mode == SearchMode::Vector && query_vec.is_none() {
                return Ok(recency_listing(&candidates, limit));
            }

            let mut hits = match request.mode {
                SearchMode::Keyword => rank_single(&candidates, &bm25_hits, true),
                SearchMode::Vector => rank_single(&candidates, &cosine_hits, false),
                SearchMode::Hybrid => rank_hybrid(&candidates, &bm25_hits, &cosine_hits),
            };

            hits.sort_by(|a, b| {
                b.score
                    .total_cmp(&a.score)
                    .then_with(|| b.created_at.cmp(&a.created_at))
                    .then_with(|| a.id.cmp(&b.id))
            });
            hits.truncate(limit);
            Ok(hits)
        })
    }
}

fn fetch_candidates(
    conn: &Connection,
    request: &SearchRequest,
) -> Result<HashMap<String, Candidate>> {
    let mut out = HashMap::new();
    match request.scope {
        SearchScope::Facts => {
            let filter = queries::facts::FactFilter {
                status: Some(agmem_types::FactStatus::Active),
                category: request.category.clone(),
                ..Default::default()
            };
            for fact in queries::facts::list(conn, &request.branch, &filter)? {
                if in_range(fact.created_at, &request.time_range) {
                    out.insert(
                        fact.id,
                        Candidate {
                            text: fact.fact_text,
                            category: fact.category,
                            created_at: fact.created_at,
                        },
                    );
                }
            }
        }
        SearchScope::Observations => {
            for observation in
                queries::observations::all_for_branch(conn, &request.branch)?
            {
                if in_range(observation.created_at, &request.time_range) {
                    out.insert(
                        observation.id,
                        Candidate {
                            text: observation.summary,
                            category: None,
                            created_at: observation.created_at,
                        },
                    );
                }
            }
        }
        SearchScope::Messages => {
            for message in queries::messages::all_for_branch(conn, &request.branch)? {
                if in_range(message.created_at, &request.time_range) {
                    out.insert(
                        message.id,
                        Candidate {
                            text: message.content.unwrap_or_default(),
                            category: None,
                            created_at: message.created_at,
                        },
                    );
                }
            }
        }
    }
    Ok(out)
}

fn in_range(ts: DateTime<Utc>, range: &Option<TimeRange>) -> bool {
    let Some(range) = range else { return true };
    if let Some(after) = range.after {
        if ts < after {
            return false;
        }
    }
    if let Some(before) = range.before {
        if ts > before {
            return false;
        }
    }
    true
}

fn recency_listing(candidates: &HashMap<String, Candidate>, limit: usize) -> Vec<SearchHit> {
    let mut hits: Vec<SearchHit> = candidates
        .iter()
        .map(|(id, c)| SearchHit {
            id: id.clone(),
            text: c.text.clone(),
            category: c.category.clone(),
            score: 0.0,
            bm25: None,
            cosine: None,
            created_at: c.created_at,
        })
        .collect();
    hits.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.id.cmp(&b.id)));
    hits.truncate(limit);
    hits
}

/// Single-mode ranking: raw score ordering, no decay.
fn rank_single(
    candidates: &HashMap<String, Candidate>,
    scores: &HashMap<String, f64>,
    lexical: bool,
) -> Vec<SearchHit> {
    scores
        .iter()
        .filter_map(|(id, score)| {
            candidates.get(id).map(|c| SearchHit {
                id: id.clone(),
                text: c.text.clone(),
                category: c.category.clone(),
                score: *score,
                bm25: lexical.then_some(*score),
                cosine: (!lexical).then_some(*score),
                created_at: c.created_at,
            })
        })
        .collect()
}

/// Hybrid fusion: per-mode normalization by top score, weighted sum, then
/// temporal decay. When one mode comes back empty the other's normalized
/// score is used unmodified.
fn rank_hybrid(
    candidates: &HashMap<String, Candidate>,
    bm25_hits: &HashMap<String, f64>,
    cosine_hits: &HashMap<String, f64>,
) -> Vec<SearchHit> {
    let top_bm25 = bm25_hits.values().cloned().fold(f64::NAN, f64::max);
    let top_cosine = cosine_hits.values().cloned().fold(f64::NAN, f64::max);
    let normalize = |score: f64, top: f64| {
        if top.is_finite() && top > 0.0 {
            score / top
        } else {
            score
        }
    };

    let now = Utc::now();
    let mut ids: Vec<&String> = bm25_hits.keys().chain(cosine_hits.keys()).collect();
    ids.sort();
    ids.dedup();

    ids.into_iter()
        .filter_map(|id| {
            let candidate = candidates.get(id)?;
            let bm25 = bm25_hits.get(id).copied();
            let cosine = cosine_hits.get(id).copied();

            let fused = match (bm25, cosine) {
                _ if bm25_hits.is_empty() => normalize(cosine.unwrap_or(0.0), top_cosine),
                _ if cosine_hits.is_empty() => normalize(bm25.unwrap_or(0.0), top_bm25),
                (b, c) => {
                    HYBRID_BM25_WEIGHT * normalize(b.unwrap_or(0.0), top_bm25)
                        + HYBRID_COSINE_WEIGHT * normalize(c.unwrap_or(0.0), top_cosine)
                }
            };

            let age_days =
                (now - candidate.created_at).num_seconds().max(0) as f64 / 86_400.0;
            let decay = (-age_days / DECAY_DAYS).exp();

            Some(SearchHit {
                id: id.clone(),
                text: candidate.text.clone(),
                category: candidate.category.clone(),
                score: fused * decay,
                bm25,
                cosine,
                created_at: candidate.created_at,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(days_old: i64) -> Candidate {
        Candidate {
            text: "token fact".to_string(),
            category: None,
            created_at: Utc::now() - chrono::Duration::days(days_old),
        }
    }

    #[test]
    fn decay_prefers_fresh_rows_at_equal_bm25() {
        let mut candidates = HashMap::new();
        candidates.insert("fresh".to_string(), candidate(1));
        candidates.insert("stale".to_string(), candidate(100));

        let mut bm25 = HashMap::new();
        bm25.insert("fresh".to_string(), 4.0);
        bm25.insert("stale".to_string(), 4.0);

        let hits = rank_hybrid(&candidates, &bm25, &HashMap::new());
        let fresh = hits.iter().find(|h| h.id == "fresh").unwrap();
        let stale = hits.iter().find(|h| h.id == "stale").unwrap();
        assert!(fresh.score > stale.score);
        // exp(-1/30) vs exp(-100/30)
        assert!(fresh.score > 0.9);
        assert!(stale.score < 0.1);
    }

    #[test]
    fn empty_vector_mode_uses_bm25_unmodified() {
        let mut candidates = HashMap::new();
        candidates.insert("only".to_string(), candidate(0));
        let mut bm25 = HashMap::new();
        bm25.insert("only".to_string(), 8.0);

        let hits = rank_hybrid(&candidates, &bm25, &HashMap::new());
        // Normalized to 1.0 (top of its mode), not scaled by the 0.6 weight.
        assert!((hits[0].score - 1.0).abs() < 0.01);
    }

    #[test]
    fn hybrid_weights_sum_components() {
        let mut candidates = HashMap::new();
        candidates.insert("both".to_string(), candidate(0));
        let mut bm25 = HashMap::new();
        bm25.insert("both".to_string(), 2.0);
        let mut cosine = HashMap::new();
        cosine.insert("both".to_string(), 0.8);

        let hits = rank_hybrid(&candidates, &bm25, &cosine);
        // Both components normalize to 1.0; fused = 0.6 + 0.4, decay ~ 1.
        assert!((hits[0].score - 1.0).abs() < 0.01);
    }
}
