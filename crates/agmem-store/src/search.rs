// Full-text and vector retrieval primitives.
// FTS5 supplies BM25; there is no ANN index, so vector search scans the
// branch and ranks by cosine in memory (the contract's degrade path).

use std::sync::Once;

use agmem_types::{cosine_similarity, Error, Result, SearchScope};
use rusqlite::{params, Connection};

use crate::db::db_err;
use crate::queries::embedding_from_sql;

static ANN_DEGRADE_WARNING: Once = Once::new();

/// One full-text match; `bm25` is higher-is-better.
#[derive(Debug, Clone)]
pub struct FulltextHit {
    pub id: String,
    pub bm25: f64,
}

/// One vector match by cosine similarity.
#[derive(Debug, Clone)]
pub struct VectorHit {
    pub id: String,
    pub cosine: f64,
}

fn scope_tables(scope: SearchScope) -> (&'static str, &'static str, &'static str) {
    match scope {
        SearchScope::Facts => ("facts", "facts_fts", "fact_text"),
        SearchScope::Observations => ("observations", "observations_fts", "summary"),
        SearchScope::Messages => ("messages", "messages_fts", "content"),
    }
}

/// Escape a free-form query into FTS5 syntax: each token quoted, OR-joined.
/// Returns `None` when no searchable token remains.
fn fts_query(query: &str) -> Option<String> {
    let tokens: Vec<String> = query
        .split_whitespace()
        .map(|t| format!("\"{}\"", t.replace('"', "")))
        .filter(|t| t.len() > 2)
        .collect();
    if tokens.is_empty() {
        None
    } else {
        Some(tokens.join(" OR "))
    }
}

/// BM25-ranked full-text matches on one branch.
pub fn fulltext_search(
    conn: &Connection,
    scope: SearchScope,
    branch: &str,
    query: &str,
    limit: usize,
) -> Result<Vec<FulltextHit>> {
    let Some(match_expr) = fts_query(query) else {
        return Ok(Vec::new());
    };
    let (table, fts_table, _) = scope_tables(scope);

    // bm25() is smaller-is-better in SQLite; flip the sign so callers see
    // higher-is-better scores.
    let mut stmt = conn
        .prepare(&format!(
            "SELECT t.id, -bm25({fts_table}) AS score
             FROM {fts_table}
             JOIN {table} t ON t.rowid = {fts_table}.rowid
             WHERE {fts_table} MATCH ?1 AND t.branch_name = ?2
             ORDER BY bm25({fts_table})
             LIMIT {limit}"
        ))
        .map_err(db_err)?;

    let hits = stmt
        .query_map(params![match_expr, branch], |row| {
            Ok(FulltextHit {
                id: row.get(0)?,
                bm25: row.get(1)?,
            })
        })
        .map_err(db_err)?
        .collect::<std::result::Result<Vec<_>, rusqlite::Error>>()
        .map_err(db_err)?;

    Ok(hits)
}

/// Cosine-ranked nearest rows on one branch.
pub fn vector_search(
    conn: &Connection,
    scope: SearchScope,
    branch: &str,
    query_vec: &[f32],
    k: usize,
) -> Result<Vec<VectorHit>> {
    if query_vec.is_empty() {
        return Err(Error::invalid_argument("empty query vector"));
    }
    ANN_DEGRADE_WARNING.call_once(|| {
        tracing::warn!("substrate has no ANN index; vector search scans the branch in memory");
    });

    let (table, _, _) = scope_tables(scope);
    let mut stmt = conn
        .prepare(&format!(
            "SELECT id, embedding FROM {table}
             WHERE branch_name = ?1 AND embedding IS NOT NULL"
        ))
        .map_err(db_err)?;

    let rows = stmt
        .query_map([branch], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, Option<String>>(1)?))
        })
        .map_err(db_err)?
        .collect::<std::result::Result<Vec<_>, rusqlite::Error>>()
        .map_err(db_err)?;

    let mut hits: Vec<VectorHit> = rows
        .into_iter()
        .filter_map(|(id, embedding)| {
            let embedding = embedding_from_sql(embedding)?;
            Some(VectorHit {
                id,
                cosine: f64::from(cosine_similarity(query_vec, &embedding)),
            })
        })
        .collect();

    hits.sort_by(|a, b| b.cosine.total_cmp(&a.cosine).then_with(|| a.id.cmp(&b.id)));
    hits.truncate(k);

    Ok(hits)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{queries, Store};
    use agmem_types::{new_id, Fact, FactStatus};
    use chrono::Utc;

    fn fact(branch: &str, text: &str, embedding: Option<Vec<f32>>) -> Fact {
        Fact {
            id: new_id(),
            fact_text: text.to_string(),
            embedding,
            category: None,
            confidence: 1.0,
            status: FactStatus::Active,
            source_type: None,
            source_id: None,
            parent_id: None,
            session_id: None,
            agent_id: None,
            task_id: None,
            branch_name: branch.to_string(),
            metadata: serde_json::json!({}),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn fulltext_finds_matching_fact() -> Result<()> {
        let store = Store::open_in_memory()?;
        store.with_conn(|conn| {
            let hit = fact("main", "service uses exponential backoff", None);
            let miss = fact("main", "frontend renders the dashboard", None);
            queries::facts::insert(conn, &hit)?;
            queries::facts::insert(conn, &miss)?;

            let hits = fulltext_search(conn, SearchScope::Facts, "main", "backoff", 10)?;
            assert_eq!(hits.len(), 1);
            assert_eq!(hits[0].id, hit.id);
            assert!(hits[0].bm25 > 0.0);
            Ok(())
        })
    }

    #[test]
    fn fulltext_respects_branch_isolation() -> Result<()> {
        let store = Store::open_in_memory()?;
        store.with_conn(|conn| {
            queries::facts::insert(conn, &fact("exp/a", "uses-backoff everywhere", None))?;
            let hits = fulltext_search(conn, SearchScope::Facts, "main", "uses-backoff", 10)?;
            assert!(hits.is_empty());
            let hits = fulltext_search(conn, SearchScope::Facts, "exp/a", "uses-backoff", 10)?;
            assert_eq!(hits.len(), 1);
            Ok(())
        })
    }

    #[test]
    fn vector_search_ranks_by_cosine() -> Result<()> {
        let store = Store::open_in_memory()?;
        store.with_conn(|conn| {
            let near = fact("main", "near", Some(vec![1.0, 0.0]));
            let far = fact("main", "far", Some(vec![0.0, 1.0]));
            queries::facts::insert(conn, &near)?;
            queries::facts::insert(conn, &far)?;

            let hits = vector_search(conn, SearchScope::Facts, "main", &[1.0, 0.1], 10)?;
            assert_eq!(hits.len(), 2);
            assert_eq!(hits[0].id, near.id);
            assert!(hits[0].cosine > hits[1].cosine);
            Ok(())
        })
    }

    #[test]
    fn empty_query_yields_no_fulltext_hits() -> Result<()> {
        let store = Store::open_in_memory()?;
        store.with_conn(|conn| {
            let hits = fulltext_search(conn, SearchScope::Facts, "main", "  ", 10)?;
            assert!(hits.is_empty());
            Ok(())
        })
    }
}
