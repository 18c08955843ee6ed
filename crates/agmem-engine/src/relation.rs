use std::collections::HashSet;
use std::sync::Arc;

use agmem_store::{queries, Store};
use agmem_types::{
    context, new_id, Ctx, Error, Relation, RelationGraph, Result,
};
use chrono::Utc;

use crate::branch::require_unarchived_branch;

/// Traversal cap; queries report `truncated` when it stops the walk.
const MAX_GRAPH_NODES: usize = 500;

/// Entity relation graph with temporal validity intervals.
pub struct RelationEngine {
    store: Arc<Store>,
}

#[derive(Debug, Clone)]
pub struct WriteRelationRequest {
    pub source_entity: String,
    pub target_entity: String,
    pub relation_type: String,
    pub properties: serde_json::Value,
    pub confidence: f64,
    pub session_id: Option<String>,
    pub branch: String,
}

impl WriteRelationRequest {
    pub fn new(
        source: impl Into<String>,
        target: impl Into<String>,
        relation_type: impl Into<String>,
        branch: impl Into<String>,
    ) -> Self {
        Self {
            source_entity: source.into(),
            target_entity: target.into(),
            relation_type: relation_type.into(),
            properties: serde_json::json!({}),
            confidence: 1.0,
            session_id: None,
            branch: branch.into(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RelationQuery {
    pub entity: String,
    pub relation_type: Option<String>,
    pub depth: usize,
    pub branch: String,
}

impl RelationQuery {
    pub fn new(entity: impl Into<String>, branch: impl Into<String>) -> Self {
        Self {
            entity: entity.into(),
            relation_type: None,
            depth: 1,
            branch: branch.into(),
        }
    }

    pub fn with_depth(mut self, depth: usize) -> Self {
        self.depth = depth;
        self
    }

    pub fn with_type(mut self, relation_type: impl Into<String>) -> Self {
        self.relation_type = Some(relation_type.into());
        self
    }
}

impl RelationEngine {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    /// Write an edge. An existing open edge with the same shape is closed
    /// first, which yields a temporal history per edge.
    pub async fn write(&self, ctx: &Ctx, request: WriteRelationRequest) -> Result<Relation> {
        let ctx = ctx.or_timeout(context::WRITE_DEADLINE);
        ctx.check()?;
        if !(0.0..=1.0).contains(&request.confidence) {
            return Err(Error::invalid_argument(format!(
                "confidence {} outside [0, 1]",
                request.confidence
            )));
        }

        let now = Utc::now();
        self.store.with_tx(|tx| {
            require_unarchived_branch(tx, &request.branch)?;

            if let Some(open) = queries::relations::find_open(
                tx,
                &request.branch,
                &request.source_entity,
                &request.target_entity,
                &request.relation_type,
            )? {
                queries::relations::close(tx, &open.id, &request.branch, now)?;
            }

            let relation = Relation {
                id: new_id(),
                source_entity: request.source_entity.clone(),
                target_entity: request.target_entity.clone(),
                relation_type: request.relation_type.clone(),
                properties: request.properties.clone(),
                confidence: request.confidence,
                valid_from: now,
                valid_to: None,
                session_id: request.session_id.clone(),
                branch_name: request.branch.clone(),
                created_at: now,
            };
            queries::relations::insert(tx, &relation)?;
            Ok(relation)
        })
    }

    /// Close an open edge without opening a successor.
    pub async fn close(&self, ctx: &Ctx, id: &str, branch: &str) -> Result<()> {
        let ctx = ctx.or_timeout(context::WRITE_DEADLINE);
        ctx.check()?;
        let closed = self
            .store
            .with_conn(|conn| queries::relations::close(conn, id, branch, Utc::now()))?;
        if !closed {
            return Err(Error::not_found(format!(
                "no open relation '{id}' on branch '{branch}'"
            )));
        }
        Ok(())
    }

    /// Breadth-first walk over currently-valid edges.
    pub async fn query(&self, ctx: &Ctx, query: RelationQuery) -> Result<RelationGraph> {
        let ctx = ctx.or_timeout(context::SEARCH_DEADLINE);
        ctx.check()?;

        self.store.with_conn(|conn| {
            require_unarchived_branch(conn, &query.branch)?;

            let mut graph = RelationGraph {
                root: query.entity.clone(),
                ..Default::default()
            };
            let mut visited: HashSet<String> = HashSet::new();
            let mut seen_edges: HashSet<String> = HashSet::new();
            let mut frontier = vec![query.entity.clone()];
            visited.insert(query.entity.clone());

            for _ in 0..query.depth.max(1) {
                let mut next_frontier = Vec::new();
                for entity in &frontier {
                    let edges = queries::relations::open_edges_touching(
                        conn,
                        &query.branch,
                        entity,
                        query.relation_type.as_deref(),
                    )?;
                    for edge in edges {
                        if !seen_edges.insert(edge.id.clone()) {
                            continue;
                        }
                        for neighbor in [&edge.source_entity, &edge.target_entity] {
                            if visited.insert(neighbor.clone()) {
                                if visited.len() > MAX_GRAPH_NODES {
                                    graph.truncated = true;
                                } else {
                                    next_frontier.push(neighbor.clone());
                                }
                            }
                        }
                        graph.edges.push(edge);
                    }
                }
                if next_frontier.is_empty() || graph.truncated {
                    break;
                }
                frontier = next_frontier;
            }

            graph.nodes = visited.into_iter().collect();
            graph.nodes.sort();
            Ok(graph)
        })
    }
}
