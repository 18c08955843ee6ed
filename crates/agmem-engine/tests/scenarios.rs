// End-to-end scenarios over the full engine stack.

use std::sync::Arc;

use agmem_engine::{
    AppendMessageRequest, CreateBranchRequest, CreateConversationRequest, FactWriteOutcome,
    ForkRequest, MergeRequest, WriteFactRequest,
};
use agmem_providers::HashEmbedder;
use agmem_store::queries;
use agmem_testing::{StaticEmbedder, TestWorld};
use agmem_types::{
    Ctx, FactStatus, MergeStrategy, Role, SearchMode, SearchRequest, SearchScope,
};
use chrono::{Duration, Utc};

#[tokio::test]
async fn branch_isolation_for_search() {
    let world = TestWorld::with_embedder(Arc::new(HashEmbedder::default())).await;
    let ctx = Ctx::background();

    world
        .branches
        .create(&ctx, CreateBranchRequest::new("exp/a", "main"))
        .await
        .unwrap();
    world
        .facts
        .write(&ctx, WriteFactRequest::new("uses-backoff", "exp/a"))
        .await
        .unwrap();

    let on_main = world
        .search
        .search(
            &ctx,
            SearchRequest::hybrid("uses-backoff").with_mode(SearchMode::Keyword),
        )
        .await
        .unwrap();
    assert_eq!(on_main.len(), 0);

    let on_branch = world
        .search
        .search(
            &ctx,
            SearchRequest::hybrid("uses-backoff")
                .with_mode(SearchMode::Keyword)
                .on_branch("exp/a"),
        )
        .await
        .unwrap();
    assert_eq!(on_branch.len(), 1);
    assert_eq!(on_branch[0].text, "uses-backoff");
}

#[tokio::test]
async fn near_duplicate_write_supersedes() {
    let embedder = Arc::new(StaticEmbedder::default());
    // Two statements pinned at cosine ~0.98.
    embedder.pin("OAuth uses refresh token", vec![1.0, 0.0, 0.0, 0.0]);
    embedder.pin(
        "OAuth uses refresh tokens with backoff",
        vec![0.98, 0.199, 0.0, 0.0],
    );
    let world = TestWorld::with_embedder(embedder).await;
    let ctx = Ctx::background();

    let f1 = world
        .facts
        .write(&ctx, WriteFactRequest::new("OAuth uses refresh token", "main"))
        .await
        .unwrap();
    let f2 = world
        .facts
        .write(
            &ctx,
            WriteFactRequest::new("OAuth uses refresh tokens with backoff", "main"),
        )
        .await
        .unwrap();

    assert_eq!(f2.outcome, FactWriteOutcome::Updated);
    assert_eq!(f2.fact.parent_id.as_deref(), Some(f1.fact.id.as_str()));

    let f1_now = world.facts.get(&ctx, &f1.fact.id, "main").await.unwrap();
    assert_eq!(f1_now.status, FactStatus::Superseded);
}

#[tokio::test]
async fn conflicting_update_is_rejected_without_judge() {
    let embedder = Arc::new(StaticEmbedder::default());
    embedder.pin("service A talks to service B", vec![0.0, 1.0, 0.0, 0.0]);
    embedder.pin(
        "service A talks to service B over gRPC",
        vec![0.0, 0.99, 0.141, 0.0],
    );
    let world = TestWorld::with_embedder(embedder).await;
    let ctx = Ctx::background();

    // Fact A on main; fork b1; update A to A' there.
    let a = world
        .facts
        .write(&ctx, WriteFactRequest::new("service A talks to service B", "main"))
        .await
        .unwrap();
    world
        .branches
        .create(&ctx, CreateBranchRequest::new("b1", "main"))
        .await
        .unwrap();
    let a_prime = world
        .facts
        .write(
            &ctx,
            WriteFactRequest::new("service A talks to service B over gRPC", "b1"),
        )
        .await
        .unwrap();
    assert_eq!(a_prime.outcome, FactWriteOutcome::Updated);

    let report = world
        .merges
        .merge(&ctx, MergeRequest::new("b1", "main", MergeStrategy::Auto))
        .await
        .unwrap();
    assert!(report.items_merged.is_empty());
    assert_eq!(report.items_rejected, vec![a_prime.fact.id.clone()]);

    // Main is untouched: A still active, A' absent.
    let a_on_main = world.facts.get(&ctx, &a.fact.id, "main").await.unwrap();
    assert_eq!(a_on_main.status, FactStatus::Active);
    assert!(world.facts.get(&ctx, &a_prime.fact.id, "main").await.is_err());
}

#[tokio::test]
async fn conversation_fork_preserves_prefix() {
    let world = TestWorld::new().await;
    let ctx = Ctx::background();

    let c1 = world
        .conversations
        .create(&ctx, CreateConversationRequest::new("main").with_title("c1"))
        .await
        .unwrap();
    let mut message_ids = Vec::new();
    for i in 1..=5 {
        let m = world
            .conversations
            .append_message(
                &ctx,
                AppendMessageRequest::new(&c1.id, Role::User, "main")
                    .with_content(format!("m{i}")),
            )
            .await
            .unwrap();
        message_ids.push(m.id);
    }

    let c2 = world
        .conversations
        .fork(
            &ctx,
            ForkRequest {
                parent_id: c1.id.clone(),
                message_id: message_ids[2].clone(),
                title: None,
                branch: "main".to_string(),
            },
        )
        .await
        .unwrap();

    let forked = world.messages.list(&ctx, &c2.id, "main").await.unwrap();
    assert_eq!(forked.len(), 3);
    assert_eq!(
        forked.iter().map(|m| m.sequence_num).collect::<Vec<_>>(),
        vec![1, 2, 3]
    );
    assert!(forked.iter().all(|m| !message_ids.contains(&m.id)));

    // Append m6 to the parent: the fork is unaffected.
    world
        .conversations
        .append_message(
            &ctx,
            AppendMessageRequest::new(&c1.id, Role::Assistant, "main").with_content("m6"),
        )
        .await
        .unwrap();
    let still_three = world.messages.list(&ctx, &c2.id, "main").await.unwrap();
    assert_eq!(still_three.len(), 3);
    let parent_now = world.conversations.get(&ctx, &c1.id, "main").await.unwrap();
    assert_eq!(parent_now.message_count, 6);
}

#[tokio::test]
async fn hybrid_decay_ranks_fresh_facts_first() {
    let world = TestWorld::with_embedder(Arc::new(HashEmbedder::default())).await;
    let ctx = Ctx::background();

    // Same text on both rows so BM25 ties; inserted directly so the ages
    // differ by 99 days.
    let embedder = HashEmbedder::default();
    use agmem_providers::Embedder;
    let embedding = Some(embedder.embed("the token cache expires hourly").await.unwrap());

    let fresh = agmem_types::Fact {
        id: "fresh-fact".to_string(),
        fact_text: "the token cache expires hourly".to_string(),
        embedding: embedding.clone(),
        category: None,
        confidence: 1.0,
        status: FactStatus::Active,
        source_type: None,
        source_id: None,
        parent_id: None,
        session_id: None,
        agent_id: None,
        task_id: None,
        branch_name: "main".to_string(),
        metadata: serde_json::json!({}),
        created_at: Utc::now() - Duration::days(1),
    };
    let mut stale = fresh.clone();
    stale.id = "stale-fact".to_string();
    stale.created_at = Utc::now() - Duration::days(100);

    world
        .store
        .with_conn(|conn| {
            queries::facts::insert(conn, &fresh)?;
            queries::facts::insert(conn, &stale)
        })
        .unwrap();

    let hits = world
        .search
        .search(&ctx, SearchRequest::hybrid("token cache"))
        .await
        .unwrap();
    assert_eq!(hits.len(), 2);
    assert_eq!(hits[0].id, "fresh-fact");
    // exp(-1/30) ≈ 0.97 vs exp(-100/30) ≈ 0.036
    assert!(hits[0].score > 0.9);
    assert!(hits[1].score < 0.1);
}

#[tokio::test]
async fn snapshot_restore_never_mutates_the_original() {
    let world = TestWorld::with_embedder(Arc::new(HashEmbedder::default())).await;
    let ctx = Ctx::background();

    world
        .facts
        .write(&ctx, WriteFactRequest::new("present before the snapshot", "main"))
        .await
        .unwrap();
    let snapshot = world
        .snapshots
        .create(&ctx, "main", Some("s1"), false)
        .await
        .unwrap();

    // Written after T0.
    let x = world
        .facts
        .write(&ctx, WriteFactRequest::new("fact X arrives later", "main"))
        .await
        .unwrap();

    let restored = world.snapshots.restore(&ctx, &snapshot.id).await.unwrap();
    assert!(restored.branch_name.starts_with("main_restored_"));

    let restored_facts = world
        .store
        .with_conn(|conn| queries::facts::all_for_branch(conn, &restored.branch_name))
        .unwrap();
    assert_eq!(restored_facts.len(), 1);
    assert_eq!(restored_facts[0].fact_text, "present before the snapshot");

    // Main still holds X.
    let x_on_main = world.facts.get(&ctx, &x.fact.id, "main").await.unwrap();
    assert_eq!(x_on_main.status, FactStatus::Active);
}

#[tokio::test]
async fn keyword_search_ranks_exact_fact_first() {
    let world = TestWorld::new().await;
    let ctx = Ctx::background();

    world
        .facts
        .write(
            &ctx,
            WriteFactRequest::new("deployments pause during the freeze window", "main"),
        )
        .await
        .unwrap();
    world
        .facts
        .write(&ctx, WriteFactRequest::new("the dashboard uses websockets", "main"))
        .await
        .unwrap();

    let hits = world
        .search
        .search(
            &ctx,
            SearchRequest::hybrid("freeze window").with_mode(SearchMode::Keyword),
        )
        .await
        .unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].text, "deployments pause during the freeze window");
}

#[tokio::test]
async fn empty_query_returns_recency_listing() {
    let world = TestWorld::new().await;
    let ctx = Ctx::background();

    for i in 0..3 {
        world
            .facts
            .write(&ctx, WriteFactRequest::new(format!("distinct fact {i}"), "main"))
            .await
            .unwrap();
    }

    let hits = world
        .search
        .search(
            &ctx,
            SearchRequest::hybrid("").with_scope(SearchScope::Facts).with_limit(2),
        )
        .await
        .unwrap();
    assert_eq!(hits.len(), 2);
    assert!(hits.iter().all(|h| h.score == 0.0));
    assert!(hits[0].created_at >= hits[1].created_at);
}

#[tokio::test]
async fn concurrent_appends_stay_gap_free() {
    let world = Arc::new(TestWorld::new().await);
    let ctx = Ctx::background();
    let conv = world
        .conversations
        .create(&ctx, CreateConversationRequest::new("main"))
        .await
        .unwrap();

    let mut handles = Vec::new();
    for i in 0..8 {
        let world = world.clone();
        let conv_id = conv.id.clone();
        handles.push(tokio::spawn(async move {
            world
                .conversations
                .append_message(
                    &Ctx::background(),
                    AppendMessageRequest::new(&conv_id, Role::User, "main")
                        .with_content(format!("parallel {i}")),
                )
                .await
                .unwrap()
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    let messages = world.messages.list(&ctx, &conv.id, "main").await.unwrap();
    let mut seqs: Vec<i64> = messages.iter().map(|m| m.sequence_num).collect();
    seqs.sort_unstable();
    assert_eq!(seqs, (1..=8).collect::<Vec<i64>>());
}
