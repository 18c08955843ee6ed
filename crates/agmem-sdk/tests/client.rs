use std::sync::Arc;

use agmem_engine::{CreateBranchRequest, WriteFactRequest};
use agmem_providers::HashEmbedder;
use agmem_sdk::Client;
use agmem_types::{Ctx, SearchMode, SearchRequest};

#[tokio::test]
async fn client_round_trip_on_disk() {
    let dir = tempfile::tempdir().unwrap();
    let client = Client::builder()
        .embedder(Arc::new(HashEmbedder::default()))
        .open(dir.path().join("agmem.db"))
        .unwrap();
    let ctx = Ctx::background();

    client.branches().ensure_main(&ctx).await.unwrap();
    client
        .branches()
        .create(&ctx, CreateBranchRequest::new("exp/smoke", "main"))
        .await
        .unwrap();

    client
        .facts()
        .write(
            &ctx,
            WriteFactRequest::new("the smoke test writes one fact", "exp/smoke"),
        )
        .await
        .unwrap();

    let hits = client
        .search()
        .search(
            &ctx,
            SearchRequest::hybrid("smoke test")
                .with_mode(SearchMode::Keyword)
                .on_branch("exp/smoke"),
        )
        .await
        .unwrap();
    assert_eq!(hits.len(), 1);

    // Reopen the same file: state survives.
    drop(client);
    let reopened = Client::open(dir.path().join("agmem.db")).unwrap();
    let listed = reopened
        .facts()
        .list(&ctx, "exp/smoke", Default::default())
        .await
        .unwrap();
    assert_eq!(listed.len(), 1);
}
