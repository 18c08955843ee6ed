use std::sync::Arc;

use agmem_providers::Embedder;
use agmem_types::{Ctx, Result};
use tokio::sync::Semaphore;

/// Default bound on concurrent embedding requests.
const MAX_INFLIGHT: usize = 16;

/// Bounded-concurrency gateway to the (optional) embedding provider.
///
/// The provider is an external rate-limited service: at most `MAX_INFLIGHT`
/// requests run at once, one embedding per write, no coalescing. Provider
/// failure degrades to `None` so writes proceed without an embedding.
pub struct EmbeddingGate {
    embedder: Option<Arc<dyn Embedder>>,
    semaphore: Semaphore,
}

impl EmbeddingGate {
    pub fn new(embedder: Option<Arc<dyn Embedder>>) -> Self {
        Self {
            embedder,
            semaphore: Semaphore::new(MAX_INFLIGHT),
        }
    }

    pub fn is_configured(&self) -> bool {
        self.embedder.is_some()
    }

    /// Embed `text`, or `None` when no provider is configured or the
    /// provider fails. Only cancellation is surfaced as an error.
    pub async fn embed(&self, ctx: &Ctx, text: &str) -> Result<Option<Vec<f32>>> {
        ctx.check()?;
        let Some(embedder) = &self.embedder else {
            return Ok(None);
        };

        let _permit = self
            .semaphore
            .acquire()
            .await
            .expect("embedding semaphore closed");
        ctx.check()?;

        match embedder.embed(text).await {
            Ok(vector) => Ok(Some(vector)),
            Err(err) => {
                tracing::warn!(error = %err, "embedding provider failed; writing without embedding");
                Ok(None)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agmem_providers::HashEmbedder;

    #[tokio::test]
    async fn absent_provider_yields_none() {
        let gate = EmbeddingGate::new(None);
        let out = gate.embed(&Ctx::background(), "anything").await.unwrap();
        assert!(out.is_none());
        assert!(!gate.is_configured());
    }

    #[tokio::test]
    async fn configured_provider_yields_vector() {
        let gate = EmbeddingGate::new(Some(Arc::new(HashEmbedder::default())));
        let out = gate.embed(&Ctx::background(), "a fact").await.unwrap();
        assert!(out.is_some());
    }
}
