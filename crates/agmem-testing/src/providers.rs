use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use agmem_providers::{Embedder, HashEmbedder, Judge};
use agmem_types::{Error, MergeVerdict, Result};

/// Embedder with pinned vectors per exact text; everything else falls back
/// to the deterministic hash embedder. Lets tests dial in exact cosines.
pub struct StaticEmbedder {
    pinned: Mutex<HashMap<String, Vec<f32>>>,
    fallback: HashEmbedder,
}

impl StaticEmbedder {
    pub fn new(dimensions: usize) -> Self {
        Self {
            pinned: Mutex::new(HashMap::new()),
            fallback: HashEmbedder::new(dimensions),
        }
    }

    pub fn pin(&self, text: impl Into<String>, vector: Vec<f32>) {
        self.pinned.lock().unwrap().insert(text.into(), vector);
    }
}

impl Default for StaticEmbedder {
    fn default() -> Self {
        Self::new(8)
    }
}

#[async_trait]
impl Embedder for StaticEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        if let Some(vector) = self.pinned.lock().unwrap().get(text) {
            return Ok(vector.clone());
        }
        self.fallback.embed(text).await
    }

    fn dimensions(&self) -> usize {
        self.fallback.dimensions()
    }
}

/// Embedder that always fails, for exercising the degraded write path.
pub struct FailingEmbedder;

#[async_trait]
impl Embedder for FailingEmbedder {
    async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
        Err(Error::unavailable("embedding service down"))
    }

    fn dimensions(&self) -> usize {
        0
    }
}

/// Judge that always answers with one fixed verdict and score.
pub struct ScriptedJudge {
    pub verdict: MergeVerdict,
    pub score: f64,
}

impl ScriptedJudge {
    pub fn keeping(verdict: MergeVerdict) -> Self {
        Self {
            verdict,
            score: 0.5,
        }
    }
}

#[async_trait]
impl Judge for ScriptedJudge {
    async fn compare(&self, _a: &str, _b: &str, _criteria: &str) -> Result<MergeVerdict> {
        Ok(self.verdict)
    }

    async fn score(&self, _subject: &str, _dimension: &str) -> Result<f64> {
        Ok(self.score)
    }
}
