//! Text embedding: the [Embedder] trait and an offline hashing implementation.
//!
//! The Ollama-backed embedder lives in [crate::ollama].

use std::hash::Hasher;

use async_trait::async_trait;
use fnv::FnvHasher;
use thiserror::Error;

use crate::config::{Config, EmbedderKind};
use crate::ollama::{OllamaEmbedder, OllamaError};

/// Maps text to fixed-length vectors, one per input, in input order.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError>;

    /// Length of every vector this embedder produces.
    fn dimension(&self) -> usize;

    /// Model identifier, recorded alongside persisted vectors.
    fn name(&self) -> &str;
}

#[async_trait]
impl<T: Embedder + ?Sized> Embedder for Box<T> {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
        (**self).embed(texts).await
    }

    fn dimension(&self) -> usize {
        (**self).dimension()
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}

/// Deterministic, offline embedder. Hashes lower-cased words and adjacent word
/// pairs into signed buckets and L2-normalizes the result.
///
/// Not semantic: texts are close only when they share words. Good enough for
/// exact-phrase lookups and for tests.
#[derive(Debug, Clone)]
pub struct HashingEmbedder {
    dimension: usize,
}

impl HashingEmbedder {
    pub const NAME: &'static str = "hashing-fnv";

    pub fn new(dimension: usize) -> Self {
        Self {
            dimension: dimension.max(1),
        }
    }

    pub fn embed_one(&self, text: &str) -> Vec<f32> {
        let mut v = vec![0.0f32; self.dimension];
        let lower = text.to_lowercase();
        let words: Vec<&str> = lower
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
            .collect();
        for word in &words {
            self.add_feature(&mut v, &[word.as_bytes()]);
        }
        for pair in words.windows(2) {
            self.add_feature(&mut v, &[pair[0].as_bytes(), b" ", pair[1].as_bytes()]);
        }
        normalize(&mut v);
        v
    }

    fn add_feature(&self, v: &mut [f32], parts: &[&[u8]]) {
        let mut hasher = FnvHasher::default();
        for part in parts {
            hasher.write(part);
        }
        let h = hasher.finish();
        let bucket = (h % self.dimension as u64) as usize;
        let sign = if h >> 63 == 0 { 1.0 } else { -1.0 };
        v[bucket] += sign;
    }
}

#[async_trait]
impl Embedder for HashingEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
        Ok(texts.iter().map(|t| self.embed_one(t)).collect())
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn name(&self) -> &str {
        Self::NAME
    }
}

fn normalize(v: &mut [f32]) {
    let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        v.iter_mut().for_each(|x| *x /= norm);
    }
}

/// Build the embedder selected in `config`.
pub fn embedder_from_config(config: &Config) -> Result<Box<dyn Embedder>, EmbedError> {
    match config.embedder {
        EmbedderKind::Ollama => Ok(Box::new(
            OllamaEmbedder::from_url(&config.ollama_url)?
                .with_embed_model(config.embed_model.clone())
                .with_dimension(config.dimension),
        )),
        EmbedderKind::Hashing => Ok(Box::new(HashingEmbedder::new(config.dimension))),
    }
}

#[derive(Debug, Error)]
pub enum EmbedError {
    #[error("embedding backend failed: {0}")]
    Ollama(#[from] OllamaError),
    #[error("backend returned {actual} vectors for {expected} inputs")]
    Count { expected: usize, actual: usize },
    #[error("backend returned a vector of dimension {actual}, expected {expected}")]
    Dimension { expected: usize, actual: usize },
}
