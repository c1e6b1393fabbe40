//! Ollama-backed embedder. Wraps ollama-rs batch embeddings behind [Embedder].

use async_trait::async_trait;
use ollama_rs::generation::embeddings::request::{EmbeddingsInput, GenerateEmbeddingsRequest};
use ollama_rs::Ollama;
use thiserror::Error;

use crate::embed::{EmbedError, Embedder};

/// `all-minilm` is all-MiniLM-L6-v2, which produces 384-dimensional vectors.
pub const DEFAULT_EMBED_MODEL: &str = "all-minilm";
pub const DEFAULT_BASE_URL: &str = "http://localhost:11434";
pub const DEFAULT_DIMENSION: usize = 384;

#[derive(Debug, Clone)]
pub struct OllamaEmbedder {
    inner: Ollama,
    embed_model: String,
    dimension: usize,
}

impl OllamaEmbedder {
    /// Create from URL string, e.g. `http://localhost:11434`.
    pub fn from_url(url: &str) -> Result<Self, OllamaError> {
        let inner = Ollama::try_new(url).map_err(OllamaError::ParseUrl)?;
        Ok(Self {
            inner,
            embed_model: DEFAULT_EMBED_MODEL.to_string(),
            dimension: DEFAULT_DIMENSION,
        })
    }

    /// Set the embedding model (e.g. `all-minilm`, `nomic-embed-text`).
    pub fn with_embed_model(mut self, model: impl Into<String>) -> Self {
        self.embed_model = model.into();
        self
    }

    /// Dimension the model is expected to produce. Vectors of any other length
    /// are rejected as soon as the reply arrives.
    pub fn with_dimension(mut self, dimension: usize) -> Self {
        self.dimension = dimension;
        self
    }
}

#[async_trait]
impl Embedder for OllamaEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let req = GenerateEmbeddingsRequest::new(
            self.embed_model.clone(),
            EmbeddingsInput::Multiple(texts.to_vec()),
        );
        let res = self
            .inner
            .generate_embeddings(req)
            .await
            .map_err(OllamaError::Request)?;
        tracing::debug!(
            model = %self.embed_model,
            inputs = texts.len(),
            outputs = res.embeddings.len(),
            "embedded batch"
        );
        check_batch(texts.len(), self.dimension, res.embeddings)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn name(&self) -> &str {
        &self.embed_model
    }
}

/// A reply is usable only with one vector per input, each of the configured length.
fn check_batch(
    inputs: usize,
    dimension: usize,
    embeddings: Vec<Vec<f32>>,
) -> Result<Vec<Vec<f32>>, EmbedError> {
    if embeddings.len() != inputs {
        return Err(EmbedError::Count {
            expected: inputs,
            actual: embeddings.len(),
        });
    }
    if let Some(bad) = embeddings.iter().find(|v| v.len() != dimension) {
        return Err(EmbedError::Dimension {
            expected: dimension,
            actual: bad.len(),
        });
    }
    Ok(embeddings)
}

#[derive(Debug, Error)]
pub enum OllamaError {
    #[error("invalid Ollama URL: {0}")]
    ParseUrl(#[from] url::ParseError),
    #[error("Ollama request failed: {0}")]
    Request(#[from] ollama_rs::error::OllamaError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_sets_model_and_dimension() {
        let e = OllamaEmbedder::from_url(DEFAULT_BASE_URL)
            .unwrap()
            .with_embed_model("nomic-embed-text")
            .with_dimension(768);
        assert_eq!(e.name(), "nomic-embed-text");
        assert_eq!(e.dimension(), 768);
    }

    #[test]
    fn bad_url_is_rejected() {
        assert!(matches!(
            OllamaEmbedder::from_url("not a url"),
            Err(OllamaError::ParseUrl(_))
        ));
    }

    #[test]
    fn reply_must_match_inputs_and_dimension() {
        let ok = check_batch(2, 3, vec![vec![0.0; 3], vec![1.0; 3]]).unwrap();
        assert_eq!(ok.len(), 2);

        assert!(matches!(
            check_batch(2, 3, vec![vec![0.0; 3]]),
            Err(EmbedError::Count { expected: 2, actual: 1 })
        ));
        assert!(matches!(
            check_batch(2, 384, vec![vec![0.0; 384], vec![0.0; 768]]),
            Err(EmbedError::Dimension { expected: 384, actual: 768 })
        ));
    }

    #[tokio::test]
    async fn empty_batch_skips_the_request() {
        let e = OllamaEmbedder::from_url("http://127.0.0.1:9").unwrap();
        assert!(e.embed(&[]).await.unwrap().is_empty());
    }
}
