//! Retrieval service: chunk → embed → store on ingestion; embed → search → filter on query.
//!
//! The index and store sit behind one `RwLock`. Ingestion embeds before taking the
//! write lock, then appends and saves while holding it; queries only take the read
//! lock, so they always see a complete ingestion or none of it. The lock is never
//! held across an `.await`.
//!
//! Other services (usually other processes) may share the data directory. Before
//! appending, a writer takes the directory's [crate::persist::IndexLock] and
//! reloads whatever they have saved, so no ingestion overwrites another. Lock
//! order is always the file lock first, then the `RwLock`.

use std::path::{Path, PathBuf};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use thiserror::Error;

use crate::chunks::ChunkPolicy;
use crate::config::{DEFAULT_CONTEXT_CHUNKS, DEFAULT_FETCH_K};
use crate::corpus::Corpus;
use crate::documents::DocumentError;
use crate::embed::{EmbedError, Embedder};
use crate::persist::{PersistError, Persistence};
use crate::sources::{SourceFilter, SourceId};
use crate::vectors::{ChunkId, IndexError};

/// Tunables for ingestion and retrieval.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetrievalOptions {
    pub policy: ChunkPolicy,
    /// `k` passed to the index when building a prompt context.
    pub fetch_k: usize,
    /// How many filtered chunks end up in the prompt context.
    pub context_chunks: usize,
}

impl Default for RetrievalOptions {
    fn default() -> Self {
        Self {
            policy: ChunkPolicy::default(),
            fetch_k: DEFAULT_FETCH_K,
            context_chunks: DEFAULT_CONTEXT_CHUNKS,
        }
    }
}

/// What happened to the persisted index when the service was opened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadStatus {
    /// Nothing was persisted; started empty.
    Fresh,
    Restored { chunks: usize },
    /// The persisted index was unusable; started empty. The bad file was moved
    /// to `moved_to` when that was possible.
    Recovered {
        reason: String,
        moved_to: Option<PathBuf>,
    },
}

/// A ranked search result.
#[derive(Debug, Clone, PartialEq)]
pub struct RetrievedChunk {
    pub id: ChunkId,
    pub source_id: SourceId,
    pub text: String,
    pub distance: f32,
}

pub struct RetrievalService<E> {
    embedder: E,
    options: RetrievalOptions,
    persistence: Persistence,
    corpus: RwLock<Corpus>,
    load_status: LoadStatus,
}

impl<E: Embedder> RetrievalService<E> {
    /// Open the index stored in `data_dir`, or start an empty one. The index
    /// dimension is the embedder's dimension.
    pub fn open(
        data_dir: &Path,
        options: RetrievalOptions,
        embedder: E,
    ) -> Result<Self, ServiceError> {
        let dimension = embedder.dimension();
        let persistence = Persistence::new(data_dir, embedder.name());

        let _lock = persistence.lock()?;
        let (corpus, load_status) = match persistence.load(dimension) {
            Ok(Some(corpus)) => {
                let chunks = corpus.len();
                (corpus, LoadStatus::Restored { chunks })
            }
            Ok(None) => (Corpus::new(dimension), LoadStatus::Fresh),
            Err(e @ PersistError::Corrupt { .. }) => {
                let moved_to = match persistence.quarantine() {
                    Ok(p) => Some(p),
                    Err(qe) => {
                        tracing::warn!(error = %qe, "could not move corrupt index aside");
                        None
                    }
                };
                tracing::warn!(error = %e, "starting with an empty index");
                let status = LoadStatus::Recovered {
                    reason: e.to_string(),
                    moved_to,
                };
                (Corpus::new(dimension), status)
            }
            Err(e) => return Err(e.into()),
        };

        Ok(Self {
            embedder,
            options,
            persistence,
            corpus: RwLock::new(corpus),
            load_status,
        })
    }

    pub fn load_status(&self) -> &LoadStatus {
        &self.load_status
    }

    pub fn options(&self) -> &RetrievalOptions {
        &self.options
    }

    pub fn embedder(&self) -> &E {
        &self.embedder
    }

    /// File the index is saved to.
    pub fn index_path(&self) -> &Path {
        self.persistence.path()
    }

    pub fn len(&self) -> Result<usize, ServiceError> {
        Ok(self.read()?.len())
    }

    pub fn is_empty(&self) -> Result<bool, ServiceError> {
        Ok(self.read()?.is_empty())
    }

    /// Chunk, embed and store `raw_text` under `source_id`, then save. Returns the
    /// number of chunks added. Either every chunk is stored and saved, or nothing
    /// changes. Blocks (without awaiting) while another writer on the same data
    /// directory is committing.
    pub async fn add_texts(
        &self,
        raw_text: &str,
        source_id: &SourceId,
    ) -> Result<usize, ServiceError> {
        if raw_text.is_empty() {
            return Err(ServiceError::EmptyInput);
        }
        let chunks = self.options.policy.split(raw_text);
        let vectors = self.embedder.embed(&chunks).await?;
        if vectors.len() != chunks.len() {
            return Err(ServiceError::EmbeddingCount {
                expected: chunks.len(),
                actual: vectors.len(),
            });
        }
        let added = chunks.len();

        let _lock = self.persistence.lock()?;
        let mut corpus = self.write()?;
        if let Some(saved) = self.persistence.load(corpus.dimension())? {
            if saved.len() != corpus.len() {
                tracing::debug!(
                    ours = corpus.len(),
                    saved = saved.len(),
                    "picked up chunks saved by another writer"
                );
            }
            *corpus = saved;
        }
        let before = corpus.len();
        corpus.append(source_id, chunks, vectors)?;
        if let Err(e) = self.persistence.save(&corpus) {
            corpus.truncate(before);
            return Err(e.into());
        }
        tracing::info!(source = %source_id, chunks = added, total = corpus.len(), "ingested text");
        Ok(added)
    }

    /// Nearest chunks to `query_text` among the `k` returned by the index, keeping
    /// only those whose source passes `filter`. Filtering happens after the search,
    /// so fewer than `k` chunks (possibly none) may come back.
    pub async fn search(
        &self,
        query_text: &str,
        k: usize,
        filter: &SourceFilter,
    ) -> Result<Vec<RetrievedChunk>, ServiceError> {
        let query = self.embed_query(query_text).await?;
        let corpus = self.read()?;
        let hits = corpus.vectors().search(&query, k)?;
        tracing::debug!(k, hits = hits.len(), "searched index");

        let mut results = Vec::with_capacity(hits.len());
        for hit in hits {
            let record = corpus.documents().get(hit.id)?;
            if filter.allows(&record.source_id) {
                results.push(RetrievedChunk {
                    id: record.id,
                    source_id: record.source_id.clone(),
                    text: record.text.clone(),
                    distance: hit.distance,
                });
            }
        }
        Ok(results)
    }

    /// Texts of [RetrievalService::search], nearest first.
    pub async fn query(
        &self,
        query_text: &str,
        k: usize,
        filter: &SourceFilter,
    ) -> Result<Vec<String>, ServiceError> {
        Ok(self
            .search(query_text, k, filter)
            .await?
            .into_iter()
            .map(|c| c.text)
            .collect())
    }

    /// Prompt context for a question: search with `fetch_k`, filter, keep the first
    /// `context_chunks`, one per line.
    pub async fn context(
        &self,
        query_text: &str,
        filter: &SourceFilter,
    ) -> Result<String, ServiceError> {
        let chunks = self.query(query_text, self.options.fetch_k, filter).await?;
        Ok(chunks
            .into_iter()
            .take(self.options.context_chunks)
            .collect::<Vec<_>>()
            .join("\n"))
    }

    /// Every stored chunk whose source passes `filter`, in insertion order.
    pub fn get_all_texts(&self, filter: &SourceFilter) -> Result<Vec<String>, ServiceError> {
        Ok(self
            .read()?
            .documents()
            .iter()
            .filter(|r| filter.allows(&r.source_id))
            .map(|r| r.text.clone())
            .collect())
    }

    async fn embed_query(&self, query_text: &str) -> Result<Vec<f32>, ServiceError> {
        let mut vectors = self.embedder.embed(&[query_text.to_string()]).await?;
        if vectors.len() != 1 {
            return Err(ServiceError::EmbeddingCount {
                expected: 1,
                actual: vectors.len(),
            });
        }
        Ok(vectors.swap_remove(0))
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Corpus>, ServiceError> {
        self.corpus.read().map_err(|_| ServiceError::Poisoned)
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Corpus>, ServiceError> {
        self.corpus.write().map_err(|_| ServiceError::Poisoned)
    }
}

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("no text to ingest")]
    EmptyInput,
    #[error("embedder returned {actual} vectors for {expected} inputs")]
    EmbeddingCount { expected: usize, actual: usize },
    #[error(transparent)]
    Embed(#[from] EmbedError),
    #[error(transparent)]
    Index(#[from] IndexError),
    #[error(transparent)]
    Document(#[from] DocumentError),
    #[error(transparent)]
    Persist(#[from] PersistError),
    #[error("index lock poisoned by a panicked writer")]
    Poisoned,
}
