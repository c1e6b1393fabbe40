//! Retrieval core of SmartBuddy, independent of how the app is run.
//!
//! Ingested text is cut into overlapping windows ([chunks]), embedded ([embed],
//! [ollama]), stored in an exact L2 index ([vectors]) alongside chunk metadata
//! ([documents]), and saved to the app data directory ([persist], [app_data]).
//! [service] ties these together; [sources] holds the caller's list of sources
//! used to build allow-list filters.

pub mod app_data;
pub mod chunks;
pub mod config;
pub mod corpus;
pub mod documents;
pub mod embed;
pub mod ollama;
pub mod persist;
pub mod service;
pub mod sources;
pub mod vectors;

pub use app_data::app_data_dir;
pub use chunks::{chunk_text, ChunkError, ChunkPolicy, DEFAULT_STRIDE, DEFAULT_WINDOW_SIZE};
pub use config::{
    config_path, load_config, load_config_from, save_config, save_config_to, Config, ConfigError,
    EmbedderKind,
};
pub use corpus::Corpus;
pub use documents::{ChunkRecord, DocumentError, DocumentStore};
pub use embed::{embedder_from_config, EmbedError, Embedder, HashingEmbedder};
pub use ollama::{OllamaEmbedder, OllamaError};
pub use persist::{IndexLock, PersistError, Persistence};
pub use service::{LoadStatus, RetrievalOptions, RetrievalService, RetrievedChunk, ServiceError};
pub use sources::{Session, SessionError, Source, SourceFilter, SourceId};
pub use vectors::{ChunkId, IndexError, SearchHit, VectorIndex};

/// Returns a short status string. Used to verify the backend is wired up.
pub fn status() -> &'static str {
    "smartbuddy-core ready"
}
