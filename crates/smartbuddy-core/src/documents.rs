//! Chunk metadata (text + source), kept in step with the vector index.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::sources::SourceId;
use crate::vectors::ChunkId;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkRecord {
    pub id: ChunkId,
    pub source_id: SourceId,
    pub text: String,
}

/// Append-only list of chunk records. A record's id is its position.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DocumentStore {
    records: Vec<ChunkRecord>,
}

impl DocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Append chunks of one source. Returns the ids they were given.
    pub fn append(&mut self, source_id: &SourceId, texts: Vec<String>) -> Vec<ChunkId> {
        let start = self.records.len();
        texts
            .into_iter()
            .enumerate()
            .map(|(offset, text)| {
                let id = ChunkId((start + offset) as u64);
                self.records.push(ChunkRecord {
                    id,
                    source_id: source_id.clone(),
                    text,
                });
                id
            })
            .collect()
    }

    pub fn get(&self, id: ChunkId) -> Result<&ChunkRecord, DocumentError> {
        self.records.get(id.position()).ok_or(DocumentError::OutOfRange {
            id,
            len: self.records.len(),
        })
    }

    pub fn iter(&self) -> impl Iterator<Item = &ChunkRecord> {
        self.records.iter()
    }

    pub(crate) fn truncate(&mut self, len: usize) {
        self.records.truncate(len);
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DocumentError {
    #[error("chunk {} is out of range (store holds {len})", .id.0)]
    OutOfRange { id: ChunkId, len: usize },
}
