//! The vector index and document store as one unit. Every mutation goes through
//! here so the two always have the same length.

use crate::documents::DocumentStore;
use crate::sources::SourceId;
use crate::vectors::{ChunkId, IndexError, VectorIndex};

#[derive(Debug, Clone, PartialEq)]
pub struct Corpus {
    vectors: VectorIndex,
    documents: DocumentStore,
}

impl Corpus {
    pub fn new(dimension: usize) -> Self {
        Self {
            vectors: VectorIndex::new(dimension),
            documents: DocumentStore::new(),
        }
    }

    pub fn vectors(&self) -> &VectorIndex {
        &self.vectors
    }

    pub fn documents(&self) -> &DocumentStore {
        &self.documents
    }

    pub fn dimension(&self) -> usize {
        self.vectors.dimension()
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    /// Append chunks with their vectors, one vector per text. Nothing is appended
    /// when the lengths differ or any vector has the wrong dimension.
    pub fn append(
        &mut self,
        source_id: &SourceId,
        texts: Vec<String>,
        vectors: Vec<Vec<f32>>,
    ) -> Result<Vec<ChunkId>, IndexError> {
        if texts.len() != vectors.len() {
            return Err(IndexError::LengthMismatch {
                texts: texts.len(),
                vectors: vectors.len(),
            });
        }
        self.vectors.add(vectors)?;
        Ok(self.documents.append(source_id, texts))
    }

    /// Roll both halves back to `len` entries.
    pub(crate) fn truncate(&mut self, len: usize) {
        self.vectors.truncate(len);
        self.documents.truncate(len);
    }
}
