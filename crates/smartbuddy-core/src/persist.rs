//! Saves and restores the corpus as a single JSON artifact.
//!
//! Vectors and chunk records are written together, one entry per chunk, so the
//! two can never disagree on disk. A save writes a uniquely named temp file in
//! the same directory, syncs it, then renames it over `index.json`; a reader sees
//! either the old file or the new one.
//!
//! Several processes may share one data directory. Writers serialize on an
//! advisory lock held on `index.json.lock` (see [Persistence::lock]).

use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use fs4::fs_std::FileExt;
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use thiserror::Error;

use crate::corpus::Corpus;
use crate::sources::SourceId;
use crate::vectors::ChunkId;

pub const INDEX_FILENAME: &str = "index.json";
pub const LOCK_FILENAME: &str = "index.json.lock";
const FORMAT_VERSION: u32 = 1;

#[derive(Serialize)]
struct StateRef<'a> {
    format_version: u32,
    dimension: usize,
    embed_model: &'a str,
    entries: Vec<EntryRef<'a>>,
}

#[derive(Serialize)]
struct EntryRef<'a> {
    id: ChunkId,
    source_id: &'a SourceId,
    text: &'a str,
    vector: &'a [f32],
}

#[derive(Deserialize)]
struct State {
    format_version: u32,
    dimension: usize,
    embed_model: String,
    entries: Vec<Entry>,
}

#[derive(Deserialize)]
struct Entry {
    id: ChunkId,
    source_id: SourceId,
    text: String,
    vector: Vec<f32>,
}

/// Exclusive hold on the index of one data directory, shared by every process
/// using it. Released when dropped (or when the holding process dies).
#[derive(Debug)]
pub struct IndexLock {
    _file: File,
}

/// Where and under which model name the corpus is persisted.
#[derive(Debug, Clone)]
pub struct Persistence {
    dir: PathBuf,
    path: PathBuf,
    embed_model: String,
}

impl Persistence {
    pub fn new(dir: &Path, embed_model: impl Into<String>) -> Self {
        Self {
            dir: dir.to_path_buf(),
            path: dir.join(INDEX_FILENAME),
            embed_model: embed_model.into(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Block until no other holder (in this process or another) has the lock.
    /// Hold it across load, modify and save so concurrent writers do not
    /// overwrite each other's chunks.
    pub fn lock(&self) -> Result<IndexLock, PersistError> {
        fs::create_dir_all(&self.dir).map_err(|e| PersistError::io(&self.dir, e))?;
        let path = self.dir.join(LOCK_FILENAME);
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&path)
            .map_err(|e| PersistError::io(&path, e))?;
        file.lock_exclusive().map_err(|e| PersistError::io(&path, e))?;
        tracing::trace!(path = %path.display(), "locked index");
        Ok(IndexLock { _file: file })
    }

    pub fn save(&self, corpus: &Corpus) -> Result<(), PersistError> {
        fs::create_dir_all(&self.dir).map_err(|e| PersistError::io(&self.dir, e))?;
        let state = StateRef {
            format_version: FORMAT_VERSION,
            dimension: corpus.dimension(),
            embed_model: &self.embed_model,
            entries: corpus
                .documents()
                .iter()
                .zip(corpus.vectors().iter())
                .map(|(record, vector)| EntryRef {
                    id: record.id,
                    source_id: &record.source_id,
                    text: &record.text,
                    vector,
                })
                .collect(),
        };

        // Dropping `tmp` on any error path removes the temp file.
        let mut tmp =
            NamedTempFile::new_in(&self.dir).map_err(|e| PersistError::io(&self.dir, e))?;
        let mut writer = BufWriter::new(tmp.as_file_mut());
        serde_json::to_writer(&mut writer, &state).map_err(PersistError::Serialize)?;
        writer.flush().map_err(|e| PersistError::io(&self.dir, e))?;
        drop(writer);
        tmp.as_file().sync_all().map_err(|e| PersistError::io(tmp.path(), e))?;
        tmp.persist(&self.path).map_err(|e| PersistError::io(&self.path, e.error))?;

        tracing::info!(path = %self.path.display(), chunks = corpus.len(), "saved index");
        Ok(())
    }

    /// Load the persisted corpus. `Ok(None)` when nothing has been saved yet.
    /// Anything that cannot be decoded, or decodes to an inconsistent state, is
    /// [PersistError::Corrupt].
    pub fn load(&self, dimension: usize) -> Result<Option<Corpus>, PersistError> {
        let file = match File::open(&self.path) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(PersistError::io(&self.path, e)),
        };
        let state: State = serde_json::from_reader(BufReader::new(file))
            .map_err(|e| self.corrupt(format!("unreadable: {e}")))?;

        if state.format_version != FORMAT_VERSION {
            return Err(self.corrupt(format!(
                "unsupported format version {}",
                state.format_version
            )));
        }
        if state.dimension != dimension {
            return Err(self.corrupt(format!(
                "stored dimension {} does not match embedder dimension {dimension}",
                state.dimension
            )));
        }
        if state.embed_model != self.embed_model {
            tracing::warn!(
                stored = %state.embed_model,
                current = %self.embed_model,
                "index was built with a different embedding model"
            );
        }

        let mut corpus = Corpus::new(dimension);
        for (position, entry) in state.entries.into_iter().enumerate() {
            if entry.id != ChunkId(position as u64) {
                return Err(self.corrupt(format!(
                    "entry {position} has id {}",
                    entry.id.0
                )));
            }
            corpus
                .append(&entry.source_id, vec![entry.text], vec![entry.vector])
                .map_err(|e| self.corrupt(format!("entry {position}: {e}")))?;
        }

        tracing::info!(path = %self.path.display(), chunks = corpus.len(), "loaded index");
        Ok(Some(corpus))
    }

    /// Move an unusable artifact out of the way so the next save does not destroy it.
    pub fn quarantine(&self) -> Result<PathBuf, PersistError> {
        let target = self.path.with_extension("json.corrupt");
        fs::rename(&self.path, &target).map_err(|e| PersistError::io(&self.path, e))?;
        Ok(target)
    }

    fn corrupt(&self, reason: String) -> PersistError {
        PersistError::Corrupt {
            path: self.path.clone(),
            reason,
        }
    }
}

#[derive(Debug, Error)]
pub enum PersistError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to serialize index: {0}")]
    Serialize(#[source] serde_json::Error),
    #[error("persisted index {path} is corrupt: {reason}")]
    Corrupt { path: PathBuf, reason: String },
}

impl PersistError {
    fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn sample() -> Corpus {
        let mut corpus = Corpus::new(3);
        corpus
            .append(
                &SourceId::from("s1"),
                vec!["first".into(), "second".into()],
                vec![vec![0.1, -2.5, 3.0e-7], vec![1.0 / 3.0, 0.0, 12345.678]],
            )
            .unwrap();
        corpus
            .append(&SourceId::from("s2"), vec!["third ✓".into()], vec![vec![0.25, 1e-3, 42.0]])
            .unwrap();
        corpus
    }

    #[test]
    fn missing_file_loads_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let p = Persistence::new(dir.path(), "m");
        assert!(p.load(3).unwrap().is_none());
    }

    #[test]
    fn save_then_load_is_lossless() {
        let dir = tempfile::tempdir().unwrap();
        let p = Persistence::new(dir.path(), "m");
        let corpus = sample();
        p.save(&corpus).unwrap();

        let loaded = p.load(3).unwrap().unwrap();
        assert_eq!(loaded.len(), corpus.len());
        assert_eq!(loaded.documents(), corpus.documents());
        for (a, b) in loaded.vectors().iter().zip(corpus.vectors().iter()) {
            let a: Vec<u32> = a.iter().map(|x| x.to_bits()).collect();
            let b: Vec<u32> = b.iter().map(|x| x.to_bits()).collect();
            assert_eq!(a, b);
        }
        let names: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(names, vec![INDEX_FILENAME]);
    }

    #[test]
    fn save_replaces_previous_state() {
        let dir = tempfile::tempdir().unwrap();
        let p = Persistence::new(dir.path(), "m");
        p.save(&sample()).unwrap();
        p.save(&Corpus::new(3)).unwrap();
        assert!(p.load(3).unwrap().unwrap().is_empty());
    }

    #[test]
    fn garbage_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(INDEX_FILENAME), b"{\"format_version\": 1, \"dimen").unwrap();
        let p = Persistence::new(dir.path(), "m");
        assert!(matches!(p.load(3), Err(PersistError::Corrupt { .. })));
    }

    #[test]
    fn dimension_change_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let p = Persistence::new(dir.path(), "m");
        p.save(&sample()).unwrap();
        assert!(matches!(p.load(384), Err(PersistError::Corrupt { .. })));
    }

    #[test]
    fn misaligned_entries_are_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let json = r#"{"format_version":1,"dimension":2,"embed_model":"m","entries":[
            {"id":0,"source_id":"s","text":"a","vector":[1.0,2.0]},
            {"id":2,"source_id":"s","text":"b","vector":[1.0,2.0]}]}"#;
        fs::write(dir.path().join(INDEX_FILENAME), json).unwrap();
        let p = Persistence::new(dir.path(), "m");
        assert!(matches!(p.load(2), Err(PersistError::Corrupt { .. })));

        let json = r#"{"format_version":1,"dimension":2,"embed_model":"m","entries":[
            {"id":0,"source_id":"s","text":"a","vector":[1.0]}]}"#;
        fs::write(dir.path().join(INDEX_FILENAME), json).unwrap();
        assert!(matches!(p.load(2), Err(PersistError::Corrupt { .. })));
    }

    #[test]
    fn concurrent_saves_never_tear_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let big = {
            let mut corpus = Corpus::new(3);
            let texts: Vec<String> = (0..2000).map(|i| format!("chunk number {i}")).collect();
            let vectors = (0..2000).map(|i| vec![i as f32, 0.5, -1.0]).collect();
            corpus.append(&SourceId::from("big"), texts, vectors).unwrap();
            corpus
        };
        let small = sample();

        std::thread::scope(|scope| {
            for corpus in [&big, &small, &big, &small] {
                let p = Persistence::new(dir.path(), "m");
                scope.spawn(move || {
                    for _ in 0..10 {
                        p.save(corpus).unwrap();
                    }
                });
            }
        });

        let loaded = Persistence::new(dir.path(), "m").load(3).unwrap().unwrap();
        assert!(loaded.len() == big.len() || loaded.len() == small.len());
    }

    #[test]
    fn lock_is_exclusive_until_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let p = Persistence::new(&dir.path().join("nested"), "m");
        let held = p.lock().unwrap();
        assert!(dir.path().join("nested").join(LOCK_FILENAME).exists());

        let (tx, rx) = std::sync::mpsc::channel();
        let waiter = {
            let p = p.clone();
            std::thread::spawn(move || {
                let _second = p.lock().unwrap();
                tx.send(()).unwrap();
            })
        };
        assert!(rx.recv_timeout(Duration::from_millis(200)).is_err());
        drop(held);
        rx.recv_timeout(Duration::from_secs(10)).unwrap();
        waiter.join().unwrap();
    }

    #[test]
    fn quarantine_moves_the_file_aside() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(INDEX_FILENAME), b"nope").unwrap();
        let p = Persistence::new(dir.path(), "m");
        let moved = p.quarantine().unwrap();
        assert_eq!(moved, dir.path().join("index.json.corrupt"));
        assert!(moved.exists());
        assert!(p.load(3).unwrap().is_none());
    }
}
