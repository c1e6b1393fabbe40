//! Sources: named, toggleable groups of chunks, one per ingestion.
//!
//! The retrieval core only ever sees [SourceId]s and a [SourceFilter]. The list of
//! sources with their display names and enabled flags is session state owned by the
//! caller ([Session]), persisted next to the index so the CLI keeps it across runs.

use std::collections::HashSet;
use std::fmt;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use fs4::fs_std::FileExt;
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use thiserror::Error;
use uuid::Uuid;

pub const SESSION_FILENAME: &str = "sources.toml";
const SESSION_LOCK_FILENAME: &str = "sources.toml.lock";

/// Opaque identifier tagging every chunk with the ingestion it came from.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SourceId(String);

impl SourceId {
    /// Fresh random id (UUID v4).
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SourceId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Which sources a query may draw chunks from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceFilter {
    All,
    Only(HashSet<SourceId>),
}

impl SourceFilter {
    pub fn only(ids: impl IntoIterator<Item = SourceId>) -> Self {
        Self::Only(ids.into_iter().collect())
    }

    pub fn allows(&self, id: &SourceId) -> bool {
        match self {
            Self::All => true,
            Self::Only(ids) => ids.contains(id),
        }
    }

    /// True when nothing can pass (an allow-list with no entries).
    pub fn is_empty(&self) -> bool {
        matches!(self, Self::Only(ids) if ids.is_empty())
    }
}

/// A logical unit of ingested content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Source {
    pub id: SourceId,
    pub display_name: String,
    pub enabled: bool,
}

/// Ordered list of the user's sources. A source that holds chunks is never
/// removed; disabling it hides its chunks from retrieval.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    #[serde(default)]
    sources: Vec<Source>,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a source under `id`. New sources start enabled.
    pub fn add_source(&mut self, id: SourceId, display_name: impl Into<String>) -> &Source {
        self.sources.push(Source {
            id,
            display_name: display_name.into(),
            enabled: true,
        });
        &self.sources[self.sources.len() - 1]
    }

    pub fn sources(&self) -> &[Source] {
        &self.sources
    }

    /// Look a source up by a (possibly abbreviated) id, as typed on the command line.
    pub fn resolve(&self, prefix: &str) -> Result<&Source, SessionError> {
        if let Some(exact) = self.sources.iter().find(|s| s.id.as_str() == prefix) {
            return Ok(exact);
        }
        let mut matches = self
            .sources
            .iter()
            .filter(|s| !prefix.is_empty() && s.id.as_str().starts_with(prefix));
        match (matches.next(), matches.next()) {
            (Some(source), None) => Ok(source),
            (Some(_), Some(_)) => Err(SessionError::Ambiguous(prefix.to_string())),
            _ => Err(SessionError::UnknownSource(prefix.to_string())),
        }
    }

    /// Drop a registration whose ingestion failed. Returns whether it was present.
    pub fn forget(&mut self, id: &SourceId) -> bool {
        let before = self.sources.len();
        self.sources.retain(|s| &s.id != id);
        self.sources.len() != before
    }

    pub fn set_enabled(&mut self, id: &SourceId, enabled: bool) -> Result<(), SessionError> {
        let source = self
            .sources
            .iter_mut()
            .find(|s| &s.id == id)
            .ok_or_else(|| SessionError::UnknownSource(id.to_string()))?;
        source.enabled = enabled;
        Ok(())
    }

    /// Allow-list of the currently enabled sources.
    pub fn allowed(&self) -> SourceFilter {
        SourceFilter::only(
            self.sources
                .iter()
                .filter(|s| s.enabled)
                .map(|s| s.id.clone()),
        )
    }

    /// Load the session stored in `dir`. A missing file is an empty session.
    pub fn load(dir: &Path) -> Result<Self, SessionError> {
        let path = dir.join(SESSION_FILENAME);
        let s = match fs::read_to_string(&path) {
            Ok(s) => s,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => return Err(SessionError::Read(path, e)),
        };
        toml::from_str(&s).map_err(|e| SessionError::Parse(path, e))
    }

    /// Save to `dir`, replacing the previous file atomically.
    pub fn save(&self, dir: &Path) -> Result<(), SessionError> {
        fs::create_dir_all(dir).map_err(|e| SessionError::Write(dir.to_path_buf(), e))?;
        let path = dir.join(SESSION_FILENAME);
        let s = toml::to_string_pretty(self).map_err(SessionError::Serialize)?;
        let mut tmp =
            NamedTempFile::new_in(dir).map_err(|e| SessionError::Write(dir.to_path_buf(), e))?;
        tmp.write_all(s.as_bytes())
            .map_err(|e| SessionError::Write(tmp.path().to_path_buf(), e))?;
        tmp.persist(&path).map_err(|e| SessionError::Write(path, e.error))?;
        Ok(())
    }

    /// Load the session in `dir`, apply `change` and save it, holding the
    /// directory's session lock throughout so updates from other processes are
    /// not lost. Nothing is saved when `change` fails.
    pub fn update<T>(
        dir: &Path,
        change: impl FnOnce(&mut Session) -> Result<T, SessionError>,
    ) -> Result<T, SessionError> {
        fs::create_dir_all(dir).map_err(|e| SessionError::Write(dir.to_path_buf(), e))?;
        let lock_path = dir.join(SESSION_LOCK_FILENAME);
        let lock = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&lock_path)
            .map_err(|e| SessionError::Lock(lock_path.clone(), e))?;
        lock.lock_exclusive().map_err(|e| SessionError::Lock(lock_path, e))?;

        let mut session = Self::load(dir)?;
        let out = change(&mut session)?;
        session.save(dir)?;
        Ok(out)
    }
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("no source with id {0}")]
    UnknownSource(String),
    #[error("id prefix {0} matches more than one source")]
    Ambiguous(String),
    #[error("failed to read {0}: {1}")]
    Read(PathBuf, std::io::Error),
    #[error("invalid sources file {0}: {1}")]
    Parse(PathBuf, toml::de::Error),
    #[error("failed to serialize sources: {0}")]
    Serialize(toml::ser::Error),
    #[error("failed to write {0}: {1}")]
    Write(PathBuf, std::io::Error),
    #[error("failed to lock {0}: {1}")]
    Lock(PathBuf, std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filter_all_allows_everything() {
        assert!(SourceFilter::All.allows(&SourceId::from("x")));
        assert!(!SourceFilter::All.is_empty());
    }

    #[test]
    fn filter_only_checks_membership() {
        let f = SourceFilter::only([SourceId::from("a")]);
        assert!(f.allows(&SourceId::from("a")));
        assert!(!f.allows(&SourceId::from("b")));
        assert!(SourceFilter::only([]).is_empty());
    }

    #[test]
    fn allowed_tracks_enabled_flags() {
        let mut session = Session::new();
        let a = session.add_source(SourceId::from("a"), "notes.txt").id.clone();
        let b = session.add_source(SourceId::from("b"), "URL: example").id.clone();

        assert_eq!(session.allowed(), SourceFilter::only([a.clone(), b.clone()]));
        session.set_enabled(&b, false).unwrap();
        assert_eq!(session.allowed(), SourceFilter::only([a.clone()]));
        session.set_enabled(&a, false).unwrap();
        assert!(session.allowed().is_empty());

        assert!(matches!(
            session.set_enabled(&SourceId::from("zzz"), true),
            Err(SessionError::UnknownSource(_))
        ));
    }

    #[test]
    fn resolve_by_prefix() {
        let mut session = Session::new();
        session.add_source(SourceId::from("abc123"), "one");
        session.add_source(SourceId::from("abd456"), "two");

        assert_eq!(session.resolve("abc").unwrap().display_name, "one");
        assert_eq!(session.resolve("abd456").unwrap().display_name, "two");
        assert!(matches!(session.resolve("ab"), Err(SessionError::Ambiguous(_))));
        assert!(matches!(session.resolve("x"), Err(SessionError::UnknownSource(_))));
        assert!(matches!(session.resolve(""), Err(SessionError::UnknownSource(_))));
    }

    #[test]
    fn generated_ids_are_unique() {
        assert_ne!(SourceId::generate(), SourceId::generate());
    }

    #[test]
    fn save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(Session::load(dir.path()).unwrap(), Session::new());

        let mut session = Session::new();
        let id = session.add_source(SourceId::generate(), "Raw Text Input").id.clone();
        session.add_source(SourceId::generate(), "YouTube: https://youtu.be/x");
        session.set_enabled(&id, false).unwrap();
        session.save(dir.path()).unwrap();

        assert_eq!(Session::load(dir.path()).unwrap(), session);
        let names: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(names, vec![SESSION_FILENAME]);
    }

    #[test]
    fn forget_only_drops_the_named_source() {
        let mut session = Session::new();
        let a = session.add_source(SourceId::from("a"), "kept").id.clone();
        let b = session.add_source(SourceId::from("b"), "failed").id.clone();
        assert!(session.forget(&b));
        assert!(!session.forget(&b));
        assert_eq!(session.allowed(), SourceFilter::only([a]));
    }

    #[test]
    fn failed_update_saves_nothing() {
        let dir = tempfile::tempdir().unwrap();
        Session::update(dir.path(), |s| {
            s.add_source(SourceId::from("a"), "first");
            Ok(())
        })
        .unwrap();

        let err = Session::update(dir.path(), |s| {
            s.add_source(SourceId::from("b"), "second");
            s.set_enabled(&SourceId::from("zzz"), false)
        });
        assert!(matches!(err, Err(SessionError::UnknownSource(_))));
        assert_eq!(Session::load(dir.path()).unwrap().sources().len(), 1);
    }

    #[test]
    fn concurrent_updates_are_all_kept() {
        let dir = tempfile::tempdir().unwrap();
        std::thread::scope(|scope| {
            for t in 0..4 {
                let dir = dir.path();
                scope.spawn(move || {
                    for i in 0..10 {
                        Session::update(dir, |s| {
                            s.add_source(SourceId::generate(), format!("t{t} #{i}"));
                            Ok(())
                        })
                        .unwrap();
                    }
                });
            }
        });
        assert_eq!(Session::load(dir.path()).unwrap().sources().len(), 40);
    }
}
