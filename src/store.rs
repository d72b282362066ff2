//! Embeddings snapshot persistence.

use std::collections::HashSet;
use std::fmt;
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// One refresh generation: ids and their vectors, row i pairing with ids\[i\].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    /// Page ids, unique within the snapshot.
    pub ids: Vec<String>,
    /// Embedding matrix; every row shares one dimension.
    pub vectors: Vec<Vec<f32>>,
}

/// Errors surfaced by snapshot reads and writes.
#[derive(Debug)]
pub enum StoreError {
    /// No snapshot has been written yet. Distinct from an empty snapshot so
    /// callers can tell "no data yet" from "empty index".
    NotFound(PathBuf),
    /// The snapshot file exists but does not parse or fails validation.
    Corrupt {
        /// Snapshot path.
        path: PathBuf,
        /// What was wrong with it.
        message: String,
    },
    /// The ids/vectors being saved are inconsistent.
    Invalid(String),
    /// Underlying filesystem failure.
    Io {
        /// Snapshot path.
        path: PathBuf,
        /// Source error.
        source: io::Error,
    },
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound(path) => write!(f, "embeddings file not found: {}", path.display()),
            Self::Corrupt { path, message } => {
                write!(f, "corrupt embeddings file {}: {message}", path.display())
            }
            Self::Invalid(message) => write!(f, "invalid snapshot: {message}"),
            Self::Io { path, source } => {
                write!(f, "embeddings io error on {}: {source}", path.display())
            }
        }
    }
}

impl std::error::Error for StoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io { source, .. } => Some(source),
            _ => None,
        }
    }
}

/// File-backed store holding the latest embeddings snapshot.
#[derive(Debug, Clone)]
pub struct EmbeddingStore {
    path: PathBuf,
}

impl EmbeddingStore {
    /// Creates a store persisting to the given path.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Snapshot file location.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Replaces the persisted snapshot with `ids` + `vectors`.
    ///
    /// The write goes to a sibling temp file first and is renamed over the
    /// target, so a reader only ever observes a complete generation and a
    /// crash mid-write leaves the previous snapshot intact.
    pub fn save(&self, ids: Vec<String>, vectors: Vec<Vec<f32>>) -> Result<(), StoreError> {
        validate(&ids, &vectors).map_err(StoreError::Invalid)?;
        let snapshot = Snapshot { ids, vectors };

        let tmp_path = self.tmp_path();
        if let Some(parent) = tmp_path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|source| StoreError::Io {
                    path: tmp_path.clone(),
                    source,
                })?;
            }
        }
        let io_err = |source| StoreError::Io {
            path: tmp_path.clone(),
            source,
        };
        let file = File::create(&tmp_path).map_err(io_err)?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer(&mut writer, &snapshot).map_err(|err| StoreError::Io {
            path: tmp_path.clone(),
            source: io::Error::other(err),
        })?;
        writer.flush().map_err(io_err)?;
        writer.into_inner().map_err(|err| io_err(err.into_error()))?.sync_all().map_err(io_err)?;
        fs::rename(&tmp_path, &self.path).map_err(|source| StoreError::Io {
            path: self.path.clone(),
            source,
        })
    }

    /// Loads the persisted snapshot, or `NotFound` when none exists yet.
    pub fn load(&self) -> Result<(Vec<String>, Vec<Vec<f32>>), StoreError> {
        let file = match File::open(&self.path) {
            Ok(file) => file,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                return Err(StoreError::NotFound(self.path.clone()));
            }
            Err(source) => {
                return Err(StoreError::Io {
                    path: self.path.clone(),
                    source,
                });
            }
        };
        let snapshot: Snapshot =
            serde_json::from_reader(BufReader::new(file)).map_err(|err| StoreError::Corrupt {
                path: self.path.clone(),
                message: err.to_string(),
            })?;
        validate(&snapshot.ids, &snapshot.vectors).map_err(|message| StoreError::Corrupt {
            path: self.path.clone(),
            message,
        })?;
        Ok((snapshot.ids, snapshot.vectors))
    }

    fn tmp_path(&self) -> PathBuf {
        let mut name = self.path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

fn validate(ids: &[String], vectors: &[Vec<f32>]) -> Result<(), String> {
    if ids.len() != vectors.len() {
        return Err(format!(
            "{} ids paired with {} vectors",
            ids.len(),
            vectors.len()
        ));
    }
    if let Some(first) = vectors.first() {
        let dimension = first.len();
        if dimension == 0 {
            return Err("zero-dimension vectors".to_string());
        }
        for (row, vector) in vectors.iter().enumerate() {
            if vector.len() != dimension {
                return Err(format!(
                    "row {row} has dimension {} but the snapshot uses {dimension}",
                    vector.len()
                ));
            }
        }
    }
    let mut seen = HashSet::with_capacity(ids.len());
    for id in ids {
        if !seen.insert(id.as_str()) {
            return Err(format!("duplicate page id {id:?}"));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn save_then_load_round_trips() {
        let dir = tempdir().expect("tempdir");
        let store = EmbeddingStore::new(dir.path().join("embeddings.json"));
        let ids = vec!["101".to_string(), "102".to_string()];
        let vectors = vec![vec![1.0, 0.0, 0.5], vec![0.0, 2.0, -1.0]];

        store.save(ids.clone(), vectors.clone()).expect("save");
        let (loaded_ids, loaded_vectors) = store.load().expect("load");
        assert_eq!(loaded_ids, ids);
        assert_eq!(loaded_vectors, vectors);
    }

    #[test]
    fn missing_file_is_not_found() {
        let dir = tempdir().expect("tempdir");
        let store = EmbeddingStore::new(dir.path().join("absent.json"));
        match store.load() {
            Err(StoreError::NotFound(path)) => assert!(path.ends_with("absent.json")),
            other => panic!("expected NotFound, got {other:?}"),
        }
    }

    #[test]
    fn rejects_mismatched_lengths_and_ragged_rows() {
        let dir = tempdir().expect("tempdir");
        let store = EmbeddingStore::new(dir.path().join("embeddings.json"));

        let err = store
            .save(vec!["1".to_string()], vec![])
            .expect_err("length mismatch");
        assert!(matches!(err, StoreError::Invalid(_)));

        let err = store
            .save(
                vec!["1".to_string(), "2".to_string()],
                vec![vec![1.0, 2.0], vec![3.0]],
            )
            .expect_err("ragged rows");
        assert!(matches!(err, StoreError::Invalid(_)));

        let err = store
            .save(
                vec!["1".to_string(), "1".to_string()],
                vec![vec![1.0], vec![2.0]],
            )
            .expect_err("duplicate ids");
        assert!(matches!(err, StoreError::Invalid(_)));
    }

    #[test]
    fn corrupt_file_is_reported_as_corrupt() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("embeddings.json");
        fs::write(&path, "not json at all").expect("write");
        let store = EmbeddingStore::new(&path);
        assert!(matches!(store.load(), Err(StoreError::Corrupt { .. })));
    }

    #[test]
    fn save_replaces_previous_generation_whole() {
        let dir = tempdir().expect("tempdir");
        let store = EmbeddingStore::new(dir.path().join("embeddings.json"));
        store
            .save(vec!["1".to_string()], vec![vec![1.0, 0.0]])
            .expect("first save");
        store
            .save(vec!["9".to_string()], vec![vec![0.0, 1.0]])
            .expect("second save");
        let (ids, vectors) = store.load().expect("load");
        assert_eq!(ids, vec!["9".to_string()]);
        assert_eq!(vectors, vec![vec![0.0, 1.0]]);
        assert!(!store.tmp_path().exists());
    }
}
