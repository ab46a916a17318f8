//! Vector store for chunk embeddings: add, exact cosine search, persist and load.
//!
//! On disk a store is a directory holding two JSON files:
//!
//! - `manifest.json`: format version, embedding model, dimension, entry count,
//!   chunking parameters and build time.
//! - `entries.json`: every chunk with its normalized embedding.
//!
//! [VectorStore::persist] writes into a hidden staging directory next to the
//! target and renames it into place, so a failed write never clobbers the
//! previous store.

use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::chunks::Chunk;
use crate::embeddings::EmbedError;

pub const FORMAT_VERSION: u32 = 1;
pub const MANIFEST_FILE: &str = "manifest.json";
pub const ENTRIES_FILE: &str = "entries.json";

/// Describes a persisted store. Checked against the entries on load.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    pub format_version: u32,
    pub embedding_model: String,
    pub dimension: usize,
    pub entry_count: usize,
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub built_at: DateTime<Utc>,
}

/// A chunk with its embedding, stored for similarity search.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct IndexedChunk {
    chunk: Chunk,
    /// Normalized embedding vector (unit length for cosine similarity via dot product).
    embedding: Vec<f32>,
}

/// A search hit. Higher score means more similar (cosine similarity).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoredChunk {
    pub chunk: Chunk,
    pub score: f32,
}

/// Holds chunks and their embeddings; supports similarity search.
#[derive(Debug, Clone)]
pub struct VectorStore {
    manifest: Manifest,
    items: Vec<IndexedChunk>,
}

impl VectorStore {
    /// An empty store. The dimension is fixed by the first embedding added.
    pub fn new(embedding_model: impl Into<String>, chunk_size: usize, chunk_overlap: usize) -> Self {
        Self {
            manifest: Manifest {
                format_version: FORMAT_VERSION,
                embedding_model: embedding_model.into(),
                dimension: 0,
                entry_count: 0,
                chunk_size,
                chunk_overlap,
                built_at: Utc::now(),
            },
            items: Vec::new(),
        }
    }

    /// Add a chunk with its embedding. Embedding is normalized before storage.
    pub fn add(&mut self, chunk: Chunk, embedding: Vec<f32>) -> Result<(), EmbedError> {
        if embedding.is_empty() {
            return Err(EmbedError::EmptyVector);
        }
        if self.manifest.dimension == 0 {
            self.manifest.dimension = embedding.len();
        } else if embedding.len() != self.manifest.dimension {
            return Err(EmbedError::InconsistentDimension {
                expected: self.manifest.dimension,
                actual: embedding.len(),
            });
        }
        self.items.push(IndexedChunk {
            chunk,
            embedding: normalize(&embedding),
        });
        self.manifest.entry_count = self.items.len();
        Ok(())
    }

    /// Add multiple chunks with embeddings in one batch.
    pub fn add_batch(&mut self, chunks: Vec<Chunk>, embeddings: Vec<Vec<f32>>) -> Result<(), EmbedError> {
        if chunks.len() != embeddings.len() {
            return Err(EmbedError::CountMismatch {
                expected: chunks.len(),
                actual: embeddings.len(),
            });
        }
        for (chunk, embedding) in chunks.into_iter().zip(embeddings) {
            self.add(chunk, embedding)?;
        }
        Ok(())
    }

    /// Search for chunks most similar to the query embedding. Returns up to k results,
    /// highest score first.
    pub fn search(&self, query_embedding: &[f32], k: usize) -> Vec<ScoredChunk> {
        if self.items.is_empty() || query_embedding.is_empty() || k == 0 {
            return Vec::new();
        }
        let q_norm = normalize(query_embedding);
        let mut scored: Vec<ScoredChunk> = self
            .items
            .iter()
            .map(|ic| ScoredChunk {
                chunk: ic.chunk.clone(),
                score: dot(&q_norm, &ic.embedding),
            })
            .collect();
        scored.sort_by(|a, b| b.score.total_cmp(&a.score));
        scored.truncate(k);
        scored
    }

    /// Number of indexed chunks.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Embedding dimension, 0 while empty.
    pub fn dimension(&self) -> usize {
        self.manifest.dimension
    }

    pub fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    pub fn chunks(&self) -> impl Iterator<Item = &Chunk> {
        self.items.iter().map(|ic| &ic.chunk)
    }

    /// Write the store to `dir`, replacing whatever is there only once the new files are complete.
    pub fn persist(&self, dir: &Path) -> Result<(), PersistError> {
        let name = dir
            .file_name()
            .ok_or_else(|| PersistError::InvalidPath(dir.to_path_buf()))?
            .to_string_lossy()
            .into_owned();
        let parent = dir
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        fs::create_dir_all(parent).map_err(io_error(parent))?;

        let staging = parent.join(format!(".{name}.staging-{}", std::process::id()));
        remove_dir_if_exists(&staging)?;
        fs::create_dir(&staging).map_err(io_error(&staging))?;

        let result = self
            .write_files(&staging)
            .and_then(|()| swap_into_place(&staging, dir, parent, &name));
        if result.is_err() {
            let _ = fs::remove_dir_all(&staging);
        }
        result?;
        tracing::debug!(path = %dir.display(), entries = self.len(), "persisted vector store");
        Ok(())
    }

    fn write_files(&self, dir: &Path) -> Result<(), PersistError> {
        write_json(&dir.join(MANIFEST_FILE), &self.manifest)?;
        write_json(&dir.join(ENTRIES_FILE), &self.items)
    }

    /// Read a store written by [VectorStore::persist], verifying it is complete and consistent.
    pub fn load(dir: &Path) -> Result<Self, LoadError> {
        if !dir.is_dir() {
            return Err(LoadError::NotFound(dir.to_path_buf()));
        }
        let manifest: Manifest = read_json(&dir.join(MANIFEST_FILE))?;
        if manifest.format_version != FORMAT_VERSION {
            return Err(LoadError::UnsupportedVersion {
                found: manifest.format_version,
                expected: FORMAT_VERSION,
            });
        }
        let items: Vec<IndexedChunk> = read_json(&dir.join(ENTRIES_FILE))?;
        if items.len() != manifest.entry_count {
            return Err(LoadError::CountMismatch {
                expected: manifest.entry_count,
                actual: items.len(),
            });
        }
        if let Some((entry, item)) = items
            .iter()
            .enumerate()
            .find(|(_, ic)| ic.embedding.len() != manifest.dimension || ic.embedding.is_empty())
        {
            return Err(LoadError::DimensionMismatch {
                entry,
                expected: manifest.dimension,
                actual: item.embedding.len(),
            });
        }
        Ok(Self { manifest, items })
    }
}

/// Whether something is present at the store location. A directory with
/// missing or broken files still counts; loading it reports the problem.
pub fn index_exists(dir: &Path) -> bool {
    dir.exists()
}

fn swap_into_place(staging: &Path, dir: &Path, parent: &Path, name: &str) -> Result<(), PersistError> {
    if !dir.exists() {
        return fs::rename(staging, dir).map_err(io_error(dir));
    }
    let previous = parent.join(format!(".{name}.previous-{}", std::process::id()));
    remove_dir_if_exists(&previous)?;
    fs::rename(dir, &previous).map_err(io_error(dir))?;
    if let Err(e) = fs::rename(staging, dir) {
        let _ = fs::rename(&previous, dir);
        return Err(PersistError::Io {
            path: dir.to_path_buf(),
            source: e,
        });
    }
    if let Err(e) = fs::remove_dir_all(&previous) {
        tracing::warn!(path = %previous.display(), error = %e, "could not remove previous store");
    }
    Ok(())
}

fn remove_dir_if_exists(path: &Path) -> Result<(), PersistError> {
    if path.exists() {
        fs::remove_dir_all(path).map_err(io_error(path))?;
    }
    Ok(())
}

fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<(), PersistError> {
    let file = File::create(path).map_err(io_error(path))?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer(&mut writer, value).map_err(PersistError::Serialize)?;
    writer.flush().map_err(io_error(path))?;
    writer.get_ref().sync_all().map_err(io_error(path))
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, LoadError> {
    if !path.is_file() {
        return Err(LoadError::MissingFile(path.to_path_buf()));
    }
    let file = File::open(path).map_err(|source| LoadError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_reader(BufReader::new(file)).map_err(|source| LoadError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> PersistError + '_ {
    move |source| PersistError::Io {
        path: path.to_path_buf(),
        source,
    }
}

fn normalize(v: &[f32]) -> Vec<f32> {
    let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm <= 0.0 {
        return v.to_vec();
    }
    v.iter().map(|x| x / norm).collect()
}

fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

#[derive(Debug, thiserror::Error)]
pub enum PersistError {
    #[error("cannot persist to {0}: path has no final component")]
    InvalidPath(PathBuf),
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to serialize store: {0}")]
    Serialize(serde_json::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("no persisted store at {0}")]
    NotFound(PathBuf),
    #[error("persisted store is missing {0}")]
    MissingFile(PathBuf),
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("unsupported store format version {found} (expected {expected})")]
    UnsupportedVersion { found: u32, expected: u32 },
    #[error("manifest lists {expected} entries but {actual} were stored")]
    CountMismatch { expected: usize, actual: usize },
    #[error("entry {entry} has dimension {actual}, manifest says {expected}")]
    DimensionMismatch {
        entry: usize,
        expected: usize,
        actual: usize,
    },
    #[error("store was built with embedding model {stored:?}, current model is {current:?}")]
    ModelMismatch { stored: String, current: String },
}
