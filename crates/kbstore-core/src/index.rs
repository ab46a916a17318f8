//! Index pipeline: scan → chunk → embed → store. Builds an in-memory vector store.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::chunks::TextSplitter;
use crate::config::{ConfigError, StoreConfig};
use crate::documents::{scan_documents, ScanError, SkippedFile};
use crate::embeddings::{check_batch, EmbedError, Embedder};
use crate::store::{PersistError, VectorStore};

/// What a build did. Skipped files are the build's recorded warnings.
#[derive(Debug, Clone, Serialize)]
pub struct BuildReport {
    pub documents: usize,
    pub chunks: usize,
    pub skipped: Vec<SkippedFile>,
    pub built_at: DateTime<Utc>,
}

/// Runs the full pipeline for `config`: scan documents, chunk, embed, store in memory.
/// Nothing is written to disk here.
pub fn build_index<E: Embedder + ?Sized>(
    config: &StoreConfig,
    embedder: &E,
) -> Result<(VectorStore, BuildReport), BuildError> {
    let root = config.knowledge_path();
    // The persistence root may live inside the knowledge folder; never index our own output.
    let scan = scan_documents(root, &[config.db_path()])?;
    let splitter = TextSplitter::new(config.chunk_size(), config.chunk_overlap())?;
    let chunks = splitter.split_documents(&scan.documents);

    if chunks.is_empty() {
        return Err(BuildError::NoDocuments {
            path: root.to_path_buf(),
            skipped: scan.skipped.len(),
        });
    }
    tracing::info!(
        documents = scan.documents.len(),
        chunks = chunks.len(),
        skipped = scan.skipped.len(),
        model = embedder.model_name(),
        "embedding chunks"
    );

    let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
    let embeddings = embedder.embed_documents(&texts)?;
    check_batch(texts.len(), &embeddings)?;

    let mut store = VectorStore::new(embedder.model_name(), config.chunk_size(), config.chunk_overlap());
    store.add_batch(chunks, embeddings)?;
    let report = BuildReport {
        documents: scan.documents.len(),
        chunks: store.len(),
        skipped: scan.skipped,
        built_at: store.manifest().built_at,
    };
    Ok((store, report))
}

#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("scan error: {0}")]
    Scan(#[from] ScanError),
    #[error("invalid chunking parameters: {0}")]
    Config(#[from] ConfigError),
    #[error("no documents in {path}: folder is empty or nothing could be loaded ({skipped} file(s) skipped)")]
    NoDocuments { path: PathBuf, skipped: usize },
    #[error("embedding error: {0}")]
    Embedding(#[from] EmbedError),
    #[error("failed to persist store: {0}")]
    Persist(#[from] PersistError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::testing::{LetterEmbedder, DIMENSION};

    fn config(root: &std::path::Path) -> StoreConfig {
        StoreConfig::new(root, "test", root.join("stores"))
            .with_chunk_size(16)
            .with_chunk_overlap(5)
    }

    #[test]
    fn builds_one_entry_per_chunk() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), "alpha beta gamma delta").unwrap();
        std::fs::write(dir.path().join("b.md"), "epsilon").unwrap();
        std::fs::write(dir.path().join("c.bin"), "??").unwrap();
        let embedder = LetterEmbedder::new();

        let (store, report) = build_index(&config(dir.path()), &embedder).unwrap();
        assert_eq!(store.len(), 3);
        assert_eq!(store.dimension(), DIMENSION);
        assert_eq!(store.manifest().embedding_model, "letters-v1");
        assert_eq!(report.documents, 2);
        assert_eq!(report.chunks, 3);
        assert_eq!(report.skipped.len(), 1);
        assert_eq!(embedder.document_calls(), 1);
        assert_eq!(embedder.texts_embedded(), 3);
    }

    #[test]
    fn empty_folder_is_a_build_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("unsupported.xyz"), "data").unwrap();
        let embedder = LetterEmbedder::new();
        let err = build_index(&config(dir.path()), &embedder).unwrap_err();
        assert!(matches!(err, BuildError::NoDocuments { skipped: 1, .. }));
        assert_eq!(embedder.document_calls(), 0);
    }

    #[test]
    fn embedding_failure_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), "alpha").unwrap();
        let err = build_index(&config(dir.path()), &LetterEmbedder::failing()).unwrap_err();
        assert!(matches!(err, BuildError::Embedding(EmbedError::Backend(_))));
    }

    #[test]
    fn missing_knowledge_path_is_a_scan_error() {
        let dir = tempfile::tempdir().unwrap();
        let c = config(&dir.path().join("missing"));
        let err = build_index(&c, &LetterEmbedder::new()).unwrap_err();
        assert!(matches!(err, BuildError::Scan(ScanError::NotADirectory(_))));
    }
}
