//! Lifecycle of one persisted store: load it if it exists, build it if it doesn't,
//! rebuild it on request, and hand out retrievers over it.
//!
//! Each manager owns its [VectorStore]; there is no process-wide cache. Nothing
//! coordinates two processes rebuilding the same store at once.

use std::path::PathBuf;

use crate::config::{ConfigError, StoreConfig};
use crate::embeddings::Embedder;
use crate::index::{build_index, BuildError, BuildReport};
use crate::retriever::Retriever;
use crate::store::{index_exists, LoadError, VectorStore};

pub struct VectorStoreManager<E> {
    config: StoreConfig,
    embedder: E,
    store: Option<VectorStore>,
    last_build: Option<BuildReport>,
}

impl<E: Embedder> VectorStoreManager<E> {
    /// Validates `config`. Does not touch the filesystem.
    pub fn new(config: StoreConfig, embedder: E) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            config,
            embedder,
            store: None,
            last_build: None,
        })
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn embedder(&self) -> &E {
        &self.embedder
    }

    /// `<db_path>/<db_name>`.
    pub fn index_path(&self) -> PathBuf {
        self.config.index_path()
    }

    pub fn index_exists(&self) -> bool {
        index_exists(&self.index_path())
    }

    /// Report of the last build this manager ran, if any.
    pub fn last_build(&self) -> Option<&BuildReport> {
        self.last_build.as_ref()
    }

    /// The store, loading it from disk or building it from the knowledge folder on first use.
    pub fn load_vectordb(&mut self) -> Result<&VectorStore, ManagerError> {
        let store = match self.store.take() {
            Some(store) => store,
            None => self.open_or_build()?,
        };
        Ok(self.store.insert(store))
    }

    /// A retriever over the store returning `k` results, or the configured default.
    pub fn load_retriever(&mut self, k: Option<usize>) -> Result<Retriever<'_, E>, ManagerError> {
        let k = k.unwrap_or(self.config.k());
        if k == 0 {
            return Err(ManagerError::InvalidK);
        }
        let store = match self.store.take() {
            Some(store) => store,
            None => self.open_or_build()?,
        };
        let store = &*self.store.insert(store);
        Ok(Retriever::new(store, &self.embedder, k))
    }

    /// Rebuild when forced or when nothing is persisted; otherwise keep the existing store.
    /// Without `force_rebuild`, repeated calls never read documents or embed anything
    /// once a store exists.
    pub fn update_vectorstore(&mut self, force_rebuild: bool) -> Result<&VectorStore, ManagerError> {
        let store = if force_rebuild {
            tracing::info!(db = self.config.db_name(), "rebuilding vector store");
            self.rebuild()?
        } else if !self.index_exists() {
            tracing::info!(db = self.config.db_name(), "creating vector store");
            self.rebuild()?
        } else if let Some(store) = self.store.take() {
            tracing::info!(db = self.config.db_name(), "rebuild not requested, keeping loaded store");
            store
        } else {
            tracing::info!(db = self.config.db_name(), "rebuild not requested, using existing store");
            self.load_persisted()?
        };
        Ok(self.store.insert(store))
    }

    fn open_or_build(&mut self) -> Result<VectorStore, ManagerError> {
        if self.index_exists() {
            tracing::info!(db = self.config.db_name(), "loading existing vector store");
            self.load_persisted()
        } else {
            tracing::info!(db = self.config.db_name(), "creating new vector store");
            self.rebuild()
        }
    }

    /// Build from the knowledge folder and persist. On failure the previous
    /// persisted store (and any loaded one) stays as it was.
    fn rebuild(&mut self) -> Result<VectorStore, ManagerError> {
        let (store, report) = build_index(&self.config, &self.embedder)?;
        store.persist(&self.index_path()).map_err(BuildError::from)?;
        tracing::info!(
            db = self.config.db_name(),
            documents = report.documents,
            chunks = report.chunks,
            skipped = report.skipped.len(),
            path = %self.index_path().display(),
            "vector store built"
        );
        self.last_build = Some(report);
        Ok(store)
    }

    fn load_persisted(&self) -> Result<VectorStore, ManagerError> {
        let store = VectorStore::load(&self.index_path())?;
        let manifest = store.manifest();
        if manifest.embedding_model != self.embedder.model_name() {
            return Err(LoadError::ModelMismatch {
                stored: manifest.embedding_model.clone(),
                current: self.embedder.model_name().to_string(),
            }
            .into());
        }
        if manifest.chunk_size != self.config.chunk_size()
            || manifest.chunk_overlap != self.config.chunk_overlap()
        {
            tracing::warn!(
                db = self.config.db_name(),
                stored_chunk_size = manifest.chunk_size,
                stored_chunk_overlap = manifest.chunk_overlap,
                chunk_size = self.config.chunk_size(),
                chunk_overlap = self.config.chunk_overlap(),
                "store was built with different chunking; rebuild to apply the new settings"
            );
        }
        tracing::debug!(entries = store.len(), dimension = store.dimension(), "loaded vector store");
        Ok(store)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ManagerError {
    #[error("build failed: {0}")]
    Build(#[from] BuildError),
    #[error("load failed: {0}")]
    Load(#[from] LoadError),
    #[error("k must be greater than zero")]
    InvalidK,
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;
    use crate::embeddings::testing::LetterEmbedder;
    use crate::store::MANIFEST_FILE;

    struct Fixture {
        _dir: tempfile::TempDir,
        docs: PathBuf,
        stores: PathBuf,
    }

    /// One document that splits into exactly two chunks at size 16 / overlap 5.
    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let docs = dir.path().join("docs");
        let stores = dir.path().join("vectorstores");
        fs::create_dir_all(&docs).unwrap();
        fs::write(docs.join("zemsta.txt"), "alpha beta gamma delta").unwrap();
        Fixture {
            _dir: dir,
            docs,
            stores,
        }
    }

    fn config(f: &Fixture) -> StoreConfig {
        StoreConfig::new(&f.docs, "zemsta", &f.stores)
            .with_chunk_size(16)
            .with_chunk_overlap(5)
    }

    fn manager(f: &Fixture) -> VectorStoreManager<LetterEmbedder> {
        VectorStoreManager::new(config(f), LetterEmbedder::new()).unwrap()
    }

    #[test]
    fn invalid_config_fails_before_any_io() {
        let dir = tempfile::tempdir().unwrap();
        let stores = dir.path().join("never-created");
        let config = StoreConfig::new(dir.path().join("missing"), "kb", &stores)
            .with_chunk_size(100)
            .with_chunk_overlap(100);
        let err = VectorStoreManager::new(config, LetterEmbedder::new()).err().unwrap();
        assert!(matches!(err, ConfigError::OverlapTooLarge { .. }));
        assert!(!stores.exists());
    }

    #[test]
    fn load_vectordb_builds_two_chunk_document() {
        let f = fixture();
        let mut m = manager(&f);
        assert!(!m.index_exists());

        let store = m.load_vectordb().unwrap();
        assert_eq!(store.len(), 2);
        let texts: Vec<_> = store.chunks().map(|c| c.text.as_str()).collect();
        assert_eq!(texts, vec!["alpha beta gamma", "gamma delta"]);
        assert!(m.index_exists());
        assert!(m.index_path().join(MANIFEST_FILE).is_file());
        assert_eq!(m.last_build().unwrap().chunks, 2);

        let hits = m.load_retriever(Some(1)).unwrap().retrieve("gamma").unwrap();
        assert_eq!(hits.len(), 1);
    }

    #[test]
    fn retriever_defaults_to_configured_k() {
        let f = fixture();
        let mut m = VectorStoreManager::new(config(&f).with_k(1), LetterEmbedder::new()).unwrap();
        let retriever = m.load_retriever(None).unwrap();
        assert_eq!(retriever.k(), 1);
        assert_eq!(retriever.retrieve("delta").unwrap().len(), 1);
        assert!(matches!(m.load_retriever(Some(0)), Err(ManagerError::InvalidK)));
    }

    #[test]
    fn repeated_updates_embed_only_once() {
        let f = fixture();
        let mut m = manager(&f);
        m.update_vectorstore(false).unwrap();
        m.update_vectorstore(false).unwrap();
        m.load_vectordb().unwrap();
        assert_eq!(m.embedder().document_calls(), 1);

        // A fresh manager over the same path only loads.
        let mut other = manager(&f);
        assert_eq!(other.update_vectorstore(false).unwrap().len(), 2);
        other.update_vectorstore(false).unwrap();
        assert_eq!(other.embedder().document_calls(), 0);
        assert!(other.last_build().is_none());
    }

    #[test]
    fn force_rebuild_always_rebuilds() {
        let f = fixture();
        let mut m = manager(&f);
        m.update_vectorstore(false).unwrap();
        fs::write(f.docs.join("more.md"), "epsilon").unwrap();

        assert_eq!(m.update_vectorstore(false).unwrap().len(), 2);
        assert_eq!(m.update_vectorstore(true).unwrap().len(), 3);
        assert_eq!(m.update_vectorstore(true).unwrap().len(), 3);
        assert_eq!(m.embedder().document_calls(), 3);

        let mut other = manager(&f);
        assert_eq!(other.load_vectordb().unwrap().len(), 3);
    }

    #[test]
    fn no_documents_is_a_build_error_and_leaves_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let docs = dir.path().join("docs");
        fs::create_dir_all(&docs).unwrap();
        fs::write(docs.join("scan.pdf"), "%PDF").unwrap();
        let stores = dir.path().join("vectorstores");
        let mut m = VectorStoreManager::new(StoreConfig::new(&docs, "kb", &stores), LetterEmbedder::new()).unwrap();

        let err = m.load_vectordb().unwrap_err();
        assert!(matches!(err, ManagerError::Build(BuildError::NoDocuments { .. })));
        assert!(!m.index_exists());
        assert!(matches!(
            m.update_vectorstore(true),
            Err(ManagerError::Build(BuildError::NoDocuments { .. }))
        ));
        assert!(!m.index_exists());
    }

    #[test]
    fn failed_rebuild_keeps_previous_store() {
        let f = fixture();
        let mut m = manager(&f);
        m.load_vectordb().unwrap();
        fs::remove_file(f.docs.join("zemsta.txt")).unwrap();

        assert!(m.update_vectorstore(true).is_err());
        assert_eq!(m.load_vectordb().unwrap().len(), 2);
        assert_eq!(manager(&f).load_vectordb().unwrap().len(), 2);
    }

    #[test]
    fn embedding_failure_is_a_build_error() {
        let f = fixture();
        let mut m = VectorStoreManager::new(config(&f), LetterEmbedder::failing()).unwrap();
        let err = m.load_vectordb().unwrap_err();
        assert!(matches!(err, ManagerError::Build(BuildError::Embedding(_))));
        assert!(!m.index_exists());
    }

    #[test]
    fn corrupt_store_is_a_load_error() {
        let f = fixture();
        let path = f.stores.join("zemsta");
        fs::create_dir_all(&path).unwrap();
        fs::write(path.join(MANIFEST_FILE), "garbage").unwrap();

        let mut m = manager(&f);
        assert!(matches!(m.load_vectordb(), Err(ManagerError::Load(LoadError::Parse { .. }))));
        assert!(matches!(m.load_retriever(None), Err(ManagerError::Load(_))));
        assert_eq!(m.embedder().document_calls(), 0);
    }

    #[test]
    fn store_from_another_model_is_a_load_error() {
        let f = fixture();
        manager(&f).load_vectordb().unwrap();
        let mut m = VectorStoreManager::new(config(&f), LetterEmbedder::named("letters-v2")).unwrap();
        assert!(matches!(
            m.load_vectordb(),
            Err(ManagerError::Load(LoadError::ModelMismatch { .. }))
        ));
    }

    #[test]
    fn scores_from_loaded_store_are_non_increasing() {
        let f = fixture();
        fs::write(f.docs.join("b.md"), "---\ntitle: B\n---\nPapkin lew Północy").unwrap();
        fs::write(f.docs.join("c.txt"), "Rejent Milczek\n\nCześnik Raptusiewicz").unwrap();
        manager(&f).load_vectordb().unwrap();

        let mut m = manager(&f);
        let hits = m.load_retriever(Some(10)).unwrap().retrieve("Raptusiewicz").unwrap();
        assert!(hits.len() > 2);
        assert!(hits.windows(2).all(|w| w[0].score >= w[1].score));
        assert_eq!(m.embedder().document_calls(), 0);
    }

    #[test]
    fn store_inside_knowledge_folder_is_not_indexed() {
        let f = fixture();
        for db_path in [f.docs.join(".stores"), f.docs.join("stores")] {
            let config = StoreConfig::new(&f.docs, "zemsta", db_path)
                .with_chunk_size(16)
                .with_chunk_overlap(5);
            let mut m = VectorStoreManager::new(config, LetterEmbedder::new()).unwrap();
            m.load_vectordb().unwrap();
            assert_eq!(m.update_vectorstore(true).unwrap().len(), 2);
            assert!(m.index_path().join(MANIFEST_FILE).is_file());
        }
    }

    #[test]
    fn store_spelled_differently_inside_knowledge_folder_is_not_indexed() {
        let f = fixture();
        fs::create_dir_all(f.docs.join("sub")).unwrap();
        let config = StoreConfig::new(&f.docs, "zemsta", f.docs.join("sub/../stores"))
            .with_chunk_size(16)
            .with_chunk_overlap(5);
        let mut m = VectorStoreManager::new(config, LetterEmbedder::new()).unwrap();
        m.load_vectordb().unwrap();
        for _ in 0..2 {
            assert_eq!(m.update_vectorstore(true).unwrap().len(), 2);
        }
        assert!(f.docs.join("stores/zemsta").join(MANIFEST_FILE).is_file());
    }
}
