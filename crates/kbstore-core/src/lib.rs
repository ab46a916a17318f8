//! All backend logic independent of how stores are driven (CLI or library use).
//!
//! A store is built from a knowledge folder (load → chunk → embed), persisted
//! under `<db_path>/<db_name>/`, and queried through a [Retriever]. The
//! [VectorStoreManager] decides whether to load a persisted store or build one.

pub mod app_data;
pub mod chunks;
pub mod config;
pub mod documents;
pub mod embeddings;
pub mod index;
pub mod manager;
pub mod ollama;
pub mod retriever;
pub mod store;
pub mod watcher;

pub use app_data::{app_data_dir, default_db_path};
pub use chunks::{Chunk, TextSplitter};
pub use config::{
    default_settings_path, load_default_settings, load_settings, save_settings, save_settings_to,
    ConfigError, OllamaSettings, Settings, StoreConfig,
};
pub use documents::{load_document, scan_documents, Document, DocumentError, ScanError, SkippedFile};
pub use embeddings::{EmbedError, Embedder};
pub use index::{build_index, BuildError, BuildReport};
pub use manager::{ManagerError, VectorStoreManager};
pub use ollama::{OllamaEmbedder, OllamaError};
pub use retriever::{RetrieveError, Retriever};
pub use store::{LoadError, Manifest, PersistError, ScoredChunk, VectorStore};
pub use watcher::{watch_sources, WatchError};
