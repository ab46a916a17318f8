//! Ollama-backed [Embedder]. Wraps ollama-rs behind a blocking API.
//!
//! ollama-rs is async; each embedder owns a current-thread tokio runtime and
//! blocks on it, so callers stay synchronous and single-threaded.

use ollama_rs::generation::embeddings::request::{EmbeddingsInput, GenerateEmbeddingsRequest};
use ollama_rs::Ollama;
use thiserror::Error;
use tokio::runtime::Runtime;

use crate::embeddings::{check_batch, EmbedError, Embedder};

pub const DEFAULT_EMBED_MODEL: &str = "nomic-embed-text";
pub const DEFAULT_BASE_URL: &str = "http://localhost:11434";
/// Texts per embeddings request.
pub const DEFAULT_BATCH_SIZE: usize = 32;

#[derive(Debug)]
pub struct OllamaEmbedder {
    inner: Ollama,
    embed_model: String,
    batch_size: usize,
    runtime: Runtime,
}

impl OllamaEmbedder {
    /// Create from URL string, e.g. `http://localhost:11434`.
    pub fn from_url(url: &str) -> Result<Self, OllamaError> {
        let inner = Ollama::try_new(url).map_err(OllamaError::ParseUrl)?;
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(OllamaError::Runtime)?;
        Ok(Self {
            inner,
            embed_model: DEFAULT_EMBED_MODEL.to_string(),
            batch_size: DEFAULT_BATCH_SIZE,
            runtime,
        })
    }

    /// Create against the default localhost:11434.
    pub fn local() -> Result<Self, OllamaError> {
        Self::from_url(DEFAULT_BASE_URL)
    }

    /// Set the embedding model (e.g. `nomic-embed-text`, `all-minilm`).
    pub fn with_embed_model(mut self, model: impl Into<String>) -> Self {
        self.embed_model = model.into();
        self
    }

    /// Set how many texts go into one request. Zero is treated as one.
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    fn request(&self, input: EmbeddingsInput) -> Result<Vec<Vec<f32>>, OllamaError> {
        let req = GenerateEmbeddingsRequest::new(self.embed_model.clone(), input);
        let res = self
            .runtime
            .block_on(self.inner.generate_embeddings(req))
            .map_err(OllamaError::Request)?;
        Ok(res.embeddings)
    }
}

impl Embedder for OllamaEmbedder {
    fn model_name(&self) -> &str {
        &self.embed_model
    }

    fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
        let mut vectors = Vec::with_capacity(texts.len());
        for (n, batch) in texts.chunks(self.batch_size).enumerate() {
            tracing::debug!(batch = n, size = batch.len(), model = %self.embed_model, "embedding batch");
            let embedded = self.request(EmbeddingsInput::Multiple(batch.to_vec()))?;
            check_batch(batch.len(), &embedded)?;
            vectors.extend(embedded);
        }
        check_batch(texts.len(), &vectors)?;
        Ok(vectors)
    }

    fn embed_query(&self, text: &str) -> Result<Vec<f32>, EmbedError> {
        let mut vectors = self.request(EmbeddingsInput::Single(text.to_string()))?;
        check_batch(1, &vectors)?;
        vectors.pop().ok_or(EmbedError::CountMismatch {
            expected: 1,
            actual: 0,
        })
    }
}

#[derive(Debug, Error)]
pub enum OllamaError {
    #[error("invalid Ollama URL: {0}")]
    ParseUrl(#[from] url::ParseError),
    #[error("failed to start runtime: {0}")]
    Runtime(std::io::Error),
    #[error("Ollama request failed: {0}")]
    Request(#[from] ollama_rs::error::OllamaError),
}

impl From<OllamaError> for EmbedError {
    fn from(e: OllamaError) -> Self {
        EmbedError::Backend(e.to_string())
    }
}
