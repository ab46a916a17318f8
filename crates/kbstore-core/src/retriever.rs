//! Query-time view over a [VectorStore]: embed the query, return the top k chunks.

use crate::embeddings::{EmbedError, Embedder};
use crate::store::{ScoredChunk, VectorStore};

/// Borrows a store and the embedder that built it. Cheap to create; many can coexist.
pub struct Retriever<'a, E: ?Sized> {
    store: &'a VectorStore,
    embedder: &'a E,
    k: usize,
}

impl<E: ?Sized> Clone for Retriever<'_, E> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<E: ?Sized> Copy for Retriever<'_, E> {}

impl<'a, E: Embedder + ?Sized> Retriever<'a, E> {
    pub fn new(store: &'a VectorStore, embedder: &'a E, k: usize) -> Self {
        Self { store, embedder, k }
    }

    pub fn k(&self) -> usize {
        self.k
    }

    /// The same view with a different result count.
    pub fn with_k(self, k: usize) -> Self {
        Self { k, ..self }
    }

    /// At most `k` chunks, most similar first.
    pub fn retrieve(&self, query: &str) -> Result<Vec<ScoredChunk>, RetrieveError> {
        let query_embedding = self.embedder.embed_query(query)?;
        let expected = self.store.dimension();
        if expected != 0 && query_embedding.len() != expected {
            return Err(RetrieveError::DimensionMismatch {
                expected,
                actual: query_embedding.len(),
            });
        }
        let hits = self.store.search(&query_embedding, self.k);
        tracing::debug!(k = self.k, hits = hits.len(), "retrieved chunks");
        Ok(hits)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RetrieveError {
    #[error("failed to embed query: {0}")]
    Embedding(#[from] EmbedError),
    #[error("query embedding has dimension {actual}, store expects {expected}")]
    DimensionMismatch { expected: usize, actual: usize },
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::path::PathBuf;

    use super::*;
    use crate::chunks::Chunk;
    use crate::embeddings::testing::LetterEmbedder;

    fn store(embedder: &LetterEmbedder, texts: &[&str]) -> VectorStore {
        let chunks: Vec<Chunk> = texts
            .iter()
            .enumerate()
            .map(|(index, t)| Chunk {
                text: t.to_string(),
                source: PathBuf::from("kb.txt"),
                index,
                metadata: BTreeMap::new(),
            })
            .collect();
        let owned: Vec<String> = texts.iter().map(|t| t.to_string()).collect();
        let mut store = VectorStore::new(embedder.model_name(), 100, 0);
        store
            .add_batch(chunks, embedder.embed_documents(&owned).unwrap())
            .unwrap();
        store
    }

    #[test]
    fn returns_at_most_k_best_first() {
        let embedder = LetterEmbedder::new();
        let store = store(&embedder, &["zzz zzz", "aaa bbb", "abc abc", "xyz"]);
        let retriever = Retriever::new(&store, &embedder, 2);
        let hits = retriever.retrieve("aaaa").unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].chunk.text, "aaa bbb");
        assert!(hits[0].score >= hits[1].score);

        let all = retriever.with_k(10).retrieve("aaaa").unwrap();
        assert_eq!(all.len(), 4);
        assert!(all.windows(2).all(|w| w[0].score >= w[1].score));
    }

    #[test]
    fn several_retrievers_share_one_store() {
        let embedder = LetterEmbedder::new();
        let store = store(&embedder, &["one", "two", "three"]);
        let a = Retriever::new(&store, &embedder, 1);
        let b = Retriever::new(&store, &embedder, 3);
        assert_eq!(a.retrieve("two").unwrap().len(), 1);
        assert_eq!(b.retrieve("two").unwrap().len(), 3);
        assert_eq!(store.len(), 3);
    }

    #[test]
    fn embedding_errors_surface() {
        let embedder = LetterEmbedder::new();
        let store = store(&embedder, &["one"]);
        let failing = LetterEmbedder::failing();
        let err = Retriever::new(&store, &failing, 1).retrieve("x").unwrap_err();
        assert!(matches!(err, RetrieveError::Embedding(_)));
    }

    #[test]
    fn dimension_mismatch_is_reported() {
        let embedder = LetterEmbedder::new();
        let mut small = VectorStore::new("tiny", 10, 0);
        small
            .add(
                Chunk {
                    text: "t".into(),
                    source: PathBuf::from("t.txt"),
                    index: 0,
                    metadata: BTreeMap::new(),
                },
                vec![1.0, 0.0],
            )
            .unwrap();
        let err = Retriever::new(&small, &embedder, 1).retrieve("t").unwrap_err();
        assert!(matches!(err, RetrieveError::DimensionMismatch { expected: 2, .. }));
    }
}
