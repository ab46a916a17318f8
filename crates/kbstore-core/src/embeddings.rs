//! The embedding seam. Index builds and queries only see this trait; the
//! Ollama-backed implementation lives in [crate::ollama].

/// Maps text to fixed-dimension vectors.
///
/// Implementations return one vector per input, all of the same dimension.
pub trait Embedder {
    /// Identifies the model. Persisted with the index and checked on load.
    fn model_name(&self) -> &str;

    /// Embed chunk texts for indexing.
    fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError>;

    /// Embed a search query. Defaults to embedding it like a document.
    fn embed_query(&self, text: &str) -> Result<Vec<f32>, EmbedError> {
        let mut vectors = self.embed_documents(&[text.to_string()])?;
        check_batch(1, &vectors)?;
        vectors.pop().ok_or(EmbedError::CountMismatch {
            expected: 1,
            actual: 0,
        })
    }
}

/// Checks that `vectors` has one non-empty vector per input and a single dimension.
/// Returns that dimension (0 for an empty batch).
pub fn check_batch(expected: usize, vectors: &[Vec<f32>]) -> Result<usize, EmbedError> {
    if vectors.len() != expected {
        return Err(EmbedError::CountMismatch {
            expected,
            actual: vectors.len(),
        });
    }
    let Some(first) = vectors.first() else {
        return Ok(0);
    };
    let dimension = first.len();
    if dimension == 0 {
        return Err(EmbedError::EmptyVector);
    }
    if let Some(bad) = vectors.iter().find(|v| v.len() != dimension) {
        return Err(EmbedError::InconsistentDimension {
            expected: dimension,
            actual: bad.len(),
        });
    }
    Ok(dimension)
}

#[derive(Debug, thiserror::Error)]
pub enum EmbedError {
    #[error("embedding backend failed: {0}")]
    Backend(String),
    #[error("expected {expected} embeddings, got {actual}")]
    CountMismatch { expected: usize, actual: usize },
    #[error("embedding dimension mismatch: expected {expected}, got {actual}")]
    InconsistentDimension { expected: usize, actual: usize },
    #[error("embedding backend returned an empty vector")]
    EmptyVector,
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn check_batch_accepts_consistent_vectors() {
        assert_eq!(check_batch(2, &[vec![1.0, 0.0], vec![0.0, 1.0]]).unwrap(), 2);
        assert_eq!(check_batch(0, &[]).unwrap(), 0);
    }

    #[test]
    fn check_batch_rejects_bad_batches() {
        assert!(matches!(
            check_batch(3, &[vec![1.0]]),
            Err(EmbedError::CountMismatch { expected: 3, actual: 1 })
        ));
        assert!(matches!(
            check_batch(2, &[vec![1.0, 2.0], vec![1.0]]),
            Err(EmbedError::InconsistentDimension { expected: 2, actual: 1 })
        ));
        assert!(matches!(check_batch(1, &[vec![]]), Err(EmbedError::EmptyVector)));
    }

    #[test]
    fn default_embed_query_uses_documents() {
        struct Fixed;
        impl Embedder for Fixed {
            fn model_name(&self) -> &str {
                "fixed"
            }
            fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
                Ok(texts.iter().map(|t| vec![t.len() as f32, 1.0]).collect())
            }
        }
        assert_eq!(Fixed.embed_query("abc").unwrap(), vec![3.0, 1.0]);
    }
}
