//! Splits documents into overlapping chunks for embedding and search.
//! Prefers paragraph boundaries; falls back to line breaks, then words, then characters.
//!
//! Lengths are counted in characters (Unicode scalar values), not bytes.

use std::collections::{BTreeMap, VecDeque};
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::config::ConfigError;
use crate::documents::Document;

/// Separators tried in order. The empty separator splits into single characters.
const SEPARATORS: [&str; 4] = ["\n\n", "\n", " ", ""];

/// A chunk of text from a document, with source reference.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub text: String,
    pub source: PathBuf,
    /// Index of this chunk within its document (0, 1, 2, …).
    pub index: usize,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

/// Recursive character splitter: chunks of at most `chunk_size` characters,
/// with up to `chunk_overlap` characters carried over from the previous chunk.
#[derive(Debug, Clone, Copy)]
pub struct TextSplitter {
    chunk_size: usize,
    chunk_overlap: usize,
}

impl TextSplitter {
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Result<Self, ConfigError> {
        if chunk_size == 0 {
            return Err(ConfigError::ZeroChunkSize);
        }
        if chunk_overlap >= chunk_size {
            return Err(ConfigError::OverlapTooLarge {
                overlap: chunk_overlap,
                size: chunk_size,
            });
        }
        Ok(Self {
            chunk_size,
            chunk_overlap,
        })
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn chunk_overlap(&self) -> usize {
        self.chunk_overlap
    }

    /// Split text into trimmed, non-empty chunks.
    pub fn split_text(&self, text: &str) -> Vec<String> {
        self.split_recursive(text, &SEPARATORS)
    }

    /// Chunk a single document.
    pub fn split_document(&self, doc: &Document) -> Vec<Chunk> {
        self.split_text(&doc.text)
            .into_iter()
            .enumerate()
            .map(|(index, text)| Chunk {
                text,
                source: doc.source.clone(),
                index,
                metadata: doc.metadata.clone(),
            })
            .collect()
    }

    /// Chunk all documents. Returns chunks from all documents in order.
    pub fn split_documents(&self, docs: &[Document]) -> Vec<Chunk> {
        docs.iter().flat_map(|d| self.split_document(d)).collect()
    }

    fn split_recursive(&self, text: &str, separators: &[&str]) -> Vec<String> {
        let pos = separators
            .iter()
            .position(|sep| sep.is_empty() || text.contains(sep))
            .unwrap_or(separators.len().saturating_sub(1));
        let separator = separators.get(pos).copied().unwrap_or("");
        let finer = separators.get(pos + 1..).unwrap_or(&[]);

        let pieces: Vec<&str> = if separator.is_empty() {
            text.char_indices()
                .map(|(i, c)| &text[i..i + c.len_utf8()])
                .collect()
        } else {
            text.split(separator).filter(|p| !p.is_empty()).collect()
        };

        let mut chunks = Vec::new();
        let mut fitting = Vec::new();
        for piece in pieces {
            if char_len(piece) <= self.chunk_size {
                fitting.push(piece);
                continue;
            }
            if !fitting.is_empty() {
                chunks.extend(self.merge(&fitting, separator));
                fitting.clear();
            }
            if finer.is_empty() {
                chunks.push(piece.trim().to_string());
            } else {
                chunks.extend(self.split_recursive(piece, finer));
            }
        }
        if !fitting.is_empty() {
            chunks.extend(self.merge(&fitting, separator));
        }
        chunks
    }

    /// Greedily joins pieces (each no longer than chunk_size) into chunks,
    /// keeping a tail of at most chunk_overlap characters as the start of the next one.
    fn merge(&self, pieces: &[&str], separator: &str) -> Vec<String> {
        let sep_len = char_len(separator);
        let mut chunks = Vec::new();
        let mut current: VecDeque<&str> = VecDeque::new();
        let mut total = 0;

        for &piece in pieces {
            let len = char_len(piece);
            let joined_len = |current: &VecDeque<&str>| if current.is_empty() { 0 } else { sep_len };
            if !current.is_empty() && total + len + joined_len(&current) > self.chunk_size {
                if let Some(chunk) = join(&current, separator) {
                    chunks.push(chunk);
                }
                while total > self.chunk_overlap
                    || (total > 0 && total + len + joined_len(&current) > self.chunk_size)
                {
                    let Some(first) = current.pop_front() else {
                        break;
                    };
                    total -= char_len(first) + joined_len(&current);
                }
            }
            total += len + joined_len(&current);
            current.push_back(piece);
        }
        if let Some(chunk) = join(&current, separator) {
            chunks.push(chunk);
        }
        chunks
    }
}

fn join(pieces: &VecDeque<&str>, separator: &str) -> Option<String> {
    let mut out = String::new();
    for (i, piece) in pieces.iter().enumerate() {
        if i > 0 {
            out.push_str(separator);
        }
        out.push_str(piece);
    }
    let trimmed = out.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(text: &str) -> Document {
        Document {
            source: PathBuf::from("test.md"),
            text: text.to_string(),
            metadata: BTreeMap::from([("source".to_string(), "test.md".to_string())]),
        }
    }

    #[test]
    fn short_text_is_one_chunk() {
        let s = TextSplitter::new(512, 50).unwrap();
        let c = s.split_document(&doc("One paragraph."));
        assert_eq!(c.len(), 1);
        assert_eq!(c[0].text, "One paragraph.");
        assert_eq!(c[0].index, 0);
        assert_eq!(c[0].metadata.get("source").map(String::as_str), Some("test.md"));
    }

    #[test]
    fn paragraphs_are_merged_up_to_chunk_size() {
        let s = TextSplitter::new(10, 0).unwrap();
        assert_eq!(s.split_text("P1\n\nP2\n\nP3"), vec!["P1\n\nP2\n\nP3"]);
        let s = TextSplitter::new(6, 0).unwrap();
        assert_eq!(s.split_text("P1\n\nP2\n\nP3"), vec!["P1\n\nP2", "P3"]);
    }

    #[test]
    fn words_overlap_between_chunks() {
        let s = TextSplitter::new(16, 5).unwrap();
        assert_eq!(
            s.split_text("alpha beta gamma delta"),
            vec!["alpha beta gamma", "gamma delta"]
        );
    }

    #[test]
    fn long_word_is_split_by_characters() {
        let s = TextSplitter::new(200, 0).unwrap();
        let c = s.split_text(&"a".repeat(600));
        assert_eq!(c.len(), 3);
        assert!(c.iter().all(|ch| ch.chars().count() == 200));
    }

    #[test]
    fn chunks_never_exceed_chunk_size() {
        let text = "Cześnik Raptusiewicz i Rejent Milczek spierają się o mur graniczny.\n\
                    Papkin, lew Północy, zostaje wysłany z wyzwaniem.\n\n\
                    Wacław kocha Klarę, a Podstolina ma własne plany. ".repeat(20);
        for (size, overlap) in [(40, 10), (100, 30), (7, 3), (1, 0)] {
            let s = TextSplitter::new(size, overlap).unwrap();
            let chunks = s.split_text(&text);
            assert!(!chunks.is_empty());
            assert!(
                chunks.iter().all(|c| !c.is_empty() && c.chars().count() <= size),
                "chunk over {size} chars"
            );
        }
    }

    #[test]
    fn invalid_parameters_rejected() {
        assert!(matches!(TextSplitter::new(0, 0), Err(ConfigError::ZeroChunkSize)));
        assert!(matches!(
            TextSplitter::new(10, 10),
            Err(ConfigError::OverlapTooLarge { .. })
        ));
    }

    #[test]
    fn blank_document_has_no_chunks() {
        let s = TextSplitter::new(10, 2).unwrap();
        assert!(s.split_document(&doc(" \n\n \n")).is_empty());
    }
}
