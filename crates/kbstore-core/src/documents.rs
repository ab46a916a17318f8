//! Discovering and loading source documents from a knowledge folder.
//!
//! A loader is picked by file extension. Files we cannot load are skipped and
//! recorded, never fatal: the caller decides whether what's left is enough.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use scraper::Html;
use serde::{Deserialize, Serialize};
use walkdir::WalkDir;

/// A loaded source document: where it came from, its text, and string metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub source: PathBuf,
    pub text: String,
    /// Always contains `source`; Markdown front matter and HTML `<title>` add more.
    pub metadata: BTreeMap<String, String>,
}

/// The loaders we know, keyed by extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentKind {
    PlainText,
    Markdown,
    Html,
    Json,
}

impl DocumentKind {
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "txt" | "text" | "log" | "csv" | "rst" => Some(Self::PlainText),
            "md" | "markdown" => Some(Self::Markdown),
            "html" | "htm" => Some(Self::Html),
            "json" => Some(Self::Json),
            _ => None,
        }
    }
}

/// A file that was found but not loaded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedFile {
    pub path: PathBuf,
    pub reason: String,
}

/// Everything a scan produced.
#[derive(Debug, Default)]
pub struct ScanOutcome {
    pub documents: Vec<Document>,
    pub skipped: Vec<SkippedFile>,
}

/// Walks `root` recursively (hidden entries and anything under `exclude` left out,
/// sorted by name) and loads every file.
/// Only a missing or non-directory root is an error; per-file failures land in `skipped`.
pub fn scan_documents(root: &Path, exclude: &[&Path]) -> Result<ScanOutcome, ScanError> {
    if !root.is_dir() {
        return Err(ScanError::NotADirectory(root.to_path_buf()));
    }
    let excluded = Excluded::new(root, exclude);
    let mut outcome = ScanOutcome::default();
    for entry in WalkDir::new(root)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| !is_hidden(e) && !excluded.contains(e.path()))
    {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                let path = e.path().map(Path::to_path_buf).unwrap_or_else(|| root.to_path_buf());
                tracing::warn!(path = %path.display(), error = %e, "skipping unreadable entry");
                outcome.skipped.push(SkippedFile {
                    path,
                    reason: e.to_string(),
                });
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        match load_document(path) {
            Ok(doc) => outcome.documents.push(doc),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "skipping document");
                outcome.skipped.push(SkippedFile {
                    path: path.to_path_buf(),
                    reason: e.to_string(),
                });
            }
        }
    }
    tracing::debug!(
        root = %root.display(),
        loaded = outcome.documents.len(),
        skipped = outcome.skipped.len(),
        "scanned knowledge folder"
    );
    Ok(outcome)
}

/// Load one file with the loader its extension selects.
pub fn load_document(path: &Path) -> Result<Document, DocumentError> {
    let kind = DocumentKind::from_path(path).ok_or_else(|| {
        DocumentError::Unsupported(
            path.extension()
                .map(|e| e.to_string_lossy().into_owned())
                .unwrap_or_default(),
        )
    })?;
    let bytes = std::fs::read(path).map_err(DocumentError::Read)?;
    let raw = String::from_utf8(bytes).map_err(|_| DocumentError::NotUtf8)?;

    let mut metadata = BTreeMap::new();
    let text = match kind {
        DocumentKind::PlainText => raw,
        DocumentKind::Markdown => {
            let (front, body) = split_frontmatter(&raw);
            if let Some(front) = front {
                metadata.extend(frontmatter_fields(front));
            }
            body.to_string()
        }
        DocumentKind::Html => {
            let (title, text) = html_to_text(&raw);
            if let Some(title) = title {
                metadata.insert("title".to_string(), title);
            }
            text
        }
        DocumentKind::Json => {
            let value: serde_json::Value = serde_json::from_str(&raw).map_err(DocumentError::Json)?;
            let mut strings = Vec::new();
            collect_strings(&value, &mut strings);
            strings.join("\n")
        }
    };
    if text.trim().is_empty() {
        return Err(DocumentError::Empty);
    }
    metadata.insert("source".to_string(), path.to_string_lossy().into_owned());
    Ok(Document {
        source: path.to_path_buf(),
        text,
        metadata,
    })
}

/// Paths left out of a scan, compared in both their given and canonical forms so that
/// `kb/stores`, `/abs/kb/stores` and `kb/sub/../stores` all match the same entries.
struct Excluded<'a> {
    root: &'a Path,
    canonical_root: PathBuf,
    given: &'a [&'a Path],
    canonical: Vec<PathBuf>,
}

impl<'a> Excluded<'a> {
    fn new(root: &'a Path, given: &'a [&'a Path]) -> Self {
        Self {
            root,
            canonical_root: resolve(root),
            given,
            // A path that doesn't exist yet holds no files; keep it as given.
            canonical: given.iter().map(|p| resolve(p)).collect(),
        }
    }

    fn contains(&self, path: &Path) -> bool {
        if self.given.iter().any(|x| path.starts_with(x)) {
            return true;
        }
        // Entries come from walking `root` without following links, so the part below
        // `root` has no `..` or symlinked directories to resolve.
        let resolved = match path.strip_prefix(self.root) {
            Ok(rel) => self.canonical_root.join(rel),
            Err(_) => return false,
        };
        self.canonical.iter().any(|x| resolved.starts_with(x))
    }
}

fn resolve(path: &Path) -> PathBuf {
    path.canonicalize().unwrap_or_else(|_| path.to_path_buf())
}

fn is_hidden(entry: &walkdir::DirEntry) -> bool {
    entry.depth() > 0
        && entry
            .file_name()
            .to_str()
            .map(|s| s.starts_with('.'))
            .unwrap_or(false)
}

/// Splits optional YAML front matter (between a leading `---` and the next `---` line) from the body.
fn split_frontmatter(content: &str) -> (Option<&str>, &str) {
    let s = content.trim_start();
    let Some(after_first) = s.strip_prefix("---") else {
        return (None, content);
    };
    match after_first.find("\n---") {
        Some(end) => {
            let rest = &after_first[end + 4..];
            // The closing fence runs to the end of its line.
            let body = rest.split_once('\n').map_or("", |(_, body)| body);
            (Some(&after_first[..end]), body.trim_start())
        }
        None => (None, content),
    }
}

/// Scalar front-matter values as strings. Unparsable front matter is ignored.
fn frontmatter_fields(front: &str) -> BTreeMap<String, String> {
    let mapping: serde_yaml::Mapping = match serde_yaml::from_str(front) {
        Ok(m) => m,
        Err(e) => {
            tracing::debug!(error = %e, "ignoring unparsable front matter");
            return BTreeMap::new();
        }
    };
    mapping
        .into_iter()
        .filter_map(|(k, v)| {
            let key = k.as_str()?.to_string();
            let value = match v {
                serde_yaml::Value::String(s) => s,
                serde_yaml::Value::Number(n) => n.to_string(),
                serde_yaml::Value::Bool(b) => b.to_string(),
                _ => return None,
            };
            Some((key, value))
        })
        .collect()
}

const SKIPPED_TAGS: &[&str] = &["script", "style", "noscript", "head", "template"];
const BLOCK_TAGS: &[&str] = &[
    "address", "article", "aside", "blockquote", "body", "dd", "div", "dl", "dt", "figcaption",
    "footer", "form", "h1", "h2", "h3", "h4", "h5", "h6", "header", "li", "main", "nav", "ol",
    "p", "pre", "section", "table", "td", "th", "tr", "ul",
];

/// Visible text of an HTML page, one paragraph per block element, plus its `<title>`.
fn html_to_text(html: &str) -> (Option<String>, String) {
    let document = Html::parse_document(html);
    let mut title = None;
    let mut paragraphs: Vec<String> = Vec::new();
    let mut current_block = None;

    for node in document.tree.root().descendants() {
        let Some(text) = node.value().as_text() else {
            continue;
        };
        let cleaned = text.split_whitespace().collect::<Vec<_>>().join(" ");
        if cleaned.is_empty() {
            continue;
        }
        let parent_name = node
            .parent()
            .and_then(|p| p.value().as_element().map(|e| e.name().to_string()));
        if parent_name.as_deref() == Some("title") {
            title.get_or_insert(cleaned);
            continue;
        }
        let hidden = node.ancestors().any(|a| {
            a.value()
                .as_element()
                .is_some_and(|e| SKIPPED_TAGS.contains(&e.name()))
        });
        if hidden {
            continue;
        }
        let block = node
            .ancestors()
            .find(|a| {
                a.value()
                    .as_element()
                    .is_some_and(|e| BLOCK_TAGS.contains(&e.name()))
            })
            .map(|a| a.id());
        match paragraphs.last_mut() {
            Some(last) if block == current_block => {
                last.push(' ');
                last.push_str(&cleaned);
            }
            _ => paragraphs.push(cleaned),
        }
        current_block = block;
    }
    (title, paragraphs.join("\n\n"))
}

fn collect_strings(value: &serde_json::Value, out: &mut Vec<String>) {
    match value {
        serde_json::Value::String(s) if !s.trim().is_empty() => out.push(s.clone()),
        serde_json::Value::Array(items) => items.iter().for_each(|v| collect_strings(v, out)),
        serde_json::Value::Object(map) => map.values().for_each(|v| collect_strings(v, out)),
        _ => {}
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ScanError {
    #[error("not a directory: {0}")]
    NotADirectory(PathBuf),
}

#[derive(Debug, thiserror::Error)]
pub enum DocumentError {
    #[error("unsupported file type {0:?}")]
    Unsupported(String),
    #[error("read error: {0}")]
    Read(std::io::Error),
    #[error("not valid UTF-8")]
    NotUtf8,
    #[error("invalid JSON: {0}")]
    Json(serde_json::Error),
    #[error("no text content")]
    Empty,
}
