//! File watcher for the knowledge folder. Reports debounced changes on the calling thread.

use std::ops::ControlFlow;
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::time::Duration;

use notify_debouncer_mini::notify;
use notify_debouncer_mini::{new_debouncer, DebounceEventResult};

pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(400);

/// Watches `root` recursively and calls `on_change` with the changed paths (debounced).
///
/// The callback runs on the calling thread, so it may own non-`Send` state such as a
/// store manager. Hidden paths are ignored. Blocks until `on_change` returns
/// `ControlFlow::Break` or the watcher shuts down; returns Err only on setup failure.
pub fn watch_sources(
    root: &Path,
    debounce: Duration,
    mut on_change: impl FnMut(&[PathBuf]) -> ControlFlow<()>,
) -> Result<(), WatchError> {
    if !root.is_dir() {
        return Err(WatchError::NotADirectory(root.to_path_buf()));
    }
    let root = root.canonicalize().map_err(WatchError::Canonicalize)?;

    let (tx, rx) = mpsc::channel::<DebounceEventResult>();
    let mut debouncer = new_debouncer(debounce, tx).map_err(|e| WatchError::Notify(e.to_string()))?;
    debouncer
        .watcher()
        .watch(&root, notify::RecursiveMode::Recursive)
        .map_err(|e| WatchError::Watch(e.to_string()))?;
    tracing::info!(root = %root.display(), "watching knowledge folder");

    for res in rx {
        match res {
            Ok(events) => {
                let mut paths: Vec<PathBuf> = events
                    .into_iter()
                    .map(|e| e.path)
                    .filter(|p| !is_hidden_under(&root, p))
                    .collect();
                paths.sort();
                paths.dedup();
                if paths.is_empty() {
                    continue;
                }
                tracing::debug!(changed = paths.len(), "knowledge folder changed");
                if on_change(&paths).is_break() {
                    break;
                }
            }
            Err(e) => tracing::warn!(error = %e, "watcher error"),
        }
    }
    Ok(())
}

/// True if any component of `path` below `root` starts with a dot.
fn is_hidden_under(root: &Path, path: &Path) -> bool {
    path.strip_prefix(root)
        .unwrap_or(path)
        .components()
        .any(|c| c.as_os_str().to_str().is_some_and(|s| s.starts_with('.')))
}

#[derive(Debug, thiserror::Error)]
pub enum WatchError {
    #[error("not a directory: {0}")]
    NotADirectory(PathBuf),
    #[error("failed to resolve path: {0}")]
    Canonicalize(std::io::Error),
    #[error("watcher init: {0}")]
    Notify(String),
    #[error("watch failed: {0}")]
    Watch(String),
}
