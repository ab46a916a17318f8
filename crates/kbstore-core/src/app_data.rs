//! Where kbstore keeps its own data (settings file, default store location).
//!
//! Source documents stay wherever the user keeps them. We only store app state here.

use std::path::PathBuf;

/// Returns the directory where kbstore stores its settings and, by default, its stores.
/// On Linux: `$XDG_DATA_HOME/kbstore` (usually `~/.local/share/kbstore`).
/// On macOS: `~/Library/Application Support/app.kbstore.kbstore/`.
/// Creates the directory if it doesn't exist; returns `None` if we can't determine the path.
pub fn app_data_dir() -> Option<PathBuf> {
    let dir = directories::ProjectDirs::from("app", "kbstore", "kbstore")?.data_local_dir().to_path_buf();
    std::fs::create_dir_all(&dir).ok()?;
    Some(dir)
}

/// Default persistence root: `<app data>/vectorstores`.
pub fn default_db_path() -> Option<PathBuf> {
    app_data_dir().map(|dir| dir.join("vectorstores"))
}
