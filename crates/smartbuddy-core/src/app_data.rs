//! Where SmartBuddy stores its own data (config, index, sources).

use std::path::PathBuf;

/// Returns the directory where SmartBuddy stores config, index, and sources.
/// On Linux: `~/.local/share/smartbuddy/`.
/// Creates the directory if it doesn't exist; returns `None` if we can't determine the path.
pub fn app_data_dir() -> Option<PathBuf> {
    let dir = directories::ProjectDirs::from("app", "SmartBuddy", "SmartBuddy")?
        .data_local_dir()
        .to_path_buf();
    std::fs::create_dir_all(&dir).ok()?;
    Some(dir)
}
