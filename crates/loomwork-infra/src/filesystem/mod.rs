//! Data directory resolution for the workflow engine.

use std::path::PathBuf;

/// Resolve the data directory from environment or platform defaults.
///
/// Priority:
/// 1. `LOOMWORK_DATA_DIR` environment variable
/// 2. Platform-specific data directory (e.g., `~/.loomwork` on macOS/Linux)
pub fn resolve_data_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("LOOMWORK_DATA_DIR") {
        return PathBuf::from(dir);
    }

    if let Some(home) = dirs::home_dir() {
        return home.join(".loomwork");
    }

    // Last resort: current directory
    PathBuf::from(".loomwork")
}
