//! Data directory layout.

use std::path::PathBuf;

/// Resolve the data directory from environment or platform defaults.
///
/// Priority:
/// 1. `SKILLFLOW_DATA_DIR` environment variable
/// 2. `~/.skillflow`
pub fn resolve_data_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("SKILLFLOW_DATA_DIR") {
        return PathBuf::from(dir);
    }

    if let Some(home) = dirs::home_dir() {
        return home.join(".skillflow");
    }

    // Last resort: current directory
    PathBuf::from(".skillflow")
}
