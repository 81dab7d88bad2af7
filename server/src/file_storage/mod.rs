// File-based persistence helpers
//
// Sessions are stored as JSON documents under the configured storage root.
// Writes go through `atomic_write` (temp file + rename) so readers never
// observe a torn file.

mod sessions;

pub use sessions::SessionStore;

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs;
use std::path::Path;

/// Result type for storage operations
pub type FileResult<T> = Result<T, String>;

/// Create a directory and its parents if missing
pub fn ensure_dir(path: &Path) -> FileResult<()> {
    if !path.exists() {
        fs::create_dir_all(path)
            .map_err(|e| format!("Failed to create directory {:?}: {}", path, e))?;
    }
    Ok(())
}

/// Write content atomically: write to a sibling temp file, then rename
pub fn atomic_write(path: &Path, content: &str) -> FileResult<()> {
    let tmp_path = path.with_extension("tmp");

    fs::write(&tmp_path, content)
        .map_err(|e| format!("Failed to write {:?}: {}", tmp_path, e))?;
    fs::rename(&tmp_path, path)
        .map_err(|e| format!("Failed to rename {:?} to {:?}: {}", tmp_path, path, e))?;
    Ok(())
}

/// Read and deserialize a JSON file
pub fn read_json<T: DeserializeOwned>(path: &Path) -> FileResult<T> {
    let content =
        fs::read_to_string(path).map_err(|e| format!("Failed to read {:?}: {}", path, e))?;
    serde_json::from_str(&content).map_err(|e| format!("Failed to parse {:?}: {}", path, e))
}

/// Serialize and atomically write a JSON file
pub fn write_json<T: Serialize>(path: &Path, value: &T) -> FileResult<()> {
    let content = serde_json::to_string_pretty(value)
        .map_err(|e| format!("Failed to serialize {:?}: {}", path, e))?;
    atomic_write(path, &content)
}
