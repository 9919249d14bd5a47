//! File-based storage for research and agent state
//!
//! Layout under the data directory (default `~/.research-supervisor/data`):
//! - `researches/{id}.json` - Research documents
//! - `agents/{id}.json` - Agent documents
//! - `agents/{id}.activities.jsonl` - Agent activity log (append-only JSONL)
//!
//! JSON documents are written atomically. The [`store::Store`] wraps these
//! helpers with the status state machine and a single write lock.

pub mod activities;
pub mod agents;
pub mod research_ops;
pub mod store;

pub use store::Store;

use std::fs;
use std::path::{Path, PathBuf};

/// Common file operations result type
pub type FileResult<T> = Result<T, String>;

/// Get the global ~/.research-supervisor directory in user home
pub fn get_global_supervisor_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".research-supervisor")
}

/// Default data directory when none is configured
pub fn default_data_dir() -> PathBuf {
    get_global_supervisor_dir().join("data")
}

/// Ensure a directory exists, creating it if necessary
pub fn ensure_dir(path: &Path) -> FileResult<()> {
    if !path.exists() {
        fs::create_dir_all(path)
            .map_err(|e| format!("Failed to create directory {:?}: {}", path, e))?;
    }
    Ok(())
}

/// Write data to a file atomically (temp file + rename)
pub fn atomic_write(path: &Path, content: &str) -> FileResult<()> {
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| format!("Invalid file path {:?}", path))?;
    let temp_path = path.with_file_name(format!("{}.tmp", file_name));

    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
        ensure_dir(parent)?;
    }

    fs::write(&temp_path, content)
        .map_err(|e| format!("Failed to write temp file {:?}: {}", temp_path, e))?;

    fs::rename(&temp_path, path)
        .map_err(|e| format!("Failed to rename {:?} to {:?}: {}", temp_path, path, e))?;

    Ok(())
}

/// Read a JSON file and deserialize it
pub fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> FileResult<T> {
    let content = fs::read_to_string(path)
        .map_err(|e| format!("Failed to read file {:?}: {}", path, e))?;

    serde_json::from_str(&content)
        .map_err(|e| format!("Failed to parse JSON from {:?}: {}", path, e))
}

/// Write data as pretty-printed JSON atomically
pub fn write_json<T: serde::Serialize>(path: &Path, data: &T) -> FileResult<()> {
    let content = serde_json::to_string_pretty(data)
        .map_err(|e| format!("Failed to serialize to JSON: {}", e))?;

    atomic_write(path, &content)
}

/// Remove a file if it exists
pub fn remove_if_exists(path: &Path) -> FileResult<bool> {
    if !path.exists() {
        return Ok(false);
    }
    fs::remove_file(path).map_err(|e| format!("Failed to delete {:?}: {}", path, e))?;
    Ok(true)
}

/// Initialize the data directory with its subdirectories
pub fn init_data_dir(data_dir: &Path) -> FileResult<PathBuf> {
    ensure_dir(data_dir)?;
    ensure_dir(&research_ops::get_researches_dir(data_dir))?;
    ensure_dir(&agents::get_agents_dir(data_dir))?;
    Ok(data_dir.to_path_buf())
}
