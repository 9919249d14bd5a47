//! Research document operations
//!
//! Research documents are stored in `{data_dir}/researches/{id}.json`

use super::{ensure_dir, read_json, remove_if_exists, write_json, FileResult};
use crate::models::Research;
use std::fs;
use std::path::{Path, PathBuf};

/// Get the researches directory
pub fn get_researches_dir(data_dir: &Path) -> PathBuf {
    data_dir.join("researches")
}

fn get_research_path(data_dir: &Path, research_id: &str) -> PathBuf {
    get_researches_dir(data_dir).join(format!("{}.json", research_id))
}

/// Check if a research document exists
pub fn research_exists(data_dir: &Path, research_id: &str) -> bool {
    get_research_path(data_dir, research_id).exists()
}

/// Save/update a research document
pub fn save_research(data_dir: &Path, research: &Research) -> FileResult<()> {
    ensure_dir(&get_researches_dir(data_dir))?;
    let path = get_research_path(data_dir, &research.id);
    write_json(&path, research)
}

/// Read a research by ID
pub fn read_research(data_dir: &Path, research_id: &str) -> FileResult<Research> {
    read_json(&get_research_path(data_dir, research_id))
}

/// Get a research if it exists
pub fn get_research_opt(data_dir: &Path, research_id: &str) -> FileResult<Option<Research>> {
    if !research_exists(data_dir, research_id) {
        return Ok(None);
    }
    read_research(data_dir, research_id).map(Some)
}

/// List all researches, newest first
pub fn list_researches(data_dir: &Path) -> FileResult<Vec<Research>> {
    let dir = get_researches_dir(data_dir);

    if !dir.exists() {
        return Ok(Vec::new());
    }

    let entries =
        fs::read_dir(&dir).map_err(|e| format!("Failed to read researches directory: {}", e))?;

    let mut researches = Vec::new();

    for entry in entries.flatten() {
        let path = entry.path();
        if path.extension().map_or(false, |ext| ext == "json") {
            match read_json::<Research>(&path) {
                Ok(research) => researches.push(research),
                Err(e) => log::warn!("Skipping unreadable research file: {}", e),
            }
        }
    }

    researches.sort_by(|a, b| b.created_at.cmp(&a.created_at));

    Ok(researches)
}

/// Delete a research document. Returns whether it existed.
pub fn delete_research(data_dir: &Path, research_id: &str) -> FileResult<bool> {
    let deleted = remove_if_exists(&get_research_path(data_dir, research_id))?;
    if deleted {
        log::info!("Deleted research {}", research_id);
    }
    Ok(deleted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ResearchStatus;
    use chrono::{Duration, Utc};
    use tempfile::TempDir;

    fn sample(topic: &str) -> Research {
        Research::new(topic, "/tmp/work", "anthropic", "claude-sonnet-4-5")
    }

    #[test]
    fn test_save_and_read_research() {
        let temp_dir = TempDir::new().unwrap();
        let research = sample("espresso");

        save_research(temp_dir.path(), &research).unwrap();

        assert!(research_exists(temp_dir.path(), &research.id));
        let loaded = read_research(temp_dir.path(), &research.id).unwrap();
        assert_eq!(loaded, research);
    }

    #[test]
    fn test_get_research_opt_missing() {
        let temp_dir = TempDir::new().unwrap();
        assert!(get_research_opt(temp_dir.path(), "nope").unwrap().is_none());
    }

    #[test]
    fn test_list_researches_sorted_newest_first() {
        let temp_dir = TempDir::new().unwrap();
        let mut older = sample("older");
        older.created_at = Utc::now() - Duration::hours(1);
        let newer = sample("newer");

        save_research(temp_dir.path(), &older).unwrap();
        save_research(temp_dir.path(), &newer).unwrap();

        let list = list_researches(temp_dir.path()).unwrap();
        assert_eq!(list.len(), 2);
        assert_eq!(list[0].topic, "newer");
        assert_eq!(list[1].topic, "older");
    }

    #[test]
    fn test_list_researches_empty_dir() {
        let temp_dir = TempDir::new().unwrap();
        assert!(list_researches(temp_dir.path()).unwrap().is_empty());
    }

    #[test]
    fn test_update_and_delete_research() {
        let temp_dir = TempDir::new().unwrap();
        let mut research = sample("espresso");
        save_research(temp_dir.path(), &research).unwrap();

        research.status = ResearchStatus::InProgress;
        save_research(temp_dir.path(), &research).unwrap();
        let loaded = read_research(temp_dir.path(), &research.id).unwrap();
        assert_eq!(loaded.status, ResearchStatus::InProgress);

        assert!(delete_research(temp_dir.path(), &research.id).unwrap());
        assert!(!research_exists(temp_dir.path(), &research.id));
        assert!(!delete_research(temp_dir.path(), &research.id).unwrap());
    }
}
