//! Append-only activity logs in JSONL format
//!
//! One file per agent: `{data_dir}/agents/{agent_id}.activities.jsonl`.

use super::agents::get_agents_dir;
use super::{ensure_dir, remove_if_exists, FileResult};
use crate::models::Activity;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

/// Get the file path for an agent's activity log
pub fn get_activities_path(data_dir: &Path, agent_id: &str) -> PathBuf {
    get_agents_dir(data_dir).join(format!("{}.activities.jsonl", agent_id))
}

/// Append an activity to an agent's log
pub fn append_activity(data_dir: &Path, activity: &Activity) -> FileResult<()> {
    ensure_dir(&get_agents_dir(data_dir))?;

    let path = get_activities_path(data_dir, &activity.agent_id);
    let line = serde_json::to_string(activity)
        .map_err(|e| format!("Failed to serialize activity: {}", e))?;

    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .map_err(|e| format!("Failed to open activity log: {}", e))?;

    writeln!(file, "{}", line).map_err(|e| format!("Failed to write activity: {}", e))?;

    Ok(())
}

/// Read all activities for an agent, ordered by sequence then timestamp
pub fn read_activities(data_dir: &Path, agent_id: &str) -> FileResult<Vec<Activity>> {
    let path = get_activities_path(data_dir, agent_id);

    if !path.exists() {
        return Ok(Vec::new());
    }

    let file = File::open(&path).map_err(|e| format!("Failed to open activity log: {}", e))?;
    let reader = BufReader::new(file);
    let mut activities = Vec::new();

    for line in reader.lines() {
        let line = line.map_err(|e| format!("Failed to read activity line: {}", e))?;
        if line.trim().is_empty() {
            continue;
        }

        match serde_json::from_str::<Activity>(&line) {
            Ok(activity) => activities.push(activity),
            Err(e) => {
                log::warn!("Failed to parse activity for agent {}: {}", agent_id, e);
            }
        }
    }

    activities.sort_by(|a, b| {
        a.sequence
            .cmp(&b.sequence)
            .then_with(|| a.timestamp.cmp(&b.timestamp))
    });

    Ok(activities)
}

/// Highest sequence number in an agent's log, 0 when empty
pub fn last_sequence(data_dir: &Path, agent_id: &str) -> FileResult<u64> {
    Ok(read_activities(data_dir, agent_id)?
        .last()
        .map(|a| a.sequence)
        .unwrap_or(0))
}

/// Size of an agent's log in bytes, 0 when missing
pub fn log_len(data_dir: &Path, agent_id: &str) -> u64 {
    std::fs::metadata(get_activities_path(data_dir, agent_id))
        .map(|m| m.len())
        .unwrap_or(0)
}

/// Delete an agent's activity log
pub fn delete_activities(data_dir: &Path, agent_id: &str) -> FileResult<()> {
    remove_if_exists(&get_activities_path(data_dir, agent_id))?;
    Ok(())
}
