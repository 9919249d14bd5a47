// Progress snapshot for a research work directory
// Maintains <workDir>/.research-progress.json, rewritten atomically on every update.
// The worker's own progress tool writes the same file, so every field but the
// percentage is optional on read.

use crate::file_storage::{read_json, write_json, FileResult};
use crate::utils::snapshot_path;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProgressSnapshot {
    pub percentage: f64,
    #[serde(default)]
    pub current_task: Option<String>,
    #[serde(default)]
    pub current_task_description: Option<String>,
    #[serde(default)]
    pub completed_tasks: Vec<String>,
    #[serde(default = "Utc::now")]
    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub estimated_completion: Option<DateTime<Utc>>,
    #[serde(default)]
    pub estimated_minutes_remaining: Option<i64>,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

impl ProgressSnapshot {
    pub fn new(started_at: DateTime<Utc>) -> Self {
        Self {
            percentage: 0.0,
            current_task: None,
            current_task_description: None,
            completed_tasks: Vec::new(),
            started_at,
            estimated_completion: None,
            estimated_minutes_remaining: None,
            updated_at: started_at,
        }
    }
}

/// `started + elapsed * 100 / percentage`, absent at 0% and when the
/// estimate falls outside the representable date range
pub fn estimate_completion(
    started_at: DateTime<Utc>,
    now: DateTime<Utc>,
    percentage: f64,
) -> Option<DateTime<Utc>> {
    if !percentage.is_finite() || percentage <= 0.0 {
        return None;
    }
    let elapsed_ms = (now - started_at).num_milliseconds().max(0) as f64;
    let total_ms = (elapsed_ms * 100.0 / percentage).round();
    if !total_ms.is_finite() || total_ms >= i64::MAX as f64 {
        return None;
    }
    Duration::try_milliseconds(total_ms as i64)
        .and_then(|total| started_at.checked_add_signed(total))
}

/// Read a snapshot. Missing or partially written files read as `None`.
pub fn read_snapshot(work_dir: &str) -> Option<ProgressSnapshot> {
    let path = snapshot_path(work_dir);
    if !path.exists() {
        return None;
    }
    match read_json(&path) {
        Ok(snapshot) => Some(snapshot),
        Err(e) => {
            log::debug!("Ignoring unreadable progress snapshot: {}", e);
            None
        }
    }
}

/// Snapshot writer for one work directory
pub struct ProgressTracker {
    path: PathBuf,
    snapshot: ProgressSnapshot,
}

impl ProgressTracker {
    /// Start a fresh snapshot
    pub fn new(work_dir: &str) -> Self {
        Self {
            path: snapshot_path(work_dir),
            snapshot: ProgressSnapshot::new(Utc::now()),
        }
    }

    /// Continue from the snapshot on disk (resume), or start fresh
    pub fn resume(work_dir: &str) -> Self {
        match read_snapshot(work_dir) {
            Some(snapshot) => Self {
                path: snapshot_path(work_dir),
                snapshot,
            },
            None => Self::new(work_dir),
        }
    }

    pub fn snapshot(&self) -> &ProgressSnapshot {
        &self.snapshot
    }

    /// Record a progress update and rewrite the snapshot file
    pub fn update(&mut self, percentage: f64, current_task: Option<&str>) -> FileResult<()> {
        let now = Utc::now();

        if let Some(task) = current_task {
            if self.snapshot.current_task.as_deref() != Some(task) {
                if let Some(previous) = self.snapshot.current_task.take() {
                    if !self.snapshot.completed_tasks.contains(&previous) {
                        self.snapshot.completed_tasks.push(previous);
                    }
                }
                self.snapshot.current_task = Some(task.to_string());
            }
        }

        if percentage.is_finite() {
            self.snapshot.percentage = percentage.clamp(0.0, 100.0);
        }
        self.snapshot.current_task_description = self
            .snapshot
            .current_task
            .as_ref()
            .map(|task| format!("Currently working on: {}", task));
        self.snapshot.estimated_completion =
            estimate_completion(self.snapshot.started_at, now, self.snapshot.percentage);
        self.snapshot.estimated_minutes_remaining = self
            .snapshot
            .estimated_completion
            .map(|at| (at - now).num_minutes().max(0));
        self.snapshot.updated_at = now;

        write_json(&self.path, &self.snapshot)
    }
}
