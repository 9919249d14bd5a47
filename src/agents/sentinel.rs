//! Cooperative cancellation through a sentinel file
//!
//! The worker polls for `<workDir>/.kill` while it waits for messages and
//! exits on its own when the file appears. Cancelling is two-phase:
//!
//! 1. write the sentinel,
//! 2. wait two poll intervals, then remove it.
//!
//! A worker's real period is its poll interval plus the loop body, so the
//! file must outlive one full interval. Removal is required so a later resume
//! in the same directory is not cancelled immediately. If the worker is not polling during the wait (busy
//! in a long tool call), it never sees the file; the caller must then rely on
//! the exit grace period and a forced kill. Nothing here needs the process
//! handle, so a separate supervisor instance can cancel too.

use crate::file_storage::{remove_if_exists, FileResult};
use crate::utils::sentinel_path;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

/// Phase one: create the sentinel file
pub fn write_sentinel(work_dir: &str) -> FileResult<PathBuf> {
    let path = sentinel_path(work_dir);
    fs::write(&path, chrono::Utc::now().to_rfc3339())
        .map_err(|e| format!("Failed to write sentinel {:?}: {}", path, e))?;
    Ok(path)
}

/// Phase two: remove the sentinel file. Missing is fine.
pub fn clear_sentinel(work_dir: &str) -> FileResult<()> {
    remove_if_exists(&sentinel_path(work_dir))?;
    Ok(())
}

pub fn sentinel_present(work_dir: &str) -> bool {
    sentinel_path(work_dir).exists()
}

/// How long the sentinel stays on disk for a worker polling at `poll_interval`
pub fn sentinel_hold(poll_interval: Duration) -> Duration {
    poll_interval * 2
}

/// Run the full protocol: write, hold, remove.
pub async fn request_cancel(work_dir: &str, poll_interval: Duration) -> FileResult<()> {
    let path = write_sentinel(work_dir)?;
    let hold = sentinel_hold(poll_interval);
    log::debug!("[Sentinel] Wrote {:?}, holding {:?}", path, hold);

    tokio::time::sleep(hold).await;

    clear_sentinel(work_dir)?;
    log::debug!("[Sentinel] Removed {:?}", path);
    Ok(())
}
