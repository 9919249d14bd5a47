// Follow-up messages for a worker that stays alive after its first answer
// The worker polls <workDir>/.messages.json and marks entries processed itself.

use crate::file_storage::{read_json, write_json, FileResult};
use crate::utils::messages_path;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FollowUpMessage {
    pub id: String,
    #[serde(default = "default_role")]
    pub role: String,
    #[serde(default)]
    pub content: String,
    /// Milliseconds since the Unix epoch
    #[serde(default)]
    pub timestamp: i64,
    #[serde(default)]
    pub processed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processed_at: Option<String>,
}

fn default_role() -> String {
    "user".to_string()
}

impl FollowUpMessage {
    pub fn user(content: &str) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            role: default_role(),
            content: content.to_string(),
            timestamp: Utc::now().timestamp_millis(),
            processed: false,
            processed_at: None,
        }
    }
}

/// Raw entries on disk. Missing reads as empty; entries the worker added are kept as-is.
fn read_entries(work_dir: &str) -> FileResult<Vec<Value>> {
    let path = messages_path(work_dir);
    if !path.exists() {
        return Ok(Vec::new());
    }
    read_json(&path)
}

/// Messages in file order. Entries that are not messages are skipped.
pub fn read_messages(work_dir: &str) -> FileResult<Vec<FollowUpMessage>> {
    Ok(read_entries(work_dir)?
        .into_iter()
        .filter_map(|entry| serde_json::from_value(entry).ok())
        .collect())
}

/// Queue a user message for the worker, rewriting the file atomically
pub fn append_message(work_dir: &str, content: &str) -> FileResult<FollowUpMessage> {
    let mut entries = read_entries(work_dir)?;
    let message = FollowUpMessage::user(content);
    entries.push(
        serde_json::to_value(&message)
            .map_err(|e| format!("Failed to serialize message: {}", e))?,
    );
    write_json(&messages_path(work_dir), &entries)?;

    log::debug!("Queued message {} in {}", message.id, work_dir);
    Ok(message)
}

/// Messages the worker has not picked up yet
pub fn pending_count(work_dir: &str) -> usize {
    read_messages(work_dir)
        .map(|messages| messages.iter().filter(|m| !m.processed).count())
        .unwrap_or(0)
}
