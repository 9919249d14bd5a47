// Event types and payload structures for real-time updates
// Pushed to optional unbounded channels; the CLI prints them as JSON lines

use crate::models::Activity;
use serde::{Deserialize, Serialize};

// Event name constants
pub const EVENT_ACTIVITY_APPENDED: &str = "activity:appended";
pub const EVENT_AGENT_STATUS_CHANGED: &str = "agent:status_changed";
pub const EVENT_RESEARCH_STATUS_CHANGED: &str = "research:status_changed";
pub const EVENT_AGENT_COMPLETED: &str = "agent:completed";
pub const EVENT_AGENT_FAILED: &str = "agent:failed";
pub const EVENT_RESEARCH_PROGRESS: &str = "research:progress";

/// Payload for appended activities
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityAppendedPayload {
    pub research_id: String,
    pub activity: Activity,
}

/// Payload for agent status change events
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentStatusChangedPayload {
    pub agent_id: String,
    pub research_id: String,
    pub old_status: String,
    pub new_status: String,
}

/// Payload for research status change events
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResearchStatusChangedPayload {
    pub research_id: String,
    pub old_status: String,
    pub new_status: String,
}

/// Payload for a finished worker run
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentCompletedPayload {
    pub agent_id: String,
    pub research_id: String,
    pub success: bool,
    pub exit_code: Option<i32>,
    pub error: Option<String>,
}

/// Payload for progress snapshot updates
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResearchProgressPayload {
    pub research_id: String,
    pub percentage: f64,
    pub current_task: Option<String>,
}

/// One event on the supervisor's event channel
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", content = "payload")]
pub enum SupervisorEvent {
    #[serde(rename = "activity:appended")]
    ActivityAppended(ActivityAppendedPayload),
    #[serde(rename = "agent:status_changed")]
    AgentStatusChanged(AgentStatusChangedPayload),
    #[serde(rename = "research:status_changed")]
    ResearchStatusChanged(ResearchStatusChangedPayload),
    #[serde(rename = "agent:completed")]
    AgentCompleted(AgentCompletedPayload),
    #[serde(rename = "agent:failed")]
    AgentFailed(AgentCompletedPayload),
    #[serde(rename = "research:progress")]
    ResearchProgress(ResearchProgressPayload),
}

impl SupervisorEvent {
    pub fn name(&self) -> &'static str {
        match self {
            SupervisorEvent::ActivityAppended(_) => EVENT_ACTIVITY_APPENDED,
            SupervisorEvent::AgentStatusChanged(_) => EVENT_AGENT_STATUS_CHANGED,
            SupervisorEvent::ResearchStatusChanged(_) => EVENT_RESEARCH_STATUS_CHANGED,
            SupervisorEvent::AgentCompleted(_) => EVENT_AGENT_COMPLETED,
            SupervisorEvent::AgentFailed(_) => EVENT_AGENT_FAILED,
            SupervisorEvent::ResearchProgress(_) => EVENT_RESEARCH_PROGRESS,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_serialization_uses_names() {
        let event = SupervisorEvent::ResearchStatusChanged(ResearchStatusChangedPayload {
            research_id: "r-1".to_string(),
            old_status: "in_progress".to_string(),
            new_status: "completed".to_string(),
        });
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], EVENT_RESEARCH_STATUS_CHANGED);
        assert_eq!(json["payload"]["researchId"], "r-1");
        assert_eq!(event.name(), EVENT_RESEARCH_STATUS_CHANGED);
    }

    #[test]
    fn test_agent_completed_payload() {
        let payload = AgentCompletedPayload {
            agent_id: "a-1".to_string(),
            research_id: "r-1".to_string(),
            success: false,
            exit_code: Some(2),
            error: Some("Worker exited with exit code 2".to_string()),
        };
        let json = serde_json::to_string(&SupervisorEvent::AgentFailed(payload)).unwrap();
        assert!(json.contains("\"agent:failed\""));
        assert!(json.contains("\"exitCode\":2"));
    }
}
