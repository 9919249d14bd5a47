// Data models shared by the supervisor, the store and the query surface

pub mod state_machine;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ResearchStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

impl ResearchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResearchStatus::Pending => "pending",
            ResearchStatus::InProgress => "in_progress",
            ResearchStatus::Completed => "completed",
            ResearchStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for ResearchStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl AgentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentStatus::Pending => "pending",
            AgentStatus::Running => "running",
            AgentStatus::Completed => "completed",
            AgentStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A user-level research task. Owns one or more agent runs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Research {
    pub id: String,
    pub topic: String,
    pub status: ResearchStatus,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    pub work_dir: String,
    pub provider: String,
    pub model: String,
}

impl Research {
    pub fn new(topic: &str, work_dir: &str, provider: &str, model: &str) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            topic: topic.to_string(),
            status: ResearchStatus::Pending,
            created_at: Utc::now(),
            completed_at: None,
            work_dir: work_dir.to_string(),
            provider: provider.to_string(),
            model: model.to_string(),
        }
    }
}

/// One supervised run of the worker process for a research.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Agent {
    pub id: String,
    pub research_id: String,
    pub name: String,
    pub status: AgentStatus,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    /// Latest assistant response seen on stdout
    #[serde(default)]
    pub output: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub exit_code: Option<i32>,
    /// Process ID while the worker is alive
    #[serde(default)]
    pub process_id: Option<u32>,
    #[serde(default)]
    pub resume_count: u32,
}

impl Agent {
    pub fn new(research_id: &str, name: &str) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            research_id: research_id.to_string(),
            name: name.to_string(),
            status: AgentStatus::Pending,
            started_at: None,
            completed_at: None,
            output: None,
            error: None,
            exit_code: None,
            process_id: None,
            resume_count: 0,
        }
    }
}

/// Kind of an activity in an agent's timeline
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ActivityKind {
    /// Worker announced its configuration
    Init,
    /// Worker lifecycle milestone (app started, tools loaded, llm completed...)
    Lifecycle,
    /// Progress message with an optional percentage
    Progress,
    ToolCall,
    ToolResult,
    Thought,
    AssistantResponse,
    Error,
    Log,
    /// Opaque stdout line that matched no known shape
    Text,
    /// Non-fatal stderr output
    Diagnostic,
    /// Synthesized by the supervisor (spawn, exit, cancel, resume, recovery)
    System,
}

impl ActivityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActivityKind::Init => "init",
            ActivityKind::Lifecycle => "lifecycle",
            ActivityKind::Progress => "progress",
            ActivityKind::ToolCall => "tool_call",
            ActivityKind::ToolResult => "tool_result",
            ActivityKind::Thought => "thought",
            ActivityKind::AssistantResponse => "assistant_response",
            ActivityKind::Error => "error",
            ActivityKind::Log => "log",
            ActivityKind::Text => "text",
            ActivityKind::Diagnostic => "diagnostic",
            ActivityKind::System => "system",
        }
    }
}

impl std::fmt::Display for ActivityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// An immutable, timestamped event in an agent's timeline
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Activity {
    pub id: String,
    pub agent_id: String,
    /// Per-agent emission order, starting at 1
    pub sequence: u64,
    pub timestamp: DateTime<Utc>,
    pub kind: ActivityKind,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_research_new_is_pending() {
        let research = Research::new("espresso", "/tmp/espresso", "anthropic", "claude-sonnet-4-5");
        assert_eq!(research.status, ResearchStatus::Pending);
        assert!(research.completed_at.is_none());
        assert!(!research.id.is_empty());
    }

    #[test]
    fn test_agent_serialization_is_camel_case() {
        let agent = Agent::new("research-1", "researcher");
        let json = serde_json::to_string(&agent).unwrap();
        assert!(json.contains("\"researchId\":\"research-1\""));
        assert!(json.contains("\"status\":\"pending\""));
        assert!(json.contains("\"resumeCount\":0"));
    }

    #[test]
    fn test_activity_kind_round_trips_snake_case() {
        let json = serde_json::to_string(&ActivityKind::AssistantResponse).unwrap();
        assert_eq!(json, "\"assistant_response\"");
        let kind: ActivityKind = serde_json::from_str("\"tool_call\"").unwrap();
        assert_eq!(kind, ActivityKind::ToolCall);
    }

    #[test]
    fn test_activity_omits_empty_metadata() {
        let activity = Activity {
            id: "a-1".to_string(),
            agent_id: "agent-1".to_string(),
            sequence: 1,
            timestamp: Utc::now(),
            kind: ActivityKind::Text,
            description: "hello".to_string(),
            metadata: None,
        };
        let json = serde_json::to_string(&activity).unwrap();
        assert!(!json.contains("metadata"));
    }

    #[test]
    fn test_status_display() {
        assert_eq!(ResearchStatus::InProgress.to_string(), "in_progress");
        assert_eq!(AgentStatus::Running.to_string(), "running");
    }
}
