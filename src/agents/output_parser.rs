// Parsed worker output types
//
// Common types produced by the stream parser and consumed by the supervisor.
// Format-specific decoding lives in format_parsers/.

use crate::agents::format_parsers::generic::value_as_percentage;
use crate::models::ActivityKind;
use serde_json::Value;

/// One activity extracted from worker stdout, not yet persisted
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedActivity {
    pub kind: ActivityKind,
    pub description: String,
    pub metadata: Option<Value>,
}

/// Progress carried by a parsed activity
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressUpdate {
    pub percentage: f64,
    pub current_task: Option<String>,
}

impl ParsedActivity {
    pub fn new(kind: ActivityKind, description: impl Into<String>) -> Self {
        Self {
            kind,
            description: description.into(),
            metadata: None,
        }
    }

    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = Some(metadata);
        self
    }

    /// Tool name for tool calls and results
    pub fn tool_name(&self) -> Option<&str> {
        self.metadata.as_ref()?.get("tool")?.as_str()
    }

    fn tool_args(&self) -> Option<&serde_json::Map<String, Value>> {
        if self.kind != ActivityKind::ToolCall {
            return None;
        }
        self.metadata.as_ref()?.get("args")?.as_object()
    }

    /// A tool invocation reporting exactly 100% marks the research complete.
    /// Plain progress messages never do.
    pub fn completion_signal(&self) -> bool {
        self.tool_args()
            .and_then(|args| args.get("percentage"))
            .and_then(value_as_percentage)
            .map_or(false, |p| p == 100.0)
    }

    /// Progress reported by a progress message or a tool call carrying a percentage
    pub fn progress_update(&self) -> Option<ProgressUpdate> {
        match self.kind {
            ActivityKind::Progress => {
                let metadata = self.metadata.as_ref()?;
                let percentage = metadata.get("percentage").and_then(value_as_percentage)?;
                let current_task = metadata
                    .get("message")
                    .and_then(|v| v.as_str())
                    .map(String::from);
                Some(ProgressUpdate {
                    percentage,
                    current_task,
                })
            }
            ActivityKind::ToolCall => {
                let args = self.tool_args()?;
                let percentage = args.get("percentage").and_then(value_as_percentage)?;
                let current_task = args
                    .get("current_task")
                    .and_then(|v| v.as_str())
                    .map(String::from);
                Some(ProgressUpdate {
                    percentage,
                    current_task,
                })
            }
            _ => None,
        }
    }
}
