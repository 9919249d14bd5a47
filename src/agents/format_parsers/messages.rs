// Structured worker messages
//
// Whole-line JSON objects with a string `type` field. Known types decode into
// `WorkerMessage`; lifecycle milestones are recognized by name; anything else
// (including a known type whose fields have the wrong shape) becomes text.

use super::generic::{describe_tool_call, filter_arguments, is_file_read_tool, truncate_content, value_to_text};
use crate::agents::output_parser::ParsedActivity;
use crate::models::ActivityKind;
use serde::Deserialize;
use serde_json::{json, Map, Value};

/// Caps applied while mapping messages to activities
#[derive(Debug, Clone, Copy)]
pub struct ContentCaps {
    pub result_max_length: usize,
    pub read_file_max_length: usize,
}

impl ContentCaps {
    pub fn for_tool(&self, tool: Option<&str>) -> usize {
        match tool {
            Some(name) if is_file_read_tool(name) => self.read_file_max_length,
            _ => self.result_max_length,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkerMessage {
    Init {
        #[serde(default)]
        topic: Option<String>,
        #[serde(default)]
        provider: Option<String>,
        #[serde(default)]
        model: Option<String>,
        #[serde(default)]
        project_dir: Option<String>,
    },
    #[serde(alias = "function_call", alias = "tool_use")]
    ToolCall {
        #[serde(default, alias = "name", alias = "tool_name")]
        tool: Option<String>,
        #[serde(default, alias = "arguments", alias = "input")]
        args: Option<Value>,
    },
    ToolResult {
        #[serde(default)]
        tool: Option<String>,
        #[serde(default, alias = "result", alias = "text")]
        output: Option<String>,
    },
    Thought {
        #[serde(default)]
        content: Option<String>,
    },
    Progress {
        #[serde(default)]
        message: Option<String>,
        #[serde(default)]
        percentage: Option<Value>,
    },
    AssistantResponse {
        #[serde(default)]
        message_id: Option<Value>,
        #[serde(default)]
        response: Option<String>,
    },
    #[serde(alias = "message_loop_error")]
    Error {
        #[serde(default)]
        error: Option<String>,
        #[serde(default)]
        error_type: Option<String>,
    },
    Log {
        #[serde(default)]
        message: Option<String>,
    },
    #[serde(other)]
    Other,
}

/// Lifecycle milestones and their display text
const LIFECYCLE_TYPES: &[(&str, &str)] = &[
    ("app_started", "App started"),
    ("config_created", "Config created"),
    ("connecting_servers", "Connecting to servers"),
    ("tools_loaded", "Tools loaded"),
    ("research_started", "Research started"),
    ("llm_starting", "LLM starting"),
    ("llm_completed", "LLM completed"),
    ("research_completed", "Research completed"),
    ("research_fully_completed", "Research fully completed"),
    ("waiting_for_messages", "Waiting for messages"),
    ("message_loop_started", "Message loop started"),
    ("user_message_received", "User message received"),
    ("message_processed", "Message processed"),
    ("resume_mode", "Resume mode"),
    ("history_loaded", "History loaded"),
];

pub fn lifecycle_label(msg_type: &str) -> Option<&'static str> {
    LIFECYCLE_TYPES
        .iter()
        .find(|(name, _)| *name == msg_type)
        .map(|(_, label)| *label)
}

/// Decode a line as a structured message. `None` when the line is not a JSON
/// object with a string `type`.
pub fn parse_structured_line(line: &str) -> Option<(String, Value)> {
    let trimmed = line.trim();
    if !trimmed.starts_with('{') || !trimmed.ends_with('}') {
        return None;
    }
    let value: Value = serde_json::from_str(trimmed).ok()?;
    let msg_type = value.get("type")?.as_str()?.to_string();
    Some((msg_type, value))
}

/// Map a structured message to an activity.
///
/// `last_tool` is the most recent tool name seen; it picks the result cap when
/// the result itself does not name its tool, and is updated by tool calls.
pub fn message_to_activity(
    msg_type: &str,
    value: Value,
    raw_line: &str,
    caps: ContentCaps,
    last_tool: &mut Option<String>,
) -> ParsedActivity {
    if let Some(label) = lifecycle_label(msg_type) {
        return ParsedActivity::new(ActivityKind::Lifecycle, lifecycle_description(label, &value))
            .with_metadata(value);
    }

    let message = match serde_json::from_value::<WorkerMessage>(value.clone()) {
        Ok(message) => message,
        Err(e) => {
            log::debug!("Structured line of type '{}' did not decode: {}", msg_type, e);
            return text_activity(raw_line.trim(), caps.result_max_length);
        }
    };

    match message {
        WorkerMessage::Init {
            topic,
            provider,
            model,
            ..
        } => {
            let description = match (provider, model) {
                (Some(p), Some(m)) => format!("Initialized with {}/{}", p, m),
                _ => "Worker initialized".to_string(),
            };
            let description = match topic {
                Some(t) => format!("{}: {}", description, t),
                None => description,
            };
            ParsedActivity::new(ActivityKind::Init, description).with_metadata(value)
        }
        WorkerMessage::ToolCall { tool, args } => {
            let tool = tool.unwrap_or_else(|| "tool".to_string());
            let args_map = args.as_ref().map(arguments_map).unwrap_or_default();
            let description = describe_tool_call(&tool, &args_map);
            *last_tool = Some(tool.clone());
            ParsedActivity::new(ActivityKind::ToolCall, description).with_metadata(json!({
                "tool": tool,
                "args": filter_arguments(&args_map),
                "rawArgs": args,
                "source": "message",
            }))
        }
        WorkerMessage::ToolResult { tool, output } => {
            let tool = tool.or_else(|| last_tool.clone());
            let cap = caps.for_tool(tool.as_deref());
            let (text, truncated) = truncate_content(output.as_deref().unwrap_or(""), cap);
            ParsedActivity::new(ActivityKind::ToolResult, text).with_metadata(json!({
                "tool": tool,
                "truncated": truncated,
                "source": "message",
            }))
        }
        WorkerMessage::Thought { content } => {
            ParsedActivity::new(ActivityKind::Thought, content.unwrap_or_default())
        }
        WorkerMessage::Progress {
            message,
            percentage,
        } => {
            let description = match (&message, &percentage) {
                (Some(m), _) => m.clone(),
                (None, Some(p)) => format!("Progress {}%", value_to_text(p)),
                (None, None) => "Progress".to_string(),
            };
            ParsedActivity::new(ActivityKind::Progress, description)
                .with_metadata(json!({"message": message, "percentage": percentage}))
        }
        WorkerMessage::AssistantResponse {
            message_id,
            response,
        } => {
            let (text, truncated) =
                truncate_content(response.as_deref().unwrap_or(""), caps.result_max_length);
            ParsedActivity::new(ActivityKind::AssistantResponse, text)
                .with_metadata(json!({"messageId": message_id, "truncated": truncated}))
        }
        WorkerMessage::Error { error, error_type } => ParsedActivity::new(
            ActivityKind::Error,
            error.unwrap_or_else(|| "Unknown error".to_string()),
        )
        .with_metadata(json!({"errorType": error_type, "type": msg_type})),
        WorkerMessage::Log { message } => {
            ParsedActivity::new(ActivityKind::Log, message.unwrap_or_default())
        }
        WorkerMessage::Other => text_activity(raw_line.trim(), caps.result_max_length),
    }
}

/// Opaque line recorded verbatim (capped)
pub fn text_activity(line: &str, cap: usize) -> ParsedActivity {
    let (text, _) = truncate_content(line, cap);
    ParsedActivity::new(ActivityKind::Text, text)
}

/// Arguments may arrive as an object, a JSON-encoded string, or free text
fn arguments_map(args: &Value) -> Map<String, Value> {
    match args {
        Value::Object(map) => map.clone(),
        Value::String(s) => match serde_json::from_str::<Value>(s) {
            Ok(Value::Object(map)) => map,
            _ => Map::new(),
        },
        _ => Map::new(),
    }
}

fn lifecycle_description(label: &str, value: &Value) -> String {
    if let Some(count) = value.get("count").and_then(|c| c.as_u64()) {
        return format!("{} ({})", label, count);
    }
    if let Some(status) = value.get("status").and_then(|s| s.as_str()) {
        return format!("{}: {}", label, status);
    }
    label.to_string()
}
