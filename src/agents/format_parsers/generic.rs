// Shared helpers for worker output parsing
//
// Truncation caps, string unescaping and tool-call descriptions used by both
// the structured message decoder and the fragment parser.

use crate::utils::{collapse_whitespace, truncate_chars};
use serde_json::{Map, Value};

/// Default cap for tool results and assistant responses
pub const RESULT_MAX_LENGTH: usize = 500;

/// Cap for results of file-read tools
pub const READ_FILE_MAX_LENGTH: usize = 2000;

/// Appended to content that was cut
pub const TRUNCATION_MARKER: &str = "... [truncated]";

/// Cap for the quoted value inside a tool-call description
pub const DESCRIPTION_VALUE_MAX: usize = 160;

/// Argument keys captured from tool-invocation fragments
pub const ARGUMENT_KEYS: &[&str] = &[
    "query",
    "url",
    "path",
    "filePath",
    "title",
    "description",
    "category",
    "percentage",
    "current_task",
    "repo",
    "reasoning",
];

/// Arguments consulted for a description, highest priority first
const DESCRIPTION_PRIORITY: &[&str] = &[
    "query",
    "url",
    "path",
    "filePath",
    "title",
    "current_task",
    "repo",
];

pub fn is_argument_key(key: &str) -> bool {
    ARGUMENT_KEYS.contains(&key)
}

/// Truncate content to `max` characters. Returns the text and whether it was cut.
pub fn truncate_content(s: &str, max: usize) -> (String, bool) {
    let was_cut = s.chars().nth(max).is_some();
    (truncate_chars(s, max, TRUNCATION_MARKER), was_cut)
}

/// Whether a tool name denotes a file read, which gets the larger result cap
pub fn is_file_read_tool(name: &str) -> bool {
    let lower = name.to_ascii_lowercase();
    matches!(
        lower.as_str(),
        "read_file" | "read_text_file" | "read_multiple_files" | "read"
    ) || lower.ends_with("read_file")
}

/// Unescape the JSON-style escapes seen in captured result text.
///
/// Handles `\n`, `\t`, `\r`, `\"`, `\\` and `\/`. Anything else is kept verbatim.
pub fn unescape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars();

    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('r') => out.push('\r'),
            Some('"') => out.push('"'),
            Some('\\') => out.push('\\'),
            Some('/') => out.push('/'),
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }

    out
}

/// Render a JSON value as display text (strings unquoted)
pub fn value_to_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Numeric percentage from a number or a numeric string
pub fn value_as_percentage(value: &Value) -> Option<f64> {
    let parsed = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().trim_end_matches('%').trim().parse().ok(),
        _ => None,
    };
    parsed.filter(|p| p.is_finite())
}

/// Build `<tool>: "<value>"` from the highest-priority argument present,
/// or just the tool name when none of them is.
pub fn describe_tool_call(tool: &str, args: &Map<String, Value>) -> String {
    for key in DESCRIPTION_PRIORITY {
        if let Some(value) = args.get(*key) {
            let text = collapse_whitespace(&value_to_text(value));
            if text.is_empty() {
                continue;
            }
            let capped = truncate_chars(&text, DESCRIPTION_VALUE_MAX, "");
            return format!("{}: \"{}\"", tool, capped);
        }
    }
    tool.to_string()
}

/// Keep only allow-listed argument keys
pub fn filter_arguments(args: &Map<String, Value>) -> Map<String, Value> {
    args.iter()
        .filter(|(k, _)| is_argument_key(k))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}
