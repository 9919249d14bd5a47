// Tool-invocation fragment classification
//
// Workers print tool invocations as pretty-printed JSON spread over many
// lines, in two dialects:
//
//   A:  "tool_name": "web_search",          B:  "function_call": {
//       "arguments": {                              "name": "web_search",
//         "query": "espresso"                       "arguments": {
//       }                                             "query": "espresso"
//                                                   }
//                                                 }
//
// Each line is classified on its own by an ordered chain of predicates. The
// stream parser decides what a fragment means based on its current state.

use super::generic::is_argument_key;
use regex::Regex;
use serde_json::{Map, Value};
use std::sync::OnceLock;

/// Structural shape of a single trimmed line
#[derive(Debug, Clone, PartialEq)]
pub enum Fragment {
    /// `</tool_call>`, `</function_call>`, `}}` or `}},`
    CloseMarker,
    /// `<tool_call>` tag carrying a complete `{"name": .., "arguments": ..}` body
    InlineCall { name: String, args: Map<String, Value> },
    /// Explicit call context: `"function_call": {`, `"tool_call"`, `"tool_use"`, `<tool_call>`
    CallMarker,
    /// Dialect A: `"tool_name": "<name>"`
    ToolName(String),
    /// Dialect B: bare `"name": "<name>"`
    Name(String),
    /// `"arguments": {` opening a multi-line block
    ArgumentsOpen,
    /// Arguments given on one line, as an object or a JSON-encoded string
    ArgumentsInline(Map<String, Value>),
    /// Allow-listed `"key": value` pair
    Argument(String, Value),
    /// `"result"`/`"text"`/`"output"` string complete on this line (still escaped)
    ResultComplete { key: String, raw: String },
    /// Same, but the string continues on following lines
    ResultStart { key: String, raw: String, escaped: bool },
    /// Schema keys, bare brackets and similar
    Noise,
    /// Nothing recognizable
    Other,
}

const CLOSE_MARKERS: &[&str] = &["</tool_call>", "</function_call>", "}}", "}},"];

const CALL_MARKER_KEYS: &[&str] = &["function_call", "tool_call", "tool_use"];

const ARGUMENTS_KEYS: &[&str] = &["arguments", "args", "input"];

const SCHEMA_KEYS: &[&str] = &[
    "function",
    "parameters",
    "properties",
    "required",
    "additionalProperties",
    "$schema",
    "inputSchema",
    "items",
    "enum",
];

const SCHEMA_TYPES: &[&str] = &["object", "string", "array", "number", "integer", "boolean"];

static KEY_VALUE_PATTERN: OnceLock<Regex> = OnceLock::new();
static RESULT_START_PATTERN: OnceLock<Regex> = OnceLock::new();

/// `"key": rest` at the start of a line
fn get_key_value_pattern() -> &'static Regex {
    KEY_VALUE_PATTERN.get_or_init(|| {
        Regex::new(r#"^"([A-Za-z_$][A-Za-z0-9_$]*)"\s*:\s*(.*)$"#).expect("valid key/value regex")
    })
}

fn get_result_start_pattern() -> &'static Regex {
    RESULT_START_PATTERN.get_or_init(|| {
        Regex::new(r#"^"(result|text|output)"\s*:\s*""#).expect("valid result regex")
    })
}

/// Split a `"key": value` line into key and the raw value text (trailing comma removed)
pub fn split_key_value(line: &str) -> Option<(&str, &str)> {
    let caps = get_key_value_pattern().captures(line)?;
    let key = caps.get(1)?.as_str();
    let rest = caps.get(2)?.as_str().trim();
    let rest = rest.strip_suffix(',').unwrap_or(rest).trim_end();
    Some((key, rest))
}

/// Decode a raw value as a JSON scalar/string
fn decode_value(raw: &str) -> Option<Value> {
    serde_json::from_str::<Value>(raw).ok()
}

fn string_value_for(line: &str, wanted: &str) -> Option<String> {
    let (key, raw) = split_key_value(line)?;
    if key != wanted {
        return None;
    }
    match decode_value(raw)? {
        Value::String(s) if !s.trim().is_empty() => Some(s),
        _ => None,
    }
}

/// `"tool_name": "<n>"`
pub fn extract_tool_name(line: &str) -> Option<String> {
    string_value_for(line, "tool_name")
}

/// Bare `"name": "<n>"`
pub fn extract_name(line: &str) -> Option<String> {
    string_value_for(line, "name")
}

/// Allow-listed `"key": <json value>` pair
pub fn extract_argument_pair(line: &str) -> Option<(String, Value)> {
    let (key, raw) = split_key_value(line)?;
    if !is_argument_key(key) {
        return None;
    }
    let value = decode_value(raw)?;
    match value {
        Value::Object(_) | Value::Array(_) => None,
        scalar => Some((key.to_string(), scalar)),
    }
}

pub fn is_close_marker(line: &str) -> bool {
    CLOSE_MARKERS.contains(&line)
}

/// `"function_call": {` style markers, or an opening `<tool_call>` tag
pub fn is_call_marker(line: &str) -> bool {
    if line.starts_with("<tool_call>") || line.starts_with("<function_call>") {
        return true;
    }
    match split_key_value(line) {
        Some((key, rest)) => CALL_MARKER_KEYS.contains(&key) && (rest.is_empty() || rest == "{"),
        None => false,
    }
}

/// `"arguments": {` opening a block. Returns false for inline forms.
pub fn has_arguments_key(line: &str) -> bool {
    match split_key_value(line) {
        Some((key, rest)) => ARGUMENTS_KEYS.contains(&key) && rest == "{",
        None => false,
    }
}

/// `"arguments": {...}` or `"arguments": "{...}"` complete on one line
pub fn extract_inline_arguments(line: &str) -> Option<Map<String, Value>> {
    let (key, raw) = split_key_value(line)?;
    if !ARGUMENTS_KEYS.contains(&key) {
        return None;
    }
    match decode_value(raw)? {
        Value::Object(map) => Some(map),
        Value::String(encoded) => match serde_json::from_str::<Value>(&encoded) {
            Ok(Value::Object(map)) => Some(map),
            _ => None,
        },
        _ => None,
    }
}

/// `<tool_call>{"name": "x", "arguments": {...}}</tool_call>` on one line
fn extract_tagged_call(line: &str) -> Option<(String, Map<String, Value>)> {
    let body = line
        .strip_prefix("<tool_call>")
        .or_else(|| line.strip_prefix("<function_call>"))?;
    let body = body
        .trim()
        .trim_end_matches("</tool_call>")
        .trim_end_matches("</function_call>")
        .trim();
    let value: Value = serde_json::from_str(body).ok()?;
    let name = value.get("name")?.as_str()?.to_string();
    let args = match value.get("arguments") {
        Some(Value::Object(map)) => map.clone(),
        Some(Value::String(encoded)) => match serde_json::from_str::<Value>(encoded) {
            Ok(Value::Object(map)) => map,
            _ => Map::new(),
        },
        _ => Map::new(),
    };
    Some((name, args))
}

/// Find the byte index of the closing unescaped quote.
///
/// `escaped` carries backslash state across calls so a string can be scanned
/// line by line.
pub fn scan_string_end(s: &str, escaped: &mut bool) -> Option<usize> {
    for (idx, c) in s.char_indices() {
        if *escaped {
            *escaped = false;
            continue;
        }
        match c {
            '\\' => *escaped = true,
            '"' => return Some(idx),
            _ => {}
        }
    }
    None
}

/// Start of a quoted result field in a non-JSON line
pub fn extract_result_start(line: &str) -> Option<Fragment> {
    let m = get_result_start_pattern().captures(line)?;
    let key = m.get(1)?.as_str().to_string();
    let rest = &line[m.get(0)?.end()..];

    let mut escaped = false;
    match scan_string_end(rest, &mut escaped) {
        Some(end) => Some(Fragment::ResultComplete {
            key,
            raw: rest[..end].to_string(),
        }),
        None => Some(Fragment::ResultStart {
            key,
            raw: rest.to_string(),
            escaped,
        }),
    }
}

/// Net brace depth change of a line, ignoring braces inside strings
pub fn brace_delta(line: &str) -> i32 {
    let mut depth = 0;
    let mut in_string = false;
    let mut escaped = false;

    for c in line.chars() {
        if in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => depth -= 1,
            _ => {}
        }
    }

    depth
}

/// Lines that carry no information outside an active call
pub fn is_noise(line: &str) -> bool {
    if line
        .chars()
        .all(|c| matches!(c, '{' | '}' | '[' | ']' | '(' | ')' | ',') || c.is_whitespace())
    {
        return true;
    }

    let Some((key, rest)) = split_key_value(line) else {
        return false;
    };

    if SCHEMA_KEYS.contains(&key) {
        return true;
    }

    if key == "type" {
        if let Some(Value::String(t)) = decode_value(rest) {
            return SCHEMA_TYPES.contains(&t.as_str());
        }
    }

    // Bare structural openers such as `"query": {`
    rest == "{" || rest == "["
}

/// A one-line object with a single key, e.g. `{"tool_name":"web_search"}`,
/// rewritten as the bare `"key": value` pair it carries
fn unwrap_single_pair(line: &str) -> Option<String> {
    if !line.starts_with('{') || !line.ends_with('}') {
        return None;
    }
    match serde_json::from_str::<Value>(line).ok()? {
        Value::Object(map) if map.len() == 1 => {
            let (key, value) = map.into_iter().next()?;
            Some(format!("{}: {}", Value::String(key), value))
        }
        _ => None,
    }
}

/// Classify a trimmed line. Order matters: earlier predicates win.
pub fn classify_line(line: &str) -> Fragment {
    if is_close_marker(line) {
        return Fragment::CloseMarker;
    }
    if let Some(pair) = unwrap_single_pair(line) {
        return classify_line(&pair);
    }
    if let Some((name, args)) = extract_tagged_call(line) {
        return Fragment::InlineCall { name, args };
    }
    if is_call_marker(line) {
        return Fragment::CallMarker;
    }
    if let Some(name) = extract_tool_name(line) {
        return Fragment::ToolName(name);
    }
    if let Some(name) = extract_name(line) {
        return Fragment::Name(name);
    }
    if has_arguments_key(line) {
        return Fragment::ArgumentsOpen;
    }
    if let Some(args) = extract_inline_arguments(line) {
        return Fragment::ArgumentsInline(args);
    }
    if let Some((key, value)) = extract_argument_pair(line) {
        return Fragment::Argument(key, value);
    }
    if let Some(result) = extract_result_start(line) {
        return result;
    }
    if is_noise(line) {
        return Fragment::Noise;
    }
    Fragment::Other
}
