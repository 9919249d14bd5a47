// Streaming line parser for worker stdout
//
// Bytes are buffered until newline boundaries, so the activities produced do
// not depend on how the stream was chunked. Each complete line is either a
// structured message, a tool-invocation fragment, noise, or opaque text.

use crate::agents::format_parsers::fragments::{brace_delta, classify_line, scan_string_end, Fragment};
use crate::agents::format_parsers::generic::{
    describe_tool_call, filter_arguments, truncate_content, unescape, READ_FILE_MAX_LENGTH,
    RESULT_MAX_LENGTH,
};
use crate::agents::format_parsers::messages::{
    message_to_activity, parse_structured_line, text_activity, ContentCaps,
};
use crate::agents::output_parser::ParsedActivity;
use crate::models::ActivityKind;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

/// Lines longer than this are cut at exactly this many bytes
pub const MAX_LINE_BYTES: usize = 1024 * 1024;

/// Whether an explicitly marked call (dialect B) may emit with no arguments
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum EmptyCallPolicy {
    #[default]
    EmitWhenMarked,
    Suppress,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ParserConfig {
    pub result_max_length: usize,
    pub read_file_max_length: usize,
    pub empty_call_policy: EmptyCallPolicy,
}

impl Default for ParserConfig {
    fn default() -> Self {
        Self {
            result_max_length: RESULT_MAX_LENGTH,
            read_file_max_length: READ_FILE_MAX_LENGTH,
            empty_call_policy: EmptyCallPolicy::default(),
        }
    }
}

impl ParserConfig {
    fn caps(&self) -> ContentCaps {
        ContentCaps {
            result_max_length: self.result_max_length,
            read_file_max_length: self.read_file_max_length,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParserState {
    Idle,
    CollectingCall,
    CollectingArgs,
    BufferingResult,
}

/// Partial result text being captured across lines
#[derive(Debug, Default)]
struct ResultBuffer {
    key: String,
    raw: String,
    escaped: bool,
}

/// Incremental parser for one worker's stdout
pub struct StreamingParser {
    config: ParserConfig,
    state: ParserState,
    /// Bytes of the current incomplete line
    pending: Vec<u8>,
    /// Tool name awaiting emission
    tool_name: Option<String>,
    /// Allow-listed arguments captured so far
    arguments: Map<String, Value>,
    /// Explicit call context (a call marker was seen)
    in_call: bool,
    /// Brace depth inside the arguments block
    depth: i32,
    /// The arguments block closed before the call's name arrived
    arguments_closed: bool,
    result: ResultBuffer,
    /// Most recent tool invoked, used to pick the result cap
    last_tool: Option<String>,
}

impl StreamingParser {
    pub fn new(config: ParserConfig) -> Self {
        Self {
            config,
            state: ParserState::Idle,
            pending: Vec::new(),
            tool_name: None,
            arguments: Map::new(),
            in_call: false,
            depth: 0,
            arguments_closed: false,
            result: ResultBuffer::default(),
            last_tool: None,
        }
    }

    pub fn state(&self) -> ParserState {
        self.state
    }

    pub fn last_tool(&self) -> Option<&str> {
        self.last_tool.as_deref()
    }

    /// Feed a chunk of raw bytes. Returns activities for every line completed.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<ParsedActivity> {
        self.pending.extend_from_slice(chunk);
        let mut out = Vec::new();

        loop {
            let limit = self.pending.len().min(MAX_LINE_BYTES);
            match self.pending[..limit].iter().position(|b| *b == b'\n') {
                Some(pos) => {
                    let mut line: Vec<u8> = self.pending.drain(..=pos).collect();
                    line.pop();
                    if line.last() == Some(&b'\r') {
                        line.pop();
                    }
                    self.process_line(&String::from_utf8_lossy(&line), &mut out);
                }
                None if self.pending.len() >= MAX_LINE_BYTES => {
                    let line: Vec<u8> = self.pending.drain(..MAX_LINE_BYTES).collect();
                    log::debug!("Cutting overlong stdout line at {} bytes", MAX_LINE_BYTES);
                    self.process_line(&String::from_utf8_lossy(&line), &mut out);
                }
                None => break,
            }
        }

        out
    }

    /// Flush at end of stream: the trailing unterminated line, an unterminated
    /// result, and a pending call that already captured arguments.
    pub fn finish(&mut self) -> Vec<ParsedActivity> {
        let mut out = Vec::new();

        if !self.pending.is_empty() {
            let mut line = std::mem::take(&mut self.pending);
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            self.process_line(&String::from_utf8_lossy(&line), &mut out);
        }

        match self.state {
            ParserState::BufferingResult => self.emit_result(&mut out),
            ParserState::CollectingCall | ParserState::CollectingArgs => {
                if !self.arguments.is_empty() {
                    self.emit_call(&mut out);
                }
                self.reset_call();
            }
            ParserState::Idle => {}
        }

        out
    }

    fn process_line(&mut self, line: &str, out: &mut Vec<ParsedActivity>) {
        if self.state == ParserState::BufferingResult {
            self.continue_result(line, out);
            return;
        }

        let trimmed = line.trim();
        if trimmed.is_empty() {
            return;
        }

        if let Some((msg_type, value)) = parse_structured_line(trimmed) {
            let caps = self.config.caps();
            out.push(message_to_activity(
                &msg_type,
                value,
                trimmed,
                caps,
                &mut self.last_tool,
            ));
            return;
        }

        let fragment = classify_line(trimmed);
        match self.state {
            ParserState::Idle => self.handle_idle(fragment, trimmed, out),
            ParserState::CollectingCall => self.handle_call(fragment, trimmed, out),
            ParserState::CollectingArgs => self.handle_args(fragment, trimmed, out),
            ParserState::BufferingResult => {}
        }
    }

    fn handle_idle(&mut self, fragment: Fragment, line: &str, out: &mut Vec<ParsedActivity>) {
        match fragment {
            Fragment::CallMarker => {
                self.reset_call();
                self.in_call = true;
                self.state = ParserState::CollectingCall;
            }
            Fragment::ToolName(name) => {
                self.reset_call();
                self.tool_name = Some(name);
                self.state = ParserState::CollectingCall;
            }
            Fragment::InlineCall { name, args } => {
                self.reset_call();
                self.in_call = true;
                self.tool_name = Some(name);
                self.arguments = filter_arguments(&args);
                self.emit_call(out);
                self.reset_call();
            }
            Fragment::ResultComplete { key, raw } => {
                self.result = ResultBuffer {
                    key,
                    raw,
                    escaped: false,
                };
                self.emit_result(out);
            }
            Fragment::ResultStart { key, raw, escaped } => {
                self.result = ResultBuffer { key, raw, escaped };
                self.state = ParserState::BufferingResult;
            }
            Fragment::Other => out.push(text_activity(line, self.config.result_max_length)),
            // Schema dumps: `"name"`, `"description"` and other unconsumed fragments
            Fragment::Name(_)
            | Fragment::Argument(..)
            | Fragment::ArgumentsOpen
            | Fragment::ArgumentsInline(_)
            | Fragment::CloseMarker
            | Fragment::Noise => {}
        }
    }

    fn handle_call(&mut self, fragment: Fragment, line: &str, out: &mut Vec<ParsedActivity>) {
        match fragment {
            Fragment::Name(name) => {
                if self.tool_name.is_none() {
                    self.tool_name = Some(name);
                    if self.arguments_closed {
                        self.emit_call(out);
                        self.reset_call();
                    }
                }
            }
            Fragment::ToolName(name) => {
                // A new dialect A call replaces one that never closed
                self.flush_abandoned(out);
                self.tool_name = Some(name);
                self.state = ParserState::CollectingCall;
            }
            Fragment::CallMarker => {
                self.flush_abandoned(out);
                self.in_call = true;
                self.state = ParserState::CollectingCall;
            }
            Fragment::ArgumentsOpen => {
                self.state = ParserState::CollectingArgs;
                self.depth = 1;
            }
            Fragment::ArgumentsInline(args) => {
                self.arguments.extend(filter_arguments(&args));
                if self.tool_name.is_some() {
                    self.emit_call(out);
                    self.reset_call();
                } else {
                    self.arguments_closed = true;
                }
            }
            Fragment::Argument(key, value) => {
                self.arguments.insert(key, value);
            }
            Fragment::CloseMarker => {
                if self.tool_name.is_some() {
                    self.emit_call(out);
                }
                self.reset_call();
            }
            Fragment::InlineCall { name, args } => {
                self.flush_abandoned(out);
                self.in_call = true;
                self.tool_name = Some(name);
                self.arguments = filter_arguments(&args);
                self.emit_call(out);
                self.reset_call();
            }
            Fragment::Other if !looks_structural(line) => {
                // Prose ends the call context
                self.flush_abandoned(out);
                out.push(text_activity(line, self.config.result_max_length));
            }
            Fragment::Other
            | Fragment::Noise
            | Fragment::ResultComplete { .. }
            | Fragment::ResultStart { .. } => {}
        }
    }

    fn handle_args(&mut self, fragment: Fragment, line: &str, out: &mut Vec<ParsedActivity>) {
        match &fragment {
            Fragment::Argument(key, value) => {
                self.arguments.insert(key.clone(), value.clone());
            }
            Fragment::ArgumentsInline(args) => {
                self.arguments.extend(filter_arguments(args));
            }
            Fragment::CloseMarker => {
                if self.tool_name.is_some() {
                    self.emit_call(out);
                }
                self.reset_call();
                return;
            }
            Fragment::Other if !looks_structural(line) => {
                self.flush_abandoned(out);
                out.push(text_activity(line, self.config.result_max_length));
                return;
            }
            _ => {}
        }

        self.depth += brace_delta(line);
        if self.depth <= 0 {
            if self.tool_name.is_some() {
                self.emit_call(out);
                self.reset_call();
            } else if self.in_call {
                // Arguments came first; the name follows inside the same call
                self.state = ParserState::CollectingCall;
                self.depth = 0;
                self.arguments_closed = true;
            } else {
                self.reset_call();
            }
        }
    }

    fn continue_result(&mut self, line: &str, out: &mut Vec<ParsedActivity>) {
        match scan_string_end(line, &mut self.result.escaped) {
            Some(end) => {
                self.push_result_text(&line[..end]);
                self.emit_result(out);
            }
            None => self.push_result_text(line),
        }
    }

    fn push_result_text(&mut self, text: &str) {
        if self.result.raw.len() >= MAX_LINE_BYTES {
            return;
        }
        self.result.raw.push('\n');
        self.result.raw.push_str(text);
    }

    fn emit_result(&mut self, out: &mut Vec<ParsedActivity>) {
        let buffer = std::mem::take(&mut self.result);
        self.state = ParserState::Idle;

        let content = unescape(&buffer.raw);
        let cap = self.config.caps().for_tool(self.last_tool.as_deref());
        let (text, truncated) = truncate_content(&content, cap);

        out.push(
            ParsedActivity::new(ActivityKind::ToolResult, text).with_metadata(json!({
                "tool": self.last_tool,
                "key": buffer.key,
                "truncated": truncated,
                "source": "fragment",
            })),
        );
    }

    /// Emit the pending call, honoring the suppression rules
    fn emit_call(&mut self, out: &mut Vec<ParsedActivity>) {
        let Some(tool) = self.tool_name.clone() else {
            return;
        };

        if self.arguments.is_empty() {
            let allowed =
                self.in_call && self.config.empty_call_policy == EmptyCallPolicy::EmitWhenMarked;
            if !allowed {
                log::debug!("Suppressing argument-less call to {}", tool);
                return;
            }
        }

        let description = describe_tool_call(&tool, &self.arguments);
        self.last_tool = Some(tool.clone());
        out.push(
            ParsedActivity::new(ActivityKind::ToolCall, description).with_metadata(json!({
                "tool": tool,
                "args": Value::Object(self.arguments.clone()),
                "source": "fragment",
            })),
        );
    }

    /// A call interrupted before any closing marker. Emitted only if it captured arguments.
    fn flush_abandoned(&mut self, out: &mut Vec<ParsedActivity>) {
        if self.tool_name.is_some() && !self.arguments.is_empty() {
            self.emit_call(out);
        }
        self.reset_call();
    }

    fn reset_call(&mut self) {
        self.state = ParserState::Idle;
        self.tool_name = None;
        self.arguments = Map::new();
        self.in_call = false;
        self.depth = 0;
        self.arguments_closed = false;
    }
}

/// JSON-ish lines stay inside a call; anything else is prose
fn looks_structural(line: &str) -> bool {
    matches!(
        line.chars().next(),
        Some('"') | Some('{') | Some('}') | Some('[') | Some(']') | Some('<')
    )
}
