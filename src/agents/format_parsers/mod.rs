// Worker output decoders
//
// The worker prints two kinds of stdout: self-contained JSON messages with a
// `type` field, and pretty-printed tool-call fragments spread over many lines.
// `messages` decodes the former, `fragments` classifies lines of the latter,
// and `generic` holds the shared argument and truncation helpers.

pub mod fragments;
pub mod generic;
pub mod messages;

pub use generic::{describe_tool_call, truncate_content, value_as_percentage};
pub use messages::{parse_structured_line, WorkerMessage};
