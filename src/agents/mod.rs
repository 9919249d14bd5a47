// Worker process spawning, monitoring and output parsing

pub mod diagnostics;
pub mod format_parsers;
pub mod log_collector;
pub mod manager;
pub mod output_parser;
pub mod path_resolver;
pub mod sentinel;
pub mod stream_parser;

// Re-export for convenience
pub use log_collector::LogCollector;
pub use manager::{AgentManager, LaunchSpec, ManagerConfig};
pub use output_parser::{ParsedActivity, ProgressUpdate};
pub use stream_parser::{EmptyCallPolicy, ParserConfig, ParserState, StreamingParser};
