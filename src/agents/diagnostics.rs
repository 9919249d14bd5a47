// Fatal stderr detection for worker processes
//
// Worker stderr is mostly warnings and tracebacks from retried calls. Only a
// fixed set of patterns means the run cannot make progress.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

/// Categories of stderr output that fail a run
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FatalKind {
    /// `ModuleNotFoundError` / `No module named ...`
    MissingModule,
    /// Invalid or missing API key, authentication failure
    Authentication,
    UnsupportedProvider,
    /// Prompt template file missing
    MissingPromptTemplate,
    OutOfMemory,
}

impl FatalKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FatalKind::MissingModule => "missing_module",
            FatalKind::Authentication => "authentication",
            FatalKind::UnsupportedProvider => "unsupported_provider",
            FatalKind::MissingPromptTemplate => "missing_prompt_template",
            FatalKind::OutOfMemory => "out_of_memory",
        }
    }
}

/// Classification of one stderr line
#[derive(Debug, Clone, PartialEq)]
pub enum Diagnostic {
    /// Recorded and otherwise ignored
    Noise,
    Fatal { kind: FatalKind, pattern: String },
}

static PATTERNS: OnceLock<Vec<CompiledPattern>> = OnceLock::new();

struct CompiledPattern {
    regex: Regex,
    kind: FatalKind,
}

fn get_patterns() -> &'static Vec<CompiledPattern> {
    PATTERNS.get_or_init(|| {
        let specs: &[(&str, FatalKind)] = &[
            (r"ModuleNotFoundError", FatalKind::MissingModule),
            (r"(?i)no module named", FatalKind::MissingModule),
            (r"(?i)invalid[\s_-]*api[\s_-]*key", FatalKind::Authentication),
            (r"(?i)authentication[\s_-]*(error|failed)", FatalKind::Authentication),
            (r"(?i)incorrect api key", FatalKind::Authentication),
            (r"(?i)\b401\b\s*unauthorized", FatalKind::Authentication),
            (r"(?i)unsupported provider", FatalKind::UnsupportedProvider),
            (
                r"(?i)prompt[\s_-]*template.*(not found|missing|no such file)",
                FatalKind::MissingPromptTemplate,
            ),
            (r"MemoryError", FatalKind::OutOfMemory),
            (r"(?i)out of memory", FatalKind::OutOfMemory),
        ];

        specs
            .iter()
            .filter_map(|(pattern, kind)| match Regex::new(pattern) {
                Ok(regex) => Some(CompiledPattern { regex, kind: *kind }),
                Err(e) => {
                    log::error!("Invalid diagnostic pattern {}: {}", pattern, e);
                    None
                }
            })
            .collect()
    })
}

/// Classify a stderr line. A bare `Traceback` header is noise on its own.
pub fn classify_stderr(line: &str) -> Diagnostic {
    for pattern in get_patterns() {
        if let Some(m) = pattern.regex.find(line) {
            return Diagnostic::Fatal {
                kind: pattern.kind,
                pattern: m.as_str().to_string(),
            };
        }
    }
    Diagnostic::Noise
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fatal_kind(line: &str) -> Option<FatalKind> {
        match classify_stderr(line) {
            Diagnostic::Fatal { kind, .. } => Some(kind),
            Diagnostic::Noise => None,
        }
    }

    #[test]
    fn test_traceback_is_not_fatal() {
        assert_eq!(fatal_kind("Traceback (most recent call last):"), None);
        assert_eq!(fatal_kind("  File \"agent.py\", line 12, in <module>"), None);
    }

    #[test]
    fn test_warnings_are_noise() {
        assert_eq!(fatal_kind("DeprecationWarning: datetime.utcnow() is deprecated"), None);
        assert_eq!(fatal_kind("INFO: retrying request"), None);
    }

    #[test]
    fn test_missing_module() {
        assert_eq!(
            fatal_kind("ModuleNotFoundError: No module named 'mcp_agent'"),
            Some(FatalKind::MissingModule)
        );
    }

    #[test]
    fn test_authentication() {
        assert_eq!(
            fatal_kind("anthropic.AuthenticationError: invalid x-api-key"),
            Some(FatalKind::Authentication)
        );
        assert_eq!(
            fatal_kind("Error: Invalid API key provided"),
            Some(FatalKind::Authentication)
        );
    }

    #[test]
    fn test_other_fatal_kinds() {
        assert_eq!(
            fatal_kind("ValueError: Unsupported provider: foo"),
            Some(FatalKind::UnsupportedProvider)
        );
        assert_eq!(
            fatal_kind("Prompt template not found: research.md"),
            Some(FatalKind::MissingPromptTemplate)
        );
        assert_eq!(fatal_kind("MemoryError"), Some(FatalKind::OutOfMemory));
        assert_eq!(fatal_kind("fatal: out of memory"), Some(FatalKind::OutOfMemory));
    }
}
