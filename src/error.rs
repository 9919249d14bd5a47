// Domain errors surfaced by the supervisor and the research facade

use crate::models::state_machine::StateTransitionError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SupervisorError {
    /// Unknown provider, missing credential, bad config. Raised before any spawn.
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Failed to spawn worker '{program}': {message}")]
    Spawn { program: String, message: String },

    /// Worker exited nonzero or was killed by a signal (code absent)
    #[error("Worker exited with {}", describe_exit(*.code))]
    RuntimeExit { code: Option<i32> },

    #[error("Agent {0} terminated unexpectedly")]
    StaleProcess(String),

    #[error("Agent {0} already has a live process")]
    AlreadyRunning(String),

    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    #[error(transparent)]
    InvalidTransition(#[from] StateTransitionError),

    #[error("Storage error: {0}")]
    Storage(String),
}

fn describe_exit(code: Option<i32>) -> String {
    match code {
        Some(code) => format!("exit code {}", code),
        None => "a signal".to_string(),
    }
}

impl SupervisorError {
    pub fn research_not_found(id: &str) -> Self {
        SupervisorError::NotFound {
            kind: "Research",
            id: id.to_string(),
        }
    }

    pub fn agent_not_found(id: &str) -> Self {
        SupervisorError::NotFound {
            kind: "Agent",
            id: id.to_string(),
        }
    }

    /// Short machine-readable tag, stored in activity metadata as `error_kind`
    pub fn kind(&self) -> &'static str {
        match self {
            SupervisorError::Configuration(_) => "configuration_error",
            SupervisorError::Spawn { .. } => "spawn_error",
            SupervisorError::RuntimeExit { .. } => "runtime_exit_error",
            SupervisorError::StaleProcess(_) => "stale_process_error",
            SupervisorError::AlreadyRunning(_) => "already_running",
            SupervisorError::NotFound { .. } => "not_found",
            SupervisorError::InvalidTransition(_) => "invalid_transition",
            SupervisorError::Storage(_) => "storage_error",
        }
    }
}

pub type SupervisorResult<T> = Result<T, SupervisorError>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::AgentStatus;

    #[test]
    fn test_runtime_exit_messages() {
        let err = SupervisorError::RuntimeExit { code: Some(3) };
        assert_eq!(err.to_string(), "Worker exited with exit code 3");
        let err = SupervisorError::RuntimeExit { code: None };
        assert_eq!(err.to_string(), "Worker exited with a signal");
    }

    #[test]
    fn test_not_found_message() {
        let err = SupervisorError::research_not_found("abc");
        assert_eq!(err.to_string(), "Research not found: abc");
        assert_eq!(err.kind(), "not_found");
    }

    #[test]
    fn test_transition_error_converts() {
        let err: SupervisorError = StateTransitionError::InvalidAgentTransition {
            from: AgentStatus::Completed,
            to: AgentStatus::Running,
        }
        .into();
        assert_eq!(err.kind(), "invalid_transition");
        assert!(err.to_string().contains("completed to running"));
    }
}
