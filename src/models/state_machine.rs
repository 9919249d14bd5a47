// Agent and research status state machines with validation

use super::{AgentStatus, ResearchStatus};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum StateTransitionError {
    #[error("Invalid agent transition from {from} to {to}")]
    InvalidAgentTransition { from: AgentStatus, to: AgentStatus },

    #[error("Invalid research transition from {from} to {to}")]
    InvalidResearchTransition {
        from: ResearchStatus,
        to: ResearchStatus,
    },

    #[error("Cannot reopen agent in non-terminal state: {0}")]
    NotReopenable(AgentStatus),
}

/// Validates event-driven agent transitions. Terminal states are never left here.
pub fn can_transition_agent(from: AgentStatus, to: AgentStatus) -> bool {
    match (from, to) {
        // From Pending
        (AgentStatus::Pending, AgentStatus::Running) => true,
        (AgentStatus::Pending, AgentStatus::Failed) => true, // Spawn failure

        // From Running
        (AgentStatus::Running, AgentStatus::Completed) => true,
        (AgentStatus::Running, AgentStatus::Failed) => true,

        // Same state is always allowed (no-op)
        (a, b) if a == b => true,

        _ => false,
    }
}

/// Validates event-driven research transitions
pub fn can_transition_research(from: ResearchStatus, to: ResearchStatus) -> bool {
    match (from, to) {
        (ResearchStatus::Pending, ResearchStatus::InProgress) => true,
        (ResearchStatus::Pending, ResearchStatus::Failed) => true,

        (ResearchStatus::InProgress, ResearchStatus::Completed) => true,
        (ResearchStatus::InProgress, ResearchStatus::Failed) => true,

        (a, b) if a == b => true,

        _ => false,
    }
}

pub fn transition_agent(
    current: AgentStatus,
    target: AgentStatus,
) -> Result<AgentStatus, StateTransitionError> {
    if !can_transition_agent(current, target) {
        return Err(StateTransitionError::InvalidAgentTransition {
            from: current,
            to: target,
        });
    }

    Ok(target)
}

pub fn transition_research(
    current: ResearchStatus,
    target: ResearchStatus,
) -> Result<ResearchStatus, StateTransitionError> {
    if !can_transition_research(current, target) {
        return Err(StateTransitionError::InvalidResearchTransition {
            from: current,
            to: target,
        });
    }

    Ok(target)
}

/// The reopen edge used only by an explicit resume.
///
/// A running agent is also accepted: resume replaces its process and the
/// status stays `running`.
pub fn reopen_agent(current: AgentStatus) -> Result<AgentStatus, StateTransitionError> {
    match current {
        AgentStatus::Completed | AgentStatus::Failed | AgentStatus::Running => {
            Ok(AgentStatus::Running)
        }
        AgentStatus::Pending => Err(StateTransitionError::NotReopenable(current)),
    }
}

/// Research side of the reopen edge. Pending research simply starts.
pub fn reopen_research(current: ResearchStatus) -> ResearchStatus {
    match current {
        ResearchStatus::Pending
        | ResearchStatus::InProgress
        | ResearchStatus::Completed
        | ResearchStatus::Failed => ResearchStatus::InProgress,
    }
}

pub fn is_terminal_agent(status: AgentStatus) -> bool {
    matches!(status, AgentStatus::Completed | AgentStatus::Failed)
}

pub fn is_terminal_research(status: ResearchStatus) -> bool {
    matches!(status, ResearchStatus::Completed | ResearchStatus::Failed)
}

/// Get all valid next agent states from current state
pub fn valid_next_agent_states(current: AgentStatus) -> Vec<AgentStatus> {
    let all_states = vec![
        AgentStatus::Pending,
        AgentStatus::Running,
        AgentStatus::Completed,
        AgentStatus::Failed,
    ];

    all_states
        .into_iter()
        .filter(|&state| can_transition_agent(current, state))
        .collect()
}
