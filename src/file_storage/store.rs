//! Activity/status store
//!
//! Wraps the file helpers with the status state machine. Every write goes
//! through one lock, which also guards the per-agent sequence counters, so
//! appends for an agent are strictly ordered by emission.
//!
//! Another process (a CLI `cancel`) may append to the same log. A counter is
//! trusted only while the log still has the length this store left it at;
//! otherwise the last sequence is re-read from disk. There is no file lock,
//! so two processes appending in the same instant can still collide.

use super::{activities, agents, init_data_dir, research_ops};
use crate::error::{SupervisorError, SupervisorResult};
use crate::models::state_machine::{self, StateTransitionError};
use crate::models::{Activity, ActivityKind, Agent, AgentStatus, Research, ResearchStatus};
use crate::utils::lock_mutex_recover;
use chrono::Utc;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

fn storage_err(e: String) -> SupervisorError {
    SupervisorError::Storage(e)
}

/// Last sequence written by this store and the log length right after it
#[derive(Debug, Clone, Copy)]
struct LogCursor {
    sequence: u64,
    len: u64,
}

pub struct Store {
    data_dir: PathBuf,
    /// Next-sequence bookkeeping per agent. Held for the duration of every write.
    sequences: Mutex<HashMap<String, LogCursor>>,
}

impl Store {
    /// Open (and create if needed) a store rooted at `data_dir`
    pub fn open(data_dir: &Path) -> SupervisorResult<Self> {
        init_data_dir(data_dir).map_err(storage_err)?;
        Ok(Self {
            data_dir: data_dir.to_path_buf(),
            sequences: Mutex::new(HashMap::new()),
        })
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    // =========================================================================
    // Research
    // =========================================================================

    pub fn create_research(&self, research: &Research) -> SupervisorResult<()> {
        let _guard = lock_mutex_recover(&self.sequences);
        research_ops::save_research(&self.data_dir, research).map_err(storage_err)
    }

    pub fn get_research(&self, research_id: &str) -> SupervisorResult<Research> {
        research_ops::get_research_opt(&self.data_dir, research_id)
            .map_err(storage_err)?
            .ok_or_else(|| SupervisorError::research_not_found(research_id))
    }

    pub fn list_researches(&self) -> SupervisorResult<Vec<Research>> {
        research_ops::list_researches(&self.data_dir).map_err(storage_err)
    }

    /// Apply an event-driven research transition. Same-state is a no-op.
    pub fn transition_research(
        &self,
        research_id: &str,
        target: ResearchStatus,
    ) -> SupervisorResult<Research> {
        let _guard = lock_mutex_recover(&self.sequences);
        let mut research = self.get_research(research_id)?;

        if research.status == target {
            return Ok(research);
        }

        research.status = state_machine::transition_research(research.status, target)?;
        if state_machine::is_terminal_research(target) {
            research.completed_at = Some(Utc::now());
        }
        research_ops::save_research(&self.data_dir, &research).map_err(storage_err)?;

        log::debug!("Research {} -> {}", research_id, target);
        Ok(research)
    }

    /// Resume-only reopen edge for a research
    pub fn reopen_research(&self, research_id: &str) -> SupervisorResult<Research> {
        let _guard = lock_mutex_recover(&self.sequences);
        let mut research = self.get_research(research_id)?;

        research.status = state_machine::reopen_research(research.status);
        research.completed_at = None;
        research_ops::save_research(&self.data_dir, &research).map_err(storage_err)?;

        Ok(research)
    }

    // =========================================================================
    // Agents
    // =========================================================================

    /// Persist a new agent. The owning research must exist.
    pub fn create_agent(&self, agent: &Agent) -> SupervisorResult<()> {
        let _guard = lock_mutex_recover(&self.sequences);
        if !research_ops::research_exists(&self.data_dir, &agent.research_id) {
            return Err(SupervisorError::research_not_found(&agent.research_id));
        }
        agents::save_agent_state(&self.data_dir, agent).map_err(storage_err)?;
        Ok(())
    }

    pub fn get_agent(&self, agent_id: &str) -> SupervisorResult<Agent> {
        if !agents::agent_file_exists(&self.data_dir, agent_id) {
            return Err(SupervisorError::agent_not_found(agent_id));
        }
        agents::read_agent(&self.data_dir, agent_id).map_err(storage_err)
    }

    pub fn list_agents(&self) -> SupervisorResult<Vec<Agent>> {
        agents::list_agents(&self.data_dir).map_err(storage_err)
    }

    pub fn list_agents_for_research(&self, research_id: &str) -> SupervisorResult<Vec<Agent>> {
        agents::list_agents_for_research(&self.data_dir, research_id).map_err(storage_err)
    }

    /// Apply an event-driven agent transition plus field updates in one write.
    ///
    /// Same-state transitions skip the status bookkeeping but still apply `update`.
    pub fn transition_agent<F>(
        &self,
        agent_id: &str,
        target: AgentStatus,
        update: F,
    ) -> SupervisorResult<Agent>
    where
        F: FnOnce(&mut Agent),
    {
        let _guard = lock_mutex_recover(&self.sequences);
        let mut agent = self.get_agent(agent_id)?;

        if agent.status != target {
            agent.status = state_machine::transition_agent(agent.status, target)?;
            match target {
                AgentStatus::Running => agent.started_at = Some(Utc::now()),
                AgentStatus::Completed | AgentStatus::Failed => {
                    agent.completed_at = Some(Utc::now());
                    agent.process_id = None;
                }
                AgentStatus::Pending => {}
            }
            log::debug!("Agent {} -> {}", agent_id, target);
        }

        update(&mut agent);
        agents::save_agent_state(&self.data_dir, &agent).map_err(storage_err)?;
        Ok(agent)
    }

    /// Update agent fields without a status change
    pub fn update_agent<F>(&self, agent_id: &str, update: F) -> SupervisorResult<Agent>
    where
        F: FnOnce(&mut Agent),
    {
        let _guard = lock_mutex_recover(&self.sequences);
        let mut agent = self.get_agent(agent_id)?;
        update(&mut agent);
        agents::save_agent_state(&self.data_dir, &agent).map_err(storage_err)?;
        Ok(agent)
    }

    /// Resume-only reopen edge for an agent. Bumps the resume counter.
    pub fn reopen_agent(&self, agent_id: &str) -> SupervisorResult<Agent> {
        let _guard = lock_mutex_recover(&self.sequences);
        let mut agent = self.get_agent(agent_id)?;

        agent.status = state_machine::reopen_agent(agent.status)?;
        agent.started_at = Some(Utc::now());
        agent.completed_at = None;
        agent.error = None;
        agent.exit_code = None;
        agent.process_id = None;
        agent.resume_count += 1;
        agents::save_agent_state(&self.data_dir, &agent).map_err(storage_err)?;

        Ok(agent)
    }

    // =========================================================================
    // Activities
    // =========================================================================

    /// Append an activity. Refused when the agent does not exist.
    pub fn append_activity(
        &self,
        agent_id: &str,
        kind: ActivityKind,
        description: &str,
        metadata: Option<serde_json::Value>,
    ) -> SupervisorResult<Activity> {
        let mut sequences = lock_mutex_recover(&self.sequences);

        if !agents::agent_file_exists(&self.data_dir, agent_id) {
            return Err(SupervisorError::agent_not_found(agent_id));
        }

        let len = activities::log_len(&self.data_dir, agent_id);
        let next = match sequences.get(agent_id) {
            Some(cursor) if cursor.len == len => cursor.sequence + 1,
            _ => activities::last_sequence(&self.data_dir, agent_id).map_err(storage_err)? + 1,
        };

        let activity = Activity {
            id: uuid::Uuid::new_v4().to_string(),
            agent_id: agent_id.to_string(),
            sequence: next,
            timestamp: Utc::now(),
            kind,
            description: description.to_string(),
            metadata,
        };

        activities::append_activity(&self.data_dir, &activity).map_err(storage_err)?;
        sequences.insert(
            agent_id.to_string(),
            LogCursor {
                sequence: next,
                len: activities::log_len(&self.data_dir, agent_id),
            },
        );

        Ok(activity)
    }

    /// Activities for an agent in emission order
    pub fn list_activities(&self, agent_id: &str) -> SupervisorResult<Vec<Activity>> {
        if !agents::agent_file_exists(&self.data_dir, agent_id) {
            return Err(SupervisorError::agent_not_found(agent_id));
        }
        activities::read_activities(&self.data_dir, agent_id).map_err(storage_err)
    }

    // =========================================================================
    // Delete
    // =========================================================================

    /// Delete a research with its agents and their activity logs.
    ///
    /// Callers check for live processes first; the store has no view of them.
    pub fn delete_research(&self, research_id: &str) -> SupervisorResult<()> {
        let mut sequences = lock_mutex_recover(&self.sequences);

        if !research_ops::research_exists(&self.data_dir, research_id) {
            return Err(SupervisorError::research_not_found(research_id));
        }

        for agent in
            agents::list_agents_for_research(&self.data_dir, research_id).map_err(storage_err)?
        {
            activities::delete_activities(&self.data_dir, &agent.id).map_err(storage_err)?;
            agents::delete_agent_file(&self.data_dir, &agent.id).map_err(storage_err)?;
            sequences.remove(&agent.id);
        }

        research_ops::delete_research(&self.data_dir, research_id).map_err(storage_err)?;
        Ok(())
    }
}

/// Whether a transition error came from a terminal state refusing an event
pub fn is_terminal_refusal(err: &SupervisorError) -> bool {
    match err {
        SupervisorError::InvalidTransition(StateTransitionError::InvalidAgentTransition {
            from,
            ..
        }) => state_machine::is_terminal_agent(*from),
        SupervisorError::InvalidTransition(StateTransitionError::InvalidResearchTransition {
            from,
            ..
        }) => state_machine::is_terminal_research(*from),
        _ => false,
    }
}
