// Activity and status recording
//
// Persists every activity and status change through the store and pushes
// the matching event to optional channels for real-time consumers.

use crate::agents::output_parser::ParsedActivity;
use crate::error::SupervisorResult;
use crate::events::{
    ActivityAppendedPayload, AgentCompletedPayload, AgentStatusChangedPayload,
    ResearchProgressPayload, ResearchStatusChangedPayload, SupervisorEvent,
};
use crate::file_storage::Store;
use crate::models::{Activity, ActivityKind, Agent, AgentStatus, Research, ResearchStatus};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Log collector records agent activity and emits events
pub struct LogCollector {
    store: Arc<Store>,
    /// Event sender for activities, status changes and progress
    pub(crate) event_tx: Option<mpsc::UnboundedSender<SupervisorEvent>>,
    /// Event sender for finished runs
    pub(crate) completion_tx: Option<mpsc::UnboundedSender<AgentCompletedPayload>>,
}

impl LogCollector {
    pub fn new(store: Arc<Store>) -> Self {
        Self {
            store,
            event_tx: None,
            completion_tx: None,
        }
    }

    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    /// Set the event sender for activity and status events
    pub fn set_event_sender(&mut self, tx: mpsc::UnboundedSender<SupervisorEvent>) {
        self.event_tx = Some(tx);
    }

    /// Set the event sender for completion events
    pub fn set_completion_sender(&mut self, tx: mpsc::UnboundedSender<AgentCompletedPayload>) {
        self.completion_tx = Some(tx);
    }

    fn emit(&self, event: SupervisorEvent) {
        if let Some(tx) = &self.event_tx {
            let _ = tx.send(event); // Best effort
        }
    }

    /// Append an activity and emit it
    pub fn append(
        &self,
        research_id: &str,
        agent_id: &str,
        kind: ActivityKind,
        description: &str,
        metadata: Option<Value>,
    ) -> SupervisorResult<Activity> {
        let activity = self
            .store
            .append_activity(agent_id, kind, description, metadata)?;
        self.emit(SupervisorEvent::ActivityAppended(ActivityAppendedPayload {
            research_id: research_id.to_string(),
            activity: activity.clone(),
        }));
        Ok(activity)
    }

    pub fn append_parsed(
        &self,
        research_id: &str,
        agent_id: &str,
        parsed: &ParsedActivity,
    ) -> SupervisorResult<Activity> {
        self.append(
            research_id,
            agent_id,
            parsed.kind,
            &parsed.description,
            parsed.metadata.clone(),
        )
    }

    /// Transition an agent and emit the change when the status moved
    pub fn agent_status<F>(
        &self,
        agent_id: &str,
        target: AgentStatus,
        update: F,
    ) -> SupervisorResult<Agent>
    where
        F: FnOnce(&mut Agent),
    {
        let old_status = self.store.get_agent(agent_id)?.status;
        let agent = self.store.transition_agent(agent_id, target, update)?;
        if agent.status != old_status {
            self.emit_agent_status(&agent, old_status);
        }
        Ok(agent)
    }

    /// Transition a research and emit the change when the status moved
    pub fn research_status(
        &self,
        research_id: &str,
        target: ResearchStatus,
    ) -> SupervisorResult<Research> {
        let old_status = self.store.get_research(research_id)?.status;
        let research = self.store.transition_research(research_id, target)?;
        if research.status != old_status {
            self.emit_research_status(&research, old_status);
        }
        Ok(research)
    }

    /// Resume-only reopen of an agent
    pub fn reopen_agent(&self, agent_id: &str) -> SupervisorResult<Agent> {
        let old_status = self.store.get_agent(agent_id)?.status;
        let agent = self.store.reopen_agent(agent_id)?;
        if agent.status != old_status {
            self.emit_agent_status(&agent, old_status);
        }
        Ok(agent)
    }

    /// Resume-only reopen of a research
    pub fn reopen_research(&self, research_id: &str) -> SupervisorResult<Research> {
        let old_status = self.store.get_research(research_id)?.status;
        let research = self.store.reopen_research(research_id)?;
        if research.status != old_status {
            self.emit_research_status(&research, old_status);
        }
        Ok(research)
    }

    fn emit_agent_status(&self, agent: &Agent, old_status: AgentStatus) {
        self.emit(SupervisorEvent::AgentStatusChanged(AgentStatusChangedPayload {
            agent_id: agent.id.clone(),
            research_id: agent.research_id.clone(),
            old_status: old_status.to_string(),
            new_status: agent.status.to_string(),
        }));
    }

    fn emit_research_status(&self, research: &Research, old_status: ResearchStatus) {
        self.emit(SupervisorEvent::ResearchStatusChanged(
            ResearchStatusChangedPayload {
                research_id: research.id.clone(),
                old_status: old_status.to_string(),
                new_status: research.status.to_string(),
            },
        ));
    }

    pub fn emit_progress(&self, research_id: &str, percentage: f64, current_task: Option<&str>) {
        self.emit(SupervisorEvent::ResearchProgress(ResearchProgressPayload {
            research_id: research_id.to_string(),
            percentage,
            current_task: current_task.map(String::from),
        }));
    }

    /// Emit the end of a run on both channels
    pub fn emit_completion(&self, payload: AgentCompletedPayload) {
        let event = if payload.success {
            SupervisorEvent::AgentCompleted(payload.clone())
        } else {
            SupervisorEvent::AgentFailed(payload.clone())
        };
        self.emit(event);

        if let Some(tx) = &self.completion_tx {
            let _ = tx.send(payload); // Best effort
        }
    }
}
