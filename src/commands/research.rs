// Research commands
//
// The facade over the supervisor and the store: credential resolution,
// row creation, and research-level views of agent runs.

use crate::agents::manager::{AgentManager, LaunchSpec};
use crate::config::secrets::{resolve_credential, resolve_model, CredentialSource};
use crate::error::{SupervisorError, SupervisorResult};
use crate::file_storage::{ensure_dir, Store};
use crate::models::{Activity, Agent, Research};
use crate::session::messages::{pending_count, FollowUpMessage};
use crate::session::progress::{read_snapshot, ProgressSnapshot};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;

/// Name given to the single worker agent of a research
pub const WORKER_AGENT_NAME: &str = "research-agent";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartResearchRequest {
    pub topic: String,
    pub work_dir: String,
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
}

/// A research with the agent run that was just spawned
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartedRun {
    pub research: Research,
    pub agent: Agent,
    pub pid: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResearchStatusReport {
    pub research: Research,
    pub agents: Vec<Agent>,
    /// Agents with a live process in this supervisor
    pub live_agents: Vec<String>,
    pub progress: Option<ProgressSnapshot>,
    /// Follow-up messages the worker has not processed yet
    pub pending_messages: usize,
}

pub struct ResearchService {
    manager: AgentManager,
    credentials: Box<dyn CredentialSource + Send + Sync>,
}

impl ResearchService {
    pub fn new(manager: AgentManager, credentials: Box<dyn CredentialSource + Send + Sync>) -> Self {
        Self {
            manager,
            credentials,
        }
    }

    pub fn manager(&self) -> &AgentManager {
        &self.manager
    }

    pub fn store(&self) -> &Arc<Store> {
        self.manager.store()
    }

    /// Create a research and spawn its worker.
    ///
    /// Provider and credential problems fail before anything is persisted.
    /// A spawn failure leaves the research and agent behind, both failed.
    pub async fn start_research(&self, request: StartResearchRequest) -> SupervisorResult<StartedRun> {
        let topic = request.topic.trim();
        if topic.is_empty() {
            return Err(SupervisorError::Configuration(
                "Research topic must not be empty".to_string(),
            ));
        }
        if request.work_dir.trim().is_empty() {
            return Err(SupervisorError::Configuration(
                "Work directory must not be empty".to_string(),
            ));
        }

        let credential = resolve_credential(&request.provider, self.credentials.as_ref())?;
        let model = resolve_model(credential.provider, request.model.as_deref());

        ensure_dir(Path::new(&request.work_dir)).map_err(SupervisorError::Storage)?;

        let research = Research::new(topic, &request.work_dir, credential.provider.id, &model);
        self.store().create_research(&research)?;
        let agent = Agent::new(&research.id, WORKER_AGENT_NAME);
        self.store().create_agent(&agent)?;

        log::info!(
            "Starting research {} ({} / {}): {}",
            research.id,
            research.provider,
            research.model,
            research.topic
        );

        let spec = LaunchSpec::for_research(&research, credential.env());
        let pid = self.manager.start(&agent.id, &spec).await?;

        Ok(StartedRun {
            research: self.store().get_research(&research.id)?,
            agent: self.store().get_agent(&agent.id)?,
            pid,
        })
    }

    /// The most recent agent of a research
    pub fn latest_agent(&self, research_id: &str) -> SupervisorResult<Agent> {
        self.store().get_research(research_id)?;
        self.store()
            .list_agents_for_research(research_id)?
            .pop()
            .ok_or_else(|| SupervisorError::NotFound {
                kind: "Agent for research",
                id: research_id.to_string(),
            })
    }

    /// Cooperative cancel of the research's worker
    pub async fn cancel_research(&self, research_id: &str) -> SupervisorResult<()> {
        let agent = self.latest_agent(research_id)?;
        self.manager.cancel(&agent.id).await
    }

    /// Queue a follow-up message for the research's latest agent
    pub fn send_message(&self, research_id: &str, content: &str) -> SupervisorResult<FollowUpMessage> {
        let agent = self.latest_agent(research_id)?;
        self.manager.send_message(&agent.id, content)
    }

    /// Stop any live worker of the research and re-spawn it with the resume flag
    pub async fn resume_research(&self, research_id: &str) -> SupervisorResult<StartedRun> {
        let research = self.store().get_research(research_id)?;
        let agent = self.latest_agent(research_id)?;
        let credential = resolve_credential(&research.provider, self.credentials.as_ref())?;

        let spec = LaunchSpec::for_research(&research, credential.env());
        let pid = self.manager.resume(&agent.id, &spec).await?;

        Ok(StartedRun {
            research: self.store().get_research(research_id)?,
            agent: self.store().get_agent(&agent.id)?,
            pid,
        })
    }

    pub fn status(&self, research_id: &str) -> SupervisorResult<ResearchStatusReport> {
        let research = self.store().get_research(research_id)?;
        let agents = self.store().list_agents_for_research(research_id)?;
        let live_agents = agents
            .iter()
            .filter(|a| self.manager.is_running(&a.id))
            .map(|a| a.id.clone())
            .collect();
        let progress = read_snapshot(&research.work_dir);
        let pending_messages = pending_count(&research.work_dir);

        Ok(ResearchStatusReport {
            research,
            agents,
            live_agents,
            progress,
            pending_messages,
        })
    }

    pub fn list_researches(&self) -> SupervisorResult<Vec<Research>> {
        self.store().list_researches()
    }

    /// Activities of one agent in emission order
    pub fn agent_activities(&self, agent_id: &str) -> SupervisorResult<Vec<Activity>> {
        self.store().list_activities(agent_id)
    }

    /// Activities of every agent of a research, agent by agent
    pub fn research_activities(&self, research_id: &str) -> SupervisorResult<Vec<Activity>> {
        self.store().get_research(research_id)?;
        let mut activities = Vec::new();
        for agent in self.store().list_agents_for_research(research_id)? {
            activities.extend(self.store().list_activities(&agent.id)?);
        }
        Ok(activities)
    }

    /// Delete a research with its agents and activities. Refused while a
    /// worker of the research is alive.
    pub fn delete_research(&self, research_id: &str) -> SupervisorResult<()> {
        if self.manager.has_live_process(research_id) {
            return Err(SupervisorError::AlreadyRunning(research_id.to_string()));
        }
        self.store().delete_research(research_id)?;
        log::info!("Deleted research {}", research_id);
        Ok(())
    }
}
