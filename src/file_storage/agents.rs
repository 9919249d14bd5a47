//! Agent document storage
//!
//! Stores agent state in `{data_dir}/agents/`:
//! - `{agent_id}.json` - Agent state
//! - `{agent_id}.activities.jsonl` - Activity log, see [`super::activities`]

use super::{ensure_dir, read_json, remove_if_exists, write_json, FileResult};
use crate::models::Agent;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Version of the agent state file format
const AGENT_FILE_VERSION: u32 = 1;

/// Agent state file structure
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentStateFile {
    /// File format version
    pub version: u32,
    #[serde(flatten)]
    pub agent: Agent,
    /// When this agent state was last written
    pub updated_at: DateTime<Utc>,
}

impl From<&Agent> for AgentStateFile {
    fn from(agent: &Agent) -> Self {
        Self {
            version: AGENT_FILE_VERSION,
            agent: agent.clone(),
            updated_at: Utc::now(),
        }
    }
}

/// Get the agents directory
pub fn get_agents_dir(data_dir: &Path) -> PathBuf {
    data_dir.join("agents")
}

/// Get the file path for an agent's state
pub fn get_agent_file_path(data_dir: &Path, agent_id: &str) -> PathBuf {
    get_agents_dir(data_dir).join(format!("{}.json", agent_id))
}

/// Save agent state to file
pub fn save_agent_state(data_dir: &Path, agent: &Agent) -> FileResult<PathBuf> {
    ensure_dir(&get_agents_dir(data_dir))?;

    let file_path = get_agent_file_path(data_dir, &agent.id);
    write_json(&file_path, &AgentStateFile::from(agent))?;

    log::debug!("Saved agent {} state to {:?}", agent.id, file_path);
    Ok(file_path)
}

/// Read agent from its state file
pub fn read_agent(data_dir: &Path, agent_id: &str) -> FileResult<Agent> {
    let state: AgentStateFile = read_json(&get_agent_file_path(data_dir, agent_id))?;
    Ok(state.agent)
}

/// Check if an agent state file exists
pub fn agent_file_exists(data_dir: &Path, agent_id: &str) -> bool {
    get_agent_file_path(data_dir, agent_id).exists()
}

/// Delete the agent state file
pub fn delete_agent_file(data_dir: &Path, agent_id: &str) -> FileResult<()> {
    let state_path = get_agent_file_path(data_dir, agent_id);
    if remove_if_exists(&state_path)? {
        log::info!("Deleted agent state file: {:?}", state_path);
    }
    Ok(())
}

/// List all agent IDs
pub fn list_agent_ids(data_dir: &Path) -> FileResult<Vec<String>> {
    let agents_dir = get_agents_dir(data_dir);

    if !agents_dir.exists() {
        return Ok(Vec::new());
    }

    let entries =
        fs::read_dir(&agents_dir).map_err(|e| format!("Failed to read agents directory: {}", e))?;

    let mut agent_ids = Vec::new();

    for entry in entries {
        let entry = entry.map_err(|e| format!("Failed to read directory entry: {}", e))?;
        let path = entry.path();

        // Only state files, not .activities.jsonl
        if path.extension().map_or(true, |ext| ext != "json") {
            continue;
        }

        if let Some(id) = path.file_stem().and_then(|s| s.to_str()) {
            agent_ids.push(id.to_string());
        }
    }

    Ok(agent_ids)
}

/// List all agents, oldest start first
pub fn list_agents(data_dir: &Path) -> FileResult<Vec<Agent>> {
    let mut agents = Vec::new();

    for agent_id in list_agent_ids(data_dir)? {
        match read_agent(data_dir, &agent_id) {
            Ok(agent) => agents.push(agent),
            Err(e) => log::warn!("Failed to read agent {}: {}", agent_id, e),
        }
    }

    agents.sort_by(|a, b| a.started_at.cmp(&b.started_at));
    Ok(agents)
}

/// List all agents belonging to a research
pub fn list_agents_for_research(data_dir: &Path, research_id: &str) -> FileResult<Vec<Agent>> {
    Ok(list_agents(data_dir)?
        .into_iter()
        .filter(|agent| agent.research_id == research_id)
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::AgentStatus;
    use tempfile::TempDir;

    #[test]
    fn test_save_and_read_agent() {
        let temp_dir = TempDir::new().unwrap();
        let mut agent = Agent::new("research-1", "researcher");
        agent.process_id = Some(4242);

        let path = save_agent_state(temp_dir.path(), &agent).unwrap();
        assert!(path.exists());

        let loaded = read_agent(temp_dir.path(), &agent.id).unwrap();
        assert_eq!(loaded, agent);
    }

    #[test]
    fn test_state_file_is_versioned() {
        let temp_dir = TempDir::new().unwrap();
        let agent = Agent::new("research-1", "researcher");
        save_agent_state(temp_dir.path(), &agent).unwrap();

        let raw = fs::read_to_string(get_agent_file_path(temp_dir.path(), &agent.id)).unwrap();
        let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(value["version"], 1);
        assert_eq!(value["researchId"], "research-1");
    }

    #[test]
    fn test_list_agents_for_research() {
        let temp_dir = TempDir::new().unwrap();
        let a = Agent::new("research-1", "first");
        let b = Agent::new("research-2", "second");
        save_agent_state(temp_dir.path(), &a).unwrap();
        save_agent_state(temp_dir.path(), &b).unwrap();

        // Activity logs must not be picked up as agents
        fs::write(
            get_agents_dir(temp_dir.path()).join(format!("{}.activities.jsonl", a.id)),
            "",
        )
        .unwrap();

        assert_eq!(list_agent_ids(temp_dir.path()).unwrap().len(), 2);
        let agents = list_agents_for_research(temp_dir.path(), "research-1").unwrap();
        assert_eq!(agents.len(), 1);
        assert_eq!(agents[0].id, a.id);
    }

    #[test]
    fn test_delete_agent_file() {
        let temp_dir = TempDir::new().unwrap();
        let mut agent = Agent::new("research-1", "researcher");
        agent.status = AgentStatus::Completed;
        save_agent_state(temp_dir.path(), &agent).unwrap();

        delete_agent_file(temp_dir.path(), &agent.id).unwrap();
        assert!(!agent_file_exists(temp_dir.path(), &agent.id));
        // Deleting again is fine
        delete_agent_file(temp_dir.path(), &agent.id).unwrap();
    }
}
