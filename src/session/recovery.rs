// Crash recovery for runs left behind by a previous supervisor process
//
// Processes are never persisted, so at startup any agent still marked running
// and any research still in progress has no one supervising it.

use crate::agents::log_collector::LogCollector;
use crate::agents::sentinel::clear_sentinel;
use crate::error::{SupervisorError, SupervisorResult};
use crate::models::{ActivityKind, AgentStatus, ResearchStatus};
use serde::{Deserialize, Serialize};
use serde_json::json;

/// Recovery result
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecoveryReport {
    /// Agents moved from running to failed
    pub agents_failed: Vec<String>,
    /// Researches moved from in_progress to failed
    pub researches_failed: Vec<String>,
    pub errors: Vec<String>,
}

impl RecoveryReport {
    pub fn is_empty(&self) -> bool {
        self.agents_failed.is_empty() && self.researches_failed.is_empty()
    }
}

/// Fail every stale agent and research.
///
/// Each recovered agent gets exactly one `system` activity. Running recovery
/// again finds nothing, since the agents are no longer running.
pub fn recover_stale_runs(collector: &LogCollector) -> SupervisorResult<RecoveryReport> {
    let store = collector.store();
    let mut report = RecoveryReport::default();

    for agent in store.list_agents()? {
        if agent.status != AgentStatus::Running {
            continue;
        }

        let stale = SupervisorError::StaleProcess(agent.id.clone());
        let message = stale.to_string();
        log::warn!("[Recovery] {}", message);

        let error_text = message.clone();
        if let Err(e) = collector.agent_status(&agent.id, AgentStatus::Failed, |a| {
            a.error = Some(error_text);
        }) {
            report.errors.push(format!("Agent {}: {}", agent.id, e));
            continue;
        }

        if let Err(e) = collector.append(
            &agent.research_id,
            &agent.id,
            ActivityKind::System,
            &message,
            Some(json!({
                "error_kind": stale.kind(),
                "pid": agent.process_id,
            })),
        ) {
            report.errors.push(format!("Agent {}: {}", agent.id, e));
        }

        report.agents_failed.push(agent.id);
    }

    for research in store.list_researches()? {
        if research.status != ResearchStatus::InProgress {
            continue;
        }

        log::warn!("[Recovery] Research {} was left in progress", research.id);
        match collector.research_status(&research.id, ResearchStatus::Failed) {
            Ok(_) => report.researches_failed.push(research.id.clone()),
            Err(e) => {
                report.errors.push(format!("Research {}: {}", research.id, e));
                continue;
            }
        }

        // A cancel interrupted by the crash may have left its sentinel behind
        if let Err(e) = clear_sentinel(&research.work_dir) {
            log::debug!("[Recovery] Could not clear sentinel in {}: {}", research.work_dir, e);
        }
    }

    for error in &report.errors {
        log::warn!("[Recovery] {}", error);
    }

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::file_storage::Store;
    use crate::models::{Agent, Research};
    use crate::utils::sentinel_path;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn setup() -> (TempDir, LogCollector) {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(Store::open(&dir.path().join("data")).unwrap());
        (dir, LogCollector::new(store))
    }

    #[test]
    fn test_recovers_running_agents_once() {
        let (dir, collector) = setup();
        let store = collector.store().clone();
        let work_dir = dir.path().to_str().unwrap();

        let research = Research::new("espresso", work_dir, "anthropic", "claude-sonnet-4-5");
        store.create_research(&research).unwrap();
        store
            .transition_research(&research.id, ResearchStatus::InProgress)
            .unwrap();
        let agent = Agent::new(&research.id, "research-agent");
        store.create_agent(&agent).unwrap();
        store
            .transition_agent(&agent.id, AgentStatus::Running, |a| a.process_id = Some(4242))
            .unwrap();
        std::fs::write(sentinel_path(work_dir), "stale").unwrap();

        let report = recover_stale_runs(&collector).unwrap();
        assert_eq!(report.agents_failed, vec![agent.id.clone()]);
        assert_eq!(report.researches_failed, vec![research.id.clone()]);
        assert!(report.errors.is_empty());

        let recovered = store.get_agent(&agent.id).unwrap();
        assert_eq!(recovered.status, AgentStatus::Failed);
        assert!(recovered.error.unwrap().contains("terminated unexpectedly"));
        assert_eq!(
            store.get_research(&research.id).unwrap().status,
            ResearchStatus::Failed
        );
        assert!(!sentinel_path(work_dir).exists());

        // Second pass is a no-op
        let again = recover_stale_runs(&collector).unwrap();
        assert!(again.is_empty());

        let activities = store.list_activities(&agent.id).unwrap();
        let system: Vec<_> = activities
            .iter()
            .filter(|a| a.kind == ActivityKind::System)
            .collect();
        assert_eq!(system.len(), 1);
        assert_eq!(
            system[0].metadata.as_ref().unwrap()["error_kind"],
            "stale_process_error"
        );
        assert_eq!(system[0].metadata.as_ref().unwrap()["pid"], 4242);
    }

    #[test]
    fn test_leaves_finished_and_pending_alone() {
        let (dir, collector) = setup();
        let store = collector.store().clone();
        let work_dir = dir.path().to_str().unwrap();

        let research = Research::new("tea", work_dir, "openai", "gpt-4o-mini");
        store.create_research(&research).unwrap();
        let pending = Agent::new(&research.id, "pending");
        store.create_agent(&pending).unwrap();
        let done = Agent::new(&research.id, "done");
        store.create_agent(&done).unwrap();
        store
            .transition_agent(&done.id, AgentStatus::Running, |_| {})
            .unwrap();
        store
            .transition_agent(&done.id, AgentStatus::Completed, |_| {})
            .unwrap();

        let report = recover_stale_runs(&collector).unwrap();
        assert!(report.is_empty());
        assert_eq!(
            store.get_agent(&pending.id).unwrap().status,
            AgentStatus::Pending
        );
        assert!(store.list_activities(&done.id).unwrap().is_empty());
    }
}
