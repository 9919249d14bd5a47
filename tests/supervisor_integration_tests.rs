// End-to-end supervisor tests driving /bin/sh scripts as workers.
// The script receives topic, work dir, provider, model and the resume flag
// as $1..$5.

#[cfg(all(test, unix))]
mod supervisor_integration_tests {
    use research_supervisor_lib::agents::sentinel::sentinel_present;
    use research_supervisor_lib::agents::{AgentManager, LogCollector, ManagerConfig};
    use research_supervisor_lib::commands::{ResearchService, StartResearchRequest, StartedRun};
    use research_supervisor_lib::events::SupervisorEvent;
    use research_supervisor_lib::file_storage::Store;
    use research_supervisor_lib::session::{read_messages, read_snapshot};
    use research_supervisor_lib::{Activity, ActivityKind, AgentStatus, ResearchStatus};
    use std::collections::HashMap;
    use std::process::Command;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;
    use tempfile::TempDir;
    use tokio::sync::mpsc;

    struct Harness {
        dir: TempDir,
        service: ResearchService,
        events: mpsc::UnboundedReceiver<SupervisorEvent>,
    }

    fn harness(program: &str, script: &str) -> Harness {
        harness_with_grace(program, script, Duration::from_secs(5))
    }

    fn harness_with_grace(program: &str, script: &str, exit_grace: Duration) -> Harness {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(Store::open(&dir.path().join("data")).unwrap());
        let (tx, events) = mpsc::unbounded_channel();
        let mut collector = LogCollector::new(store);
        collector.set_event_sender(tx);

        let config = ManagerConfig {
            program: program.to_string(),
            prefix_args: vec!["-c".to_string(), script.to_string(), "sh".to_string()],
            poll_interval: Duration::from_millis(300),
            exit_grace,
            ..ManagerConfig::default()
        };
        let mut credentials = HashMap::new();
        credentials.insert("OPENAI_API_KEY".to_string(), "sk-test".to_string());

        let manager = AgentManager::new(config, collector);
        Harness {
            dir,
            service: ResearchService::new(manager, Box::new(credentials)),
            events,
        }
    }

    impl Harness {
        fn work_dir(&self) -> String {
            self.dir.path().join("work").to_str().unwrap().to_string()
        }

        async fn start(&self) -> research_supervisor_lib::SupervisorResult<StartedRun> {
            self.service
                .start_research(StartResearchRequest {
                    topic: "best espresso machines".to_string(),
                    work_dir: self.work_dir(),
                    provider: "openai".to_string(),
                    model: None,
                })
                .await
        }

        async fn wait(&self, agent_id: &str) {
            tokio::time::timeout(Duration::from_secs(20), self.service.manager().wait(agent_id))
                .await
                .expect("worker did not finish in time");
        }

        fn activities(&self, agent_id: &str) -> Vec<Activity> {
            self.service.agent_activities(agent_id).unwrap()
        }

        fn drain_events(&mut self) -> Vec<SupervisorEvent> {
            let mut out = Vec::new();
            while let Ok(event) = self.events.try_recv() {
                out.push(event);
            }
            out
        }
    }

    fn of_kind(activities: &[Activity], kind: ActivityKind) -> Vec<&Activity> {
        activities.iter().filter(|a| a.kind == kind).collect()
    }

    fn error_kind(activity: &Activity) -> Option<&str> {
        activity.metadata.as_ref()?.get("error_kind")?.as_str()
    }

    fn process_alive(pid: u32) -> bool {
        Command::new("kill")
            .args(["-0", &pid.to_string()])
            .status()
            .map(|s| s.success())
            .unwrap_or(false)
    }

    fn position(activities: &[Activity], predicate: impl Fn(&Activity) -> bool) -> Vec<usize> {
        activities
            .iter()
            .enumerate()
            .filter(|(_, a)| predicate(a))
            .map(|(i, _)| i)
            .collect()
    }

    #[tokio::test]
    async fn test_successful_run_records_activities() {
        let script = r#"
echo "{\"type\": \"log\", \"message\": \"args=$1|$3|$4 key=$OPENAI_API_KEY\"}"
echo '{"type": "init", "provider": "openai", "model": "gpt-4o-mini"}'
printf '"tool_name": "web_search",\n"arguments": {\n"query": "best espresso machines"\n}\n'
echo '{"type": "progress", "message": "Halfway there", "percentage": 50}'
echo "DeprecationWarning: something old" >&2
echo '{"type": "assistant_response", "response": "The Breville wins."}'
exit 0
"#;
        let mut h = harness("/bin/sh", script);
        let started = h.start().await.unwrap();
        assert!(started.pid > 0);
        assert_eq!(started.agent.status, AgentStatus::Running);
        assert_eq!(started.research.status, ResearchStatus::InProgress);

        h.wait(&started.agent.id).await;

        let agent = h.service.store().get_agent(&started.agent.id).unwrap();
        assert_eq!(agent.status, AgentStatus::Completed);
        assert_eq!(agent.exit_code, Some(0));
        assert_eq!(agent.process_id, None);
        assert_eq!(agent.output.as_deref(), Some("The Breville wins."));
        let research = h.service.store().get_research(&started.research.id).unwrap();
        assert_eq!(research.status, ResearchStatus::Completed);

        let activities = h.activities(&agent.id);
        let sequences: Vec<u64> = activities.iter().map(|a| a.sequence).collect();
        assert!(sequences.windows(2).all(|w| w[0] < w[1]));
        assert!(activities[0].description.starts_with("Worker spawned with PID"));
        assert_eq!(activities.last().unwrap().description, "Worker exited with code 0");

        let logs = of_kind(&activities, ActivityKind::Log);
        assert_eq!(
            logs[0].description,
            "args=best espresso machines|openai|gpt-4o-mini key=sk-test"
        );
        let calls = of_kind(&activities, ActivityKind::ToolCall);
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].description, "web_search: \"best espresso machines\"");
        assert_eq!(of_kind(&activities, ActivityKind::Init).len(), 1);
        assert_eq!(of_kind(&activities, ActivityKind::Progress).len(), 1);
        assert_eq!(of_kind(&activities, ActivityKind::Diagnostic).len(), 1);

        let snapshot = read_snapshot(&research.work_dir).unwrap();
        assert_eq!(snapshot.percentage, 50.0);
        assert_eq!(snapshot.current_task.as_deref(), Some("Halfway there"));

        let events = h.drain_events();
        assert!(events
            .iter()
            .any(|e| matches!(e, SupervisorEvent::AgentCompleted(p) if p.success)));
        assert!(events
            .iter()
            .any(|e| matches!(e, SupervisorEvent::ResearchProgress(p) if p.percentage == 50.0)));
    }

    #[tokio::test]
    async fn test_nonzero_exit_fails_run() {
        let h = harness("/bin/sh", "echo 'working on it'; exit 3");
        let started = h.start().await.unwrap();
        h.wait(&started.agent.id).await;

        let agent = h.service.store().get_agent(&started.agent.id).unwrap();
        assert_eq!(agent.status, AgentStatus::Failed);
        assert_eq!(agent.exit_code, Some(3));
        assert!(agent.error.is_some());
        let research = h.service.store().get_research(&started.research.id).unwrap();
        assert_eq!(research.status, ResearchStatus::Failed);

        let activities = h.activities(&agent.id);
        let last = activities.last().unwrap();
        assert_eq!(last.description, "Worker exited with code 3");
        assert_eq!(error_kind(last), Some("runtime_exit_error"));
        assert_eq!(of_kind(&activities, ActivityKind::Text).len(), 1);
    }

    #[tokio::test]
    async fn test_nonexistent_executable_fails_immediately() {
        let h = harness("/nonexistent/research-agent", "exit 0");
        let err = h.start().await.unwrap_err();
        assert_eq!(err.kind(), "spawn_error");

        let researches = h.service.list_researches().unwrap();
        assert_eq!(researches.len(), 1);
        assert_eq!(researches[0].status, ResearchStatus::Failed);

        let agent = h.service.latest_agent(&researches[0].id).unwrap();
        assert_eq!(agent.status, AgentStatus::Failed);
        assert!(!h.service.manager().is_running(&agent.id));

        let activities = h.activities(&agent.id);
        let errors = of_kind(&activities, ActivityKind::Error);
        assert_eq!(errors.len(), 1);
        assert_eq!(error_kind(errors[0]), Some("spawn_error"));
        assert!(of_kind(&activities, ActivityKind::ToolCall).is_empty());
    }

    #[tokio::test]
    async fn test_fatal_stderr_kills_worker() {
        let script = r#"
echo "ModuleNotFoundError: No module named 'mcp_agent'" >&2
exec sleep 30
"#;
        let h = harness("/bin/sh", script);
        let started = h.start().await.unwrap();
        h.wait(&started.agent.id).await;

        let agent = h.service.store().get_agent(&started.agent.id).unwrap();
        assert_eq!(agent.status, AgentStatus::Failed);
        assert!(agent.error.unwrap().contains("ModuleNotFoundError"));

        let activities = h.activities(&agent.id);
        let errors = of_kind(&activities, ActivityKind::Error);
        assert_eq!(errors.len(), 1);
        assert_eq!(error_kind(errors[0]), Some("fatal_diagnostic"));
    }

    #[tokio::test]
    async fn test_completion_signal_survives_nonzero_exit() {
        let script = r#"
printf '"tool_name": "update_progress",\n"arguments": {\n"percentage": 100,\n"current_task": "Done"\n}\n'
printf '"tool_name": "update_progress",\n"arguments": {\n"percentage": "100"\n}\n'
exit 1
"#;
        let mut h = harness("/bin/sh", script);
        let started = h.start().await.unwrap();
        h.wait(&started.agent.id).await;

        let research = h.service.store().get_research(&started.research.id).unwrap();
        assert_eq!(research.status, ResearchStatus::Completed);
        assert!(research.completed_at.is_some());

        let agent = h.service.store().get_agent(&started.agent.id).unwrap();
        assert_eq!(agent.status, AgentStatus::Failed);
        assert_eq!(agent.exit_code, Some(1));

        let completions = h
            .drain_events()
            .into_iter()
            .filter(|e| {
                matches!(e, SupervisorEvent::ResearchStatusChanged(p) if p.new_status == "completed")
            })
            .count();
        assert_eq!(completions, 1);
    }

    #[tokio::test]
    async fn test_cancel_then_resume_runs_one_process() {
        let script = r#"
if [ "$5" = "--resume" ]; then
  echo '{"type": "resume_mode"}'
  sleep 1
  exit 0
fi
echo '{"type": "waiting_for_messages"}'
while [ ! -f .kill ]; do sleep 0.05; done
exit 0
"#;
        let h = harness("/bin/sh", script);
        let started = h.start().await.unwrap();
        let agent_id = started.agent.id.clone();
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(h.service.manager().is_running(&agent_id));

        let resumed = h.service.resume_research(&started.research.id).await.unwrap();
        assert_eq!(resumed.agent.id, agent_id);
        assert_ne!(resumed.pid, started.pid);
        assert_eq!(resumed.agent.resume_count, 1);
        assert_eq!(h.service.manager().running_count(), 1);
        assert!(!sentinel_present(&h.work_dir()));

        h.wait(&agent_id).await;

        let agent = h.service.store().get_agent(&agent_id).unwrap();
        assert_eq!(agent.status, AgentStatus::Completed);
        let research = h.service.store().get_research(&started.research.id).unwrap();
        assert_eq!(research.status, ResearchStatus::Completed);

        let activities = h.activities(&agent_id);
        let system: Vec<&str> = of_kind(&activities, ActivityKind::System)
            .iter()
            .map(|a| a.description.as_str())
            .collect();
        assert!(system.contains(&"Cancellation requested"));
        assert!(system.iter().any(|d| d.starts_with("Resuming worker")));
        assert_eq!(
            system
                .iter()
                .filter(|d| d.starts_with("Worker spawned"))
                .count(),
            2
        );
        assert!(activities
            .iter()
            .any(|a| a.kind == ActivityKind::Lifecycle && a.description.starts_with("Resume mode")));
    }

    #[tokio::test]
    async fn test_explicit_cancel_then_resume_kills_stubborn_worker() {
        // The first run never looks at the sentinel
        let script = r#"
if [ "$5" = "--resume" ]; then
  echo '{"type": "resume_mode"}'
  exit 0
fi
trap '' TERM
exec sleep 30
"#;
        let h = harness_with_grace("/bin/sh", script, Duration::from_millis(300));
        let started = h.start().await.unwrap();
        let agent_id = started.agent.id.clone();
        let research_id = started.research.id.clone();

        h.service.cancel_research(&research_id).await.unwrap();
        assert!(h.service.manager().is_running(&agent_id));
        assert!(process_alive(started.pid));

        let done = AtomicBool::new(false);
        let max_running = AtomicUsize::new(0);
        let resume = async {
            let resumed = h.service.resume_research(&research_id).await;
            done.store(true, Ordering::SeqCst);
            resumed
        };
        let monitor = async {
            while !done.load(Ordering::SeqCst) {
                max_running.fetch_max(h.service.manager().running_count(), Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        };
        let (resumed, _) = tokio::join!(resume, monitor);
        let resumed = resumed.unwrap();

        assert!(!process_alive(started.pid));
        assert_ne!(resumed.pid, started.pid);
        assert!(max_running.load(Ordering::SeqCst) <= 1);
        assert!(h.service.manager().running_count() <= 1);

        h.wait(&agent_id).await;
        let agent = h.service.store().get_agent(&agent_id).unwrap();
        assert_eq!(agent.status, AgentStatus::Completed);
        assert_eq!(agent.resume_count, 1);

        let activities = h.activities(&agent_id);
        let spawns = position(&activities, |a| a.description.starts_with("Worker spawned"));
        let first_exit = position(&activities, |a| a.description == "Worker terminated by a signal");
        let cancels = position(&activities, |a| a.description == "Cancellation requested");
        assert_eq!(spawns.len(), 2);
        assert_eq!(first_exit.len(), 1);
        assert_eq!(cancels.len(), 2);
        assert!(cancels[0] < first_exit[0]);
        assert!(first_exit[0] < spawns[1]);
    }

    #[tokio::test]
    async fn test_cancel_reaches_worker_polling_at_interval() {
        // Polls exactly at the configured 300ms interval, plus the loop body
        let script = r#"
while [ ! -f .kill ]; do sleep 0.3; done
echo 'saw the sentinel'
exit 0
"#;
        let h = harness("/bin/sh", script);
        let started = h.start().await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        h.service.cancel_research(&started.research.id).await.unwrap();
        assert!(!sentinel_present(&h.work_dir()));
        h.wait(&started.agent.id).await;

        let agent = h.service.store().get_agent(&started.agent.id).unwrap();
        assert_eq!(agent.status, AgentStatus::Completed);
        let activities = h.activities(&agent.id);
        assert!(activities.iter().any(|a| a.description == "saw the sentinel"));
    }

    #[tokio::test]
    async fn test_follow_up_message_reaches_waiting_worker() {
        let script = r#"
echo '{"type": "message_loop_started", "message": "Listening for follow-up messages"}'
while ! grep -q "compare grinders" .messages.json 2>/dev/null; do sleep 0.05; done
echo '{"type": "user_message_received", "message": "compare grinders"}'
exit 0
"#;
        let h = harness("/bin/sh", script);
        let started = h.start().await.unwrap();

        let message = h
            .service
            .send_message(&started.research.id, "compare grinders")
            .unwrap();
        h.wait(&started.agent.id).await;

        let agent = h.service.store().get_agent(&started.agent.id).unwrap();
        assert_eq!(agent.status, AgentStatus::Completed);
        let activities = h.activities(&agent.id);
        let queued = position(&activities, |a| a.description == "Follow-up message queued");
        assert_eq!(queued.len(), 1);
        let received = of_kind(&activities, ActivityKind::Lifecycle)
            .into_iter()
            .find(|a| a.description == "User message received")
            .unwrap();
        assert_eq!(
            received.metadata.as_ref().unwrap()["message"],
            "compare grinders"
        );

        let messages = read_messages(&h.work_dir()).unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].id, message.id);
        assert!(!messages[0].processed);
    }

    #[tokio::test]
    async fn test_delete_refused_while_running() {
        let h = harness("/bin/sh", "exec sleep 30");
        let started = h.start().await.unwrap();

        let err = h.service.delete_research(&started.research.id).unwrap_err();
        assert_eq!(err.kind(), "already_running");

        assert!(h.service.manager().kill(&started.agent.id));
        h.wait(&started.agent.id).await;
        h.service.delete_research(&started.research.id).unwrap();
        assert!(h.service.list_researches().unwrap().is_empty());
    }
}
