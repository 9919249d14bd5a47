// Worker process spawning and lifecycle management
//
// One tokio task per run multiplexes stdout chunks, stderr lines and a kill
// request, so every write for an agent comes from one place in emission order.

use crate::agents::diagnostics::{classify_stderr, Diagnostic};
use crate::agents::log_collector::LogCollector;
use crate::agents::output_parser::ParsedActivity;
use crate::agents::path_resolver::WorkerPathResolver;
use crate::agents::sentinel;
use crate::agents::stream_parser::{ParserConfig, StreamingParser};
use crate::error::{SupervisorError, SupervisorResult};
use crate::events::AgentCompletedPayload;
use crate::file_storage::store::is_terminal_refusal;
use crate::file_storage::Store;
use crate::models::state_machine;
use crate::models::{ActivityKind, Agent, AgentStatus, Research, ResearchStatus};
use crate::session::messages::{append_message, FollowUpMessage};
use crate::session::progress::ProgressTracker;
use crate::session::recovery::{recover_stale_runs, RecoveryReport};
use crate::shutdown::ShutdownResult;
use crate::utils::lock_mutex_recover;
use serde_json::json;
use std::collections::HashMap;
use std::process::{ExitStatus, Stdio};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader, Lines};
use tokio::process::{Child, ChildStderr, ChildStdout, Command};
use tokio::sync::{oneshot, watch};

/// How long to keep reading pipes after the worker exited. Grandchildren may
/// hold them open indefinitely.
const DRAIN_TIMEOUT: Duration = Duration::from_millis(500);

const READ_CHUNK_SIZE: usize = 8192;

/// Placeholder deadline for the drain timer before the worker exits
const IDLE_DRAIN: Duration = Duration::from_secs(60 * 60 * 24 * 365);

/// Supervisor settings shared by every run
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// Worker executable (bare name or path)
    pub program: String,
    /// Arguments placed before the positional ones
    pub prefix_args: Vec<String>,
    pub resume_flag: String,
    /// How long a cancel keeps the sentinel file in place
    pub poll_interval: Duration,
    /// How long to wait for a cancelled worker before killing it
    pub exit_grace: Duration,
    pub parser: ParserConfig,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            program: "research-agent".to_string(),
            prefix_args: Vec::new(),
            resume_flag: "--resume".to_string(),
            poll_interval: Duration::from_millis(2000),
            exit_grace: Duration::from_millis(30_000),
            parser: ParserConfig::default(),
        }
    }
}

/// Positional arguments and environment for one run
#[derive(Debug, Clone)]
pub struct LaunchSpec {
    pub topic: String,
    pub work_dir: String,
    pub provider: String,
    pub model: String,
    /// Extra environment, e.g. the resolved provider credential
    pub env: Vec<(String, String)>,
}

impl LaunchSpec {
    pub fn for_research(research: &Research, env: Vec<(String, String)>) -> Self {
        Self {
            topic: research.topic.clone(),
            work_dir: research.work_dir.clone(),
            provider: research.provider.clone(),
            model: research.model.clone(),
            env,
        }
    }
}

/// Live process bookkeeping for one agent
struct RunHandle {
    run_id: u64,
    research_id: String,
    work_dir: String,
    pid: Option<u32>,
    kill_tx: Option<oneshot::Sender<()>>,
    done_rx: watch::Receiver<bool>,
}

type ProcessRegistry = Arc<Mutex<HashMap<String, RunHandle>>>;

/// Agent lifecycle manager
pub struct AgentManager {
    config: ManagerConfig,
    collector: Arc<LogCollector>,
    /// Map of agent ID to its live process. At most one entry per agent.
    processes: ProcessRegistry,
    next_run_id: AtomicU64,
}

impl AgentManager {
    pub fn new(config: ManagerConfig, collector: LogCollector) -> Self {
        Self {
            config,
            collector: Arc::new(collector),
            processes: Arc::new(Mutex::new(HashMap::new())),
            next_run_id: AtomicU64::new(1),
        }
    }

    /// Create a manager and fail every run left over from a previous process
    pub fn init(
        config: ManagerConfig,
        collector: LogCollector,
    ) -> SupervisorResult<(Self, RecoveryReport)> {
        let report = recover_stale_runs(&collector)?;
        if !report.is_empty() {
            log::warn!(
                "[AgentManager] Recovered {} stale agents and {} stale researches",
                report.agents_failed.len(),
                report.researches_failed.len()
            );
        }
        Ok((Self::new(config, collector), report))
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    pub fn collector(&self) -> &Arc<LogCollector> {
        &self.collector
    }

    pub fn store(&self) -> &Arc<Store> {
        self.collector.store()
    }

    // ========== Queries ==========

    pub fn is_running(&self, agent_id: &str) -> bool {
        lock_mutex_recover(&self.processes).contains_key(agent_id)
    }

    pub fn running_count(&self) -> usize {
        lock_mutex_recover(&self.processes).len()
    }

    pub fn running_agents(&self) -> Vec<String> {
        lock_mutex_recover(&self.processes).keys().cloned().collect()
    }

    pub fn pid(&self, agent_id: &str) -> Option<u32> {
        lock_mutex_recover(&self.processes)
            .get(agent_id)
            .and_then(|h| h.pid)
    }

    /// Whether any agent of the research has a live process
    pub fn has_live_process(&self, research_id: &str) -> bool {
        lock_mutex_recover(&self.processes)
            .values()
            .any(|h| h.research_id == research_id)
    }

    // ========== Lifecycle ==========

    /// Spawn the worker for a pending agent
    pub async fn start(&self, agent_id: &str, spec: &LaunchSpec) -> SupervisorResult<u32> {
        if self.is_running(agent_id) {
            return Err(SupervisorError::AlreadyRunning(agent_id.to_string()));
        }

        let agent = self.store().get_agent(agent_id)?;
        state_machine::transition_agent(agent.status, AgentStatus::Running)?;

        log::info!(
            "[AgentManager] Starting agent {} for research {}",
            agent.id,
            agent.research_id
        );
        self.launch(&agent, spec, false)
    }

    /// Cooperative cancel through the sentinel file.
    ///
    /// Does not need a process handle, so it also reaches workers started by
    /// another supervisor instance.
    pub async fn cancel(&self, agent_id: &str) -> SupervisorResult<()> {
        let agent = self.store().get_agent(agent_id)?;
        let research = self.store().get_research(&agent.research_id)?;

        log::info!("[AgentManager] Cancelling agent {}", agent_id);
        self.collector.append(
            &research.id,
            agent_id,
            ActivityKind::System,
            "Cancellation requested",
            Some(json!({"workDir": research.work_dir})),
        )?;

        sentinel::request_cancel(&research.work_dir, self.config.poll_interval)
            .await
            .map_err(SupervisorError::Storage)
    }

    /// Queue a follow-up message for the agent's worker.
    ///
    /// A worker waiting for messages picks it up on its next poll; one that
    /// is not running sees it as history when resumed.
    pub fn send_message(&self, agent_id: &str, content: &str) -> SupervisorResult<FollowUpMessage> {
        let content = content.trim();
        if content.is_empty() {
            return Err(SupervisorError::Configuration(
                "Message must not be empty".to_string(),
            ));
        }

        let agent = self.store().get_agent(agent_id)?;
        let research = self.store().get_research(&agent.research_id)?;
        let message =
            append_message(&research.work_dir, content).map_err(SupervisorError::Storage)?;

        if !self.is_running(agent_id) && agent.status != AgentStatus::Running {
            log::info!(
                "[AgentManager] Agent {} is {}, message {} waits for a resume",
                agent_id,
                agent.status,
                message.id
            );
        }
        self.collector.append(
            &research.id,
            agent_id,
            ActivityKind::System,
            "Follow-up message queued",
            Some(json!({"messageId": message.id, "content": message.content})),
        )?;
        Ok(message)
    }

    /// Stop any live process for the agent, then re-spawn it with the resume flag
    pub async fn resume(&self, agent_id: &str, spec: &LaunchSpec) -> SupervisorResult<u32> {
        let agent = self.store().get_agent(agent_id)?;
        if agent.status == AgentStatus::Pending {
            return Err(state_machine::StateTransitionError::NotReopenable(agent.status).into());
        }

        if self.is_running(agent_id) {
            self.cancel(agent_id).await?;
            if !self.stop_within_grace(agent_id).await {
                return Err(SupervisorError::AlreadyRunning(agent_id.to_string()));
            }
        } else if agent.status == AgentStatus::Running {
            // Possibly owned by another supervisor instance
            log::warn!(
                "[AgentManager] Agent {} is running without a local process, cancelling through the sentinel",
                agent_id
            );
            self.cancel(agent_id).await?;
        }

        let agent = self.collector.reopen_agent(agent_id)?;
        self.collector.reopen_research(&agent.research_id)?;
        self.collector.append(
            &agent.research_id,
            agent_id,
            ActivityKind::System,
            &format!("Resuming worker (resume #{})", agent.resume_count),
            Some(json!({"resumeCount": agent.resume_count})),
        )?;

        log::info!(
            "[AgentManager] Resuming agent {} (resume #{})",
            agent_id,
            agent.resume_count
        );
        self.launch(&agent, spec, true)
    }

    /// Wait for the live process of an agent to finish its exit handling.
    /// Returns `true` when no process is left.
    pub async fn wait_for_exit(&self, agent_id: &str, timeout: Duration) -> bool {
        let done_rx = lock_mutex_recover(&self.processes)
            .get(agent_id)
            .map(|h| h.done_rx.clone());

        let mut done_rx = match done_rx {
            Some(rx) => rx,
            None => return true,
        };

        // A dropped sender also means the run task is gone
        let exited = tokio::time::timeout(timeout, done_rx.wait_for(|done| *done))
            .await
            .is_ok();
        exited
    }

    /// Wait until the agent's run ends, without a bound
    pub async fn wait(&self, agent_id: &str) {
        let done_rx = lock_mutex_recover(&self.processes)
            .get(agent_id)
            .map(|h| h.done_rx.clone());
        if let Some(mut rx) = done_rx {
            let _ = rx.wait_for(|done| *done).await;
        }
    }

    /// Force-kill the live process of an agent. Returns whether a kill was sent.
    pub fn kill(&self, agent_id: &str) -> bool {
        let kill_tx = lock_mutex_recover(&self.processes)
            .get_mut(agent_id)
            .and_then(|h| h.kill_tx.take());

        match kill_tx {
            Some(tx) => {
                log::warn!("[AgentManager] Force killing agent {}", agent_id);
                tx.send(()).is_ok()
            }
            None => false,
        }
    }

    /// After a cooperative cancel: wait out the grace period, then kill
    async fn stop_within_grace(&self, agent_id: &str) -> bool {
        if self.wait_for_exit(agent_id, self.config.exit_grace).await {
            return true;
        }
        self.kill(agent_id);
        self.wait_for_exit(agent_id, self.config.exit_grace).await
    }

    /// Cancel every live process and wait for their exit handling
    pub async fn shutdown(&self) -> ShutdownResult {
        let live: Vec<(String, String)> = lock_mutex_recover(&self.processes)
            .iter()
            .map(|(id, h)| (id.clone(), h.work_dir.clone()))
            .collect();

        let mut result = ShutdownResult::new();
        if live.is_empty() {
            return result;
        }

        log::info!("[AgentManager] Shutting down {} live agents", live.len());

        for (agent_id, work_dir) in &live {
            if let Err(e) = sentinel::write_sentinel(work_dir) {
                result
                    .errors
                    .push(format!("Agent {}: {}", agent_id, e));
            }
        }
        tokio::time::sleep(sentinel::sentinel_hold(self.config.poll_interval)).await;
        for (agent_id, work_dir) in &live {
            if let Err(e) = sentinel::clear_sentinel(work_dir) {
                result
                    .errors
                    .push(format!("Agent {}: {}", agent_id, e));
            }
        }

        for (agent_id, _) in &live {
            if self.wait_for_exit(agent_id, self.config.exit_grace).await {
                result.agents_stopped += 1;
                continue;
            }
            self.kill(agent_id);
            if self.wait_for_exit(agent_id, self.config.exit_grace).await {
                result.agents_killed += 1;
            } else {
                result
                    .errors
                    .push(format!("Agent {} did not exit after kill", agent_id));
            }
        }

        result
    }

    // ========== Spawning ==========

    fn build_command(&self, program: &std::path::Path, spec: &LaunchSpec, resume: bool) -> Command {
        let mut cmd = Command::new(program);
        cmd.args(&self.config.prefix_args)
            .arg(&spec.topic)
            .arg(&spec.work_dir)
            .arg(&spec.provider)
            .arg(&spec.model);
        if resume {
            cmd.arg(&self.config.resume_flag);
        }
        cmd.current_dir(&spec.work_dir)
            .envs(spec.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }

    fn launch(&self, agent: &Agent, spec: &LaunchSpec, resume: bool) -> SupervisorResult<u32> {
        let program = match WorkerPathResolver::resolve(&self.config.program) {
            Some(path) => path,
            None => {
                return Err(self.fail_spawn(agent, "executable not found"));
            }
        };

        let mut cmd = self.build_command(&program, spec, resume);
        log::info!(
            "[AgentManager] Executing command: {:?} {:?}",
            program,
            cmd.as_std().get_args().collect::<Vec<_>>()
        );

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                log::error!("[AgentManager] Failed to spawn process: {}", e);
                return Err(self.fail_spawn(agent, &e.to_string()));
            }
        };

        let pid = child.id().unwrap_or_default();
        log::info!("[AgentManager] Process PID: {}", pid);

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        self.collector
            .agent_status(&agent.id, AgentStatus::Running, |a| {
                a.process_id = Some(pid);
            })?;
        self.collector
            .research_status(&agent.research_id, ResearchStatus::InProgress)?;
        self.collector.append(
            &agent.research_id,
            &agent.id,
            ActivityKind::System,
            &format!("Worker spawned with PID {}", pid),
            Some(json!({"pid": pid, "resume": resume, "program": program})),
        )?;

        let run_id = self.next_run_id.fetch_add(1, Ordering::SeqCst);
        let (kill_tx, kill_rx) = oneshot::channel();
        let (done_tx, done_rx) = watch::channel(false);

        lock_mutex_recover(&self.processes).insert(
            agent.id.clone(),
            RunHandle {
                run_id,
                research_id: agent.research_id.clone(),
                work_dir: spec.work_dir.clone(),
                pid: Some(pid),
                kill_tx: Some(kill_tx),
                done_rx,
            },
        );

        let run = RunContext {
            run_id,
            agent_id: agent.id.clone(),
            research_id: agent.research_id.clone(),
            work_dir: spec.work_dir.clone(),
            resume,
            parser: self.config.parser,
            collector: self.collector.clone(),
            processes: self.processes.clone(),
        };
        tokio::spawn(run.supervise(child, stdout, stderr, kill_rx, done_tx));

        Ok(pid)
    }

    /// Record a spawn failure. No process handle exists afterwards.
    fn fail_spawn(&self, agent: &Agent, message: &str) -> SupervisorError {
        let err = SupervisorError::Spawn {
            program: self.config.program.clone(),
            message: message.to_string(),
        };
        log::error!("[AgentManager] {}", err);

        let error_text = err.to_string();
        if let Err(e) = self.collector.append(
            &agent.research_id,
            &agent.id,
            ActivityKind::Error,
            &error_text,
            Some(json!({"error_kind": err.kind(), "program": self.config.program})),
        ) {
            log::warn!("[AgentManager] Failed to record spawn error: {}", e);
        }

        let exit = self.collector.agent_status(&agent.id, AgentStatus::Failed, |a| {
            a.error = Some(error_text.clone());
        });
        if let Err(e) = exit {
            log::warn!("[AgentManager] Failed to mark agent {} failed: {}", agent.id, e);
        }
        if let Err(e) = self
            .collector
            .research_status(&agent.research_id, ResearchStatus::Failed)
        {
            log::warn!(
                "[AgentManager] Failed to mark research {} failed: {}",
                agent.research_id,
                e
            );
        }

        self.collector.emit_completion(AgentCompletedPayload {
            agent_id: agent.id.clone(),
            research_id: agent.research_id.clone(),
            success: false,
            exit_code: None,
            error: Some(error_text),
        });

        err
    }
}

/// Everything one run task needs, detached from the manager
struct RunContext {
    run_id: u64,
    agent_id: String,
    research_id: String,
    work_dir: String,
    resume: bool,
    parser: ParserConfig,
    collector: Arc<LogCollector>,
    processes: ProcessRegistry,
}

async fn read_chunk(stdout: &mut Option<ChildStdout>, buf: &mut [u8]) -> std::io::Result<usize> {
    match stdout {
        Some(out) => out.read(buf).await,
        None => std::future::pending().await,
    }
}

async fn next_stderr_line(
    lines: &mut Option<Lines<BufReader<ChildStderr>>>,
) -> std::io::Result<Option<String>> {
    match lines {
        Some(lines) => lines.next_line().await,
        None => std::future::pending().await,
    }
}

impl RunContext {
    async fn supervise(
        self,
        mut child: Child,
        mut stdout: Option<ChildStdout>,
        stderr: Option<ChildStderr>,
        mut kill_rx: oneshot::Receiver<()>,
        done_tx: watch::Sender<bool>,
    ) {
        let mut parser = StreamingParser::new(self.parser);
        let mut tracker = if self.resume {
            ProgressTracker::resume(&self.work_dir)
        } else {
            ProgressTracker::new(&self.work_dir)
        };

        let mut stderr_lines = stderr.map(|s| BufReader::new(s).lines());
        let mut stdout_open = stdout.is_some();
        let mut stderr_open = stderr_lines.is_some();
        let mut buf = vec![0u8; READ_CHUNK_SIZE];

        let mut exit: Option<std::io::Result<ExitStatus>> = None;
        let mut kill_requested = false;
        let mut fatal: Option<String> = None;
        // Armed once the worker exits
        let drain = tokio::time::sleep(IDLE_DRAIN);
        tokio::pin!(drain);

        loop {
            if exit.is_some() && !stdout_open && !stderr_open {
                break;
            }

            tokio::select! {
                read = read_chunk(&mut stdout, &mut buf), if stdout_open => match read {
                    Ok(0) => stdout_open = false,
                    Ok(n) => {
                        for activity in parser.feed(&buf[..n]) {
                            self.record(&activity, &mut tracker);
                        }
                    }
                    Err(e) => {
                        log::warn!("[Agent {}] stdout read failed: {}", self.agent_id, e);
                        stdout_open = false;
                    }
                },
                line = next_stderr_line(&mut stderr_lines), if stderr_open => match line {
                    Ok(Some(line)) => {
                        if let Some(reason) = self.record_stderr(&line) {
                            if fatal.is_none() {
                                fatal = Some(reason);
                                if exit.is_none() {
                                    let _ = child.start_kill(); // Best effort
                                }
                            }
                        }
                    }
                    Ok(None) => stderr_open = false,
                    Err(e) => {
                        log::warn!("[Agent {}] stderr read failed: {}", self.agent_id, e);
                        stderr_open = false;
                    }
                },
                requested = &mut kill_rx, if !kill_requested => {
                    kill_requested = true;
                    if requested.is_ok() && exit.is_none() {
                        log::warn!("[Agent {}] Killing worker", self.agent_id);
                        let _ = child.start_kill(); // Best effort
                    }
                },
                status = child.wait(), if exit.is_none() => {
                    exit = Some(status);
                    drain
                        .as_mut()
                        .reset(tokio::time::Instant::now() + DRAIN_TIMEOUT);
                },
                _ = &mut drain, if exit.is_some() => {
                    log::debug!("[Agent {}] Output pipes still open after exit, stopping reads", self.agent_id);
                    break;
                },
            }
        }

        for activity in parser.finish() {
            self.record(&activity, &mut tracker);
        }

        let payload = self.handle_exit(exit, fatal);

        {
            let mut processes = lock_mutex_recover(&self.processes);
            if processes.get(&self.agent_id).map(|h| h.run_id) == Some(self.run_id) {
                processes.remove(&self.agent_id);
            }
        }

        self.collector.emit_completion(payload);
        let _ = done_tx.send(true);
    }

    /// Persist one parsed activity and apply its side effects
    fn record(&self, parsed: &ParsedActivity, tracker: &mut ProgressTracker) {
        log::debug!("[Agent {}] {:?}: {}", self.agent_id, parsed.kind, parsed.description);

        if let Err(e) = self
            .collector
            .append_parsed(&self.research_id, &self.agent_id, parsed)
        {
            log::warn!("[Agent {}] Failed to append activity: {}", self.agent_id, e);
            return;
        }

        if parsed.kind == ActivityKind::AssistantResponse && !parsed.description.is_empty() {
            let output = parsed.description.clone();
            if let Err(e) = self
                .collector
                .store()
                .update_agent(&self.agent_id, |a| a.output = Some(output))
            {
                log::warn!("[Agent {}] Failed to store output: {}", self.agent_id, e);
            }
        }

        if let Some(update) = parsed.progress_update() {
            match tracker.update(update.percentage, update.current_task.as_deref()) {
                Ok(()) => self.collector.emit_progress(
                    &self.research_id,
                    tracker.snapshot().percentage,
                    tracker.snapshot().current_task.as_deref(),
                ),
                Err(e) => log::warn!("[Agent {}] Failed to write progress: {}", self.agent_id, e),
            }
        }

        if parsed.completion_signal() {
            match self
                .collector
                .research_status(&self.research_id, ResearchStatus::Completed)
            {
                Ok(_) => log::info!(
                    "[Agent {}] Worker reported completion for research {}",
                    self.agent_id,
                    self.research_id
                ),
                Err(e) if is_terminal_refusal(&e) => {
                    log::debug!("[Agent {}] Completion ignored: {}", self.agent_id, e)
                }
                Err(e) => log::warn!("[Agent {}] Failed to complete research: {}", self.agent_id, e),
            }
        }
    }

    /// Record a stderr line. Returns the failure reason for fatal lines.
    fn record_stderr(&self, line: &str) -> Option<String> {
        if line.trim().is_empty() {
            return None;
        }
        log::debug!("[Agent {}] stderr: {}", self.agent_id, line);

        let (kind, description, metadata, reason) = match classify_stderr(line) {
            Diagnostic::Noise => (
                ActivityKind::Diagnostic,
                line.to_string(),
                json!({"stream": "stderr"}),
                None,
            ),
            Diagnostic::Fatal { kind, pattern } => {
                log::error!("[Agent {}] Fatal worker error: {}", self.agent_id, line);
                (
                    ActivityKind::Error,
                    line.to_string(),
                    json!({
                        "stream": "stderr",
                        "error_kind": "fatal_diagnostic",
                        "category": kind.as_str(),
                        "pattern": pattern,
                    }),
                    Some(format!("Fatal worker error ({}): {}", kind.as_str(), line.trim())),
                )
            }
        };

        if let Err(e) =
            self.collector
                .append(&self.research_id, &self.agent_id, kind, &description, Some(metadata))
        {
            log::warn!("[Agent {}] Failed to append stderr line: {}", self.agent_id, e);
        }
        reason
    }

    /// Map the process outcome onto agent and research status
    fn handle_exit(
        &self,
        exit: Option<std::io::Result<ExitStatus>>,
        fatal: Option<String>,
    ) -> AgentCompletedPayload {
        let (exit_code, error) = match exit {
            Some(Ok(status)) => {
                let code = status.code();
                let error = if let Some(reason) = fatal {
                    Some(reason)
                } else if status.success() {
                    None
                } else {
                    Some(SupervisorError::RuntimeExit { code }.to_string())
                };
                (code, error)
            }
            Some(Err(e)) => (None, Some(format!("Failed to wait for worker: {}", e))),
            None => (None, Some("Worker exit status unavailable".to_string())),
        };
        let success = error.is_none();

        log::info!(
            "[Agent {}] Worker exited (code {:?}, success: {})",
            self.agent_id,
            exit_code,
            success
        );

        let description = match exit_code {
            Some(code) => format!("Worker exited with code {}", code),
            None => "Worker terminated by a signal".to_string(),
        };
        let metadata = if success {
            json!({"exitCode": exit_code})
        } else {
            json!({"exitCode": exit_code, "error_kind": "runtime_exit_error", "error": error})
        };
        if let Err(e) = self.collector.append(
            &self.research_id,
            &self.agent_id,
            ActivityKind::System,
            &description,
            Some(metadata),
        ) {
            log::warn!("[Agent {}] Failed to record exit: {}", self.agent_id, e);
        }

        let (agent_target, research_target) = if success {
            (AgentStatus::Completed, ResearchStatus::Completed)
        } else {
            (AgentStatus::Failed, ResearchStatus::Failed)
        };

        let agent_error = error.clone();
        if let Err(e) = self.collector.agent_status(&self.agent_id, agent_target, |a| {
            a.exit_code = exit_code;
            a.error = agent_error;
            a.process_id = None;
        }) {
            log::warn!("[Agent {}] Exit transition refused: {}", self.agent_id, e);
        }

        match self
            .collector
            .research_status(&self.research_id, research_target)
        {
            Ok(_) => {}
            Err(e) if is_terminal_refusal(&e) => {
                log::debug!("[Agent {}] Research already final: {}", self.agent_id, e)
            }
            Err(e) => log::warn!("[Agent {}] Research exit transition failed: {}", self.agent_id, e),
        }

        AgentCompletedPayload {
            agent_id: self.agent_id.clone(),
            research_id: self.research_id.clone(),
            success,
            exit_code,
            error,
        }
    }
}
