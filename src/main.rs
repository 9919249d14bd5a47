use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use research_supervisor_lib::agents::{AgentManager, LogCollector};
use research_supervisor_lib::commands::{ResearchService, StartResearchRequest};
use research_supervisor_lib::config::{
    get_all_provider_presets, ChainedCredentials, ConfigOverrides, CredentialSource,
    SupervisorConfig,
};
use research_supervisor_lib::events::SupervisorEvent;
use research_supervisor_lib::file_storage::Store;
use research_supervisor_lib::shutdown::{register_signal_handlers, ShutdownHandler, ShutdownState};
use research_supervisor_lib::AgentStatus;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// Supervise research worker processes and record their activity
#[derive(Parser, Debug)]
#[command(name = "research-supervisor")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Config file (defaults to ~/.research-supervisor/config.toml)
    #[arg(long, global = true, env = "RESEARCH_SUPERVISOR_CONFIG")]
    config: Option<PathBuf>,

    /// Data directory for research, agent and activity files
    #[arg(long, global = true, env = "RESEARCH_SUPERVISOR_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Worker executable, overriding the config file
    #[arg(long, global = true)]
    program: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create a research and run its worker until it exits
    Start {
        topic: String,
        #[arg(long)]
        work_dir: PathBuf,
        #[arg(long, default_value = "anthropic")]
        provider: String,
        /// Defaults to the provider's default model
        #[arg(long)]
        model: Option<String>,
        /// Fail runs left over from a crashed supervisor first
        #[arg(long)]
        recover: bool,
    },
    /// Re-spawn the worker of a research with the resume flag
    Resume {
        research_id: String,
        #[arg(long)]
        recover: bool,
    },
    /// Ask the worker of a research to stop (works across processes)
    Cancel { research_id: String },
    /// Queue a follow-up message for the worker of a research
    Message { research_id: String, content: String },
    /// Show a research, its agents and progress
    Status { research_id: String },
    /// Print the activity log of a research
    Activities {
        research_id: String,
        /// Treat the id as an agent id
        #[arg(long)]
        agent: bool,
    },
    /// List researches, newest first
    List,
    /// Delete a research with its agents and activities
    Delete { research_id: String },
    /// Fail runs left over from a crashed supervisor
    Recover,
    /// List provider presets
    Providers,
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    let overrides = ConfigOverrides {
        program: cli.program.clone(),
        data_dir: cli.data_dir.clone(),
        poll_interval_ms: None,
    };
    let config = SupervisorConfig::load(cli.config.as_deref())?.apply_overrides(&overrides);

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to create tokio runtime")?;

    runtime.block_on(run(cli.command, config))
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn run(command: Command, config: SupervisorConfig) -> Result<()> {
    let data_dir = config.data_dir();
    let store = Arc::new(Store::open(&data_dir).context("Failed to open data directory")?);
    let credentials: Box<dyn CredentialSource + Send + Sync> =
        Box::new(ChainedCredentials::standard());

    match command {
        Command::Start {
            topic,
            work_dir,
            provider,
            model,
            recover,
        } => {
            let (events_tx, events_rx) = mpsc::unbounded_channel();
            let service = build_service(&config, store, credentials, Some(events_tx), recover)?;
            let printer = tokio::spawn(print_events(events_rx));

            let request = StartResearchRequest {
                topic,
                work_dir: work_dir.to_string_lossy().to_string(),
                provider,
                model,
            };
            let started = service.start_research(request).await?;
            log::info!(
                "Research {} running as agent {} (pid {})",
                started.research.id,
                started.agent.id,
                started.pid
            );
            let success = follow(&service, &started.agent.id).await?;
            finish(service, printer, success).await
        }
        Command::Resume {
            research_id,
            recover,
        } => {
            let (events_tx, events_rx) = mpsc::unbounded_channel();
            let service = build_service(&config, store, credentials, Some(events_tx), recover)?;
            let printer = tokio::spawn(print_events(events_rx));

            let started = service.resume_research(&research_id).await?;
            let success = follow(&service, &started.agent.id).await?;
            finish(service, printer, success).await
        }
        Command::Cancel { research_id } => {
            let service = build_service(&config, store, credentials, None, false)?;
            service.cancel_research(&research_id).await?;
            println!("Cancellation requested for research {}", research_id);
            Ok(())
        }
        Command::Message {
            research_id,
            content,
        } => {
            let service = build_service(&config, store, credentials, None, false)?;
            let message = service.send_message(&research_id, &content)?;
            print_json(&message)
        }
        Command::Status { research_id } => {
            let service = build_service(&config, store, credentials, None, false)?;
            print_json(&service.status(&research_id)?)
        }
        Command::Activities { research_id, agent } => {
            let service = build_service(&config, store, credentials, None, false)?;
            let activities = if agent {
                service.agent_activities(&research_id)?
            } else {
                service.research_activities(&research_id)?
            };
            for activity in activities {
                println!("{}", serde_json::to_string(&activity)?);
            }
            Ok(())
        }
        Command::List => {
            let service = build_service(&config, store, credentials, None, false)?;
            print_json(&service.list_researches()?)
        }
        Command::Delete { research_id } => {
            let service = build_service(&config, store, credentials, None, false)?;
            service.delete_research(&research_id)?;
            println!("Deleted research {}", research_id);
            Ok(())
        }
        Command::Recover => {
            let (_manager, report) =
                AgentManager::init(config.manager_config(), LogCollector::new(store))?;
            print_json(&report)
        }
        Command::Providers => {
            let infos: Vec<_> = get_all_provider_presets()
                .iter()
                .map(|p| {
                    let has_credential = p
                        .env_keys
                        .iter()
                        .any(|key| credentials.lookup(p.id, key).is_some());
                    p.to_info(has_credential)
                })
                .collect();
            print_json(&infos)
        }
    }
}

/// Crash recovery is opt-in for CLI invocations: another CLI process may own
/// a run that looks stale from here.
fn build_service(
    config: &SupervisorConfig,
    store: Arc<Store>,
    credentials: Box<dyn CredentialSource + Send + Sync>,
    events_tx: Option<mpsc::UnboundedSender<SupervisorEvent>>,
    recover: bool,
) -> Result<ResearchService> {
    let mut collector = LogCollector::new(store);
    if let Some(tx) = events_tx {
        collector.set_event_sender(tx);
    }

    let manager = if recover {
        let (manager, report) = AgentManager::init(config.manager_config(), collector)?;
        if !report.is_empty() {
            eprintln!(
                "Recovered {} stale agents, {} stale researches",
                report.agents_failed.len(),
                report.researches_failed.len()
            );
        }
        manager
    } else {
        AgentManager::new(config.manager_config(), collector)
    };

    Ok(ResearchService::new(manager, credentials))
}

/// Wait for the run to end. A signal cancels it cooperatively first.
async fn follow(service: &ResearchService, agent_id: &str) -> Result<bool> {
    let shutdown_state = ShutdownState::new();
    if let Err(e) = register_signal_handlers(shutdown_state.clone()) {
        log::warn!("Failed to register signal handlers: {}", e);
    }

    tokio::select! {
        _ = service.manager().wait(agent_id) => {}
        _ = shutdown_state.wait_for_shutdown() => {
            let handler = ShutdownHandler::with_state(shutdown_state.clone());
            let result = handler.handle_shutdown(|| service.manager().shutdown()).await;
            if !result.is_clean() {
                eprintln!("Shutdown finished with {} errors", result.errors.len());
            }
        }
    }

    let agent = service.store().get_agent(agent_id)?;
    eprintln!("Agent {} finished: {}", agent.id, agent.status);
    if let Some(error) = &agent.error {
        eprintln!("{}", error);
    }

    Ok(agent.status == AgentStatus::Completed)
}

/// Flush pending events, then exit nonzero if the run failed
async fn finish(
    service: ResearchService,
    printer: tokio::task::JoinHandle<()>,
    success: bool,
) -> Result<()> {
    // Dropping the service closes the event channel
    drop(service);
    match tokio::time::timeout(Duration::from_secs(2), printer).await {
        Ok(Err(e)) => log::warn!("Event printer stopped: {}", e),
        Err(_) => log::warn!("Timed out flushing events"),
        Ok(Ok(())) => {}
    }

    if !success {
        std::process::exit(1);
    }
    Ok(())
}

async fn print_events(mut rx: mpsc::UnboundedReceiver<SupervisorEvent>) {
    while let Some(event) = rx.recv().await {
        match serde_json::to_string(&event) {
            Ok(line) => println!("{}", line),
            Err(e) => log::warn!("Failed to serialize {} event: {}", event.name(), e),
        }
    }
}
