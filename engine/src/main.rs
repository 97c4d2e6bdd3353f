mod plan;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio::sync::broadcast::error::RecvError;
use tracing::info;
use uuid::Uuid;
use weave_observability::{
    canonical_logs_dir_from_root, emit_event, init_process_logging, ObservabilityEvent, ProcessKind,
    ProcessLogging,
};
use weave_orchestrator::{
    OrchestratorSettings, RecordingPublisher, RunCoordinator, RunStore, StatusBus,
};
use weave_types::{CommandResponse, StatusEventKind};

use crate::plan::{RunPlan, ScriptedExecutor};

const LOG_RETENTION_DAYS: u64 = 14;

#[derive(Parser, Debug)]
#[command(name = "weave-engine")]
#[command(about = "Headless Weave orchestration engine")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run a plan and stream status updates as JSON lines
    Run {
        /// Plan file, or `-` for stdin
        #[arg(long)]
        plan: String,
        #[arg(long)]
        orchestrator_id: Option<String>,
        #[arg(long)]
        parent: Option<String>,
        #[arg(long)]
        state_dir: Option<String>,
        #[arg(long)]
        settings: Option<String>,
    },
    /// Finalise runs left active by a previous process
    Recover {
        #[arg(long)]
        state_dir: Option<String>,
    },
    /// Print finalised runs of one orchestrator
    History {
        orchestrator_id: String,
        #[arg(long)]
        state_dir: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Run {
            plan,
            orchestrator_id,
            parent,
            state_dir,
            settings,
        } => {
            let state_dir = resolve_state_dir(state_dir);
            let logging = init_logging(&state_dir)?;
            let settings = OrchestratorSettings::load(settings.as_deref().map(Path::new))?;
            let plan = RunPlan::load(&plan)?;

            let store = Arc::new(RunStore::new(&state_dir)?);
            let bus = StatusBus::with_capacity(settings.status_channel_capacity);
            let coordinator = RunCoordinator::new(
                Arc::new(ScriptedExecutor::new(plan.scripts.clone())),
                Arc::new(RecordingPublisher::new(bus.clone(), store.clone())),
                settings,
            )
            .with_store(store);

            let recovered = coordinator.recover_interrupted_runs().await?;
            if !recovered.is_empty() {
                info!("recovered {} interrupted run(s)", recovered.len());
            }

            let orchestrator_id = orchestrator_id
                .or(plan.orchestrator_id)
                .unwrap_or_else(|| format!("orch-{}", Uuid::new_v4()));
            let parent = parent.or(plan.parent_orchestration_id);

            let mut rx = bus.subscribe();
            let run_id = match coordinator
                .start(&orchestrator_id, plan.config, parent.as_deref())
                .await
            {
                Ok(run_id) => run_id,
                Err(e) => {
                    let response = CommandResponse::err(e.to_string());
                    println!("{}", serde_json::to_string(&response)?);
                    return Err(e).context("run was not admitted");
                }
            };
            info!("orchestrator {} started run {}", orchestrator_id, run_id);

            let mut abort_requested = false;
            let failed = loop {
                tokio::select! {
                    received = rx.recv() => match received {
                        Ok(update) => {
                            if update.orchestrator_id != orchestrator_id {
                                continue;
                            }
                            println!("{}", serde_json::to_string(&update)?);
                            if update.kind.is_terminal() {
                                break update.kind == StatusEventKind::RunFailed;
                            }
                        }
                        Err(RecvError::Lagged(skipped)) => {
                            tracing::warn!("status stream lagged by {} updates", skipped);
                        }
                        Err(RecvError::Closed) => anyhow::bail!("status stream closed"),
                    },
                    _ = tokio::signal::ctrl_c(), if !abort_requested => {
                        abort_requested = true;
                        let response: CommandResponse =
                            coordinator.abort(&orchestrator_id).await.into();
                        info!("abort requested: {:?}", response);
                    }
                }
            };

            if failed {
                drop(logging);
                std::process::exit(1);
            }
        }
        Command::Recover { state_dir } => {
            let state_dir = resolve_state_dir(state_dir);
            let _logging = init_logging(&state_dir)?;
            let store = Arc::new(RunStore::new(&state_dir)?);
            let coordinator = RunCoordinator::new(
                Arc::new(ScriptedExecutor::new(Default::default())),
                Arc::new(StatusBus::new()),
                OrchestratorSettings::load(None)?,
            )
            .with_store(store);

            for run in coordinator.recover_interrupted_runs().await? {
                println!("{}", serde_json::to_string(&run)?);
            }
        }
        Command::History {
            orchestrator_id,
            state_dir,
        } => {
            let state_dir = resolve_state_dir(state_dir);
            let store = RunStore::new(&state_dir)?;
            for run in store.load_history(&orchestrator_id)? {
                println!("{}", serde_json::to_string(&run)?);
            }
        }
    }

    Ok(())
}

fn init_logging(state_dir: &Path) -> anyhow::Result<ProcessLogging> {
    let logs_dir = canonical_logs_dir_from_root(state_dir);
    let logging = init_process_logging(ProcessKind::Engine, &logs_dir, LOG_RETENTION_DAYS)?;
    emit_event(
        tracing::Level::INFO,
        ProcessKind::Engine,
        ObservabilityEvent {
            event: "logging.initialized",
            component: "engine.main",
            status: Some("ok"),
            detail: Some("engine jsonl logging initialized"),
            ..Default::default()
        },
    );
    info!(
        "engine logging initialized in {} ({} expired file(s) removed)",
        logging.logs_dir.display(),
        logging.removed.len()
    );
    log_startup_paths(state_dir);
    Ok(logging)
}

fn resolve_state_dir(flag: Option<String>) -> PathBuf {
    if let Some(dir) = flag {
        return PathBuf::from(dir);
    }
    if let Ok(dir) = std::env::var("WEAVE_STATE_DIR") {
        if !dir.trim().is_empty() {
            return PathBuf::from(dir);
        }
    }
    dirs::data_dir()
        .map(|dir| dir.join("weave"))
        .unwrap_or_else(|| PathBuf::from(".weave"))
}

fn log_startup_paths(state_dir: &Path) {
    let exe = std::env::current_exe().unwrap_or_else(|_| PathBuf::from("<unknown>"));
    let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("<unknown>"));
    info!(
        "startup paths: exe={} cwd={} state_dir={}",
        exe.display(),
        cwd.display(),
        state_dir.display()
    );
}
