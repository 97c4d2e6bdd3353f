// Run Coordinator
// Admission, lifecycle control and finalisation of orchestration runs

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, RwLock};
use tracing::Level;
use weave_observability::{emit_event, redact_text, ObservabilityEvent, ProcessKind};
use weave_types::{
    ActiveRunInfo, AgentStatus, OrchestrationRun, OrchestrationStrategy, OrchestratorConfig,
    RunStatus, StatusEventKind, StatusUpdate,
};

use crate::budget::{BudgetGuard, ParallelBudgetCheck};
use crate::bus::StatusPublisher;
use crate::config::OrchestratorSettings;
use crate::control::RunControl;
use crate::cycle::{CycleDetector, ParentLink};
use crate::error::{OrchestratorError, Result};
use crate::executor::AgentExecutor;
use crate::store::RunStore;
use crate::strategy::{determine_final_status, executor_for, RunContext};

pub const INTERRUPTED_MESSAGE: &str = "Run interrupted by restart";

/// Run table entry for one in-flight orchestrator
#[derive(Clone)]
struct ActiveRun {
    link: ParentLink,
    run: Arc<RwLock<OrchestrationRun>>,
    control: RunControl,
}

/// Owns every active run, keyed by orchestrator id. At most one run per id.
#[derive(Clone)]
pub struct RunCoordinator {
    runs: Arc<Mutex<HashMap<String, ActiveRun>>>,
    executor: Arc<dyn AgentExecutor>,
    publisher: Arc<dyn StatusPublisher>,
    store: Option<Arc<RunStore>>,
    settings: OrchestratorSettings,
}

impl RunCoordinator {
    pub fn new(
        executor: Arc<dyn AgentExecutor>,
        publisher: Arc<dyn StatusPublisher>,
        settings: OrchestratorSettings,
    ) -> Self {
        Self {
            runs: Arc::new(Mutex::new(HashMap::new())),
            executor,
            publisher,
            store: None,
            settings,
        }
    }

    /// Persist active runs and history through `store`
    pub fn with_store(mut self, store: Arc<RunStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn settings(&self) -> &OrchestratorSettings {
        &self.settings
    }

    /// Admit and dispatch a run. Returns the new run id without waiting
    /// for any agent to execute.
    pub async fn start(
        &self,
        orchestrator_id: &str,
        config: OrchestratorConfig,
        parent_orchestration_id: Option<&str>,
    ) -> Result<String> {
        let (run, control, run_id) = {
            let mut runs = self.runs.lock().await;

            if let Err(e) = self.admit(&runs, orchestrator_id, &config, parent_orchestration_id) {
                let detail = e.to_string();
                emit_event(
                    Level::WARN,
                    ProcessKind::Orchestrator,
                    ObservabilityEvent {
                        event: "run.rejected",
                        component: "coordinator",
                        orchestrator_id: Some(orchestrator_id),
                        strategy: Some(config.strategy.as_str()),
                        error_code: Some(e.code()),
                        detail: Some(detail.as_str()),
                        ..Default::default()
                    },
                );
                return Err(e);
            }

            let mut record = OrchestrationRun::new(
                orchestrator_id,
                parent_orchestration_id.map(str::to_string),
                &config,
            );
            for agent in &record.agents {
                if let Some(prompt) = agent.prompt_override.as_deref() {
                    tracing::debug!(
                        "Agent {} prompt override {}",
                        agent.agent_node_id,
                        redact_text(prompt)
                    );
                }
            }
            if let Some(store) = &self.store {
                store.save_active_run(&record)?;
            }
            record.transition(RunStatus::Running);

            let run_id = record.run_id.clone();
            let run = Arc::new(RwLock::new(record));
            let control = RunControl::new();
            runs.insert(
                orchestrator_id.to_string(),
                ActiveRun {
                    link: ParentLink {
                        orchestrator_id: orchestrator_id.to_string(),
                        run_id: run_id.clone(),
                        parent_orchestration_id: parent_orchestration_id.map(str::to_string),
                    },
                    run: run.clone(),
                    control: control.clone(),
                },
            );
            (run, control, run_id)
        };

        self.persist(&run).await;
        tracing::info!(
            "Starting {} run {} for orchestrator {} ({} agents)",
            config.strategy.as_str(),
            run_id,
            orchestrator_id,
            config.agents.len()
        );
        emit_event(
            Level::INFO,
            ProcessKind::Orchestrator,
            ObservabilityEvent {
                event: "run.started",
                component: "coordinator",
                orchestrator_id: Some(orchestrator_id),
                run_id: Some(run_id.as_str()),
                strategy: Some(config.strategy.as_str()),
                status: Some(RunStatus::Running.as_str()),
                ..Default::default()
            },
        );
        self.publisher.publish(StatusUpdate::new(
            orchestrator_id,
            &run_id,
            StatusEventKind::RunStarted,
        ));

        let ctx = RunContext::new(
            orchestrator_id.to_string(),
            run_id.clone(),
            run,
            control,
            self.executor.clone(),
            self.publisher.clone(),
            self.store.clone(),
            self.settings.clone(),
        );
        let coordinator = self.clone();
        let orchestrator_id = orchestrator_id.to_string();
        let strategy = config.strategy;

        tokio::spawn(async move {
            let mut ctx = ctx;
            let control = ctx.control.clone();
            let poll = ctx.settings.pause_poll_interval();

            let outcome = match tokio::spawn(async move {
                executor_for(strategy).execute(&mut ctx).await
            })
            .await
            {
                Ok(Ok(())) => {
                    // a pause requested during the last agent still holds finalisation
                    control.wait_while_paused(poll).await;
                    Ok(())
                }
                Ok(Err(e)) => Err(e),
                Err(e) => Err(OrchestratorError::Executor(format!(
                    "Strategy executor crashed: {}",
                    e
                ))),
            };
            coordinator.finalize(&orchestrator_id, outcome).await;
        });

        Ok(run_id)
    }

    /// Cycle, presence, agent count and parallel sizing checks, in that order
    fn admit(
        &self,
        runs: &HashMap<String, ActiveRun>,
        orchestrator_id: &str,
        config: &OrchestratorConfig,
        parent_orchestration_id: Option<&str>,
    ) -> Result<()> {
        let check = CycleDetector::detect(
            orchestrator_id,
            parent_orchestration_id,
            self.settings.max_parent_depth,
            |run_id| {
                runs.values()
                    .find(|active| active.link.run_id == run_id)
                    .map(|active| active.link.clone())
            },
        );
        if check.has_cycle {
            return Err(OrchestratorError::Cycle { chain: check.chain });
        }

        if runs.contains_key(orchestrator_id) {
            return Err(OrchestratorError::AlreadyRunning(orchestrator_id.to_string()));
        }

        if config.agents.is_empty() {
            return Err(OrchestratorError::NoAgents(orchestrator_id.to_string()));
        }

        if config.strategy == OrchestrationStrategy::Parallel {
            if let ParallelBudgetCheck::Reject { reason } =
                BudgetGuard::validate_parallel_budget(&config.budget, config.agents.len())
            {
                return Err(OrchestratorError::ParallelBudget(reason));
            }
        }

        Ok(())
    }

    pub async fn pause(&self, orchestrator_id: &str) -> Result<()> {
        let active = self.active(orchestrator_id).await?;
        let (run_id, tokens, cost) = {
            let mut run = active.run.write().await;
            if run.status == RunStatus::Paused {
                return Err(OrchestratorError::AlreadyPaused(orchestrator_id.to_string()));
            }
            if !run.transition(RunStatus::Paused) {
                return Err(OrchestratorError::NoActiveRun(orchestrator_id.to_string()));
            }
            active.control.pause().await;
            (run.run_id.clone(), run.total_tokens(), run.total_cost)
        };

        tracing::info!("Paused run {} for orchestrator {}", run_id, orchestrator_id);
        self.persist(&active.run).await;
        self.publisher.publish(
            StatusUpdate::new(orchestrator_id, &run_id, StatusEventKind::RunPaused)
                .with_totals(tokens, cost),
        );
        Ok(())
    }

    pub async fn resume(&self, orchestrator_id: &str) -> Result<()> {
        let active = self.active(orchestrator_id).await?;
        let (run_id, tokens, cost) = {
            let mut run = active.run.write().await;
            if run.status != RunStatus::Paused || !run.transition(RunStatus::Running) {
                return Err(OrchestratorError::NotPaused(orchestrator_id.to_string()));
            }
            active.control.resume().await;
            (run.run_id.clone(), run.total_tokens(), run.total_cost)
        };

        tracing::info!("Resumed run {} for orchestrator {}", run_id, orchestrator_id);
        self.persist(&active.run).await;
        self.publisher.publish(
            StatusUpdate::new(orchestrator_id, &run_id, StatusEventKind::RunResumed)
                .with_totals(tokens, cost),
        );
        Ok(())
    }

    /// Request an abort. Agents already dispatched finish first; the run then
    /// finalises as aborted.
    pub async fn abort(&self, orchestrator_id: &str) -> Result<()> {
        let active = self.active(orchestrator_id).await?;
        tracing::info!(
            "Abort requested for run {} of orchestrator {}",
            active.link.run_id,
            orchestrator_id
        );
        active.control.abort();
        Ok(())
    }

    /// Run id and status of every in-flight orchestrator
    pub async fn resync(&self) -> HashMap<String, ActiveRunInfo> {
        let runs = self.runs.lock().await;
        let entries: Vec<(String, Arc<RwLock<OrchestrationRun>>)> = runs
            .iter()
            .map(|(id, active)| (id.clone(), active.run.clone()))
            .collect();
        drop(runs);

        let mut summary = HashMap::with_capacity(entries.len());
        for (id, run) in entries {
            summary.insert(id, run.read().await.summary());
        }
        summary
    }

    /// Copy of the in-flight run for an orchestrator
    pub async fn snapshot(&self, orchestrator_id: &str) -> Option<OrchestrationRun> {
        let active = self.active(orchestrator_id).await.ok()?;
        let run = active.run.read().await;
        Some(run.clone())
    }

    pub async fn is_active(&self, orchestrator_id: &str) -> bool {
        self.runs.lock().await.contains_key(orchestrator_id)
    }

    /// Finalised runs from the store, oldest first
    pub fn history(&self, orchestrator_id: &str) -> Result<Vec<OrchestrationRun>> {
        match &self.store {
            Some(store) => store.load_history(orchestrator_id),
            None => Ok(Vec::new()),
        }
    }

    /// Finalise runs a previous process left active on disk
    pub async fn recover_interrupted_runs(&self) -> Result<Vec<OrchestrationRun>> {
        let Some(store) = &self.store else {
            return Ok(Vec::new());
        };

        let mut recovered = Vec::new();
        for mut run in store.load_all_active_runs()? {
            if self.is_active(&run.orchestrator_id).await {
                continue;
            }

            let interrupted = mark_interrupted(&mut run);
            store.append_history(&run)?;
            store.clear_active_run(&run.orchestrator_id)?;

            if interrupted {
                tracing::warn!(
                    "Recovered interrupted run {} for orchestrator {}",
                    run.run_id,
                    run.orchestrator_id
                );
                emit_event(
                    Level::WARN,
                    ProcessKind::Orchestrator,
                    ObservabilityEvent {
                        event: "run.recovered",
                        component: "coordinator",
                        orchestrator_id: Some(run.orchestrator_id.as_str()),
                        run_id: Some(run.run_id.as_str()),
                        strategy: Some(run.strategy.as_str()),
                        status: Some(RunStatus::Failed.as_str()),
                        detail: Some(INTERRUPTED_MESSAGE),
                        ..Default::default()
                    },
                );
                self.publisher.publish(
                    StatusUpdate::new(&run.orchestrator_id, &run.run_id, StatusEventKind::RunFailed)
                        .with_totals(run.total_tokens(), run.total_cost)
                        .with_error(INTERRUPTED_MESSAGE),
                );
            } else {
                tracing::info!(
                    "Moved finished run {} for orchestrator {} to history",
                    run.run_id,
                    run.orchestrator_id
                );
            }
            recovered.push(run);
        }

        Ok(recovered)
    }

    async fn active(&self, orchestrator_id: &str) -> Result<ActiveRun> {
        self.runs
            .lock()
            .await
            .get(orchestrator_id)
            .cloned()
            .ok_or_else(|| OrchestratorError::NoActiveRun(orchestrator_id.to_string()))
    }

    async fn persist(&self, run: &Arc<RwLock<OrchestrationRun>>) {
        let Some(store) = &self.store else {
            return;
        };
        let snapshot = run.read().await.clone();
        if let Err(e) = store.save_active_run(&snapshot) {
            tracing::error!("Failed to persist run {}: {}", snapshot.run_id, e);
        }
    }

    async fn finalize(&self, orchestrator_id: &str, outcome: Result<()>) {
        // once the entry is gone, pause/resume/abort report no active run
        let mut runs = self.runs.lock().await;
        let Some(active) = runs.remove(orchestrator_id) else {
            tracing::error!("Finalising unknown orchestrator {}", orchestrator_id);
            return;
        };

        let final_run = {
            let mut run = active.run.write().await;
            let status = match &outcome {
                Err(e) => {
                    run.error = Some(e.to_string());
                    RunStatus::Failed
                }
                Ok(()) if active.control.is_aborted() => RunStatus::Aborted,
                Ok(()) => determine_final_status(&run.agent_results, run.failure_policy.kind),
            };

            if status == RunStatus::Failed && run.error.is_none() {
                run.error = Some(if run.agent_results.is_empty() {
                    "No agent produced a result".to_string()
                } else {
                    "One or more agents failed".to_string()
                });
            }
            if run.status == RunStatus::Paused && !run.status.can_transition_to(status) {
                run.transition(RunStatus::Running);
            }
            if !run.transition(status) {
                tracing::error!(
                    "Run {} cannot move from {} to {}",
                    run.run_id,
                    run.status.as_str(),
                    status.as_str()
                );
            }
            for agent in run.agents.iter_mut() {
                if agent.status.is_in_flight() {
                    agent.status = AgentStatus::Idle;
                }
            }
            run.clone()
        };

        if let Some(store) = &self.store {
            if let Err(e) = store.append_history(&final_run) {
                tracing::error!("Failed to append run {} to history: {}", final_run.run_id, e);
            }
            if let Err(e) = store.clear_active_run(orchestrator_id) {
                tracing::error!("Failed to clear active run {}: {}", final_run.run_id, e);
            }
        }
        drop(runs);

        let kind = match final_run.status {
            RunStatus::Completed => StatusEventKind::RunCompleted,
            RunStatus::CompletedWithErrors => StatusEventKind::RunCompletedWithErrors,
            RunStatus::Aborted => StatusEventKind::RunAborted,
            _ => StatusEventKind::RunFailed,
        };
        let level = if kind == StatusEventKind::RunFailed {
            Level::ERROR
        } else {
            Level::INFO
        };
        tracing::info!(
            "Run {} for orchestrator {} finished: {} ({} tokens, ${:.4})",
            final_run.run_id,
            orchestrator_id,
            final_run.status.as_str(),
            final_run.total_tokens(),
            final_run.total_cost
        );
        emit_event(
            level,
            ProcessKind::Orchestrator,
            ObservabilityEvent {
                event: "run.finished",
                component: "coordinator",
                orchestrator_id: Some(orchestrator_id),
                run_id: Some(final_run.run_id.as_str()),
                strategy: Some(final_run.strategy.as_str()),
                status: Some(final_run.status.as_str()),
                detail: final_run.error.as_deref(),
                ..Default::default()
            },
        );

        let mut update = StatusUpdate::new(orchestrator_id, &final_run.run_id, kind)
            .with_totals(final_run.total_tokens(), final_run.total_cost);
        if let Some(error) = &final_run.error {
            update = update.with_error(error);
        }
        self.publisher.publish(update);
    }
}

/// Force a still-active record to `failed`. Returns `false` for records that
/// were already terminal and only need moving to history.
pub fn mark_interrupted(run: &mut OrchestrationRun) -> bool {
    if run.status.is_terminal() {
        return false;
    }
    run.transition(RunStatus::Failed);
    run.error = Some(INTERRUPTED_MESSAGE.to_string());
    for agent in run.agents.iter_mut() {
        if agent.status.is_in_flight() {
            agent.status = AgentStatus::Idle;
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use weave_types::ConnectedAgent;

    fn run_with_agents(status: RunStatus) -> OrchestrationRun {
        let config = OrchestratorConfig {
            agents: vec![ConnectedAgent::new("a1", 0), ConnectedAgent::new("a2", 1)],
            ..OrchestratorConfig::default()
        };
        let mut run = OrchestrationRun::new("orch", None, &config);
        run.status = status;
        run
    }

    #[test]
    fn interrupted_running_run_is_failed_and_agents_reset() {
        let mut run = run_with_agents(RunStatus::Running);
        run.agents[0].status = AgentStatus::Completed;
        run.agents[1].status = AgentStatus::Retrying;

        assert!(mark_interrupted(&mut run));
        assert_eq!(run.status, RunStatus::Failed);
        assert_eq!(run.error.as_deref(), Some(INTERRUPTED_MESSAGE));
        assert!(run.completed_at.is_some());
        assert_eq!(run.agents[0].status, AgentStatus::Completed);
        assert_eq!(run.agents[1].status, AgentStatus::Idle);
    }

    #[test]
    fn interrupted_planning_and_paused_runs_are_failed() {
        for status in [RunStatus::Planning, RunStatus::Paused] {
            let mut run = run_with_agents(status);
            assert!(mark_interrupted(&mut run));
            assert_eq!(run.status, RunStatus::Failed);
        }
    }

    #[test]
    fn terminal_run_is_left_alone() {
        let mut run = run_with_agents(RunStatus::Completed);
        assert!(!mark_interrupted(&mut run));
        assert_eq!(run.status, RunStatus::Completed);
        assert!(run.error.is_none());
    }
}
