// Shared agent loop used by every strategy executor

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use tokio::sync::RwLock;
use tracing::Level;
use weave_observability::{emit_event, ObservabilityEvent, ProcessKind};
use weave_types::{
    AgentOutcome, AgentStatus, ConnectedAgent, FailurePolicy, OrchestrationRun,
    OrchestratorAgentResult, OrchestratorBudget, StatusEventKind, StatusUpdate,
};

use crate::budget::{BudgetCheckResult, BudgetGuard};
use crate::bus::StatusPublisher;
use crate::config::OrchestratorSettings;
use crate::control::RunControl;
use crate::executor::{AgentExecutor, AgentRequest};
use crate::policy::{FailureDecision, FailurePolicyHandler};
use crate::store::RunStore;

/// Consumption of every attempt of one agent, retries included
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct AttemptUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cost: f64,
    pub duration_ms: u64,
}

impl AttemptUsage {
    fn add(&mut self, result: &OrchestratorAgentResult) {
        self.input_tokens = self.input_tokens.saturating_add(result.input_tokens);
        self.output_tokens = self.output_tokens.saturating_add(result.output_tokens);
        if result.cost.is_finite() && result.cost > 0.0 {
            self.cost += result.cost;
        }
        self.duration_ms = self.duration_ms.saturating_add(result.duration_ms);
    }
}

/// Outcome of driving one agent through all of its attempts
#[derive(Debug, Clone)]
pub struct AgentDrive {
    /// Runtime state of the agent after its last attempt
    pub agent: ConnectedAgent,
    /// Final attempt only
    pub result: OrchestratorAgentResult,
    pub usage: AttemptUsage,
    /// Set when the failure policy asked for the whole run to stop
    pub abort_reason: Option<String>,
}

/// Runs one agent to a final outcome, retrying per the failure policy.
///
/// Cheap to clone so parallel batches can move one copy into each task.
#[derive(Clone)]
pub struct AgentDriver {
    orchestrator_id: String,
    run_id: String,
    policy: FailurePolicy,
    budget: OrchestratorBudget,
    run: Arc<RwLock<OrchestrationRun>>,
    executor: Arc<dyn AgentExecutor>,
    publisher: Arc<dyn StatusPublisher>,
    control: RunControl,
}

impl AgentDriver {
    pub async fn drive(self, mut agent: ConnectedAgent, context: Option<String>) -> AgentDrive {
        let mut usage = AttemptUsage::default();

        loop {
            agent.status = AgentStatus::Running;
            self.sync_agent(&agent).await;
            self.publish(
                StatusUpdate::new(
                    &self.orchestrator_id,
                    &self.run_id,
                    StatusEventKind::AgentStarted,
                )
                .with_agent(&agent.agent_node_id),
            );

            let request = AgentRequest {
                orchestrator_id: self.orchestrator_id.clone(),
                run_id: self.run_id.clone(),
                agent_node_id: agent.agent_node_id.clone(),
                attempt: agent.retry_count + 1,
                prompt_override: agent.prompt_override.clone(),
                context: context.clone(),
                max_tokens: self.budget.max_tokens_per_agent,
                max_cost: self.budget.max_cost_per_agent,
            };
            tracing::debug!(
                "Dispatching agent {} attempt {} (context {} chars)",
                agent.agent_node_id,
                request.attempt,
                request.context.as_ref().map(|c| c.chars().count()).unwrap_or(0)
            );

            let started_at = Utc::now();
            let clock = Instant::now();
            let mut result = match self.executor.run(request).await {
                Ok(result) => result,
                Err(e) => {
                    tracing::warn!("Agent {} executor error: {:#}", agent.agent_node_id, e);
                    let mut failed =
                        OrchestratorAgentResult::failed(&agent.agent_node_id, format!("{:#}", e));
                    failed.started_at = started_at;
                    failed
                }
            };
            result.agent_node_id = agent.agent_node_id.clone();
            if result.duration_ms == 0 {
                result.duration_ms = clock.elapsed().as_millis() as u64;
            }
            usage.add(&result);

            if result.status != AgentOutcome::Failed {
                agent.status = if result.succeeded() {
                    agent.last_error = None;
                    AgentStatus::Completed
                } else {
                    AgentStatus::Skipped
                };
                return AgentDrive {
                    agent,
                    result,
                    usage,
                    abort_reason: None,
                };
            }

            let error = result
                .error
                .clone()
                .filter(|e| !e.trim().is_empty())
                .unwrap_or_else(|| "Agent reported failure without an error message".to_string());

            match FailurePolicyHandler::apply(&self.policy, &mut agent, &error) {
                FailureDecision::Retry { attempt, delay } => {
                    tracing::info!(
                        "Retrying agent {} (retry {}/{}) in {:?}: {}",
                        agent.agent_node_id,
                        attempt,
                        self.policy.max_retries,
                        delay,
                        error
                    );
                    self.sync_agent(&agent).await;
                    self.publish(
                        StatusUpdate::new(
                            &self.orchestrator_id,
                            &self.run_id,
                            StatusEventKind::AgentRetrying,
                        )
                        .with_agent(&agent.agent_node_id)
                        .with_error(&error),
                    );
                    if !self.control.sleep_unless_aborted(delay).await {
                        agent.status = AgentStatus::Failed;
                        return AgentDrive {
                            agent,
                            result,
                            usage,
                            abort_reason: None,
                        };
                    }
                }
                FailureDecision::Continue { .. } => {
                    return AgentDrive {
                        agent,
                        result,
                        usage,
                        abort_reason: None,
                    };
                }
                FailureDecision::Abort { reason } => {
                    return AgentDrive {
                        agent,
                        result,
                        usage,
                        abort_reason: Some(reason),
                    };
                }
            }
        }
    }

    async fn sync_agent(&self, agent: &ConnectedAgent) {
        let mut run = self.run.write().await;
        if let Some(slot) = run.agent_mut(&agent.agent_node_id) {
            *slot = agent.clone();
        }
    }

    fn publish(&self, update: StatusUpdate) {
        self.publisher.publish(update);
    }
}

/// Per-run state handed to a strategy executor
pub struct RunContext {
    pub(crate) orchestrator_id: String,
    pub(crate) run_id: String,
    pub(crate) run: Arc<RwLock<OrchestrationRun>>,
    pub(crate) control: RunControl,
    pub(crate) executor: Arc<dyn AgentExecutor>,
    pub(crate) publisher: Arc<dyn StatusPublisher>,
    pub(crate) store: Option<Arc<RunStore>>,
    pub(crate) settings: OrchestratorSettings,
    budget_warned: bool,
}

impl RunContext {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        orchestrator_id: String,
        run_id: String,
        run: Arc<RwLock<OrchestrationRun>>,
        control: RunControl,
        executor: Arc<dyn AgentExecutor>,
        publisher: Arc<dyn StatusPublisher>,
        store: Option<Arc<RunStore>>,
        settings: OrchestratorSettings,
    ) -> Self {
        Self {
            orchestrator_id,
            run_id,
            run,
            control,
            executor,
            publisher,
            store,
            settings,
            budget_warned: false,
        }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub(crate) fn update(&self, kind: StatusEventKind) -> StatusUpdate {
        StatusUpdate::new(&self.orchestrator_id, &self.run_id, kind)
    }

    pub(crate) fn publish(&self, update: StatusUpdate) {
        self.publisher.publish(update);
    }

    pub(crate) async fn driver(&self) -> AgentDriver {
        let (policy, budget) = {
            let run = self.run.read().await;
            (run.failure_policy.clone(), run.budget.clone())
        };
        AgentDriver {
            orchestrator_id: self.orchestrator_id.clone(),
            run_id: self.run_id.clone(),
            policy,
            budget,
            run: self.run.clone(),
            executor: self.executor.clone(),
            publisher: self.publisher.clone(),
            control: self.control.clone(),
        }
    }

    pub(crate) async fn totals(&self) -> (u64, f64) {
        let run = self.run.read().await;
        (run.total_tokens(), run.total_cost)
    }

    /// Wait out a pause. `false` means the run was aborted.
    pub(crate) async fn checkpoint(&self) -> bool {
        self.control
            .wait_while_paused(self.settings.pause_poll_interval())
            .await
    }

    pub(crate) async fn persist(&self) {
        let Some(store) = &self.store else {
            return;
        };
        let snapshot = self.run.read().await.clone();
        if let Err(e) = store.save_active_run(&snapshot) {
            tracing::error!("Failed to persist run {}: {}", self.run_id, e);
        }
    }

    /// Agent ids sorted by declared order; ties keep configuration order
    pub(crate) async fn agents_in_order(&self) -> Vec<String> {
        let run = self.run.read().await;
        let mut agents: Vec<&ConnectedAgent> = run.agents.iter().collect();
        agents.sort_by_key(|agent| agent.order);
        let ids: Vec<String> = agents
            .iter()
            .map(|agent| agent.agent_node_id.clone())
            .collect();
        ids
    }

    pub(crate) async fn mark_queued(&self, agent_ids: &[String]) {
        let mut run = self.run.write().await;
        for id in agent_ids {
            if let Some(agent) = run.agent_mut(id) {
                if agent.status == AgentStatus::Idle {
                    agent.status = AgentStatus::Queued;
                }
            }
        }
    }

    pub(crate) async fn agent_snapshot(&self, agent_id: &str) -> Option<ConnectedAgent> {
        self.run.read().await.agent(agent_id).cloned()
    }

    /// Pre-agent budget gate. Emits budget-exceeded and returns the reason on rejection.
    pub(crate) async fn admit(&self) -> Option<String> {
        let (check, tokens, cost) = {
            let run = self.run.read().await;
            (
                BudgetGuard::can_run_agent(&run.budget, &run),
                run.total_tokens(),
                run.total_cost,
            )
        };
        let BudgetCheckResult::Exceeded { dimension, reason } = check else {
            return None;
        };

        tracing::warn!("Budget exceeded for run {} ({}): {}", self.run_id, dimension, reason);
        emit_event(
            Level::WARN,
            ProcessKind::Orchestrator,
            ObservabilityEvent {
                event: "budget.exceeded",
                component: "strategy",
                orchestrator_id: Some(self.orchestrator_id.as_str()),
                run_id: Some(self.run_id.as_str()),
                error_code: Some(dimension.as_str()),
                detail: Some(reason.as_str()),
                ..Default::default()
            },
        );
        self.publish(
            self.update(StatusEventKind::BudgetExceeded)
                .with_totals(tokens, cost)
                .with_error(&reason),
        );
        Some(reason)
    }

    /// Record a skipped outcome for an agent that never ran
    pub(crate) async fn skip_agent(&self, agent_id: &str, reason: &str) {
        let result = OrchestratorAgentResult::skipped(agent_id, reason);
        let (tokens, cost) = {
            let mut run = self.run.write().await;
            if let Some(agent) = run.agent_mut(agent_id) {
                agent.status = AgentStatus::Skipped;
                agent.last_error = Some(reason.to_string());
            }
            run.agent_results.push(result.clone());
            (run.total_tokens(), run.total_cost)
        };
        self.publish(
            self.update(StatusEventKind::AgentSkipped)
                .with_agent(agent_id)
                .with_result(result)
                .with_totals(tokens, cost)
                .with_error(reason),
        );
        self.persist().await;
    }

    /// Merge a finished agent into the run. Returns `true` if the run must stop.
    pub(crate) async fn record(&mut self, drive: AgentDrive) -> bool {
        let AgentDrive {
            agent,
            result,
            usage,
            abort_reason,
        } = drive;

        let (tokens, cost, budget) = {
            let mut run = self.run.write().await;
            run.add_usage(
                usage.input_tokens,
                usage.output_tokens,
                usage.cost,
                usage.duration_ms,
            );
            if let Some(slot) = run.agent_mut(&agent.agent_node_id) {
                *slot = agent.clone();
            }
            run.agent_results.push(result.clone());
            if let Some(reason) = &abort_reason {
                run.error = Some(reason.clone());
            }
            (run.total_tokens(), run.total_cost, run.budget.clone())
        };

        let kind = match (result.status, agent.status) {
            (AgentOutcome::Completed, _) => StatusEventKind::AgentCompleted,
            (AgentOutcome::Skipped, _) | (AgentOutcome::Failed, AgentStatus::Skipped) => {
                StatusEventKind::AgentSkipped
            }
            (AgentOutcome::Failed, _) => StatusEventKind::AgentFailed,
        };
        let mut update = self
            .update(kind)
            .with_agent(&agent.agent_node_id)
            .with_result(result.clone())
            .with_totals(tokens, cost);
        if let Some(error) = result.error.as_deref().or(agent.last_error.as_deref()) {
            if kind != StatusEventKind::AgentCompleted {
                update = update.with_error(error);
            }
        }
        self.publish(update);

        if let Some(overrun) =
            BudgetGuard::per_agent_overrun(&budget, result.total_tokens(), result.cost)
        {
            tracing::warn!("Agent {} overran its budget: {}", agent.agent_node_id, overrun);
            self.publish(
                self.update(StatusEventKind::BudgetWarning)
                    .with_agent(&agent.agent_node_id)
                    .with_totals(tokens, cost)
                    .with_error(overrun),
            );
        }
        self.check_budget_warning().await;
        self.persist().await;

        if let Some(reason) = abort_reason {
            tracing::warn!("Failure policy stopped run {}: {}", self.run_id, reason);
            return true;
        }
        false
    }

    async fn check_budget_warning(&mut self) {
        if self.budget_warned {
            return;
        }
        let (check, tokens, cost) = {
            let run = self.run.read().await;
            (
                BudgetGuard::check_with_warning(
                    &run.budget,
                    &run,
                    self.settings.budget_warning_ratio,
                ),
                run.total_tokens(),
                run.total_cost,
            )
        };
        if let BudgetCheckResult::Warning {
            dimension,
            percentage,
        } = check
        {
            self.budget_warned = true;
            let percent = (percentage * 100.0).floor().clamp(0.0, 100.0) as u8;
            tracing::warn!("Budget warning: {} at {}%", dimension, percent);
            self.publish(
                self.update(StatusEventKind::BudgetWarning)
                    .with_totals(tokens, cost)
                    .with_error(format!("{} budget at {}%", dimension, percent)),
            );
        }
    }
}
