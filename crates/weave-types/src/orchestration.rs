// Orchestration Types
// Data model for orchestrator runs, connected agents, budgets and policies

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// Configuration
// ============================================================================

/// Execution shape chosen per orchestrator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum OrchestrationStrategy {
    #[default]
    Sequential,
    Parallel,
    Conditional,
}

impl OrchestrationStrategy {
    pub fn as_str(self) -> &'static str {
        match self {
            OrchestrationStrategy::Sequential => "sequential",
            OrchestrationStrategy::Parallel => "parallel",
            OrchestrationStrategy::Conditional => "conditional",
        }
    }
}

/// Token and cost ceilings. An absent field means "unlimited" for that dimension.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct OrchestratorBudget {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_total_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_total_cost: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens_per_agent: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_cost_per_agent: Option<f64>,
}

impl OrchestratorBudget {
    pub fn unlimited() -> Self {
        Self::default()
    }

    pub fn has_total_ceiling(&self) -> bool {
        self.max_total_tokens.is_some() || self.max_total_cost.is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum FailurePolicyKind {
    #[default]
    RetryAndContinue,
    SkipFailed,
    AbortAll,
}

/// Rule set governing retry/skip/abort behavior on agent failure
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailurePolicy {
    #[serde(rename = "type")]
    pub kind: FailurePolicyKind,
    #[serde(default)]
    pub max_retries: u32,
    #[serde(default)]
    pub retry_delay_ms: u64,
}

impl Default for FailurePolicy {
    fn default() -> Self {
        Self {
            kind: FailurePolicyKind::RetryAndContinue,
            max_retries: 1,
            retry_delay_ms: 1_000,
        }
    }
}

impl FailurePolicy {
    pub fn new(kind: FailurePolicyKind, max_retries: u32, retry_delay_ms: u64) -> Self {
        Self {
            kind,
            max_retries,
            retry_delay_ms,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConditionKind {
    AgentSucceeded,
    AgentFailed,
    OutputContains,
    OutputMatches,
    TokenCountBelow,
    CustomExpression,
}

impl ConditionKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ConditionKind::AgentSucceeded => "agent-succeeded",
            ConditionKind::AgentFailed => "agent-failed",
            ConditionKind::OutputContains => "output-contains",
            ConditionKind::OutputMatches => "output-matches",
            ConditionKind::TokenCountBelow => "token-count-below",
            ConditionKind::CustomExpression => "custom-expression",
        }
    }
}

/// A single branching condition used by the conditional strategy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BranchCondition {
    #[serde(rename = "type")]
    pub kind: ConditionKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub threshold: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expression: Option<String>,
    #[serde(default)]
    pub invert: bool,
}

impl BranchCondition {
    pub fn new(kind: ConditionKind) -> Self {
        Self {
            kind,
            value: None,
            threshold: None,
            expression: None,
            invert: false,
        }
    }

    pub fn with_value(mut self, value: impl Into<String>) -> Self {
        self.value = Some(value.into());
        self
    }

    pub fn with_threshold(mut self, threshold: u64) -> Self {
        self.threshold = Some(threshold);
        self
    }

    pub fn inverted(mut self) -> Self {
        self.invert = true;
        self
    }
}

/// Point-in-time snapshot of an orchestrator's configuration, supplied at start
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct OrchestratorConfig {
    #[serde(default)]
    pub strategy: OrchestrationStrategy,
    #[serde(default)]
    pub budget: OrchestratorBudget,
    #[serde(default)]
    pub failure_policy: FailurePolicy,
    #[serde(default)]
    pub agents: Vec<ConnectedAgent>,
}

// ============================================================================
// Connected Agents
// ============================================================================

/// Runtime status of a connected agent within one run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum AgentStatus {
    #[default]
    Idle,
    Queued,
    Running,
    Completed,
    Failed,
    Skipped,
    Retrying,
}

impl AgentStatus {
    /// Statuses that only make sense while an executor is driving the agent
    pub fn is_in_flight(self) -> bool {
        matches!(
            self,
            AgentStatus::Running | AgentStatus::Queued | AgentStatus::Retrying
        )
    }
}

/// A participant agent bound into a run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectedAgent {
    pub agent_node_id: String,
    #[serde(default)]
    pub order: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt_override: Option<String>,
    #[serde(default)]
    pub conditions: Vec<BranchCondition>,
    #[serde(default)]
    pub status: AgentStatus,
    #[serde(default)]
    pub retry_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl ConnectedAgent {
    pub fn new(agent_node_id: impl Into<String>, order: u32) -> Self {
        Self {
            agent_node_id: agent_node_id.into(),
            order,
            prompt_override: None,
            conditions: Vec::new(),
            status: AgentStatus::Idle,
            retry_count: 0,
            last_error: None,
        }
    }

    pub fn with_conditions(mut self, conditions: Vec<BranchCondition>) -> Self {
        self.conditions = conditions;
        self
    }

    pub fn with_prompt_override(mut self, prompt: impl Into<String>) -> Self {
        self.prompt_override = Some(prompt.into());
        self
    }

    /// Clear per-run state so the agent starts fresh
    pub fn reset_for_run(&mut self) {
        self.status = AgentStatus::Idle;
        self.retry_count = 0;
        self.last_error = None;
    }
}

// ============================================================================
// Agent Results
// ============================================================================

/// Terminal outcome recorded for one agent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AgentOutcome {
    Completed,
    Failed,
    Skipped,
}

/// Immutable record of one agent's execution outcome
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrchestratorAgentResult {
    pub agent_node_id: String,
    pub status: AgentOutcome,
    #[serde(default)]
    pub output: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub input_tokens: u64,
    #[serde(default)]
    pub output_tokens: u64,
    #[serde(default)]
    pub cost: f64,
    #[serde(default)]
    pub duration_ms: u64,
    #[serde(default)]
    pub tool_calls: u32,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
}

impl OrchestratorAgentResult {
    pub fn completed(agent_node_id: impl Into<String>, output: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            agent_node_id: agent_node_id.into(),
            status: AgentOutcome::Completed,
            output: output.into(),
            error: None,
            input_tokens: 0,
            output_tokens: 0,
            cost: 0.0,
            duration_ms: 0,
            tool_calls: 0,
            started_at: now,
            completed_at: now,
        }
    }

    pub fn failed(agent_node_id: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            status: AgentOutcome::Failed,
            error: Some(error.into()),
            ..Self::completed(agent_node_id, String::new())
        }
    }

    pub fn skipped(agent_node_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            status: AgentOutcome::Skipped,
            error: Some(reason.into()),
            ..Self::completed(agent_node_id, String::new())
        }
    }

    pub fn with_usage(mut self, input_tokens: u64, output_tokens: u64, cost: f64) -> Self {
        self.input_tokens = input_tokens;
        self.output_tokens = output_tokens;
        self.cost = cost;
        self
    }

    pub fn total_tokens(&self) -> u64 {
        self.input_tokens.saturating_add(self.output_tokens)
    }

    pub fn succeeded(&self) -> bool {
        self.status == AgentOutcome::Completed
    }
}

// ============================================================================
// Run State
// ============================================================================

/// Status of an orchestration run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RunStatus {
    /// Created, executor not yet dispatched
    Planning,
    Running,
    Paused,
    Completed,
    CompletedWithErrors,
    Failed,
    Aborted,
}

impl RunStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            RunStatus::Planning => "planning",
            RunStatus::Running => "running",
            RunStatus::Paused => "paused",
            RunStatus::Completed => "completed",
            RunStatus::CompletedWithErrors => "completed-with-errors",
            RunStatus::Failed => "failed",
            RunStatus::Aborted => "aborted",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            RunStatus::Completed
                | RunStatus::CompletedWithErrors
                | RunStatus::Failed
                | RunStatus::Aborted
        )
    }

    pub fn is_active(self) -> bool {
        !self.is_terminal()
    }

    /// Forward-only transitions of the run state machine
    pub fn can_transition_to(self, next: RunStatus) -> bool {
        match (self, next) {
            (RunStatus::Planning, RunStatus::Running) => true,
            (RunStatus::Running, RunStatus::Paused) => true,
            (RunStatus::Paused, RunStatus::Running) => true,
            (RunStatus::Paused, RunStatus::Aborted | RunStatus::Failed) => true,
            (RunStatus::Planning | RunStatus::Running, next) => next.is_terminal(),
            _ => false,
        }
    }
}

/// One execution attempt of one orchestrator
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrchestrationRun {
    pub run_id: String,
    pub orchestrator_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_orchestration_id: Option<String>,
    pub status: RunStatus,
    pub strategy: OrchestrationStrategy,
    #[serde(default)]
    pub budget: OrchestratorBudget,
    #[serde(default)]
    pub failure_policy: FailurePolicy,
    /// Per-run copies of the configured agents. Dropped once the run is
    /// finalised; history keeps only `agent_results`.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub agents: Vec<ConnectedAgent>,
    #[serde(default)]
    pub agent_results: Vec<OrchestratorAgentResult>,
    #[serde(default)]
    pub total_input_tokens: u64,
    #[serde(default)]
    pub total_output_tokens: u64,
    #[serde(default)]
    pub total_cost: f64,
    #[serde(default)]
    pub total_duration_ms: u64,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl OrchestrationRun {
    pub fn new(
        orchestrator_id: impl Into<String>,
        parent_orchestration_id: Option<String>,
        config: &OrchestratorConfig,
    ) -> Self {
        let mut agents = config.agents.clone();
        for agent in agents.iter_mut() {
            agent.reset_for_run();
        }
        Self {
            run_id: format!("run-{}", uuid::Uuid::new_v4()),
            orchestrator_id: orchestrator_id.into(),
            parent_orchestration_id,
            status: RunStatus::Planning,
            strategy: config.strategy,
            budget: config.budget.clone(),
            failure_policy: config.failure_policy.clone(),
            agents,
            agent_results: Vec::new(),
            total_input_tokens: 0,
            total_output_tokens: 0,
            total_cost: 0.0,
            total_duration_ms: 0,
            started_at: Utc::now(),
            completed_at: None,
            error: None,
        }
    }

    pub fn total_tokens(&self) -> u64 {
        self.total_input_tokens
            .saturating_add(self.total_output_tokens)
    }

    /// Apply a transition if the state machine allows it
    pub fn transition(&mut self, next: RunStatus) -> bool {
        if !self.status.can_transition_to(next) {
            return false;
        }
        self.status = next;
        if next.is_terminal() {
            self.completed_at = Some(Utc::now());
        }
        true
    }

    /// Add consumption to the running aggregates. Aggregates never decrease.
    pub fn add_usage(&mut self, input_tokens: u64, output_tokens: u64, cost: f64, duration_ms: u64) {
        self.total_input_tokens = self.total_input_tokens.saturating_add(input_tokens);
        self.total_output_tokens = self.total_output_tokens.saturating_add(output_tokens);
        if cost.is_finite() && cost > 0.0 {
            self.total_cost += cost;
        }
        self.total_duration_ms = self.total_duration_ms.saturating_add(duration_ms);
    }

    pub fn agent(&self, agent_node_id: &str) -> Option<&ConnectedAgent> {
        self.agents
            .iter()
            .find(|agent| agent.agent_node_id == agent_node_id)
    }

    pub fn agent_mut(&mut self, agent_node_id: &str) -> Option<&mut ConnectedAgent> {
        self.agents
            .iter_mut()
            .find(|agent| agent.agent_node_id == agent_node_id)
    }

    pub fn last_result(&self) -> Option<&OrchestratorAgentResult> {
        self.agent_results.last()
    }

    /// Copy of a finalised run as it is kept in history, without agent state
    pub fn history_record(&self) -> Self {
        Self {
            agents: Vec::new(),
            ..self.clone()
        }
    }

    pub fn summary(&self) -> ActiveRunInfo {
        ActiveRunInfo {
            run_id: self.run_id.clone(),
            status: self.status,
        }
    }
}

/// Current run id and status of an in-flight orchestrator, returned by resync
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActiveRunInfo {
    pub run_id: String,
    pub status: RunStatus,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_status_moves_forward_only() {
        assert!(RunStatus::Planning.can_transition_to(RunStatus::Running));
        assert!(RunStatus::Running.can_transition_to(RunStatus::Paused));
        assert!(RunStatus::Paused.can_transition_to(RunStatus::Running));
        assert!(RunStatus::Paused.can_transition_to(RunStatus::Aborted));
        assert!(RunStatus::Running.can_transition_to(RunStatus::CompletedWithErrors));
        assert!(!RunStatus::Paused.can_transition_to(RunStatus::Completed));
        assert!(!RunStatus::Completed.can_transition_to(RunStatus::Running));
        assert!(!RunStatus::Failed.can_transition_to(RunStatus::Aborted));
        assert!(!RunStatus::Running.can_transition_to(RunStatus::Planning));
    }

    #[test]
    fn new_run_resets_agent_runtime_state() {
        let mut agent = ConnectedAgent::new("a", 0);
        agent.status = AgentStatus::Failed;
        agent.retry_count = 3;
        agent.last_error = Some("boom".to_string());
        let config = OrchestratorConfig {
            agents: vec![agent],
            ..OrchestratorConfig::default()
        };

        let run = OrchestrationRun::new("orch-1", None, &config);

        assert_eq!(run.status, RunStatus::Planning);
        assert_eq!(run.agents[0].status, AgentStatus::Idle);
        assert_eq!(run.agents[0].retry_count, 0);
        assert!(run.agents[0].last_error.is_none());
        // the configuration itself is untouched
        assert_eq!(config.agents[0].retry_count, 3);
    }

    #[test]
    fn failure_policy_uses_type_tag() {
        let policy: FailurePolicy = serde_json::from_str(
            r#"{"type":"abort-all","maxRetries":2,"retryDelayMs":10}"#,
        )
        .unwrap();
        assert_eq!(policy.kind, FailurePolicyKind::AbortAll);
        assert_eq!(policy.max_retries, 2);
    }

    #[test]
    fn terminal_transition_stamps_completion() {
        let mut run = OrchestrationRun::new("orch-1", None, &OrchestratorConfig::default());
        assert!(run.transition(RunStatus::Running));
        assert!(run.completed_at.is_none());
        assert!(run.transition(RunStatus::Completed));
        assert!(run.completed_at.is_some());
        assert!(!run.transition(RunStatus::Failed));
        assert_eq!(run.status, RunStatus::Completed);
    }

    #[test]
    fn history_record_drops_agent_copies() {
        let config = OrchestratorConfig {
            agents: vec![ConnectedAgent::new("a", 0)],
            ..OrchestratorConfig::default()
        };
        let mut run = OrchestrationRun::new("orch-1", None, &config);
        run.agent_results
            .push(OrchestratorAgentResult::completed("a", "done"));

        let record = run.history_record();
        assert!(record.agents.is_empty());
        assert_eq!(record.agent_results.len(), 1);
        assert_eq!(run.agents.len(), 1);

        let value = serde_json::to_value(&record).unwrap();
        assert!(value.get("agents").is_none());
    }
}
