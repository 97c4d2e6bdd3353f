use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::orchestration::OrchestratorAgentResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StatusEventKind {
    RunStarted,
    AgentStarted,
    AgentCompleted,
    AgentFailed,
    AgentRetrying,
    AgentSkipped,
    BudgetWarning,
    BudgetExceeded,
    RunPaused,
    RunResumed,
    RunCompleted,
    RunCompletedWithErrors,
    RunFailed,
    RunAborted,
}

impl StatusEventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            StatusEventKind::RunStarted => "run-started",
            StatusEventKind::AgentStarted => "agent-started",
            StatusEventKind::AgentCompleted => "agent-completed",
            StatusEventKind::AgentFailed => "agent-failed",
            StatusEventKind::AgentRetrying => "agent-retrying",
            StatusEventKind::AgentSkipped => "agent-skipped",
            StatusEventKind::BudgetWarning => "budget-warning",
            StatusEventKind::BudgetExceeded => "budget-exceeded",
            StatusEventKind::RunPaused => "run-paused",
            StatusEventKind::RunResumed => "run-resumed",
            StatusEventKind::RunCompleted => "run-completed",
            StatusEventKind::RunCompletedWithErrors => "run-completed-with-errors",
            StatusEventKind::RunFailed => "run-failed",
            StatusEventKind::RunAborted => "run-aborted",
        }
    }

    /// Whether this event closes out a run
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            StatusEventKind::RunCompleted
                | StatusEventKind::RunCompletedWithErrors
                | StatusEventKind::RunFailed
                | StatusEventKind::RunAborted
        )
    }
}

/// One push-only status event for the UI
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusUpdate {
    pub orchestrator_id: String,
    pub run_id: String,
    #[serde(rename = "type")]
    pub kind: StatusEventKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_result: Option<OrchestratorAgentResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_cost: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl StatusUpdate {
    pub fn new(
        orchestrator_id: impl Into<String>,
        run_id: impl Into<String>,
        kind: StatusEventKind,
    ) -> Self {
        Self {
            orchestrator_id: orchestrator_id.into(),
            run_id: run_id.into(),
            kind,
            agent_id: None,
            agent_result: None,
            total_tokens: None,
            total_cost: None,
            error: None,
            timestamp: Utc::now(),
        }
    }

    pub fn with_agent(mut self, agent_id: impl Into<String>) -> Self {
        self.agent_id = Some(agent_id.into());
        self
    }

    pub fn with_result(mut self, result: OrchestratorAgentResult) -> Self {
        self.agent_result = Some(result);
        self
    }

    pub fn with_totals(mut self, tokens: u64, cost: f64) -> Self {
        self.total_tokens = Some(tokens);
        self.total_cost = Some(cost);
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }
}

/// `{success, error?}` envelope returned by every command
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CommandResponse {
    pub fn ok() -> Self {
        Self {
            success: true,
            error: None,
        }
    }

    pub fn err(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
        }
    }
}

impl<T, E: std::fmt::Display> From<Result<T, E>> for CommandResponse {
    fn from(result: Result<T, E>) -> Self {
        match result {
            Ok(_) => Self::ok(),
            Err(e) => Self::err(e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_update_serializes_kebab_type() {
        let update = StatusUpdate::new("orch", "run-1", StatusEventKind::RunCompletedWithErrors)
            .with_totals(10, 0.5);
        let value = serde_json::to_value(&update).unwrap();
        assert_eq!(value["type"], "run-completed-with-errors");
        assert_eq!(value["orchestratorId"], "orch");
        assert_eq!(value["totalTokens"], 10);
        assert!(value.get("agentId").is_none());
    }

    #[test]
    fn command_response_from_result() {
        let ok: Result<(), String> = Ok(());
        assert_eq!(CommandResponse::from(ok), CommandResponse::ok());

        let err: Result<(), String> = Err("no active run".to_string());
        let response = CommandResponse::from(err);
        assert!(!response.success);
        assert_eq!(response.error.as_deref(), Some("no active run"));
    }
}
