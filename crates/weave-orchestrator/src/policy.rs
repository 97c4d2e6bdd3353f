// Failure Policy Handler
// Maps a failed agent + policy + retry count to retry / continue / abort

use std::time::Duration;

use weave_types::{AgentStatus, ConnectedAgent, FailurePolicy, FailurePolicyKind};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureDecision {
    /// Run the same agent again after `delay`
    Retry { attempt: u32, delay: Duration },
    /// Leave the agent in `status` and move on to the next one
    Continue { status: AgentStatus },
    /// Stop the run; `reason` becomes the run error
    Abort { reason: String },
}

impl FailureDecision {
    pub fn should_abort(&self) -> bool {
        matches!(self, FailureDecision::Abort { .. })
    }
}

pub struct FailurePolicyHandler;

impl FailurePolicyHandler {
    /// Pure decision for a failed agent. Does not touch the agent.
    pub fn decide(policy: &FailurePolicy, agent: &ConnectedAgent) -> FailureDecision {
        let can_retry = agent.retry_count < policy.max_retries;
        match policy.kind {
            FailurePolicyKind::SkipFailed => FailureDecision::Continue {
                status: AgentStatus::Skipped,
            },
            FailurePolicyKind::RetryAndContinue | FailurePolicyKind::AbortAll if can_retry => {
                FailureDecision::Retry {
                    attempt: agent.retry_count + 1,
                    delay: Duration::from_millis(policy.retry_delay_ms),
                }
            }
            FailurePolicyKind::RetryAndContinue => FailureDecision::Continue {
                status: AgentStatus::Failed,
            },
            FailurePolicyKind::AbortAll => FailureDecision::Abort {
                reason: format!(
                    "Agent {} failed after {} retr{}: {}",
                    agent.agent_node_id,
                    agent.retry_count,
                    if agent.retry_count == 1 { "y" } else { "ies" },
                    agent.last_error.as_deref().unwrap_or("unknown error")
                ),
            },
        }
    }

    /// Decide and apply the decision to the agent's runtime state
    pub fn apply(
        policy: &FailurePolicy,
        agent: &mut ConnectedAgent,
        error: &str,
    ) -> FailureDecision {
        agent.last_error = Some(error.to_string());
        let decision = Self::decide(policy, agent);
        match &decision {
            FailureDecision::Retry { attempt, .. } => {
                agent.retry_count = *attempt;
                agent.status = AgentStatus::Retrying;
            }
            FailureDecision::Continue { status } => agent.status = *status,
            FailureDecision::Abort { .. } => agent.status = AgentStatus::Failed,
        }
        decision
    }
}
