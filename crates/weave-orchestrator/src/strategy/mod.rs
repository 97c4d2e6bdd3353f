// Strategy Executors
// Sequential, parallel and conditional state machines over a shared agent loop

mod conditional;
mod context;
mod parallel;
mod sequential;

use async_trait::async_trait;
use weave_types::{
    AgentOutcome, FailurePolicyKind, OrchestrationStrategy, OrchestratorAgentResult, RunStatus,
};

use crate::error::Result;

pub use conditional::ConditionalExecutor;
pub use context::{AgentDrive, AgentDriver, AttemptUsage, RunContext};
pub use parallel::ParallelExecutor;
pub use sequential::SequentialExecutor;

/// Drives every agent of one run to an outcome.
///
/// Returning `Err` fails the run with the error text. Final status, history
/// and the terminal status event are left to the coordinator.
#[async_trait]
pub trait StrategyExecutor: Send + Sync {
    fn strategy(&self) -> OrchestrationStrategy;

    async fn execute(&self, ctx: &mut RunContext) -> Result<()>;
}

pub fn executor_for(strategy: OrchestrationStrategy) -> Box<dyn StrategyExecutor> {
    match strategy {
        OrchestrationStrategy::Sequential => Box::new(SequentialExecutor),
        OrchestrationStrategy::Parallel => Box::new(ParallelExecutor),
        OrchestrationStrategy::Conditional => Box::new(ConditionalExecutor),
    }
}

/// Cap an agent's output before it is passed on as context
pub fn truncate_context(output: &str, limit: usize) -> String {
    let total = output.chars().count();
    if total <= limit {
        return output.to_string();
    }
    let head: String = output.chars().take(limit).collect();
    format!("{}\n\n[Output truncated: {} total characters]", head, total)
}

/// Final status of a run that was not aborted by the user
pub fn determine_final_status(
    results: &[OrchestratorAgentResult],
    policy: FailurePolicyKind,
) -> RunStatus {
    if results.is_empty() {
        return RunStatus::Failed;
    }
    let any_failed = results.iter().any(|r| r.status == AgentOutcome::Failed);
    let any_succeeded = results.iter().any(|r| r.status == AgentOutcome::Completed);

    if any_failed {
        if policy == FailurePolicyKind::AbortAll {
            RunStatus::Failed
        } else {
            RunStatus::CompletedWithErrors
        }
    } else if any_succeeded {
        RunStatus::Completed
    } else {
        // everything was skipped
        RunStatus::CompletedWithErrors
    }
}

#[derive(Debug, Default)]
struct SingleStep {
    /// Output of a successful agent, untruncated
    output: Option<String>,
    abort: bool,
}

/// Budget gate, drive and record one agent (sequential and conditional)
async fn run_single(ctx: &mut RunContext, agent_id: &str, context: Option<String>) -> SingleStep {
    if let Some(reason) = ctx.admit().await {
        ctx.skip_agent(agent_id, &reason).await;
        return SingleStep::default();
    }
    let Some(agent) = ctx.agent_snapshot(agent_id).await else {
        tracing::warn!("Agent {} vanished from run {}", agent_id, ctx.run_id());
        return SingleStep::default();
    };

    let drive = ctx.driver().await.drive(agent, context).await;
    let output = drive
        .result
        .succeeded()
        .then(|| drive.result.output.clone());
    let abort = ctx.record(drive).await;
    SingleStep { output, abort }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_output_passes_through() {
        assert_eq!(truncate_context("hello", 10), "hello");
        assert_eq!(truncate_context("", 0), "");
    }

    #[test]
    fn long_output_is_cut_with_marker() {
        let output = "x".repeat(15_000);
        let truncated = truncate_context(&output, 10_000);
        assert!(truncated.starts_with(&"x".repeat(10_000)));
        assert!(truncated.ends_with("[Output truncated: 15000 total characters]"));
        assert_eq!(
            truncated.chars().count(),
            10_000 + "\n\n[Output truncated: 15000 total characters]".len()
        );
    }

    #[test]
    fn truncation_counts_characters_not_bytes() {
        let output = "é".repeat(12);
        let truncated = truncate_context(&output, 10);
        assert!(truncated.starts_with(&"é".repeat(10)));
        assert!(truncated.contains("12 total characters"));
    }

    fn result(status: AgentOutcome) -> OrchestratorAgentResult {
        let mut r = OrchestratorAgentResult::completed("a", "out");
        r.status = status;
        r
    }

    #[test]
    fn final_status_rules() {
        use AgentOutcome::*;
        let retry = FailurePolicyKind::RetryAndContinue;

        assert_eq!(determine_final_status(&[], retry), RunStatus::Failed);
        assert_eq!(
            determine_final_status(&[result(Completed), result(Completed)], retry),
            RunStatus::Completed
        );
        assert_eq!(
            determine_final_status(&[result(Completed), result(Failed)], retry),
            RunStatus::CompletedWithErrors
        );
        assert_eq!(
            determine_final_status(&[result(Completed), result(Failed)], FailurePolicyKind::AbortAll),
            RunStatus::Failed
        );
        assert_eq!(
            determine_final_status(&[result(Completed), result(Skipped)], retry),
            RunStatus::Completed
        );
        assert_eq!(
            determine_final_status(&[result(Skipped), result(Skipped)], retry),
            RunStatus::CompletedWithErrors
        );
    }

    #[test]
    fn executor_matches_strategy() {
        for strategy in [
            OrchestrationStrategy::Sequential,
            OrchestrationStrategy::Parallel,
            OrchestrationStrategy::Conditional,
        ] {
            assert_eq!(executor_for(strategy).strategy(), strategy);
        }
    }
}
