use std::collections::HashSet;

use async_trait::async_trait;
use tokio::task::JoinSet;
use weave_types::{
    AgentStatus, ConnectedAgent, FailurePolicyKind, OrchestrationStrategy,
    OrchestratorAgentResult, StatusEventKind,
};

use super::{AgentDrive, AttemptUsage, RunContext, StrategyExecutor};
use crate::budget::{BudgetGuard, ParallelBudgetCheck};
use crate::error::{OrchestratorError, Result};

/// Fixed-size batches; members of a batch run concurrently, batches run in turn
pub struct ParallelExecutor;

#[async_trait]
impl StrategyExecutor for ParallelExecutor {
    fn strategy(&self) -> OrchestrationStrategy {
        OrchestrationStrategy::Parallel
    }

    async fn execute(&self, ctx: &mut RunContext) -> Result<()> {
        let order = ctx.agents_in_order().await;
        let budget = ctx.run.read().await.budget.clone();

        let concurrency = match BudgetGuard::validate_parallel_budget(&budget, order.len()) {
            ParallelBudgetCheck::Reject { reason } => {
                return Err(OrchestratorError::ParallelBudget(reason));
            }
            ParallelBudgetCheck::Proceed {
                effective_concurrency,
                warning,
            } => {
                if let Some(warning) = warning {
                    tracing::warn!("Run {}: {}", ctx.run_id(), warning);
                    let (tokens, cost) = ctx.totals().await;
                    ctx.publish(
                        ctx.update(StatusEventKind::BudgetWarning)
                            .with_totals(tokens, cost)
                            .with_error(warning),
                    );
                }
                effective_concurrency.max(1)
            }
        };
        tracing::info!(
            "Parallel run {}: {} agents, concurrency {}",
            ctx.run_id(),
            order.len(),
            concurrency
        );
        ctx.mark_queued(&order).await;

        let batches: Vec<&[String]> = order.chunks(concurrency).collect();
        for (index, batch) in batches.iter().enumerate() {
            if !ctx.checkpoint().await {
                tracing::info!("Run {} aborted before batch {}", ctx.run_id(), index + 1);
                break;
            }

            if let Some(reason) = ctx.admit().await {
                for agent_id in batches[index..].iter().flat_map(|b| b.iter()) {
                    ctx.skip_agent(agent_id, &reason).await;
                }
                break;
            }

            let driver = ctx.driver().await;
            let mut join_set: JoinSet<AgentDrive> = JoinSet::new();
            let mut pending: HashSet<String> = HashSet::new();
            for agent_id in batch.iter() {
                let Some(agent) = ctx.agent_snapshot(agent_id).await else {
                    continue;
                };
                pending.insert(agent_id.clone());
                join_set.spawn(driver.clone().drive(agent, None));
            }

            // the batch always runs to completion, even once an abort is requested
            let mut abort = false;
            let mut crash_detail = None;
            while let Some(joined) = join_set.join_next().await {
                match joined {
                    Ok(drive) => {
                        pending.remove(&drive.agent.agent_node_id);
                        abort |= ctx.record(drive).await;
                    }
                    Err(e) => {
                        tracing::error!("Agent task in run {} failed to join: {}", ctx.run_id(), e);
                        crash_detail = Some(e.to_string());
                    }
                }
            }

            // a task that never handed back its drive panicked or was cancelled
            let detail = crash_detail.unwrap_or_else(|| "task ended without a result".to_string());
            for agent_id in batch.iter().filter(|id| pending.contains(*id)) {
                let drive = crashed_drive(ctx, agent_id, &detail).await;
                abort |= ctx.record(drive).await;
            }
            if abort {
                break;
            }
        }

        Ok(())
    }
}

/// Stand-in outcome for an agent whose task panicked or was cancelled
async fn crashed_drive(ctx: &RunContext, agent_id: &str, error: &str) -> AgentDrive {
    let message = format!("Agent task crashed: {}", error);
    let mut agent = ctx
        .agent_snapshot(agent_id)
        .await
        .unwrap_or_else(|| ConnectedAgent::new(agent_id, 0));
    agent.status = AgentStatus::Failed;
    agent.last_error = Some(message.clone());

    let abort_all = ctx.run.read().await.failure_policy.kind == FailurePolicyKind::AbortAll;
    AgentDrive {
        agent,
        result: OrchestratorAgentResult::failed(agent_id, message.clone()),
        usage: AttemptUsage::default(),
        abort_reason: abort_all.then_some(message),
    }
}
