use async_trait::async_trait;
use weave_types::{AgentStatus, OrchestrationStrategy};

use super::{run_single, truncate_context, RunContext, StrategyExecutor};
use crate::conditions::ConditionEvaluator;
use crate::error::Result;

/// Starts at the lowest order, then follows the first agent whose
/// conditions pass against the latest result. Stops when none does.
pub struct ConditionalExecutor;

#[async_trait]
impl StrategyExecutor for ConditionalExecutor {
    fn strategy(&self) -> OrchestrationStrategy {
        OrchestrationStrategy::Conditional
    }

    async fn execute(&self, ctx: &mut RunContext) -> Result<()> {
        let order = ctx.agents_in_order().await;
        let mut next = order.first().cloned();
        let mut context: Option<String> = None;

        while let Some(agent_id) = next.take() {
            if !ctx.checkpoint().await {
                tracing::info!("Run {} aborted before agent {}", ctx.run_id(), agent_id);
                break;
            }

            let step = run_single(ctx, &agent_id, context.clone()).await;
            if let Some(output) = step.output {
                context = Some(truncate_context(&output, ctx.settings.context_char_limit));
            }
            if step.abort {
                break;
            }

            next = select_next(ctx, &agent_id, &order).await?;
            match &next {
                Some(branch) => tracing::debug!("Run {}: {} -> {}", ctx.run_id(), agent_id, branch),
                None => tracing::info!(
                    "Run {}: no further branch triggered after {}",
                    ctx.run_id(),
                    agent_id
                ),
            }
        }

        Ok(())
    }
}

/// First other idle/queued agent, in declared order, whose conditions all pass
async fn select_next(ctx: &RunContext, current: &str, order: &[String]) -> Result<Option<String>> {
    let run = ctx.run.read().await;
    let last_result = run.last_result();
    let total_tokens = run.total_tokens();

    for agent_id in order {
        if agent_id == current {
            continue;
        }
        let Some(agent) = run.agent(agent_id) else {
            continue;
        };
        if !matches!(agent.status, AgentStatus::Idle | AgentStatus::Queued) {
            continue;
        }

        let evaluation =
            ConditionEvaluator::evaluate_all(&agent.conditions, last_result, total_tokens)?;
        for warning in &evaluation.warnings {
            tracing::warn!("Condition on agent {}: {}", agent_id, warning);
        }
        if evaluation.passed {
            return Ok(Some(agent_id.clone()));
        }
    }

    Ok(None)
}
