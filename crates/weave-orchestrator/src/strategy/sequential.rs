use async_trait::async_trait;
use weave_types::OrchestrationStrategy;

use super::{run_single, truncate_context, RunContext, StrategyExecutor};
use crate::error::Result;

/// One agent at a time in declared order, each seeing the previous output
pub struct SequentialExecutor;

#[async_trait]
impl StrategyExecutor for SequentialExecutor {
    fn strategy(&self) -> OrchestrationStrategy {
        OrchestrationStrategy::Sequential
    }

    async fn execute(&self, ctx: &mut RunContext) -> Result<()> {
        let order = ctx.agents_in_order().await;
        ctx.mark_queued(&order).await;

        let mut context: Option<String> = None;
        for agent_id in &order {
            if !ctx.checkpoint().await {
                tracing::info!("Run {} aborted before agent {}", ctx.run_id(), agent_id);
                break;
            }

            let step = run_single(ctx, agent_id, context.clone()).await;
            if let Some(output) = step.output {
                context = Some(truncate_context(&output, ctx.settings.context_char_limit));
            }
            if step.abort {
                break;
            }
        }

        Ok(())
    }
}
