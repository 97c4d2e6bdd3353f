use std::collections::HashMap;
use std::io::Read;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::Mutex;
use weave_orchestrator::{AgentExecutor, AgentRequest};
use weave_types::{OrchestratorAgentResult, OrchestratorConfig};

/// An orchestrator configuration plus canned outcomes for each agent
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunPlan {
    #[serde(default)]
    pub orchestrator_id: Option<String>,
    #[serde(default)]
    pub parent_orchestration_id: Option<String>,
    pub config: OrchestratorConfig,
    #[serde(default)]
    pub scripts: HashMap<String, AgentScript>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AgentScript {
    pub output: String,
    /// The first `fail_times` attempts fail
    pub fail_times: u32,
    pub error: Option<String>,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cost: f64,
    pub tool_calls: u32,
    pub delay_ms: u64,
}

impl RunPlan {
    /// `-` reads the plan from stdin
    pub fn load(input: &str) -> anyhow::Result<Self> {
        let raw = if input.trim() == "-" {
            let mut buf = String::new();
            std::io::stdin().read_to_string(&mut buf)?;
            buf
        } else {
            std::fs::read_to_string(input)
                .with_context(|| format!("failed to read plan file {}", input))?
        };
        Self::parse(&raw)
    }

    pub fn parse(raw: &str) -> anyhow::Result<Self> {
        serde_json::from_str(raw).context("invalid plan json")
    }
}

/// Executor that replays scripted outcomes instead of calling a model
pub struct ScriptedExecutor {
    scripts: HashMap<String, AgentScript>,
    attempts: Mutex<HashMap<String, u32>>,
}

impl ScriptedExecutor {
    pub fn new(scripts: HashMap<String, AgentScript>) -> Self {
        Self {
            scripts,
            attempts: Mutex::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl AgentExecutor for ScriptedExecutor {
    async fn run(&self, request: AgentRequest) -> anyhow::Result<OrchestratorAgentResult> {
        let script = self
            .scripts
            .get(&request.agent_node_id)
            .cloned()
            .unwrap_or_else(|| AgentScript {
                output: format!("{} finished", request.agent_node_id),
                ..AgentScript::default()
            });
        let attempt = {
            let mut attempts = self.attempts.lock().await;
            let count = attempts.entry(request.agent_node_id.clone()).or_insert(0);
            *count += 1;
            *count
        };

        if script.delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(script.delay_ms)).await;
        }

        let mut result = if attempt <= script.fail_times {
            let error = script
                .error
                .clone()
                .unwrap_or_else(|| format!("scripted failure on attempt {}", attempt));
            OrchestratorAgentResult::failed(&request.agent_node_id, error)
        } else {
            OrchestratorAgentResult::completed(&request.agent_node_id, script.output.clone())
        }
        .with_usage(script.input_tokens, script.output_tokens, script.cost);
        result.tool_calls = script.tool_calls;
        result.duration_ms = script.delay_ms;
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use weave_types::{AgentOutcome, OrchestrationStrategy};

    fn request(agent: &str) -> AgentRequest {
        AgentRequest {
            orchestrator_id: "o".to_string(),
            run_id: "r".to_string(),
            agent_node_id: agent.to_string(),
            attempt: 1,
            prompt_override: None,
            context: None,
            max_tokens: None,
            max_cost: None,
        }
    }

    #[test]
    fn plan_parses_camel_case_config() {
        let plan = RunPlan::parse(
            r#"{
                "orchestratorId": "orch-1",
                "config": {
                    "strategy": "parallel",
                    "budget": {"maxTotalTokens": 1000, "maxTokensPerAgent": 300},
                    "failurePolicy": {"type": "skip-failed", "maxRetries": 0, "retryDelayMs": 10},
                    "agents": [{"agentNodeId": "a", "order": 0}]
                },
                "scripts": {"a": {"output": "hi", "failTimes": 1, "inputTokens": 3}}
            }"#,
        )
        .expect("plan");

        assert_eq!(plan.orchestrator_id.as_deref(), Some("orch-1"));
        assert_eq!(plan.config.strategy, OrchestrationStrategy::Parallel);
        assert_eq!(plan.config.budget.max_tokens_per_agent, Some(300));
        assert_eq!(plan.scripts["a"].fail_times, 1);
        assert_eq!(plan.scripts["a"].input_tokens, 3);
    }

    #[tokio::test]
    async fn scripted_executor_fails_first_attempts() {
        let mut scripts = HashMap::new();
        scripts.insert(
            "a".to_string(),
            AgentScript {
                output: "done".to_string(),
                fail_times: 1,
                ..AgentScript::default()
            },
        );
        let executor = ScriptedExecutor::new(scripts);

        let first = executor.run(request("a")).await.expect("first");
        assert_eq!(first.status, AgentOutcome::Failed);
        let second = executor.run(request("a")).await.expect("second");
        assert_eq!(second.status, AgentOutcome::Completed);
        assert_eq!(second.output, "done");

        let unscripted = executor.run(request("b")).await.expect("unscripted");
        assert_eq!(unscripted.output, "b finished");
    }
}
