use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use weave_types::OrchestratorAgentResult;

/// Everything the host needs to run one agent attempt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentRequest {
    pub orchestrator_id: String,
    pub run_id: String,
    pub agent_node_id: String,
    /// 1 for the first attempt, incremented on every retry
    pub attempt: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt_override: Option<String>,
    /// Output of the previous agent, already truncated
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_cost: Option<f64>,
}

/// Host capability that actually runs an agent (LLM call, tool loop, ...).
/// An `Err` is treated as a failed attempt and handed to the failure policy.
#[async_trait]
pub trait AgentExecutor: Send + Sync {
    async fn run(&self, request: AgentRequest) -> anyhow::Result<OrchestratorAgentResult>;
}
