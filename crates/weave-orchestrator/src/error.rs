// Orchestrator Error Types
use thiserror::Error;

#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error("Cycle detected in orchestration chain: {}", chain.join(" -> "))]
    Cycle { chain: Vec<String> },

    #[error("Orchestrator {0} already has an active run")]
    AlreadyRunning(String),

    #[error("Orchestrator {0} has no connected agents")]
    NoAgents(String),

    #[error("Parallel budget cannot be satisfied: {0}")]
    ParallelBudget(String),

    #[error("No active run for orchestrator {0}")]
    NoActiveRun(String),

    #[error("Run for orchestrator {0} is already paused")]
    AlreadyPaused(String),

    #[error("Run for orchestrator {0} is not paused")]
    NotPaused(String),

    #[error("Condition type '{0}' is not implemented")]
    ConditionNotImplemented(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Executor error: {0}")]
    Executor(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    IoError(String),

    #[error("Parse error: {0}")]
    ParseError(String),
}

impl OrchestratorError {
    /// Admission errors are rejected at start and never enter the run table
    pub fn is_admission_error(&self) -> bool {
        matches!(
            self,
            Self::Cycle { .. } | Self::AlreadyRunning(_) | Self::NoAgents(_) | Self::ParallelBudget(_)
        )
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::Cycle { .. } => "cycle_detected",
            Self::AlreadyRunning(_) => "already_running",
            Self::NoAgents(_) => "no_agents",
            Self::ParallelBudget(_) => "parallel_budget_unsatisfiable",
            Self::NoActiveRun(_) => "no_active_run",
            Self::AlreadyPaused(_) => "already_paused",
            Self::NotPaused(_) => "not_paused",
            Self::ConditionNotImplemented(_) => "condition_not_implemented",
            Self::InvalidConfig(_) => "invalid_config",
            Self::Executor(_) => "executor",
            Self::IoError(_) => "io",
            Self::Serialization(_) | Self::ParseError(_) => "serialization",
        }
    }
}

impl serde::Serialize for OrchestratorError {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

pub type Result<T> = std::result::Result<T, OrchestratorError>;
