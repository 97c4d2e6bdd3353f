pub mod budget;
pub mod bus;
pub mod conditions;
pub mod config;
pub mod control;
pub mod coordinator;
pub mod cycle;
pub mod error;
pub mod executor;
pub mod policy;
pub mod store;
pub mod strategy;

pub use budget::*;
pub use bus::*;
pub use conditions::*;
pub use config::*;
pub use control::*;
pub use coordinator::*;
pub use cycle::*;
pub use error::{OrchestratorError, Result};
pub use executor::*;
pub use policy::*;
pub use store::*;
pub use strategy::{
    determine_final_status, executor_for, truncate_context, ConditionalExecutor,
    ParallelExecutor, RunContext, SequentialExecutor, StrategyExecutor,
};
