//! Core of the reactive code-planner.
//!
//! The planner repeatedly runs static-analysis validators over a working
//! copy, turns every reported defect into a task, dispatches tasks to
//! runners that mutate the repository, and re-validates to discover new or
//! residual defects. It stops when the validators come back clean, when the
//! traversal limits are exhausted, or when every remaining task has been
//! retired to the ignore list.
//!
//! # Architecture
//!
//! ```text
//! TaskManager::next_tasks() ---> TaskTraversal
//!     |                              |
//!     |   run_validators()           |  pop / skip / cutoff
//!     v                              v
//! ValidationStep (AnalyzerValidator) yields Task
//!     |                              |
//!     v                              v
//! Analyzer (child process)       TaskRunner::execute_task(rcm, task)
//!     |                              |
//!     v                              v
//! replan_rpc::RpcClient          supply_result() -> post-processing
//! ```

pub mod analyzer;
pub mod manager;
pub mod planner;
pub mod queue;
pub mod runner;
pub mod task;
pub mod validator;

pub use analyzer::{Analyzer, AnalyzerConfig};
pub use manager::{
    PlannerError, RunnerErrorPolicy, TaskManager, TaskManagerOptions, TaskTraversal,
    TraversalLimits,
};
pub use planner::{PlanSummary, run_planner};
pub use queue::PriorityTaskQueue;
pub use runner::{RepoContext, ScriptRunner, ScriptRunnerConfig, TaskRunner};
pub use task::{Defect, DefectKind, Task, TaskId, TaskResult, ValidationResult};
pub use validator::{AnalyzerValidator, ValidationError, ValidationStep};
