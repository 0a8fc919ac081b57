//! Plan driver: consumes a traversal to completion.
//!
//! One task is in flight at a time; the loop pops a task, dispatches it to
//! its runner, feeds the result back, and lets the manager's post-processing
//! decide what the next pop sees.

use tracing::info;

use crate::manager::{PlannerError, TaskManager, TraversalLimits};

/// What a completed run looked like.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlanSummary {
    /// Tasks dispatched to a runner.
    pub executed: usize,
    /// Tasks resolved, directly or indirectly.
    pub processed: usize,
    /// Tasks retired after exhausting their retries.
    pub ignored: usize,
}

/// Drive the manager until its traversal terminates.
///
/// Validator failures and unhandled runner errors abort the run; task-level
/// flakiness is absorbed by the manager's retry/ignore machinery instead.
pub async fn run_planner(
    manager: &mut TaskManager,
    limits: TraversalLimits,
) -> Result<PlanSummary, PlannerError> {
    let mut traversal = manager.next_tasks(limits);
    let mut executed = 0usize;

    while let Some(task) = traversal.next(manager).await? {
        let result = manager.execute_task(&task).await?;
        manager.supply_result(result)?;
        executed += 1;
    }

    let summary = PlanSummary {
        executed,
        processed: manager.processed_tasks().len(),
        ignored: manager.ignored_tasks().len(),
    };
    info!(
        executed = summary.executed,
        processed = summary.processed,
        ignored = summary.ignored,
        "plan finished"
    );
    Ok(summary)
}
