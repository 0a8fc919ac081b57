//! The stepwise traversal over the task queue.
//!
//! The source of work is a lazy, single-consumer sequence that must accept
//! feedback between items: the consumer executes the yielded task and calls
//! [`super::TaskManager::supply_result`] before asking for the next one.
//! [`TaskTraversal`] is that sequence as an explicit stepper: post-processing
//! of the previously yielded task happens at the top of the following
//! [`TaskTraversal::next`] call, exactly when control returns to the
//! scheduler. Dropping the traversal abandons the in-flight task's
//! post-processing; state in the manager persists, so a fresh traversal
//! picks up where the last one left off.

use tracing::{debug, info};

use super::{PlannerError, TaskManager};
use crate::queue::QueueEntry;
use crate::task::{Task, TaskId};

/// Cutoffs for one traversal. `None` means unbounded.
#[derive(Debug, Clone, Copy, Default)]
pub struct TraversalLimits {
    /// Stop (and push the task back) when the next task's priority number
    /// exceeds this.
    pub max_priority: Option<u32>,
    /// Stop after this many pop attempts, yielded or skipped.
    pub max_iterations: Option<usize>,
    /// Stop when no queued task sits at this depth or shallower.
    pub max_depth: Option<u32>,
}

/// A single consumer's walk over the queue. Create via
/// [`super::TaskManager::next_tasks`].
pub struct TaskTraversal {
    limits: TraversalLimits,
    iterations: usize,
    initialized: bool,
    in_flight: Option<TaskId>,
}

impl TaskTraversal {
    pub(crate) fn new(limits: TraversalLimits) -> Self {
        Self {
            limits,
            iterations: 0,
            initialized: false,
            in_flight: None,
        }
    }

    /// Produce the next task, or `None` when a cutoff is hit or the queue
    /// has nothing left in reach.
    pub async fn next(&mut self, manager: &mut TaskManager) -> Result<Option<Task>, PlannerError> {
        // Feedback first: reconcile the task the consumer just finished.
        if let Some(previous) = self.in_flight.take() {
            manager.handle_new_tasks_after_processing(previous).await?;
        }

        if !self.initialized {
            manager.initialize_priority_queue().await?;
            self.initialized = true;
        }

        loop {
            if !manager
                .queue_ref()
                .has_tasks_within_depth(self.limits.max_depth)
            {
                debug!("no tasks within depth bound, traversal ends");
                return Ok(None);
            }

            if let Some(max_iterations) = self.limits.max_iterations {
                if self.iterations >= max_iterations {
                    debug!(iterations = self.iterations, "iteration budget exhausted");
                    return Ok(None);
                }
            }
            self.iterations += 1;

            let Some(entry) = manager.queue().pop() else {
                return Ok(None);
            };
            let task = manager.task_snapshot(entry.id);
            debug!(task_id = %task.id, priority = task.priority, "popped task");

            if let Some(max_priority) = self.limits.max_priority {
                if task.priority > max_priority {
                    // Too low-priority for this traversal; put it back for a
                    // later, less picky consumer.
                    manager.queue().push(QueueEntry {
                        priority: task.priority,
                        id: task.id,
                        depth: task.depth,
                    });
                    debug!(task_id = %task.id, "priority cutoff reached, traversal ends");
                    return Ok(None);
                }
            }

            if manager.should_skip_task(task.id) {
                debug!(task_id = %task.id, "skipping task");
                continue;
            }

            info!(task_id = %task.id, defect = %task.defect, "yielding task");
            self.in_flight = Some(task.id);
            return Ok(Some(task));
        }
    }
}
