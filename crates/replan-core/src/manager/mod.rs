//! The reactive task manager.
//!
//! Runs validators, turns reported defects into tasks, hands tasks to the
//! first capable runner, and reconciles the queue against each fresh
//! validator sweep: tasks that stop being reported are resolved indirectly,
//! tasks that survive their own execution are retried at lower priority,
//! and brand-new defects are grafted as children of the task whose fix
//! surfaced them.
//!
//! Tasks live in an arena keyed by [`TaskId`]; defects are interned so the
//! same finding reported by successive sweeps resolves to the same task.
//! At any instant a task is in exactly one of: the queue, `processed_tasks`,
//! `ignored_tasks`, or in flight.

pub mod traversal;

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;

use tracing::{debug, info, warn};

use crate::queue::{PriorityTaskQueue, QueueEntry};
use crate::runner::{RepoContext, TaskRunner};
use crate::task::{Defect, Task, TaskId, TaskResult};
use crate::validator::{ValidationError, ValidationStep};

pub use traversal::{TaskTraversal, TraversalLimits};

/// Line-shift tolerance when deciding whether a freshly reported defect is
/// the one we just tried to fix.
const RESIDUAL_MATCH_OFFSET: i64 = 2;

/// Scheduler-level failures.
#[derive(Debug, thiserror::Error)]
pub enum PlannerError {
    #[error("no agent available for {0}")]
    NoAgent(TaskId),

    /// A runner reported errors and the error policy is [`RunnerErrorPolicy::Fail`].
    #[error("runner reported unhandled errors: {0:?}")]
    UnhandledRunnerError(Vec<String>),

    #[error(transparent)]
    Validation(#[from] ValidationError),
}

/// What to do when a runner comes back with `encountered_errors`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RunnerErrorPolicy {
    /// Fail the step with [`PlannerError::UnhandledRunnerError`].
    #[default]
    Fail,
    /// Log the errors and keep going; the retry machinery will deal with the
    /// unresolved defect.
    Discard,
}

#[derive(Debug, Clone)]
pub struct TaskManagerOptions {
    /// Default retry budget stamped onto every new task.
    pub max_retries: u32,
    pub runner_error_policy: RunnerErrorPolicy,
}

impl Default for TaskManagerOptions {
    fn default() -> Self {
        Self {
            max_retries: 3,
            runner_error_policy: RunnerErrorPolicy::Fail,
        }
    }
}

pub struct TaskManager {
    validators: Vec<Box<dyn ValidationStep>>,
    agents: Vec<Box<dyn TaskRunner>>,

    queue: PriorityTaskQueue,
    tasks: HashMap<TaskId, Task>,
    defect_ids: HashMap<Defect, TaskId>,
    next_id: u64,

    processed_tasks: HashSet<TaskId>,
    ignored_tasks: Vec<TaskId>,
    unprocessed_files: Vec<PathBuf>,
    validators_are_stale: bool,

    rcm: RepoContext,
    options: TaskManagerOptions,
}

impl TaskManager {
    pub fn new(
        rcm: RepoContext,
        seed_tasks: Vec<Defect>,
        validators: Vec<Box<dyn ValidationStep>>,
        agents: Vec<Box<dyn TaskRunner>>,
        options: TaskManagerOptions,
    ) -> Self {
        let mut manager = Self {
            validators,
            agents,
            queue: PriorityTaskQueue::new(),
            tasks: HashMap::new(),
            defect_ids: HashMap::new(),
            next_id: 0,
            processed_tasks: HashSet::new(),
            ignored_tasks: Vec::new(),
            unprocessed_files: Vec::new(),
            validators_are_stale: true,
            rcm,
            options,
        };

        // Seed tasks enter at the highest priority and depth 0.
        for defect in seed_tasks {
            let id = manager.intern(defect);
            let task = manager.task(id);
            let (priority, depth) = (task.priority, task.depth);
            manager.queue.push(QueueEntry {
                priority,
                id,
                depth,
            });
            info!(task_id = %id, "seed task queued");
        }

        info!(
            validators = manager.validators.len(),
            agents = manager.agents.len(),
            "task manager initialized"
        );
        manager
    }

    /// Begin a traversal of the queue with the given limits. The traversal
    /// runs all validators on its first step.
    pub fn next_tasks(&self, limits: TraversalLimits) -> TaskTraversal {
        TaskTraversal::new(limits)
    }

    /// Resolve a defect to its task, creating the task on first sight.
    /// New tasks start at priority 0, depth 0; grafting overwrites both.
    fn intern(&mut self, defect: Defect) -> TaskId {
        if let Some(&id) = self.defect_ids.get(&defect) {
            return id;
        }
        let id = TaskId(self.next_id);
        self.next_id += 1;
        self.tasks.insert(
            id,
            Task {
                id,
                defect: defect.clone(),
                priority: 0,
                depth: 0,
                retry_count: 0,
                max_retries: self.options.max_retries,
                parent: None,
                children: Vec::new(),
            },
        );
        self.defect_ids.insert(defect, id);
        id
    }

    /// Arena lookup. Every id handed out by [`Self::intern`] stays in the
    /// arena for the manager's lifetime.
    fn task(&self, id: TaskId) -> &Task {
        self.tasks.get(&id).expect("task id missing from arena")
    }

    fn task_mut(&mut self, id: TaskId) -> &mut Task {
        self.tasks.get_mut(&id).expect("task id missing from arena")
    }

    /// Public, non-panicking lookup for consumers and tests.
    pub fn get_task(&self, id: TaskId) -> Option<&Task> {
        self.tasks.get(&id)
    }

    /// Resolve a defect to its task id, if the defect has been seen.
    pub fn find_task(&self, defect: &Defect) -> Option<TaskId> {
        self.defect_ids.get(defect).copied()
    }

    pub fn processed_tasks(&self) -> &HashSet<TaskId> {
        &self.processed_tasks
    }

    pub fn ignored_tasks(&self) -> &[TaskId] {
        &self.ignored_tasks
    }

    /// Snapshot of the queue's membership.
    pub fn queued_tasks(&self) -> HashSet<TaskId> {
        self.queue.all_tasks()
    }

    /// Files runners have touched since the last completed sweep.
    pub fn unprocessed_files(&self) -> &[PathBuf] {
        &self.unprocessed_files
    }

    /// Whether any repository mutation has happened since the last sweep.
    pub fn validators_are_stale(&self) -> bool {
        self.validators_are_stale
    }

    /// Execute a task through the first agent that can handle it.
    pub async fn execute_task(&self, task: &Task) -> Result<TaskResult, PlannerError> {
        let agent = self.agent_for_task(task)?;
        info!(task_id = %task.id, agent = agent.name(), "executing task");
        let result = agent.execute_task(&self.rcm, task).await;
        debug!(
            task_id = %task.id,
            modified = result.modified_files.len(),
            errors = result.encountered_errors.len(),
            "task execution finished"
        );
        Ok(result)
    }

    fn agent_for_task(&self, task: &Task) -> Result<&dyn TaskRunner, PlannerError> {
        for agent in &self.agents {
            if agent.can_handle_task(task) {
                debug!(task_id = %task.id, agent = agent.name(), "agent selected");
                return Ok(agent.as_ref());
            }
        }
        warn!(task_id = %task.id, "no agent available");
        Err(PlannerError::NoAgent(task.id))
    }

    /// Feed back the result of the previously yielded task. Modified files
    /// mark the validators stale.
    pub fn supply_result(&mut self, result: TaskResult) -> Result<(), PlannerError> {
        for file in result.modified_files {
            if !self.unprocessed_files.contains(&file) {
                debug!(file = %file.display(), "file marked unprocessed");
                self.unprocessed_files.push(file);
                self.validators_are_stale = true;
            }
        }

        if !result.encountered_errors.is_empty() {
            match self.options.runner_error_policy {
                RunnerErrorPolicy::Fail => {
                    return Err(PlannerError::UnhandledRunnerError(result.encountered_errors));
                }
                RunnerErrorPolicy::Discard => {
                    warn!(
                        errors = ?result.encountered_errors,
                        "discarding runner errors per policy"
                    );
                }
            }
        }
        Ok(())
    }

    /// Run every validator and intern what they report.
    pub async fn run_validators(&mut self) -> Result<Vec<TaskId>, ValidationError> {
        info!("running validators");
        let mut defects = Vec::new();
        for validator in &self.validators {
            let result = validator.run().await?;
            if !result.passed {
                debug!(count = result.errors.len(), "validator reported defects");
                defects.extend(result.errors);
            }
        }
        self.validators_are_stale = false;

        let ids: Vec<TaskId> = defects.into_iter().map(|d| self.intern(d)).collect();
        info!(count = ids.len(), "validators finished");
        Ok(ids)
    }

    /// First traversal step: run all validators and queue everything they
    /// report at its current scheduling state.
    pub(crate) async fn initialize_priority_queue(&mut self) -> Result<(), ValidationError> {
        info!("initializing priority queue");
        let new_tasks = self.run_validators().await?;
        for id in new_tasks {
            let task = self.task(id);
            let entry = QueueEntry {
                priority: task.priority,
                id,
                depth: task.depth,
            };
            self.queue.push(entry);
        }
        Ok(())
    }

    /// Reconcile state after the consumer finished acting on `current`.
    ///
    /// 1. Re-run validators.
    /// 2. Anything queued but no longer reported is resolved indirectly.
    /// 3. If the fresh sweep still reports `current` (or a near-identical
    ///    defect), the fix did not take: retry or ignore it.
    /// 4. Everything newly reported becomes a child of `current`.
    pub(crate) async fn handle_new_tasks_after_processing(
        &mut self,
        current: TaskId,
    ) -> Result<(), ValidationError> {
        debug!(task_id = %current, "post-processing after task execution");
        self.validators_are_stale = true;

        let reported: HashSet<TaskId> = self.run_validators().await?.into_iter().collect();
        let mut unprocessed: HashSet<TaskId> = reported
            .difference(&self.processed_tasks)
            .copied()
            .collect();

        // Resolved indirectly: queued, but the fresh sweep no longer reports
        // it.
        let in_queue = self.queue.all_tasks();
        for &resolved in in_queue.difference(&reported) {
            self.queue.remove(resolved);
            self.processed_tasks.insert(resolved);
            info!(task_id = %resolved, "task resolved indirectly, removed from queue");
        }

        // Is the defect we just worked on still being reported?
        let current_defect = self.task(current).defect.clone();
        let mut residual: Vec<TaskId> = unprocessed
            .iter()
            .copied()
            .filter(|&id| {
                id == current
                    || self
                        .task(id)
                        .defect
                        .fuzzy_matches(&current_defect, RESIDUAL_MATCH_OFFSET)
            })
            .collect();
        residual.sort_by_key(|&id| self.task(id).order_key());

        if let Some(&representative) = residual.first() {
            // The representative stands in for the executed task; any other
            // near-match stays in `unprocessed` and is grafted below.
            unprocessed.remove(&representative);
            debug!(task_id = %current, "task still unprocessed after execution");
            self.handle_ignored_task(current);
        } else {
            self.processed_tasks.insert(current);
            debug!(task_id = %current, "task processed successfully");
        }

        // Graft defects that were neither queued nor processed as children
        // of the task whose execution surfaced them.
        let mut children: Vec<TaskId> = unprocessed.difference(&in_queue).copied().collect();
        children.sort_by_key(|&id| self.task(id).order_key());

        let (parent_priority, parent_depth) = {
            let parent = self.task(current);
            (parent.priority, parent.depth)
        };
        for child in children {
            {
                let task = self.task_mut(child);
                task.parent = Some(current);
                task.depth = parent_depth + 1;
                task.priority = parent_priority;
            }
            self.task_mut(current).children.push(child);
            self.queue.push(QueueEntry {
                priority: parent_priority,
                id: child,
                depth: parent_depth + 1,
            });
            debug!(task_id = %child, parent = %current, "child task grafted");
        }

        Ok(())
    }

    /// A task is skipped when it is already processed, or when it sits on
    /// the ignore list and still has live descendants to work through
    /// first.
    pub(crate) fn should_skip_task(&self, id: TaskId) -> bool {
        let skip = self.processed_tasks.contains(&id)
            || (self.ignored_tasks.contains(&id)
                && !self
                    .task(id)
                    .children
                    .iter()
                    .all(|&child| self.should_skip_task(child)));
        debug!(task_id = %id, skip, "skip check");
        skip
    }

    /// The executed task is still failing. Retry it at lower priority while
    /// budget remains, otherwise retire it to the ignore list.
    fn handle_ignored_task(&mut self, id: TaskId) {
        let (retry_count, max_retries) = {
            let task = self.task(id);
            (task.retry_count, task.max_retries)
        };

        if retry_count < max_retries {
            let entry = {
                let task = self.task_mut(id);
                task.retry_count += 1;
                task.priority += 1;
                QueueEntry {
                    priority: task.priority,
                    id,
                    depth: task.depth,
                }
            };
            debug!(
                task_id = %id,
                retry_count = retry_count + 1,
                priority = entry.priority,
                "task requeued at lower priority"
            );
            self.queue.push(entry);
        } else {
            self.ignored_tasks.push(id);
            warn!(task_id = %id, "task exceeded max retries, added to ignored tasks");
        }
    }

    /// Stop every agent and validator.
    pub async fn stop(&self) {
        info!("stopping task manager");
        for agent in &self.agents {
            agent.stop().await;
            debug!(agent = agent.name(), "agent stopped");
        }
        for validator in &self.validators {
            validator.stop().await;
        }
    }

    // Internal accessors for the traversal stepper.
    pub(crate) fn queue(&mut self) -> &mut PriorityTaskQueue {
        &mut self.queue
    }

    pub(crate) fn queue_ref(&self) -> &PriorityTaskQueue {
        &self.queue
    }

    pub(crate) fn task_snapshot(&self, id: TaskId) -> Task {
        self.task(id).clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::DefectKind;
    use std::path::PathBuf;
    use std::sync::Mutex;

    fn defect(file: &str, line: i64) -> Defect {
        Defect {
            kind: DefectKind::RuleViolation,
            file: PathBuf::from(file),
            line,
            column: -1,
            message: format!("defect in {file}"),
            ruleset: "quarkus".to_string(),
            violation: "rule-1".to_string(),
        }
    }

    /// Validator that replays a scripted sequence of sweeps, repeating the
    /// last one once the script runs out.
    struct ScriptedValidator {
        sweeps: Mutex<Vec<Vec<Defect>>>,
    }

    impl ScriptedValidator {
        fn new(sweeps: Vec<Vec<Defect>>) -> Self {
            Self {
                sweeps: Mutex::new(sweeps),
            }
        }
    }

    #[async_trait::async_trait]
    impl ValidationStep for ScriptedValidator {
        async fn run(&self) -> Result<crate::task::ValidationResult, ValidationError> {
            let mut sweeps = self.sweeps.lock().unwrap();
            let current = if sweeps.len() > 1 {
                sweeps.remove(0)
            } else {
                sweeps.first().cloned().unwrap_or_default()
            };
            Ok(crate::task::ValidationResult::from_errors(current))
        }
    }

    struct AcceptAllRunner;

    #[async_trait::async_trait]
    impl TaskRunner for AcceptAllRunner {
        fn name(&self) -> &str {
            "accept-all"
        }
        fn can_handle_task(&self, _task: &Task) -> bool {
            true
        }
        async fn execute_task(&self, _rcm: &RepoContext, _task: &Task) -> TaskResult {
            TaskResult::default()
        }
    }

    struct RejectAllRunner;

    #[async_trait::async_trait]
    impl TaskRunner for RejectAllRunner {
        fn name(&self) -> &str {
            "reject-all"
        }
        fn can_handle_task(&self, _task: &Task) -> bool {
            false
        }
        async fn execute_task(&self, _rcm: &RepoContext, _task: &Task) -> TaskResult {
            TaskResult::default()
        }
    }

    fn manager_with(
        seeds: Vec<Defect>,
        sweeps: Vec<Vec<Defect>>,
        options: TaskManagerOptions,
    ) -> TaskManager {
        TaskManager::new(
            RepoContext::new("/tmp/repo"),
            seeds,
            vec![Box::new(ScriptedValidator::new(sweeps))],
            vec![Box::new(AcceptAllRunner)],
            options,
        )
    }

    #[tokio::test]
    async fn no_agent_is_an_error() {
        let manager = TaskManager::new(
            RepoContext::new("/tmp/repo"),
            vec![defect("src/A.java", 1)],
            Vec::new(),
            vec![Box::new(RejectAllRunner)],
            TaskManagerOptions::default(),
        );
        let task = manager.task_snapshot(TaskId(0));
        let err = manager.execute_task(&task).await.unwrap_err();
        assert!(matches!(err, PlannerError::NoAgent(_)), "got {err:?}");
    }

    #[tokio::test]
    async fn supply_result_with_errors_fails_by_default() {
        let mut manager = manager_with(vec![], vec![vec![]], TaskManagerOptions::default());
        let err = manager
            .supply_result(TaskResult {
                modified_files: vec![],
                encountered_errors: vec!["boom".to_string()],
            })
            .unwrap_err();
        assert!(
            matches!(err, PlannerError::UnhandledRunnerError(_)),
            "got {err:?}"
        );
    }

    #[tokio::test]
    async fn supply_result_discard_policy_swallows_errors() {
        let mut manager = manager_with(
            vec![],
            vec![vec![]],
            TaskManagerOptions {
                runner_error_policy: RunnerErrorPolicy::Discard,
                ..Default::default()
            },
        );
        manager
            .supply_result(TaskResult {
                modified_files: vec![],
                encountered_errors: vec!["boom".to_string()],
            })
            .unwrap();
    }

    #[tokio::test]
    async fn modified_files_mark_validators_stale() {
        let mut manager = manager_with(vec![], vec![vec![]], TaskManagerOptions::default());
        manager.run_validators().await.unwrap();
        assert!(!manager.validators_are_stale());

        manager
            .supply_result(TaskResult {
                modified_files: vec![PathBuf::from("src/A.java"), PathBuf::from("src/A.java")],
                encountered_errors: vec![],
            })
            .unwrap();

        assert!(manager.validators_are_stale());
        assert_eq!(manager.unprocessed_files(), &[PathBuf::from("src/A.java")]);
    }

    #[tokio::test]
    async fn interning_is_stable_across_sweeps() {
        let mut manager = manager_with(
            vec![],
            vec![vec![defect("src/A.java", 1)]],
            TaskManagerOptions::default(),
        );
        let first = manager.run_validators().await.unwrap();
        let second = manager.run_validators().await.unwrap();
        assert_eq!(first, second);
        assert_eq!(first.len(), 1);
    }

    #[test]
    fn seeds_enter_at_priority_zero_depth_zero() {
        let manager = manager_with(
            vec![defect("src/A.java", 1), defect("src/B.java", 2)],
            vec![vec![]],
            TaskManagerOptions::default(),
        );
        for id in manager.queued_tasks() {
            let task = manager.get_task(id).unwrap();
            assert_eq!(task.priority, 0);
            assert_eq!(task.depth, 0);
        }
        assert_eq!(manager.queued_tasks().len(), 2);
    }

    #[test]
    fn skip_rules_follow_children_liveness() {
        let mut manager = manager_with(vec![], vec![vec![]], TaskManagerOptions::default());

        let parent = manager.intern(defect("src/Parent.java", 1));
        let live_child = manager.intern(defect("src/Child.java", 2));
        let done_child = manager.intern(defect("src/Done.java", 3));
        manager.task_mut(parent).children = vec![live_child, done_child];

        // Not processed, not ignored: never skipped.
        assert!(!manager.should_skip_task(parent));

        // Processed wins outright.
        manager.processed_tasks.insert(parent);
        assert!(manager.should_skip_task(parent));
        manager.processed_tasks.remove(&parent);

        // Ignored with a live child: skipped (the child gets its chance
        // first).
        manager.ignored_tasks.push(parent);
        assert!(manager.should_skip_task(parent));

        // Once every child is terminal, the ignored parent is re-admitted.
        manager.processed_tasks.insert(live_child);
        manager.processed_tasks.insert(done_child);
        assert!(!manager.should_skip_task(parent));
    }

    #[test]
    fn ignored_task_without_children_is_readmitted() {
        let mut manager = manager_with(vec![], vec![vec![]], TaskManagerOptions::default());
        let id = manager.intern(defect("src/A.java", 1));
        manager.ignored_tasks.push(id);
        assert!(!manager.should_skip_task(id));
    }

    #[tokio::test]
    async fn priority_cutoff_pushes_the_task_back() {
        // Queue holds X at priority 0 and Y at priority 5; a traversal with
        // max_priority 3 must yield X, push Y back, and stop.
        let x = defect("src/X.java", 1);
        let y = defect("src/Y.java", 2);
        let mut manager = manager_with(
            vec![x.clone()],
            // After X executes the sweep still reports Y, so Y is neither
            // resolved indirectly nor grafted.
            vec![vec![y.clone()]],
            TaskManagerOptions::default(),
        );

        let y_id = manager.intern(y.clone());
        manager.task_mut(y_id).priority = 5;
        manager.queue.push(QueueEntry {
            priority: 5,
            id: y_id,
            depth: 0,
        });

        let mut traversal = manager.next_tasks(TraversalLimits {
            max_priority: Some(3),
            ..Default::default()
        });

        let first = traversal.next(&mut manager).await.unwrap().unwrap();
        assert_eq!(first.defect, x);
        manager.supply_result(TaskResult::default()).unwrap();

        assert!(traversal.next(&mut manager).await.unwrap().is_none());

        let queued = manager.queued_tasks();
        assert!(queued.contains(&y_id), "Y must be back in the queue");
        let y_task = manager.get_task(y_id).unwrap();
        assert_eq!(y_task.priority, 5);
    }
}
