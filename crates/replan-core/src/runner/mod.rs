//! The `TaskRunner` trait -- the adapter interface for components that
//! mutate the working copy to resolve a task.
//!
//! Runners never touch the queue or the processed/ignored sets; they are
//! handed a [`RepoContext`] and a [`Task`] and report a [`TaskResult`].

pub mod script;

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::task::{Task, TaskResult};

pub use script::{ScriptRunner, ScriptRunnerConfig};

/// Opaque handle to a mutable working copy of the repository. The core only
/// needs to hand it to runners; what a runner does with it is its own
/// business.
#[derive(Debug, Clone)]
pub struct RepoContext {
    root: PathBuf,
}

impl RepoContext {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

/// Adapter interface for defect-resolving runners.
///
/// The manager selects the first runner whose [`TaskRunner::can_handle_task`]
/// answers true, in registration order.
#[async_trait]
pub trait TaskRunner: Send + Sync {
    /// Human-readable name, for logs.
    fn name(&self) -> &str;

    fn can_handle_task(&self, task: &Task) -> bool;

    /// Attempt to resolve the task. Failures are reported through
    /// [`TaskResult::encountered_errors`], not as an `Err`.
    async fn execute_task(&self, rcm: &RepoContext, task: &Task) -> TaskResult;

    /// Release any resources the runner holds. Default: nothing to do.
    async fn stop(&self) {}
}

// Runners are stored as `Box<dyn TaskRunner>` by the manager.
const _: () = {
    fn _assert_object_safe(_: &dyn TaskRunner) {}
};
