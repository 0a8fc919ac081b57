//! The task model: defects, tasks, and results.
//!
//! A [`Defect`] is the *content* identity of a unit of work -- what the
//! analyzer reported, where. Tasks live in an arena owned by the
//! [`crate::manager::TaskManager`]; [`TaskId`] is the arena key, assigned in
//! creation order, and `parent`/`children` are id links so the task graph
//! has no ownership cycles. Scheduling state (`priority`, `depth`, retries)
//! sits on the [`Task`] record and is written only by the manager.

use std::fmt;
use std::path::PathBuf;

/// Arena handle for a task. Ids are assigned in creation order, which makes
/// them double as the deterministic tie-breaker for equal priorities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(pub u64);

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task-{}", self.0)
    }
}

/// The concrete defect variants the analyzer emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DefectKind {
    /// A source-level rule violation.
    RuleViolation,
    /// A violation reported against dependency metadata (`pom.xml`).
    DependencyRuleViolation,
}

impl fmt::Display for DefectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DefectKind::RuleViolation => write!(f, "rule-violation"),
            DefectKind::DependencyRuleViolation => write!(f, "dependency-rule-violation"),
        }
    }
}

/// What the analyzer reported, normalised: repo-relative file, position,
/// message, and rule provenance. Two validator runs that report the same
/// defect produce equal `Defect` values.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Defect {
    pub kind: DefectKind,
    pub file: PathBuf,
    /// 1-based line, `-1` when unknown.
    pub line: i64,
    /// Always `-1`; the analyzer does not report columns.
    pub column: i64,
    pub message: String,
    /// Name of the ruleset the violated rule belongs to.
    pub ruleset: String,
    /// Violation id within the ruleset.
    pub violation: String,
}

impl Defect {
    /// Positional-shift-tolerant equivalence: the same rule firing in the
    /// same file with the same message within `offset` lines is considered
    /// the same defect. Edits above an incident move its reported line
    /// without resolving it.
    pub fn fuzzy_matches(&self, other: &Defect, offset: i64) -> bool {
        self.kind == other.kind
            && self.file == other.file
            && self.ruleset == other.ruleset
            && self.violation == other.violation
            && self.message == other.message
            && (self.line - other.line).abs() <= offset
    }
}

impl fmt::Display for Defect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {}:{} [{}/{}]",
            self.kind,
            self.file.display(),
            self.line,
            self.ruleset,
            self.violation
        )
    }
}

/// A schedulable unit of work.
#[derive(Debug, Clone)]
pub struct Task {
    pub id: TaskId,
    pub defect: Defect,
    /// Lower number = higher priority. Seeds enter at 0; retries lower the
    /// priority by incrementing this.
    pub priority: u32,
    /// Seeds sit at depth 0; a grafted child is one deeper than its parent.
    pub depth: u32,
    pub retry_count: u32,
    pub max_retries: u32,
    pub parent: Option<TaskId>,
    pub children: Vec<TaskId>,
}

impl Task {
    /// The queue total order: priority ascending, creation order breaking
    /// ties.
    pub fn order_key(&self) -> (u32, TaskId) {
        (self.priority, self.id)
    }
}

/// What a runner reports back after attempting a task.
#[derive(Debug, Clone, Default)]
pub struct TaskResult {
    pub modified_files: Vec<PathBuf>,
    pub encountered_errors: Vec<String>,
}

/// Outcome of one validator sweep. `passed` holds exactly when `errors` is
/// empty.
#[derive(Debug, Clone)]
pub struct ValidationResult {
    pub passed: bool,
    pub errors: Vec<Defect>,
}

impl ValidationResult {
    pub fn clean() -> Self {
        Self {
            passed: true,
            errors: Vec::new(),
        }
    }

    pub fn from_errors(errors: Vec<Defect>) -> Self {
        Self {
            passed: errors.is_empty(),
            errors,
        }
    }
}
