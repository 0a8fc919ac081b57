//! Script-backed runner: delegates each task to a configured fix command.
//!
//! The command runs in the repo root with the defect described through
//! `REPLAN_*` environment variables. It is expected to print the paths it
//! modified to stdout, one per line, and exit 0 on success.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tracing::{debug, warn};

use super::{RepoContext, TaskRunner};
use crate::task::{Task, TaskResult};

#[derive(Debug, Clone)]
pub struct ScriptRunnerConfig {
    /// The fix command to execute.
    pub command: String,
    /// Arguments passed before the environment-described defect.
    pub args: Vec<String>,
    /// Wall-time limit per invocation.
    pub timeout: Duration,
}

/// Runs one external command per task.
pub struct ScriptRunner {
    config: ScriptRunnerConfig,
}

impl ScriptRunner {
    pub fn new(config: ScriptRunnerConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl TaskRunner for ScriptRunner {
    fn name(&self) -> &str {
        "script"
    }

    fn can_handle_task(&self, _task: &Task) -> bool {
        // A script gets to see everything; selectivity belongs to the script.
        true
    }

    async fn execute_task(&self, rcm: &RepoContext, task: &Task) -> TaskResult {
        let defect = &task.defect;

        let mut cmd = Command::new(&self.config.command);
        cmd.args(&self.config.args)
            .current_dir(rcm.root())
            .env("REPLAN_KIND", defect.kind.to_string())
            .env("REPLAN_FILE", &defect.file)
            .env("REPLAN_LINE", defect.line.to_string())
            .env("REPLAN_MESSAGE", &defect.message)
            .env("REPLAN_RULESET", &defect.ruleset)
            .env("REPLAN_VIOLATION", &defect.violation)
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped());

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                return TaskResult {
                    modified_files: Vec::new(),
                    encountered_errors: vec![format!(
                        "failed to spawn fix command '{}': {e}",
                        self.config.command
                    )],
                };
            }
        };

        // Drain both pipes while waiting so the child cannot block on a full
        // pipe buffer.
        let mut stdout_pipe = child.stdout.take();
        let mut stderr_pipe = child.stderr.take();

        let read_stdout = async {
            let mut buf = Vec::new();
            if let Some(ref mut pipe) = stdout_pipe {
                pipe.read_to_end(&mut buf).await.ok();
            }
            String::from_utf8_lossy(&buf).into_owned()
        };
        let read_stderr = async {
            let mut buf = Vec::new();
            if let Some(ref mut pipe) = stderr_pipe {
                pipe.read_to_end(&mut buf).await.ok();
            }
            String::from_utf8_lossy(&buf).into_owned()
        };

        let outcome = tokio::time::timeout(self.config.timeout, async {
            tokio::join!(child.wait(), read_stdout, read_stderr)
        })
        .await;

        match outcome {
            Ok((Ok(status), stdout, _)) if status.success() => {
                let modified_files: Vec<PathBuf> = stdout
                    .lines()
                    .map(str::trim)
                    .filter(|line| !line.is_empty())
                    .map(PathBuf::from)
                    .collect();
                debug!(
                    task_id = %task.id,
                    modified = modified_files.len(),
                    "fix command succeeded"
                );
                TaskResult {
                    modified_files,
                    encountered_errors: Vec::new(),
                }
            }
            Ok((Ok(status), _, stderr)) => TaskResult {
                modified_files: Vec::new(),
                encountered_errors: vec![format!(
                    "fix command exited with {status}: {}",
                    truncate_snippet(&stderr, 1024)
                )],
            },
            Ok((Err(e), _, _)) => TaskResult {
                modified_files: Vec::new(),
                encountered_errors: vec![format!("failed to wait on fix command: {e}")],
            },
            Err(_) => {
                warn!(task_id = %task.id, "fix command timed out, killing");
                let _ = child.kill().await;
                TaskResult {
                    modified_files: Vec::new(),
                    encountered_errors: vec![format!(
                        "fix command timed out after {:?}",
                        self.config.timeout
                    )],
                }
            }
        }
    }
}

/// Truncate a string to at most `max_bytes` bytes, appending "..." if
/// truncated.
fn truncate_snippet(s: &str, max_bytes: usize) -> String {
    if s.len() <= max_bytes {
        return s.to_owned();
    }
    let mut end = max_bytes;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    let mut truncated = s[..end].to_owned();
    truncated.push_str("...");
    truncated
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::{Defect, DefectKind, TaskId};
    use std::path::Path;

    fn test_task() -> Task {
        Task {
            id: TaskId(0),
            defect: Defect {
                kind: DefectKind::RuleViolation,
                file: PathBuf::from("src/main/java/App.java"),
                line: 12,
                column: -1,
                message: "update the import".to_string(),
                ruleset: "quarkus".to_string(),
                violation: "rule-1".to_string(),
            },
            priority: 0,
            depth: 0,
            retry_count: 0,
            max_retries: 3,
            parent: None,
            children: Vec::new(),
        }
    }

    fn script_runner(dir: &Path, body: &str, timeout: Duration) -> ScriptRunner {
        let script = dir.join("fix.sh");
        std::fs::write(&script, format!("#!/bin/sh\n{body}\n")).unwrap();
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();
        }
        ScriptRunner::new(ScriptRunnerConfig {
            command: script.to_string_lossy().into_owned(),
            args: Vec::new(),
            timeout,
        })
    }

    #[tokio::test]
    async fn stdout_lines_become_modified_files() {
        let tmp = tempfile::tempdir().unwrap();
        let runner = script_runner(
            tmp.path(),
            "echo src/main/java/App.java\necho ''\necho pom.xml",
            Duration::from_secs(10),
        );
        let rcm = RepoContext::new(tmp.path());

        let result = runner.execute_task(&rcm, &test_task()).await;
        assert!(result.encountered_errors.is_empty());
        assert_eq!(
            result.modified_files,
            vec![
                PathBuf::from("src/main/java/App.java"),
                PathBuf::from("pom.xml")
            ]
        );
    }

    #[tokio::test]
    async fn defect_metadata_reaches_the_script_environment() {
        let tmp = tempfile::tempdir().unwrap();
        let runner = script_runner(
            tmp.path(),
            "echo \"$REPLAN_FILE:$REPLAN_LINE:$REPLAN_VIOLATION\"",
            Duration::from_secs(10),
        );
        let rcm = RepoContext::new(tmp.path());

        let result = runner.execute_task(&rcm, &test_task()).await;
        assert_eq!(
            result.modified_files,
            vec![PathBuf::from("src/main/java/App.java:12:rule-1")]
        );
    }

    #[tokio::test]
    async fn nonzero_exit_reports_an_error() {
        let tmp = tempfile::tempdir().unwrap();
        let runner = script_runner(
            tmp.path(),
            "echo 'cannot fix this' >&2\nexit 3",
            Duration::from_secs(10),
        );
        let rcm = RepoContext::new(tmp.path());

        let result = runner.execute_task(&rcm, &test_task()).await;
        assert!(result.modified_files.is_empty());
        assert_eq!(result.encountered_errors.len(), 1);
        assert!(
            result.encountered_errors[0].contains("cannot fix this"),
            "{:?}",
            result.encountered_errors
        );
    }

    #[tokio::test]
    async fn missing_command_reports_an_error() {
        let runner = ScriptRunner::new(ScriptRunnerConfig {
            command: "/nonexistent/fix-command".to_string(),
            args: Vec::new(),
            timeout: Duration::from_secs(10),
        });
        let rcm = RepoContext::new("/tmp");

        let result = runner.execute_task(&rcm, &test_task()).await;
        assert_eq!(result.encountered_errors.len(), 1);
        assert!(result.encountered_errors[0].contains("failed to spawn"));
    }

    #[tokio::test]
    async fn timeout_kills_the_script() {
        let tmp = tempfile::tempdir().unwrap();
        let runner = script_runner(tmp.path(), "sleep 60", Duration::from_millis(200));
        let rcm = RepoContext::new(tmp.path());

        let result = runner.execute_task(&rcm, &test_task()).await;
        assert_eq!(result.encountered_errors.len(), 1);
        assert!(result.encountered_errors[0].contains("timed out"));
    }

    #[test]
    fn truncate_short_string_unchanged() {
        assert_eq!(truncate_snippet("hello", 10), "hello");
    }

    #[test]
    fn truncate_long_string_with_ellipsis() {
        assert_eq!(truncate_snippet("abcdefghij", 5), "abcde...");
    }
}
