//! Analyzer child-process supervisor.
//!
//! Owns the long-lived analyzer server: spawns it with its fixed argument
//! vector, drains its stderr into the log, and speaks JSON-RPC over its
//! stdin/stdout through [`replan_rpc::RpcClient`]. If the child dies while a
//! request is in flight that request fails with a transport error; the
//! supervisor does not restart the child.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use serde_json::{Value, json};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStderr, Command};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use replan_rpc::{BareJsonReader, BareJsonWriter, RpcClient, RpcClientConfig, RpcError};

/// How long to wait for the child after SIGTERM before resorting to SIGKILL.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Everything needed to launch the analyzer server. All paths are absolute.
#[derive(Debug, Clone)]
pub struct AnalyzerConfig {
    /// The analyzer JSON-RPC server binary.
    pub server_binary: PathBuf,
    /// Root of the working copy to analyze.
    pub repo_directory: PathBuf,
    /// Directory holding the migration rulesets.
    pub rules_directory: PathBuf,
    /// Language-server binary the analyzer delegates to.
    pub lsp_server_path: PathBuf,
    /// Java bundles for the language server.
    pub java_bundle_path: PathBuf,
    /// Optional open-source dependency label file.
    pub dep_open_source_labels: Option<PathBuf>,
    /// Where the analyzer writes its own log.
    pub log_file: PathBuf,
    /// Per-request timeout for `analyze` calls.
    pub request_timeout: Duration,
}

impl AnalyzerConfig {
    pub fn new(
        server_binary: impl Into<PathBuf>,
        repo_directory: impl Into<PathBuf>,
        rules_directory: impl Into<PathBuf>,
        lsp_server_path: impl Into<PathBuf>,
        java_bundle_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            server_binary: server_binary.into(),
            repo_directory: repo_directory.into(),
            rules_directory: rules_directory.into(),
            lsp_server_path: lsp_server_path.into(),
            java_bundle_path: java_bundle_path.into(),
            dep_open_source_labels: None,
            log_file: PathBuf::from("./kai-analyzer.log"),
            request_timeout: replan_rpc::DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

/// A running analyzer server.
pub struct Analyzer {
    rpc: RpcClient,
    child: Mutex<Option<Child>>,
    stderr_task: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for Analyzer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Analyzer").field("rpc", &self.rpc).finish_non_exhaustive()
    }
}

impl Analyzer {
    /// Spawn the analyzer server and connect the RPC client to its stdio.
    pub fn spawn(config: &AnalyzerConfig) -> Result<Self> {
        let mut cmd = Command::new(&config.server_binary);
        cmd.arg("-source-directory")
            .arg(&config.repo_directory)
            .arg("-rules-directory")
            .arg(&config.rules_directory)
            .arg("-lspServerPath")
            .arg(&config.lsp_server_path)
            .arg("-bundles")
            .arg(&config.java_bundle_path)
            .arg("-log-file")
            .arg(&config.log_file);
        if let Some(labels) = &config.dep_open_source_labels {
            cmd.arg("-depOpenSourceLabelsFile").arg(labels);
        }

        cmd.stdin(std::process::Stdio::piped());
        cmd.stdout(std::process::Stdio::piped());
        cmd.stderr(std::process::Stdio::piped());
        cmd.kill_on_drop(true);

        let mut child = cmd.spawn().with_context(|| {
            format!(
                "failed to spawn analyzer server at '{}'",
                config.server_binary.display()
            )
        })?;

        let stdin = child.stdin.take().context("analyzer child has no stdin")?;
        let stdout = child.stdout.take().context("analyzer child has no stdout")?;
        let stderr = child.stderr.take().context("analyzer child has no stderr")?;

        let stderr_task = tokio::spawn(drain_stderr(stderr));

        let rpc = RpcClient::start(
            Box::new(BareJsonReader::new(stdout)),
            Box::new(BareJsonWriter::new(stdin)),
            RpcClientConfig {
                request_timeout: config.request_timeout,
            },
        );

        info!(binary = %config.server_binary.display(), "analyzer server started");

        Ok(Self {
            rpc,
            child: Mutex::new(Some(child)),
            stderr_task: Mutex::new(Some(stderr_task)),
        })
    }

    /// Run one analysis pass. Returns the raw `result` payload; the
    /// validator layer normalises it.
    pub async fn analyze(
        &self,
        label_selector: &str,
        included_paths: &[String],
        incident_selector: &str,
    ) -> Result<Value, RpcError> {
        // The server expects a one-element positional params array carrying
        // the three selectors as named entries.
        let params = json!([{
            "label_selector": label_selector,
            "included_paths": included_paths,
            "incident_selector": incident_selector,
        }]);

        debug!(label_selector, "sending analyze request");
        self.rpc
            .send_request("analysis_engine.Analyze", Some(params))
            .await
    }

    /// Stop the analyzer: shut down the RPC client, terminate the child
    /// (SIGTERM, bounded wait, SIGKILL), and join the stderr drain.
    /// Idempotent.
    pub async fn stop(&self) {
        self.rpc.stop().await;

        if let Some(mut child) = self.child.lock().await.take() {
            #[cfg(unix)]
            if let Some(pid) = child.id() {
                // SAFETY: pid belongs to a child we spawned and still own.
                let ret = unsafe { libc::kill(pid as i32, libc::SIGTERM) };
                if ret != 0 {
                    warn!(pid, "SIGTERM failed, will force kill");
                }
            }

            match tokio::time::timeout(SHUTDOWN_GRACE, child.wait()).await {
                Ok(Ok(status)) => {
                    debug!(%status, "analyzer server exited");
                }
                _ => {
                    warn!("analyzer server did not exit after SIGTERM, killing");
                    let _ = child.kill().await;
                }
            }
        }

        // The drain ends on its own once the child's stderr hits EOF.
        if let Some(task) = self.stderr_task.lock().await.take() {
            let _ = task.await;
        }
    }
}

/// Forward analyzer stderr to the log line-by-line until EOF.
async fn drain_stderr(stderr: ChildStderr) {
    let mut lines = BufReader::new(stderr).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        info!(target: "analyzer_rpc", "{line}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    /// Write a fake analyzer server script and return a config pointing at
    /// it. The script answers the first request with `result_json`.
    fn fake_analyzer(dir: &Path, result_json: &str) -> AnalyzerConfig {
        let script = dir.join("fake_analyzer.sh");
        std::fs::write(
            &script,
            format!(
                "#!/bin/sh\n\
                 echo 'analyzer starting' >&2\n\
                 read _request\n\
                 echo '{{\"jsonrpc\":\"2.0\",\"id\":1,\"result\":{result_json}}}'\n\
                 read _eof\n"
            ),
        )
        .unwrap();

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();
        }

        let mut config = AnalyzerConfig::new(
            &script,
            dir.join("repo"),
            dir.join("rules"),
            dir.join("lsp"),
            dir.join("bundles.jar"),
        );
        config.log_file = dir.join("analyzer.log");
        config
    }

    #[tokio::test]
    async fn analyze_round_trips_through_the_child() {
        let tmp = tempfile::tempdir().unwrap();
        let config = fake_analyzer(tmp.path(), r#"{"Rulesets":[]}"#);

        let analyzer = Analyzer::spawn(&config).unwrap();
        let result = analyzer
            .analyze("konveyor.io/target=quarkus", &[], "")
            .await
            .unwrap();
        assert_eq!(result, serde_json::json!({"Rulesets": []}));

        analyzer.stop().await;
    }

    #[tokio::test]
    async fn child_exit_fails_in_flight_requests_with_transport() {
        let tmp = tempfile::tempdir().unwrap();
        // A server that swallows the request and dies without answering.
        let script = tmp.path().join("dying_analyzer.sh");
        std::fs::write(&script, "#!/bin/sh\nread _request\nexit 1\n").unwrap();
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();
        }

        let mut config = AnalyzerConfig::new(
            &script,
            tmp.path().join("repo"),
            tmp.path().join("rules"),
            tmp.path().join("lsp"),
            tmp.path().join("bundles.jar"),
        );
        config.log_file = tmp.path().join("analyzer.log");

        let analyzer = Analyzer::spawn(&config).unwrap();
        let err = analyzer.analyze("any", &[], "").await.unwrap_err();
        assert!(matches!(err, RpcError::Transport(_)), "got {err:?}");

        analyzer.stop().await;
    }

    #[tokio::test]
    async fn spawn_missing_binary_returns_error() {
        let config = AnalyzerConfig::new(
            "/nonexistent/path/to/analyzer",
            "/repo",
            "/rules",
            "/lsp",
            "/bundles.jar",
        );
        let result = Analyzer::spawn(&config);
        assert!(result.is_err());
        let message = format!("{:#}", result.unwrap_err());
        assert!(message.contains("failed to spawn analyzer server"), "{message}");
    }

    #[tokio::test]
    async fn stop_is_idempotent() {
        let tmp = tempfile::tempdir().unwrap();
        let config = fake_analyzer(tmp.path(), r#"{"Rulesets":[]}"#);

        let analyzer = Analyzer::spawn(&config).unwrap();
        analyzer.stop().await;
        analyzer.stop().await;
    }

    #[tokio::test]
    async fn requests_after_stop_fail_with_cancelled() {
        let tmp = tempfile::tempdir().unwrap();
        let config = fake_analyzer(tmp.path(), r#"{"Rulesets":[]}"#);

        let analyzer = Analyzer::spawn(&config).unwrap();
        analyzer.stop().await;

        let err = analyzer.analyze("any", &[], "").await.unwrap_err();
        assert!(matches!(err, RpcError::Cancelled), "got {err:?}");
    }
}
