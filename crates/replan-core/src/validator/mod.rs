//! Validation steps: components that inspect the working copy and report
//! defects.
//!
//! [`AnalyzerValidator`] is the analyzer-backed step: it runs one analysis
//! pass through the supervisor and normalises the raw ruleset payload into
//! [`Defect`]s with file/line/rule provenance.

use std::path::PathBuf;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, info};

use replan_rpc::RpcError;

use crate::analyzer::Analyzer;
use crate::task::{Defect, DefectKind, ValidationResult};

/// A failed validator sweep. Aborts the current traversal step; the caller
/// decides whether to retry or stop.
#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    #[error("analyzer rpc failed: {0}")]
    Rpc(#[from] RpcError),

    #[error("analyzer returned no result")]
    EmptyResult,
}

/// One validation step. Implementations must be safe to run repeatedly;
/// the manager re-runs every step after each executed task.
#[async_trait]
pub trait ValidationStep: Send + Sync {
    async fn run(&self) -> Result<ValidationResult, ValidationError>;

    /// Release any resources the step holds. Default: nothing to do.
    async fn stop(&self) {}
}

// Steps are stored as `Box<dyn ValidationStep>` by the manager.
const _: () = {
    fn _assert_object_safe(_: &dyn ValidationStep) {}
};

/// Validator backed by the analyzer supervisor.
pub struct AnalyzerValidator {
    analyzer: Analyzer,
    label_selector: String,
}

impl AnalyzerValidator {
    pub fn new(analyzer: Analyzer, label_selector: impl Into<String>) -> Self {
        Self {
            analyzer,
            label_selector: label_selector.into(),
        }
    }
}

#[async_trait]
impl ValidationStep for AnalyzerValidator {
    async fn run(&self) -> Result<ValidationResult, ValidationError> {
        debug!("running analyzer validation");

        let output = self.analyzer.analyze(&self.label_selector, &[], "").await?;
        if output.is_null() {
            return Err(ValidationError::EmptyResult);
        }

        let errors = parse_analyzer_output(&output);
        Ok(ValidationResult::from_errors(errors))
    }

    async fn stop(&self) {
        self.analyzer.stop().await;
    }
}

/// Walk `Rulesets` -> violations -> incidents and emit one defect per
/// incident. A missing or non-array `Rulesets` means the analysis found
/// nothing, which is success.
fn parse_analyzer_output(output: &Value) -> Vec<Defect> {
    let Some(rulesets) = output.get("Rulesets").and_then(Value::as_array) else {
        info!("parsed zero results from analyzer");
        return Vec::new();
    };

    let mut defects = Vec::new();
    for ruleset in rulesets {
        let ruleset_name = ruleset
            .get("name")
            .and_then(Value::as_str)
            .unwrap_or_default();

        let Some(violations) = ruleset.get("violations").and_then(Value::as_object) else {
            continue;
        };

        for (violation_id, violation) in violations {
            let Some(incidents) = violation.get("incidents").and_then(Value::as_array) else {
                continue;
            };

            for incident in incidents {
                let uri = incident
                    .get("uri")
                    .and_then(Value::as_str)
                    .unwrap_or_default();
                let line = incident
                    .get("lineNumber")
                    .or_else(|| incident.get("line_number"))
                    .and_then(Value::as_i64)
                    .unwrap_or(-1);
                let message = incident
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();

                let kind = if uri.contains("pom.xml") {
                    DefectKind::DependencyRuleViolation
                } else {
                    DefectKind::RuleViolation
                };

                defects.push(Defect {
                    kind,
                    file: uri_to_path(uri),
                    line,
                    column: -1,
                    message,
                    ruleset: ruleset_name.to_string(),
                    violation: violation_id.clone(),
                });
            }
        }
    }

    defects
}

/// Extract the path component of an incident URI.
///
/// The analyzer emits `file://` URIs whose paths are repo-absolute; the
/// single leading slash is stripped so defects carry repo-relative paths.
/// Paths under foreign schemes are kept absolute.
fn uri_to_path(uri: &str) -> PathBuf {
    match uri.split_once("://") {
        Some(("file", rest)) => PathBuf::from(rest.strip_prefix('/').unwrap_or(rest)),
        Some((_, rest)) => match rest.find('/') {
            Some(slash) => PathBuf::from(&rest[slash..]),
            None => PathBuf::from(rest),
        },
        None => PathBuf::from(uri),
    }
}
