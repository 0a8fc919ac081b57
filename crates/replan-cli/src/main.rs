mod config;

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};

use replan_core::manager::{TaskManagerOptions, TraversalLimits};
use replan_core::planner::run_planner;
use replan_core::runner::{RepoContext, ScriptRunner, TaskRunner};
use replan_core::validator::ValidationStep;
use replan_core::{Analyzer, AnalyzerValidator, TaskManager};

use config::ConfigFile;

#[derive(Parser)]
#[command(name = "replan", about = "Reactive code-planner for analyzer-driven migrations")]
struct Cli {
    /// Config file path (defaults to ~/.config/replan/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a starter config file
    Init {
        /// Overwrite an existing config file
        #[arg(long)]
        force: bool,
    },
    /// Run one validator sweep and print every reported defect
    Analyze {
        /// Root of the working copy to analyze
        #[arg(long, default_value = ".")]
        repo: PathBuf,
        /// Label selector override for this run
        #[arg(long)]
        label_selector: Option<String>,
    },
    /// Run the reactive loop: analyze, dispatch fixes, re-analyze
    Resolve {
        /// Root of the working copy to fix
        #[arg(long, default_value = ".")]
        repo: PathBuf,
        /// Label selector override for this run
        #[arg(long)]
        label_selector: Option<String>,
        /// Only work on tasks at this priority number or better
        #[arg(long)]
        max_priority: Option<u32>,
        /// Stop after this many scheduling iterations
        #[arg(long)]
        max_iterations: Option<usize>,
        /// Ignore tasks grafted deeper than this
        #[arg(long)]
        max_depth: Option<u32>,
        /// Retry budget per task
        #[arg(long)]
        max_retries: Option<u32>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config_path = cli.config.clone().unwrap_or_else(config::config_path);
    tracing::debug!(config = %config_path.display(), "using config file");

    match cli.command {
        Commands::Init { force } => {
            if config_path.exists() && !force {
                anyhow::bail!(
                    "config file already exists at {} (use --force to overwrite)",
                    config_path.display()
                );
            }
            config::save_config(&config_path, &config::starter_config())?;
            println!("wrote {}", config_path.display());
            Ok(())
        }

        Commands::Analyze {
            repo,
            label_selector,
        } => {
            let config = config::load_config(&config_path)?;
            let defect_count = analyze(&config, &repo, label_selector.as_deref()).await?;
            if defect_count > 0 {
                std::process::exit(1);
            }
            Ok(())
        }

        Commands::Resolve {
            repo,
            label_selector,
            max_priority,
            max_iterations,
            max_depth,
            max_retries,
        } => {
            let config = config::load_config(&config_path)?;
            let limits = TraversalLimits {
                max_priority,
                max_iterations,
                max_depth,
            };
            let ignored = resolve(
                &config,
                &repo,
                label_selector.as_deref(),
                limits,
                max_retries,
            )
            .await?;
            if ignored > 0 {
                std::process::exit(1);
            }
            Ok(())
        }
    }
}

/// Spawn the analyzer, run one sweep, and print the findings. Returns the
/// defect count.
async fn analyze(
    config: &ConfigFile,
    repo: &std::path::Path,
    label_selector: Option<&str>,
) -> anyhow::Result<usize> {
    let repo = repo
        .canonicalize()
        .with_context(|| format!("repository {} not found", repo.display()))?;

    let analyzer = Analyzer::spawn(&config.analyzer_config(&repo))?;
    let validator = AnalyzerValidator::new(analyzer, config.label_selector(label_selector));

    let result = validator.run().await;
    validator.stop().await;
    let result = result.context("analyzer validation failed")?;

    for defect in &result.errors {
        println!(
            "{}:{} [{}/{}] {}",
            defect.file.display(),
            defect.line,
            defect.ruleset,
            defect.violation,
            defect.message
        );
    }
    println!("{} defect(s) found", result.errors.len());
    Ok(result.errors.len())
}

/// Drive the full reactive loop over `repo`. Returns the number of tasks
/// that ended up on the ignore list.
async fn resolve(
    config: &ConfigFile,
    repo: &std::path::Path,
    label_selector: Option<&str>,
    limits: TraversalLimits,
    max_retries: Option<u32>,
) -> anyhow::Result<usize> {
    let repo = repo
        .canonicalize()
        .with_context(|| format!("repository {} not found", repo.display()))?;

    let analyzer = Analyzer::spawn(&config.analyzer_config(&repo))?;
    let validator = AnalyzerValidator::new(analyzer, config.label_selector(label_selector));
    let runner = ScriptRunner::new(config.runner_config()?);

    let mut options = TaskManagerOptions::default();
    if let Some(max_retries) = max_retries {
        options.max_retries = max_retries;
    }

    let mut manager = TaskManager::new(
        RepoContext::new(&repo),
        Vec::new(),
        vec![Box::new(validator) as Box<dyn ValidationStep>],
        vec![Box::new(runner) as Box<dyn TaskRunner>],
        options,
    );

    let outcome = run_planner(&mut manager, limits).await;
    manager.stop().await;
    let summary = outcome.context("plan aborted")?;

    println!(
        "executed {} task(s): {} resolved, {} ignored",
        summary.executed, summary.processed, summary.ignored
    );
    Ok(summary.ignored)
}
