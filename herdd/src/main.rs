//! Herd - operator CLI
//!
//! Loads `herd.toml`, wires the orchestrator and runs one request: list
//! projects, build, hot-update, deploy, switch a branch or check the
//! remote session. Ctrl-C stops any running build and pending upload.

#![forbid(unsafe_code)]

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use herd_common::config::{DEFAULT_CONFIG_FILE, EnvParser};
use herd_common::{BuildTarget, Diagnosis, LogConfig, Outcome, init_logging, load_config};
use herdd::{Components, Orchestrator, TracingSink};
use serde::Serialize;
use std::future::Future;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "herdd")]
#[command(author, version, about = "Herd - build orchestration and deployment")]
struct Cli {
    /// Path to the configuration file
    #[arg(short, long, env = "HERD_CONFIG", default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,

    /// Print results as JSON
    #[arg(long)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List configured projects
    Projects,

    /// Run a player build
    Build {
        project: String,
        /// Windows, Windows64, Linux, Mac, WindowsServer, LinuxServer, Android or iOS
        target: BuildTarget,
    },

    /// Run a hot-update build followed by the project's deployment chain
    HotUpdate { project: String, target: BuildTarget },

    /// Run the project's deployment chain only
    Deploy { project: String },

    /// Change the branch a project builds from
    SwitchBranch { project: String, branch: String },

    /// Log in to the configured remote host and out again
    SessionCheck,
}

#[derive(Serialize)]
struct ProjectRow {
    name: String,
    tool_version: String,
    source_control: String,
    branch: Option<String>,
    deployment_actions: usize,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let mut config = load_config(&cli.config)
        .with_context(|| format!("failed to load {}", cli.config.display()))?;
    config.apply_env(&mut EnvParser::new())?;

    let level = if cli.verbose {
        "debug".to_string()
    } else {
        config.general.log_level.clone()
    };
    let _log_guards = init_logging(&LogConfig::from_env(&level).with_level(level).with_stderr())
        .context("failed to initialize logging")?;

    for warning in config.validate() {
        warn!("Config: {}", warning);
    }

    let sink = Arc::new(TracingSink::from_config(&config.notifications));
    let orchestrator = Orchestrator::new(&config, Components::system(sink))?;
    info!(
        "Loaded {} project(s) from {}",
        orchestrator.registry.project_names().len(),
        cli.config.display()
    );

    let outcome = match cli.command {
        Commands::Projects => {
            let rows: Vec<ProjectRow> = orchestrator
                .registry
                .projects()
                .into_iter()
                .map(|p| ProjectRow {
                    source_control: p.source_control.to_string(),
                    deployment_actions: p.deployment.len(),
                    name: p.name,
                    tool_version: p.tool_version,
                    branch: p.branch,
                })
                .collect();
            print_projects(&rows, cli.json)?;
            return Ok(ExitCode::SUCCESS);
        }
        Commands::Build { project, target } => {
            until_interrupted(&orchestrator, orchestrator.builds.request_build(&project, target))
                .await
        }
        Commands::HotUpdate { project, target } => {
            until_interrupted(
                &orchestrator,
                orchestrator.builds.request_hot_update_build(&project, target),
            )
            .await
        }
        Commands::Deploy { project } => {
            until_interrupted(&orchestrator, orchestrator.builds.request_deployment(&project)).await
        }
        Commands::SwitchBranch { project, branch } => {
            orchestrator.builds.switch_branch(&project, &branch)
        }
        Commands::SessionCheck => match &orchestrator.session {
            Some(session) => {
                let login = session.login().await;
                if login.success {
                    session.logout().await;
                }
                login
            }
            None => Outcome::fail(
                herd_common::ErrorKind::SessionConnectFailed,
                "No remote session is configured.",
            ),
        },
    };

    orchestrator.shutdown().await;
    print_outcome(&outcome, cli.json)?;
    Ok(if outcome.success {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

/// Run `request`, shutting the orchestrator down on Ctrl-C so the request
/// can finish with its processes killed.
async fn until_interrupted(
    orchestrator: &Orchestrator,
    request: impl Future<Output = Outcome>,
) -> Outcome {
    tokio::pin!(request);
    tokio::select! {
        outcome = &mut request => outcome,
        _ = tokio::signal::ctrl_c() => {
            warn!("Interrupted; stopping running work");
            orchestrator.shutdown().await;
            request.await
        }
    }
}

/// JSON form of an outcome; failures carry their catalog details.
#[derive(Serialize)]
struct OutcomeReport<'a> {
    #[serde(flatten)]
    outcome: &'a Outcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    diagnosis: Option<Diagnosis>,
}

fn print_outcome(outcome: &Outcome, json: bool) -> Result<()> {
    let diagnosis = outcome.diagnosis();
    if json {
        let report = OutcomeReport { outcome, diagnosis };
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("{outcome}");
        if let Some(diagnosis) = diagnosis {
            println!("  hint: {diagnosis}");
        }
    }
    Ok(())
}

fn print_projects(rows: &[ProjectRow], json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(rows)?);
        return Ok(());
    }
    for row in rows {
        println!(
            "{:<20} tool {:<14} {:<5} branch {:<16} {} action(s)",
            row.name,
            row.tool_version,
            row.source_control,
            row.branch.as_deref().unwrap_or("-"),
            row.deployment_actions
        );
    }
    Ok(())
}
