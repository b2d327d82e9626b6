//! Command-line front door.
//!
//! Constructs and injects the registry, backend and orchestrator; the
//! library itself never touches process-global state.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use serde_json::Value as JsonValue;
use tracing_subscriber::EnvFilter;

use crate::config::WorkflowLoader;
use crate::engine::{Conclusion, LocalBackend, Orchestrator, RunOptions};
use crate::error::Error;
use crate::registry::{InMemoryRegistry, NodeRegistry};

#[derive(Parser)]
#[command(
    name = "windlass",
    version,
    about = "Turn declarative YAML workflows into validated, dependency-ordered execution plans"
)]
pub struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Command {
    /// Parse and validate a workflow file without executing it
    Validate {
        /// Workflow document
        file: PathBuf,
    },
    /// Validate and execute a workflow file against the local backend
    Run {
        /// Workflow document
        file: PathBuf,
        /// Override or add a workflow var (repeatable)
        #[arg(long = "var", value_name = "KEY=VALUE")]
        vars: Vec<String>,
    },
    /// List the registered nodes and their parameters
    Nodes,
}

pub async fn run() -> Result<i32> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let registry = InMemoryRegistry::builtin();

    match cli.command {
        Command::Validate { file } => {
            let loader = WorkflowLoader::new(&registry);
            match loader.load_file(&file) {
                Ok(parsed) => {
                    println!(
                        "workflow '{}' is valid ({} job(s))",
                        parsed.workflow.name,
                        parsed.workflow.jobs.len()
                    );
                    Ok(0)
                }
                Err(err) => {
                    report(&err);
                    Ok(1)
                }
            }
        }
        Command::Run { file, vars } => {
            let loader = WorkflowLoader::new(&registry);
            let parsed = match loader.load_file(&file) {
                Ok(parsed) => parsed,
                Err(err) => {
                    report(&err);
                    return Ok(1);
                }
            };

            let options = RunOptions {
                vars: parse_vars(&vars)?,
                ..RunOptions::default()
            };
            let orchestrator = Orchestrator::with_backend(Arc::new(LocalBackend::new()), options);
            match orchestrator.run(&parsed.workflow).await {
                Ok(snapshot) => {
                    for (name, job) in &snapshot.jobs {
                        let conclusion = match job.conclusion {
                            Some(Conclusion::Success) => "success",
                            Some(Conclusion::Failure) => "failure",
                            Some(Conclusion::Skipped) => "skipped",
                            Some(Conclusion::Cancelled) => "cancelled",
                            None => "not run",
                        };
                        println!("{name}: {conclusion}");
                    }
                    println!("workflow '{}' succeeded", snapshot.name);
                    Ok(0)
                }
                Err(err) => {
                    report(&err);
                    Ok(1)
                }
            }
        }
        Command::Nodes => {
            for id in registry.list() {
                let spec = registry
                    .get(&id)
                    .with_context(|| format!("listed node '{id}' disappeared"))?;
                println!("{id}");
                for param in &spec.params {
                    let marker = if param.required { "required" } else { "optional" };
                    println!("  {} ({marker}) - {}", param.name, param.description);
                }
            }
            Ok(0)
        }
    }
}

fn init_tracing(verbose: u8) {
    let default = match verbose {
        0 => "windlass=info",
        1 => "windlass=debug",
        _ => "windlass=trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Errors render as their taxonomy class plus detail; validation reports
/// include every field-level entry.
fn report(err: &Error) {
    eprintln!("error[{}]: {err}", err.class().as_str());
}

fn parse_vars(pairs: &[String]) -> Result<indexmap::IndexMap<String, JsonValue>> {
    let mut vars = indexmap::IndexMap::new();
    for pair in pairs {
        let (key, value) = pair
            .split_once('=')
            .ok_or_else(|| anyhow!("--var '{pair}' is not of the form KEY=VALUE"))?;
        vars.insert(key.to_string(), JsonValue::String(value.to_string()));
    }
    Ok(vars)
}
