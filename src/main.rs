// ABOUTME: Entry point for the agentlang binary.
// ABOUTME: Loads a YAML definition file, then validates it or runs one agent or pipeline from it.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use serde_json::Value;

use agentlang_core::{DefinitionRegistry, DefinitionSet};
use agentlang_engine::{Engine, RunOptions, RunResult, TaskInput, builtin, task_input};

#[derive(Debug, Parser)]
#[command(name = "agentlang", version, about = "Run declarative AI agents and pipelines")]
struct Cli {
    /// Log at debug level.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run an agent or pipeline from a definition file.
    Run {
        file: PathBuf,
        target: String,

        /// Task text handed to the target.
        #[arg(long)]
        task: Option<String>,

        /// Task input as a JSON object. `--task` overrides its `task` field.
        #[arg(long)]
        input: Option<String>,

        /// Answer every completion from the mock provider.
        #[arg(long)]
        mock: bool,

        /// Provider calls allowed per agent attempt.
        #[arg(long)]
        max_iterations: Option<u32>,

        /// Print the full run result as JSON.
        #[arg(long)]
        json: bool,
    },
    /// Validate a definition file and list what it defines.
    Check { file: PathBuf },
}

#[tokio::main]
async fn main() -> ExitCode {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    let default_filter = if cli.verbose {
        "agentlang=debug,agentlang_engine=debug,agentlang_core=debug"
    } else {
        "agentlang=info,agentlang_engine=info,agentlang_core=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter)),
        )
        .with_writer(std::io::stderr)
        .init();

    match execute(cli.command).await {
        Ok(code) => code,
        Err(err) => {
            tracing::error!(error = %format!("{err:#}"), "agentlang exiting with error");
            eprintln!("error: {err:#}");
            ExitCode::FAILURE
        }
    }
}

async fn execute(command: Command) -> anyhow::Result<ExitCode> {
    match command {
        Command::Check { file } => {
            let registry = load_registry(&file)?;
            println!("{} is valid", file.display());
            println!("agents:    {}", registry.agent_names().join(", "));
            println!("pipelines: {}", registry.pipeline_names().join(", "));
            println!("tools:     {}", registry.tool_names().join(", "));
            Ok(ExitCode::SUCCESS)
        }
        Command::Run {
            file,
            target,
            task,
            input,
            mock,
            max_iterations,
            json,
        } => {
            let registry = Arc::new(load_registry(&file)?);
            let engine = Engine::new(registry)?;
            let input = build_input(task.as_deref(), input.as_deref())?;

            let mut options = RunOptions::default();
            if mock {
                options = options.mock(true);
            }
            if let Some(cap) = max_iterations {
                options = options.max_iterations(cap);
            }

            tracing::info!(target_name = %target, mock, "agentlang starting run");
            match engine.run(&target, input, &options).await {
                Ok(result) => {
                    print_result(&result, json)?;
                    Ok(ExitCode::SUCCESS)
                }
                Err(err) => {
                    tracing::error!(
                        kind = err.innermost_kind(),
                        attempts = err.attempts(),
                        "run failed"
                    );
                    eprintln!("run failed: {}", err.summary());
                    if let Some(report) = err.report() {
                        eprintln!(
                            "provider calls: {}, tokens: {} prompt / {} completion",
                            report.provider_calls,
                            report.usage.prompt_tokens,
                            report.usage.completion_tokens
                        );
                    }
                    Ok(ExitCode::FAILURE)
                }
            }
        }
    }
}

fn load_registry(path: &Path) -> anyhow::Result<DefinitionRegistry> {
    let source = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let set = DefinitionSet::from_yaml_str(&source)
        .with_context(|| format!("failed to load {}", path.display()))?;
    let registry = builtin::install(DefinitionRegistry::builder(set))
        .build()
        .with_context(|| format!("invalid definitions in {}", path.display()))?;
    tracing::info!(
        file = %path.display(),
        agents = registry.agent_names().len(),
        pipelines = registry.pipeline_names().len(),
        tools = registry.tool_names().len(),
        "definitions loaded"
    );
    Ok(registry)
}

fn build_input(task: Option<&str>, input: Option<&str>) -> anyhow::Result<TaskInput> {
    let mut parsed = match input {
        Some(raw) => {
            let value: Value = serde_json::from_str(raw).context("--input is not valid JSON")?;
            match value {
                Value::Object(map) => map,
                other => bail!("--input must be a JSON object, got {other}"),
            }
        }
        None => TaskInput::new(),
    };
    if let Some(task) = task {
        parsed.extend(task_input(task));
    }
    Ok(parsed)
}

fn print_result(result: &RunResult, json: bool) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(result)?);
        return Ok(());
    }

    println!("{}", result.output_text());
    eprintln!(
        "{} '{}' finished: {} provider call(s), {} tokens, {}ms",
        result.kind,
        result.target,
        result.provider_calls,
        result.usage.total(),
        result.duration().num_milliseconds()
    );
    Ok(())
}
