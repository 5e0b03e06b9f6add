mod config;
mod executor;
mod llm;
mod plan;
mod planner;
mod runlog;
mod sandbox;
mod validator;

use anyhow::{anyhow, bail, Result};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::config::Config;
use crate::executor::execute;
use crate::llm::LlmClient;
use crate::runlog::RunStore;
use crate::sandbox::Sandbox;
use crate::validator::validate;

fn print_help() {
    println!(
        "\
planwright v{}

A local agent that plans, validates, and executes file operations
inside a sandbox directory.

USAGE:
    planwright [OPTIONS] [CONFIG_PATH]

ARGUMENTS:
    CONFIG_PATH    Path to TOML configuration file [default: config/agent.toml]

OPTIONS:
    --prompt <TEXT>    One-shot natural language request
    --plan <FILE>      Execute a JSON plan file (skips the planner)
    --dry              Stop after validation
    --chat             Start interactive chat mode
    -h, --help         Print this help message and exit
    -V, --version      Print version and exit

ENVIRONMENT VARIABLES:
    Variables are referenced in the config file via ${{VAR_NAME}} syntax.

    RUST_LOG              Log level filter for tracing
                          (e.g. debug, planwright=debug,warn)
    ANTHROPIC_API_KEY     API key for Anthropic Claude models
                          (only with [llm] provider = \"anthropic\")

EXAMPLES:
    planwright --chat                             # talk to the agent
    planwright --prompt \"create notes/todo.txt\"   # one-shot request
    planwright --plan plan.json --dry             # validate a plan file
    RUST_LOG=debug planwright --chat              # with debug logging",
        env!("CARGO_PKG_VERSION"),
    );
}

/// Parsed command line.
struct CliArgs {
    prompt: Option<String>,
    plan_file: Option<String>,
    dry: bool,
    chat: bool,
    config_path: String,
}

fn parse_args() -> Result<CliArgs> {
    let mut parsed = CliArgs {
        prompt: None,
        plan_file: None,
        dry: false,
        chat: false,
        config_path: "config/agent.toml".to_string(),
    };

    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--version" | "-V" => {
                println!("planwright v{}", env!("CARGO_PKG_VERSION"));
                std::process::exit(0);
            }
            "--help" | "-h" => {
                print_help();
                std::process::exit(0);
            }
            "--prompt" => {
                parsed.prompt = Some(args.next().ok_or_else(|| anyhow!("--prompt needs a value"))?);
            }
            "--plan" => {
                parsed.plan_file =
                    Some(args.next().ok_or_else(|| anyhow!("--plan needs a value"))?);
            }
            "--dry" => parsed.dry = true,
            "--chat" => parsed.chat = true,
            other if other.starts_with('-') => bail!("unknown option: {other}"),
            other => parsed.config_path = other.to_string(),
        }
    }
    Ok(parsed)
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging (RUST_LOG=debug for debug mode)
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("planwright=info")),
        )
        .init();

    let args = parse_args()?;

    info!("Loading configuration from {}", args.config_path);
    let config = Config::load_or_default(&args.config_path)?;

    let sandbox = Sandbox::open(&config.workspace.sandbox_dir)?;
    let store = RunStore::open(&config.workspace.runs_dir)?;

    info!("Sandbox root: {}", sandbox.root().display());

    if args.chat {
        let planner = llm::client_from_config(&config.llm)?;
        info!("Planner: {}", planner.description());
        return chat_loop(planner.as_ref(), &sandbox, &store).await;
    }

    // One-shot: obtain a raw plan value from the planner or a file
    let raw: Value = if let Some(prompt) = &args.prompt {
        let planner = llm::client_from_config(&config.llm)?;
        info!("Planner: {}", planner.description());
        println!("Planning…");
        planner::plan_from_prompt(planner.as_ref(), prompt).await?
    } else if let Some(path) = &args.plan_file {
        serde_json::from_str(&std::fs::read_to_string(path)?)?
    } else {
        bail!("please provide --prompt, --plan, or --chat (see --help)");
    };

    println!("--- PLAN ---");
    println!("{}", serde_json::to_string_pretty(&raw)?);

    let plan = match validate(&raw, &sandbox) {
        Ok(plan) => plan,
        Err(e) => {
            eprintln!("Plan rejected: {e}");
            std::process::exit(1);
        }
    };
    println!("Validation passed");

    if args.dry {
        println!("Dry run — not executing.");
        return Ok(());
    }

    let result = execute(&plan, &sandbox)?;
    let log_path = store.record(&plan, &result)?;

    report(&result);
    println!("Logs at {}", log_path.display());
    println!("Final artifact: {}", result.artifact.display());
    Ok(())
}

/// Continuous natural-language conversation: plan → validate → execute.
async fn chat_loop(planner: &dyn LlmClient, sandbox: &Sandbox, store: &RunStore) -> Result<()> {
    println!(
        "planwright v{} — type a request, or 'exit' to quit.",
        env!("CARGO_PKG_VERSION")
    );
    println!("Sandbox: {}\n", sandbox.root().display());

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("You> ");
        use std::io::Write;
        std::io::stdout().flush()?;

        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = tokio::signal::ctrl_c() => {
                println!("\nBye!");
                return Ok(());
            }
        };
        let Some(line) = line else {
            // stdin closed
            return Ok(());
        };
        let request = line.trim();
        if request.is_empty() {
            continue;
        }
        if matches!(request.to_lowercase().as_str(), "exit" | "quit") {
            println!("Bye!");
            return Ok(());
        }

        if let Err(e) = run_request(planner, sandbox, store, request).await {
            warn!("Request failed: {e}");
            println!("Error: {e}\n");
        }
    }
}

/// One chat turn: plan, validate, execute, record.
async fn run_request(
    planner: &dyn LlmClient,
    sandbox: &Sandbox,
    store: &RunStore,
    request: &str,
) -> Result<()> {
    println!("Thinking…");
    let raw = planner::plan_from_prompt(planner, request).await?;

    println!("--- PLAN ---");
    println!("{}", serde_json::to_string_pretty(&raw)?);

    let plan = match validate(&raw, sandbox) {
        Ok(plan) => plan,
        Err(e) => {
            println!("Plan rejected: {e}\n");
            return Ok(());
        }
    };
    println!("Validation passed");

    let result = execute(&plan, sandbox)?;
    store.record(&plan, &result)?;

    report(&result);
    println!("Done. Artifact: {}\n", result.artifact.display());
    Ok(())
}

/// Prints a one-line summary per step.
fn report(result: &executor::ExecutionResult) {
    for entry in &result.entries {
        let status = if entry.ok { "ok" } else { "FAILED" };
        println!("  step {} {:<12} {}", entry.step, entry.skill.name(), status);
    }
    let failed = result.entries.iter().filter(|e| !e.ok).count();
    if failed > 0 {
        println!("{} of {} steps failed", failed, result.entries.len());
    }
}
