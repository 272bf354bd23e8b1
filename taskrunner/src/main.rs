//! Task runner CLI.
//!
//! Compiles natural-language tasks into validated step plans over the
//! registered tools and executes them inside a workspace directory.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use serde::Serialize;
use taskrunner::agent::TaskAgent;
use taskrunner::core::types::ExecutionResult;
use taskrunner::exit_codes;
use taskrunner::io::config::{Config, load_config, write_config};
use taskrunner::io::plan_store::{load_plan, write_plan};
use taskrunner::logging;

#[derive(Parser)]
#[command(
    name = "taskrunner",
    version,
    about = "Compile tasks into tool plans and execute them"
)]
struct Cli {
    /// Config file; defaults apply when it does not exist.
    #[arg(long, global = true, default_value = "taskrunner.toml")]
    config: PathBuf,
    /// Directory the file tools operate in.
    #[arg(long, global = true, default_value = ".")]
    workspace: PathBuf,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Write a default config file.
    Init {
        /// Overwrite an existing config.
        #[arg(short, long)]
        force: bool,
    },
    /// List registered tools and their parameter schemas.
    Tools,
    /// Compile a task and print the validated plan.
    Plan {
        task: String,
        /// Also write the plan to this file.
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Compile and execute a task.
    Run { task: String },
    /// Schema-check and validate a plan file, printing the corrected plan.
    Validate { plan_file: PathBuf },
    /// Validate and execute a plan file.
    Exec { plan_file: PathBuf },
}

#[tokio::main]
async fn main() {
    logging::init();
    let code = match run(Cli::parse()).await {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{err:#}");
            exit_codes::INVALID
        }
    };
    std::process::exit(code);
}

async fn run(cli: Cli) -> Result<i32> {
    let agent = || -> Result<TaskAgent> {
        let cfg = load_config(&cli.config)?;
        TaskAgent::from_config(&cfg, &cli.workspace)
    };
    match &cli.command {
        Command::Init { force } => cmd_init(&cli.config, *force),
        Command::Tools => {
            print_json(&agent()?.registry().definitions())?;
            Ok(exit_codes::OK)
        }
        Command::Plan { task, out } => {
            let plan = agent()?.generate_plan(task).await.context("compile plan")?;
            if let Some(out) = out {
                write_plan(out, &plan)?;
            }
            print_json(&plan)?;
            Ok(exit_codes::OK)
        }
        Command::Run { task } => {
            let result = agent()?.execute(task).await.context("compile plan")?;
            report(&result)
        }
        Command::Validate { plan_file } => {
            let plan = load_plan(plan_file)?;
            let plan = agent()?
                .validate(plan)
                .with_context(|| format!("validate {}", plan_file.display()))?;
            print_json(&plan)?;
            Ok(exit_codes::OK)
        }
        Command::Exec { plan_file } => {
            let agent = agent()?;
            let plan = load_plan(plan_file)?;
            let plan = agent
                .validate(plan)
                .with_context(|| format!("validate {}", plan_file.display()))?;
            let result = agent.execute_plan(plan).await;
            report(&result)
        }
    }
}

fn cmd_init(path: &Path, force: bool) -> Result<i32> {
    if !force && path.exists() {
        bail!("{} already exists (use --force to overwrite)", path.display());
    }
    write_config(path, &Config::default())?;
    println!("wrote {}", path.display());
    Ok(exit_codes::OK)
}

fn report(result: &ExecutionResult) -> Result<i32> {
    print_json(result)?;
    Ok(if result.success {
        exit_codes::OK
    } else {
        exit_codes::FAILED
    })
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    let payload = serde_json::to_string_pretty(value).context("serialize json")?;
    println!("{payload}");
    Ok(())
}
