use std::path::{Path, PathBuf};

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::{fmt, prelude::*, EnvFilter, Layer, Registry};

use agent_sandbox::tools::ExecutionContext;

mod commands;

#[derive(Parser)]
#[command(name = "agent-sandbox")]
#[command(
    author,
    version,
    about = "Persistent Docker sandboxes for AI agent command execution"
)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    log_json: bool,

    /// Write logs to daily files in this directory instead of stderr
    #[arg(long, global = true, env = "AGENT_SANDBOX_LOG_DIR")]
    log_dir: Option<PathBuf>,

    /// Config file (default: ./agent-sandbox.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Run even when sandbox.enabled is false
    #[arg(long, global = true)]
    force_enable: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Check the Docker engine and show the effective configuration
    Doctor,

    /// Run one command in a throwaway sandbox
    Run {
        /// Image or runtime alias (python, node, bash)
        #[arg(short, long)]
        image: Option<String>,

        /// Allow network access
        #[arg(long)]
        network: bool,

        /// Timeout in seconds
        #[arg(short, long)]
        timeout: Option<u64>,

        /// Command and arguments
        #[arg(trailing_var_arg = true, required = true, num_args = 1..)]
        cmd: Vec<String>,
    },

    /// Serve sandbox tool calls as JSON lines on stdin/stdout
    Tools {
        /// Workflow run the sandbox belongs to
        #[arg(long, env = "SANDBOX_WORKFLOW_RUN_ID", default_value = "")]
        workflow_run: String,

        /// Agent run, used when there is no workflow run
        #[arg(long, env = "SANDBOX_AGENT_RUN_ID", default_value = "")]
        agent_run: String,

        /// Named sandbox slot
        #[arg(long, default_value = "")]
        session_name: String,
    },

    /// Print tool names, descriptions, and input schemas as JSON
    ListTools,

    /// Remove sandbox containers and workspaces left by earlier runs
    Clean,
}

fn init_logging(verbose: bool, json: bool, log_dir: Option<&Path>) -> Option<WorkerGuard> {
    let filter = if verbose {
        EnvFilter::new("agent_sandbox=debug")
    } else {
        EnvFilter::new("agent_sandbox=info")
    };

    // stdout carries command and tool output, so logs never go there.
    let (writer, guard) = match log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "agent-sandbox.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (BoxMakeWriter::new(writer), Some(guard))
        }
        None => (BoxMakeWriter::new(std::io::stderr), None),
    };

    let layer = fmt::layer().with_writer(writer);
    let layer: Box<dyn Layer<Registry> + Send + Sync> = if json {
        layer.json().boxed()
    } else {
        layer.boxed()
    };

    tracing_subscriber::registry().with(layer).with(filter).init();
    guard
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let guard = init_logging(cli.verbose, cli.log_json, cli.log_dir.as_deref());

    let config = commands::load_config(cli.config.as_deref())?;
    let sandbox = &config.sandbox;

    match cli.command {
        Commands::Doctor => {
            commands::doctor::run(sandbox).await?;
        }
        Commands::Run {
            image,
            network,
            timeout,
            cmd,
        } => {
            commands::ensure_enabled(sandbox, cli.force_enable)?;
            let code = commands::run::run(
                sandbox,
                commands::run::RunOptions {
                    image,
                    network,
                    timeout_secs: timeout,
                    cmd,
                },
            )
            .await?;
            if code != 0 {
                drop(guard);
                std::process::exit(code);
            }
        }
        Commands::Tools {
            workflow_run,
            agent_run,
            session_name,
        } => {
            commands::ensure_enabled(sandbox, cli.force_enable)?;
            let ctx = ExecutionContext {
                workflow_run_id: workflow_run,
                agent_run_id: agent_run,
                session_name,
            };
            commands::tools::run(sandbox, ctx).await?;
        }
        Commands::ListTools => {
            commands::list_tools::run(sandbox)?;
        }
        Commands::Clean => {
            commands::ensure_enabled(sandbox, cli.force_enable)?;
            commands::clean::run(sandbox).await?;
        }
    }

    Ok(())
}
