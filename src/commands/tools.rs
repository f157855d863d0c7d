use anyhow::{Context, Result};
use tokio::io::BufReader;
use tracing::{info, warn};

use agent_sandbox::config::SandboxConfig;
use agent_sandbox::sandbox::CancelToken;
use agent_sandbox::tools::{ExecutionContext, SandboxTools, ToolDefaults};

/// Exit code used when a second Ctrl-C aborts cleanup.
const ABORT_EXIT_CODE: i32 = 130;

/// Serves JSON-lines tool calls on stdin until EOF or Ctrl-C.
///
/// Responses go to stdout, one per request line. Ctrl-C interrupts the call
/// in progress; sessions opened here are destroyed before returning.
pub async fn run(config: &SandboxConfig, ctx: ExecutionContext) -> Result<()> {
    let manager = super::connect(config).await?;
    let sweeper = manager.spawn_idle_sweeper(config.idle_timeout(), config.cleanup_interval());

    let cancel = CancelToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupted, shutting down");
            on_signal.cancel();
        }
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted again, exiting without cleanup");
            std::process::exit(ABORT_EXIT_CODE);
        }
    });

    let workflow_run_id = ctx.workflow_run_id.clone();
    let tools = SandboxTools::new(
        std::sync::Arc::clone(&manager),
        ctx,
        ToolDefaults::from_config(config),
    )
    .with_cancel(cancel);
    info!(
        "Serving sandbox tools for {}",
        tools.context().session_key(None)
    );

    let served = tools
        .serve(BufReader::new(tokio::io::stdin()), tokio::io::stdout())
        .await
        .context("Failed to serve tool calls");

    sweeper.shutdown().await;
    if !workflow_run_id.is_empty() {
        if let Err(e) = manager.cleanup_workflow(&workflow_run_id).await {
            warn!("Workflow cleanup failed: {}", e);
        }
    }
    manager
        .close()
        .await
        .context("Failed to close sandbox sessions")?;
    served
}
