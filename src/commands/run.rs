use std::sync::Arc;

use anyhow::{Context, Result};
use colored::Colorize;
use tracing::{info, warn};

use agent_sandbox::config::SandboxConfig;
use agent_sandbox::sandbox::{
    new_session_id, runtime_to_image, CancelToken, ExecRequest, ExecResult, SessionKey,
    SessionManager, SessionOptions, DEFAULT_SLOT,
};
use agent_sandbox::tools::passthrough_env;

/// Exit code reported when the command was interrupted.
const INTERRUPTED_EXIT_CODE: i32 = 130;

/// Options for a one-shot sandboxed command.
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub image: Option<String>,
    pub network: bool,
    pub timeout_secs: Option<u64>,
    pub cmd: Vec<String>,
}

/// Runs one command in a throwaway sandbox and returns its exit code.
pub async fn run(config: &SandboxConfig, opts: RunOptions) -> Result<i32> {
    let manager = super::connect(config).await?;

    let cancel = CancelToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_signal.cancel();
        }
    });

    let outcome = execute(&manager, opts, &cancel).await;
    if let Err(e) = manager.close().await {
        warn!("Failed to clean up sandbox: {}", e);
    }
    let result = outcome?;

    print!("{}", result.stdout);
    eprint!("{}", result.stderr);
    if result.truncated {
        eprintln!("{} output was truncated", "⚠".yellow());
    }
    if result.timed_out {
        eprintln!("{} command timed out", "⚠".yellow());
    }
    Ok(exit_status(&result))
}

async fn execute(
    manager: &Arc<SessionManager>,
    opts: RunOptions,
    cancel: &CancelToken,
) -> Result<ExecResult> {
    let key = SessionKey::resolve("", &format!("run-{}", new_session_id()), DEFAULT_SLOT);
    let session_opts = SessionOptions {
        image: opts.image.as_deref().map(runtime_to_image),
        allow_network: opts.network.then_some(true),
        env: passthrough_env(std::env::vars()),
        ..SessionOptions::default()
    };
    let (session, _) = manager
        .get_or_create_session(&key, session_opts)
        .await
        .context("Failed to open sandbox")?;
    info!("Running {:?} in sandbox {}", opts.cmd, session.id);

    let req = ExecRequest {
        timeout_seconds: opts.timeout_secs,
        ..ExecRequest::new(opts.cmd)
    };
    manager
        .backend()
        .exec(&session.id, req, cancel)
        .await
        .context("Failed to run command")
}

/// Maps a result to a process exit code.
fn exit_status(result: &ExecResult) -> i32 {
    if result.cancelled {
        return INTERRUPTED_EXIT_CODE;
    }
    i32::try_from(result.exit_code).unwrap_or(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_status() {
        let ok = ExecResult::default();
        assert_eq!(exit_status(&ok), 0);

        let failed = ExecResult {
            exit_code: 2,
            ..ExecResult::default()
        };
        assert_eq!(exit_status(&failed), 2);

        let cancelled = ExecResult {
            exit_code: -1,
            cancelled: true,
            ..ExecResult::default()
        };
        assert_eq!(exit_status(&cancelled), 130);

        let huge = ExecResult {
            exit_code: i64::MAX,
            ..ExecResult::default()
        };
        assert_eq!(exit_status(&huge), 1);
    }
}
