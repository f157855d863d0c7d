//! CLI command implementations.
//!
//! Each submodule implements one `agent-sandbox` subcommand. Shared setup
//! (config loading, the enable gate, connecting a manager) lives here.

pub mod clean;
pub mod doctor;
pub mod list_tools;
pub mod run;
pub mod tools;

use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use tracing::{info, warn};

use agent_sandbox::config::{Config, SandboxConfig};
use agent_sandbox::sandbox::{Backend, DockerBackend, SessionManager};

/// Loads configuration from `path` or the current directory.
pub fn load_config(path: Option<&Path>) -> Result<Config> {
    let cwd = std::env::current_dir().context("Failed to get current directory")?;
    Config::load(path, &cwd)
}

/// Refuses sandbox work unless it is enabled or forced.
pub fn ensure_enabled(config: &SandboxConfig, force: bool) -> Result<()> {
    if config.enabled || force {
        return Ok(());
    }
    bail!(
        "Sandbox is disabled. Set sandbox.enabled = true in {}, export SANDBOX_ENABLED=true, \
         or pass --force-enable",
        agent_sandbox::config::CONFIG_FILE
    )
}

/// Connects to the local Docker engine and checks that it answers.
pub async fn connect_backend(config: &SandboxConfig) -> Result<DockerBackend> {
    let backend = DockerBackend::connect(config.clone())
        .context("Failed to connect to the Docker engine")?;
    backend
        .ping()
        .await
        .context("Docker engine is not responding")?;
    Ok(backend)
}

/// Connects to the engine and wraps it in a manager, first removing
/// leftover sandboxes when `reap_orphans_on_start` is set.
pub async fn connect(config: &SandboxConfig) -> Result<Arc<SessionManager>> {
    let backend = connect_backend(config).await?;
    if config.reap_orphans_on_start {
        match backend.reap_orphans().await {
            Ok(0) => {}
            Ok(n) => info!("Removed {} orphaned sandbox(es)", n),
            Err(e) => warn!("Failed to remove orphaned sandboxes: {}", e),
        }
    }
    Ok(Arc::new(SessionManager::new(Arc::new(backend))))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ensure_enabled() {
        let mut config = SandboxConfig::default();
        let err = ensure_enabled(&config, false).unwrap_err();
        assert!(err.to_string().contains("--force-enable"));

        assert!(ensure_enabled(&config, true).is_ok());

        config.enabled = true;
        assert!(ensure_enabled(&config, false).is_ok());
    }
}
