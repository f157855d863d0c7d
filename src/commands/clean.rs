//! Remove sandbox containers and workspaces left behind by earlier runs.

use anyhow::{Context, Result};
use colored::Colorize;

use agent_sandbox::config::SandboxConfig;

/// Format the clean result as a displayable string
fn format_result(removed: usize) -> String {
    if removed == 0 {
        format!("{} No leftover sandboxes found.", "ℹ".blue())
    } else {
        format!("{} Removed {} leftover sandbox(es).", "✓".green(), removed)
    }
}

/// Removes every sandbox container on the engine, with its workspace.
///
/// A fresh process owns no sessions, so this also removes sandboxes of any
/// other agent-sandbox process using the same engine.
pub async fn run(config: &SandboxConfig) -> Result<()> {
    let backend = super::connect_backend(config).await?;
    let removed = backend
        .reap_orphans()
        .await
        .context("Failed to remove leftover sandboxes")?;
    println!("{}", format_result(removed));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_result() {
        assert!(format_result(0).contains("No leftover sandboxes"));
        assert!(format_result(3).contains("Removed 3 leftover"));
    }
}
