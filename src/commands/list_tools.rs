use anyhow::{Context, Result};

use agent_sandbox::config::SandboxConfig;
use agent_sandbox::tools::descriptors;

/// Prints every tool descriptor as a JSON array.
pub fn run(config: &SandboxConfig) -> Result<()> {
    let tools = descriptors(config.default_timeout_secs);
    let out = serde_json::to_string_pretty(&tools).context("Failed to encode tool descriptors")?;
    println!("{out}");
    Ok(())
}
