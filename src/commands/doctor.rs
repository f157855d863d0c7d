use std::fmt::Write;

use anyhow::{bail, Result};
use colored::Colorize;

use agent_sandbox::config::SandboxConfig;
use agent_sandbox::sandbox::NetworkPolicy;

/// Prints the effective configuration and checks the engine and workspace.
pub async fn run(config: &SandboxConfig) -> Result<()> {
    print!("{}", format_summary(config));

    let mut healthy = true;

    match std::fs::create_dir_all(&config.workspace_base_dir) {
        Ok(()) => println!("  {} Workspace directory is writable", "✓".green()),
        Err(e) => {
            healthy = false;
            println!(
                "  {} Workspace directory {}: {}",
                "✗".red(),
                config.workspace_base_dir.display(),
                e
            );
        }
    }

    match super::connect(config).await {
        Ok(_) => println!("  {} Docker engine is reachable", "✓".green()),
        Err(e) => {
            healthy = false;
            println!("  {} {:#}", "✗".red(), e);
        }
    }

    println!("{}", "━".repeat(50).dimmed());
    if !healthy {
        bail!("Sandbox environment is not ready");
    }
    Ok(())
}

fn format_summary(config: &SandboxConfig) -> String {
    let mut out = String::new();
    let enabled = if config.enabled {
        "enabled".green().bold()
    } else {
        "disabled".red()
    };
    let network = NetworkPolicy::from_allowed(config.allow_network_by_default);
    let allowed = if config.allowed_images.is_empty() {
        "any".to_string()
    } else {
        config.allowed_images.join(", ")
    };
    let registry = if config.registry_auth.is_empty() {
        "none".to_string()
    } else {
        config.registry_auth.server_address.clone()
    };

    let _ = writeln!(out, "\n{}", "━".repeat(50).dimmed());
    let _ = writeln!(out, "{}", "   Agent Sandbox".yellow().bold());
    let _ = writeln!(out, "{}", "━".repeat(50).dimmed());
    let _ = writeln!(out, "  Status:     {enabled}");
    let _ = writeln!(out, "  Image:      {}", config.default_image.cyan());
    let _ = writeln!(out, "  Allowed:    {}", allowed.cyan());
    let _ = writeln!(out, "  Workdir:    {}", config.default_workdir.cyan());
    let _ = writeln!(
        out,
        "  Workspaces: {}",
        config.workspace_base_dir.display().to_string().cyan()
    );
    let _ = writeln!(out, "  Network:    {}", network.to_string().cyan());
    let _ = writeln!(
        out,
        "  Limits:     {} millicores, {} MB",
        config.resources.cpu_millicores, config.resources.memory_mb
    );
    let _ = writeln!(
        out,
        "  Timeout:    {}s, idle after {}m (swept every {}m)",
        config.default_timeout_secs, config.idle_timeout_minutes, config.cleanup_interval_minutes
    );
    let _ = writeln!(out, "  Registry:   {}", registry.cyan());
    let _ = writeln!(out, "{}", "━".repeat(50).dimmed());
    out
}
