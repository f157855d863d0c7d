//! Sandbox configuration: `agent-sandbox.toml` plus environment overrides.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::sandbox::ResourceLimits;

/// Config file looked up in the working directory.
pub const CONFIG_FILE: &str = "agent-sandbox.toml";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub sandbox: SandboxConfig,
}

/// Container sandbox settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SandboxConfig {
    /// Master switch. Sandbox work is refused while false.
    #[serde(default)]
    pub enabled: bool,

    /// Image used when a session does not ask for one
    #[serde(default = "default_image")]
    pub default_image: String,

    /// Working directory inside the container; the workspace is mounted here
    #[serde(default = "default_workdir")]
    pub default_workdir: String,

    /// Per-command deadline when the request does not set one
    #[serde(default = "default_timeout_secs")]
    pub default_timeout_secs: u64,

    #[serde(default = "default_max_output_bytes")]
    pub max_stdout_bytes: usize,

    #[serde(default = "default_max_output_bytes")]
    pub max_stderr_bytes: usize,

    /// Read cap used when a caller passes 0
    #[serde(default = "default_max_file_read_bytes")]
    pub max_file_read_bytes: usize,

    /// Images sessions may use. Empty allows any image.
    #[serde(default = "default_allowed_images")]
    pub allowed_images: Vec<String>,

    #[serde(default)]
    pub allow_network_by_default: bool,

    /// Host directory holding one subdirectory per session
    #[serde(default = "default_workspace_base_dir")]
    pub workspace_base_dir: PathBuf,

    #[serde(default = "default_idle_timeout_minutes")]
    pub idle_timeout_minutes: u64,

    /// Must be at least 1
    #[serde(default = "default_cleanup_interval_minutes")]
    pub cleanup_interval_minutes: u64,

    /// Remove sandbox containers left by earlier processes on startup.
    /// Containers of other live processes on the same engine go too.
    #[serde(default)]
    pub reap_orphans_on_start: bool,

    #[serde(default)]
    pub resources: ResourceConfig,

    /// Credentials for pulling from a private registry
    #[serde(default)]
    pub registry_auth: RegistryAuth,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            default_image: default_image(),
            default_workdir: default_workdir(),
            default_timeout_secs: default_timeout_secs(),
            max_stdout_bytes: default_max_output_bytes(),
            max_stderr_bytes: default_max_output_bytes(),
            max_file_read_bytes: default_max_file_read_bytes(),
            allowed_images: default_allowed_images(),
            allow_network_by_default: false,
            workspace_base_dir: default_workspace_base_dir(),
            idle_timeout_minutes: default_idle_timeout_minutes(),
            cleanup_interval_minutes: default_cleanup_interval_minutes(),
            reap_orphans_on_start: false,
            resources: ResourceConfig::default(),
            registry_auth: RegistryAuth::default(),
        }
    }
}

impl SandboxConfig {
    pub fn limits(&self) -> ResourceLimits {
        ResourceLimits {
            cpu_millicores: self.resources.cpu_millicores,
            memory_mb: self.resources.memory_mb,
        }
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_minutes.saturating_mul(60))
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_minutes.saturating_mul(60))
    }

    fn validate(&self) -> Result<()> {
        if self.cleanup_interval_minutes == 0 {
            bail!("sandbox.cleanup_interval_minutes must be at least 1");
        }
        Ok(())
    }
}

/// Container resource caps
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceConfig {
    /// 1000 = one CPU
    #[serde(default = "default_cpu_millicores")]
    pub cpu_millicores: u32,

    #[serde(default = "default_memory_mb")]
    pub memory_mb: u32,
}

impl Default for ResourceConfig {
    fn default() -> Self {
        Self {
            cpu_millicores: default_cpu_millicores(),
            memory_mb: default_memory_mb(),
        }
    }
}

/// Private registry login. Either username/password or an identity token.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RegistryAuth {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    /// OAuth bearer token (ECR, GCR, ACR)
    #[serde(default)]
    pub identity_token: String,
    /// e.g. "ghcr.io"
    #[serde(default)]
    pub server_address: String,
}

impl RegistryAuth {
    pub fn is_empty(&self) -> bool {
        self.username.is_empty() && self.password.is_empty() && self.identity_token.is_empty()
    }
}

fn default_image() -> String {
    "python:3.11-slim".to_string()
}

fn default_workdir() -> String {
    "/workspace".to_string()
}

fn default_timeout_secs() -> u64 {
    120
}

fn default_max_output_bytes() -> usize {
    200_000
}

fn default_max_file_read_bytes() -> usize {
    262_144
}

fn default_allowed_images() -> Vec<String> {
    vec![
        "python:3.11-slim".to_string(),
        "node:20-slim".to_string(),
        "ubuntu:22.04".to_string(),
    ]
}

fn default_workspace_base_dir() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("agent-sandbox")
        .join("workspaces")
}

fn default_idle_timeout_minutes() -> u64 {
    30
}

fn default_cleanup_interval_minutes() -> u64 {
    5
}

fn default_cpu_millicores() -> u32 {
    1000
}

fn default_memory_mb() -> u32 {
    512
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

impl Config {
    /// Load configuration from `path`, or from [`CONFIG_FILE`] in `dir`,
    /// falling back to defaults when no file exists. Environment overrides
    /// are applied afterwards.
    pub fn load(path: Option<&Path>, dir: &Path) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => {
                let candidate = dir.join(CONFIG_FILE);
                if candidate.exists() {
                    Self::from_file(&candidate)?
                } else {
                    Self::default()
                }
            }
        };
        config.apply_env(|name| std::env::var(name).ok())?;
        config.sandbox.validate()?;
        Ok(config)
    }

    fn from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    /// Apply `SANDBOX_*` overrides read through `lookup`.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|v| !v.is_empty());
        let sandbox = &mut self.sandbox;

        if let Some(v) = get("SANDBOX_ENABLED") {
            sandbox.enabled = parse_bool(&v)
                .with_context(|| format!("Invalid SANDBOX_ENABLED value: {v}"))?;
        }
        if let Some(v) = get("SANDBOX_DOCKER_IMAGE") {
            sandbox.default_image = v;
        }
        if let Some(v) = get("SANDBOX_DEFAULT_TIMEOUT_SECS") {
            sandbox.default_timeout_secs = v
                .parse()
                .with_context(|| format!("Invalid SANDBOX_DEFAULT_TIMEOUT_SECS value: {v}"))?;
        }
        if let Some(v) = get("SANDBOX_WORKSPACE_DIR") {
            sandbox.workspace_base_dir = PathBuf::from(v);
        }
        if let Some(v) = get("SANDBOX_IDLE_TIMEOUT_MINUTES") {
            sandbox.idle_timeout_minutes = v
                .parse()
                .with_context(|| format!("Invalid SANDBOX_IDLE_TIMEOUT_MINUTES value: {v}"))?;
        }
        if let Some(v) = get("SANDBOX_REAP_ORPHANS") {
            sandbox.reap_orphans_on_start = parse_bool(&v)
                .with_context(|| format!("Invalid SANDBOX_REAP_ORPHANS value: {v}"))?;
        }
        if let Some(v) = get("SANDBOX_CLEANUP_INTERVAL_MINUTES") {
            sandbox.cleanup_interval_minutes = v
                .parse()
                .with_context(|| format!("Invalid SANDBOX_CLEANUP_INTERVAL_MINUTES value: {v}"))?;
        }

        let auth = &mut sandbox.registry_auth;
        if let Some(v) = get("SANDBOX_REGISTRY_USERNAME") {
            auth.username = v;
        }
        if let Some(v) = get("SANDBOX_REGISTRY_PASSWORD") {
            auth.password = v;
        }
        if let Some(v) = get("SANDBOX_REGISTRY_TOKEN") {
            auth.identity_token = v;
        }
        if let Some(v) = get("SANDBOX_REGISTRY_SERVER") {
            auth.server_address = v;
        }
        Ok(())
    }
}
