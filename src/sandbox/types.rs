//! Session identity and the plain data exchanged with backends.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

/// Slot name used when the caller does not pick one.
pub const DEFAULT_SLOT: &str = "default";

/// Which kind of run a session belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Namespace {
    Workflow,
    Agent,
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Workflow => write!(f, "workflow"),
            Self::Agent => write!(f, "agent"),
        }
    }
}

/// Logical address of a session: one live session per key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionKey {
    pub namespace: Namespace,
    /// Workflow run id or agent run id.
    pub id: String,
    /// Sub-slot within the run.
    pub key: String,
}

impl SessionKey {
    /// Creates a key in the given namespace and slot.
    pub fn new(namespace: Namespace, id: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            namespace,
            id: id.into(),
            key: key.into(),
        }
    }

    /// Derives the key for an execution context.
    ///
    /// A workflow run wins over an agent run so every agent inside one
    /// workflow shares the same sandbox. An empty `slot` means
    /// [`DEFAULT_SLOT`].
    pub fn resolve(workflow_run_id: &str, agent_run_id: &str, slot: &str) -> Self {
        let slot = if slot.is_empty() { DEFAULT_SLOT } else { slot };
        if workflow_run_id.is_empty() {
            Self::new(Namespace::Agent, agent_run_id, slot)
        } else {
            Self::new(Namespace::Workflow, workflow_run_id, slot)
        }
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.namespace, self.id, self.key)
    }
}

/// CPU and memory caps applied to a container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct ResourceLimits {
    /// 1000 = one full CPU. Zero means unlimited.
    pub cpu_millicores: u32,
    /// Zero means unlimited.
    pub memory_mb: u32,
}

impl ResourceLimits {
    /// Docker's `nano_cpus` value for these limits.
    pub fn nano_cpus(&self) -> Option<i64> {
        (self.cpu_millicores > 0).then(|| i64::from(self.cpu_millicores) * 1_000_000)
    }

    /// Docker's `memory` value in bytes.
    pub fn memory_bytes(&self) -> Option<i64> {
        (self.memory_mb > 0).then(|| i64::from(self.memory_mb) * 1024 * 1024)
    }
}

/// Inputs for creating a session. `None` fields take configured defaults.
#[derive(Debug, Clone, Default)]
pub struct SessionOptions {
    pub image: Option<String>,
    pub workdir: Option<String>,
    pub env: BTreeMap<String, String>,
    pub limits: Option<ResourceLimits>,
    pub allow_network: Option<bool>,
    /// Extra container labels.
    pub labels: BTreeMap<String, String>,
}

/// A live isolated environment.
#[derive(Debug)]
pub struct Session {
    pub id: String,
    pub container_id: String,
    pub image: String,
    pub workdir: String,
    /// Host directory bind-mounted at `workdir`.
    pub workspace_path: PathBuf,
    pub env: BTreeMap<String, String>,
    pub limits: ResourceLimits,
    pub created_at: DateTime<Utc>,
    last_used_at: Mutex<DateTime<Utc>>,
}

impl Session {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: String,
        container_id: String,
        image: String,
        workdir: String,
        workspace_path: PathBuf,
        env: BTreeMap<String, String>,
        limits: ResourceLimits,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            container_id,
            image,
            workdir,
            workspace_path,
            env,
            limits,
            created_at: now,
            last_used_at: Mutex::new(now),
        }
    }

    pub fn last_used_at(&self) -> DateTime<Utc> {
        *self.last_used_at.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Marks the session as used now.
    pub fn touch(&self) {
        self.set_last_used_at(Utc::now());
    }

    pub fn set_last_used_at(&self, at: DateTime<Utc>) {
        *self.last_used_at.lock().unwrap_or_else(PoisonError::into_inner) = at;
    }
}

/// One command invocation.
#[derive(Debug, Clone, Default)]
pub struct ExecRequest {
    pub cmd: Vec<String>,
    /// Absolute, or relative to the session workdir.
    pub cwd: Option<String>,
    pub env: BTreeMap<String, String>,
    pub timeout_seconds: Option<u64>,
}

impl ExecRequest {
    pub fn new<I, S>(cmd: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            cmd: cmd.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }
}

/// Outcome of a finished (or cancelled) command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecResult {
    pub id: String,
    /// `-1` when the command was cancelled.
    pub exit_code: i64,
    pub stdout: String,
    pub stderr: String,
    pub duration: Duration,
    pub truncated: bool,
    pub cancelled: bool,
    /// The in-container deadline killed the command.
    pub timed_out: bool,
}

/// Reference to a background command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecHandle {
    pub id: String,
    pub session_id: String,
    pub cmd: Vec<String>,
    pub started_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputStream {
    Stdout,
    Stderr,
}

/// A slice of streamed output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutputChunk {
    pub seq: i64,
    pub stream: OutputStream,
    pub text: String,
}

/// Snapshot of a background command's output.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ExecChunks {
    pub chunks: Vec<OutputChunk>,
    pub done: bool,
    pub next_seq: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FileType {
    File,
    Dir,
    Symlink,
}

/// One entry from a workspace listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileEntry {
    /// Relative to the workspace root, `/`-separated.
    pub path: String,
    #[serde(rename = "type")]
    pub file_type: FileType,
    pub size: u64,
    /// Permission bits only.
    pub mode: u32,
    pub mtime_unix: i64,
}

/// Twelve hex characters taken from a UUID.
fn short_id(uuid: Uuid) -> String {
    uuid.simple().to_string()[..12].to_string()
}

/// Fresh random session id.
pub fn new_session_id() -> String {
    short_id(Uuid::new_v4())
}

/// Fresh random exec id.
pub fn new_exec_id() -> String {
    format!("exec-{}", short_id(Uuid::new_v4()))
}

/// `KEY=VALUE` pairs in key order.
pub fn flatten_env(env: &BTreeMap<String, String>) -> Vec<String> {
    env.iter().map(|(k, v)| format!("{k}={v}")).collect()
}
