//! Sandbox operations exposed as named tools.
//!
//! A model calls tools by name with a JSON object of arguments. [`SandboxTools`]
//! checks the arguments, resolves the sandbox from the calling run's
//! [`ExecutionContext`], dispatches to the [`SessionManager`] and its backend,
//! and renders the outcome back to JSON. Failures are returned as
//! [`ToolError`] so the model sees the message and can try something else.

mod schema;

pub use schema::{
    descriptors, ToolDescriptor, SANDBOX_CLOSE, SANDBOX_EXEC, SANDBOX_EXEC_READ,
    SANDBOX_EXEC_START, SANDBOX_EXEC_WAIT, SANDBOX_FS_DELETE, SANDBOX_FS_LIST, SANDBOX_FS_READ,
    SANDBOX_FS_WRITE, SANDBOX_OPEN,
};

use std::collections::BTreeMap;
use std::io;
use std::sync::Arc;
use std::time::Duration;

use base64::Engine as _;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, info};

use crate::config::SandboxConfig;
use crate::sandbox::workspace::DEFAULT_FILE_MODE;
use crate::sandbox::{
    runtime_to_image, CancelToken, ExecRequest, ExecResult, FileEntry, ResourceLimits,
    SandboxError, Session, SessionKey, SessionManager, SessionOptions,
};

/// Host variables with this prefix are passed into new sessions, unprefixed.
pub const ENV_PASSTHROUGH_PREFIX: &str = "SANDBOX_ENV_";

const MAX_TIMEOUT_SECS: u64 = 3600;
const DEFAULT_WAIT_SECS: u64 = 60;

/// Identifies the run a tool call comes from.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecutionContext {
    pub workflow_run_id: String,
    pub agent_run_id: String,
    /// Named sandbox slot; empty means the default slot.
    pub session_name: String,
}

impl ExecutionContext {
    /// The session key for this run, with an optional slot override.
    pub fn session_key(&self, slot_override: Option<&str>) -> SessionKey {
        let slot = slot_override
            .filter(|s| !s.is_empty())
            .unwrap_or(&self.session_name);
        SessionKey::resolve(&self.workflow_run_id, &self.agent_run_id, slot)
    }

    fn is_empty(&self) -> bool {
        self.workflow_run_id.is_empty() && self.agent_run_id.is_empty()
    }
}

/// A tool call that could not be completed.
#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("unknown tool: {0}")]
    UnknownTool(String),

    #[error("{tool}: {message}")]
    InvalidInput { tool: &'static str, message: String },

    #[error("{tool}: {source}")]
    Sandbox {
        tool: &'static str,
        #[source]
        source: SandboxError,
    },

    #[error("{tool}: failed to encode result: {source}")]
    Encode {
        tool: &'static str,
        #[source]
        source: serde_json::Error,
    },
}

impl ToolError {
    fn invalid(tool: &'static str, message: impl Into<String>) -> Self {
        Self::InvalidInput {
            tool,
            message: message.into(),
        }
    }

    /// The sandbox failure behind this error, if any.
    pub fn sandbox_error(&self) -> Option<&SandboxError> {
        match self {
            Self::Sandbox { source, .. } => Some(source),
            _ => None,
        }
    }
}

fn sandbox_err(tool: &'static str) -> impl FnOnce(SandboxError) -> ToolError {
    move |source| ToolError::Sandbox { tool, source }
}

/// Session settings applied to every sandbox the tools open.
#[derive(Debug, Clone)]
pub struct ToolDefaults {
    /// Image when the call names no runtime; `None` defers to the backend.
    pub image: Option<String>,
    pub allow_network: Option<bool>,
    pub limits: Option<ResourceLimits>,
    /// Exec timeout when the call sets none.
    pub timeout_secs: u64,
    pub env: BTreeMap<String, String>,
}

impl ToolDefaults {
    /// Defaults from configuration plus `SANDBOX_ENV_*` host variables.
    pub fn from_config(config: &SandboxConfig) -> Self {
        Self {
            image: None,
            allow_network: None,
            limits: None,
            timeout_secs: config.default_timeout_secs,
            env: passthrough_env(std::env::vars()),
        }
    }
}

/// Strips [`ENV_PASSTHROUGH_PREFIX`] from matching variables and drops the rest.
pub fn passthrough_env<I>(vars: I) -> BTreeMap<String, String>
where
    I: IntoIterator<Item = (String, String)>,
{
    vars.into_iter()
        .filter_map(|(name, value)| {
            name.strip_prefix(ENV_PASSTHROUGH_PREFIX)
                .filter(|n| !n.is_empty())
                .map(|n| (n.to_string(), value))
        })
        .collect()
}

/// Parses an octal permission string such as `"0755"` or `"0o600"`.
fn parse_mode(tool: &'static str, mode: Option<&str>) -> Result<u32, ToolError> {
    let Some(raw) = mode.map(str::trim).filter(|m| !m.is_empty()) else {
        return Ok(DEFAULT_FILE_MODE);
    };
    let digits = raw.strip_prefix("0o").unwrap_or(raw);
    match u32::from_str_radix(digits, 8) {
        Ok(mode) if mode <= 0o7777 => Ok(mode),
        _ => Err(ToolError::invalid(tool, format!("invalid file mode: {raw}"))),
    }
}

fn clamp_timeout(secs: u64) -> u64 {
    secs.clamp(1, MAX_TIMEOUT_SECS)
}

fn require(tool: &'static str, field: &str, value: &str) -> Result<(), ToolError> {
    if value.is_empty() {
        return Err(ToolError::invalid(tool, format!("{field} is required")));
    }
    Ok(())
}

fn parse<T: DeserializeOwned>(tool: &'static str, args: Value) -> Result<T, ToolError> {
    let args = if args.is_null() {
        Value::Object(serde_json::Map::new())
    } else {
        args
    };
    serde_json::from_value(args).map_err(|e| ToolError::invalid(tool, e.to_string()))
}

fn encode<T: Serialize>(tool: &'static str, value: &T) -> Result<Value, ToolError> {
    serde_json::to_value(value).map_err(|source| ToolError::Encode { tool, source })
}

// ---------------------------------------------------------------------------
// Tool inputs and outputs
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct OpenInput {
    #[serde(default)]
    session_key: Option<String>,
    #[serde(default)]
    runtime: Option<String>,
}

#[derive(Debug, Serialize)]
struct OpenOutput {
    sandbox_id: String,
    image: String,
    workdir: String,
    created: bool,
}

#[derive(Debug, Deserialize)]
struct ExecInput {
    sandbox_id: String,
    #[serde(default)]
    cmd: Vec<String>,
    #[serde(default)]
    command: Option<String>,
    #[serde(default)]
    cwd: Option<String>,
    #[serde(default)]
    env: BTreeMap<String, String>,
    #[serde(default)]
    timeout_seconds: Option<u64>,
}

#[derive(Debug, Serialize)]
struct ExecOutput {
    exit_code: i64,
    stdout: String,
    stderr: String,
    truncated: bool,
    timed_out: bool,
    cancelled: bool,
    duration_ms: u64,
}

impl From<ExecResult> for ExecOutput {
    fn from(r: ExecResult) -> Self {
        Self {
            exit_code: r.exit_code,
            stdout: r.stdout,
            stderr: r.stderr,
            truncated: r.truncated,
            timed_out: r.timed_out,
            cancelled: r.cancelled,
            duration_ms: u64::try_from(r.duration.as_millis()).unwrap_or(u64::MAX),
        }
    }
}

#[derive(Debug, Serialize)]
struct ExecStartOutput {
    exec_id: String,
    started_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
struct ExecWaitInput {
    sandbox_id: String,
    exec_id: String,
    #[serde(default)]
    timeout_seconds: Option<u64>,
}

fn from_start() -> i64 {
    -1
}

#[derive(Debug, Deserialize)]
struct ExecReadInput {
    sandbox_id: String,
    exec_id: String,
    #[serde(default = "from_start")]
    since_seq: i64,
    #[serde(default)]
    max_chunks: usize,
}

#[derive(Debug, Deserialize)]
struct FsWriteInput {
    sandbox_id: String,
    path: String,
    #[serde(default)]
    contents: String,
    #[serde(default)]
    contents_b64: Option<String>,
    #[serde(default)]
    mode: Option<String>,
}

#[derive(Debug, Serialize)]
struct FsWriteOutput {
    ok: bool,
    path: String,
    size_bytes: usize,
}

#[derive(Debug, Deserialize)]
struct FsReadInput {
    sandbox_id: String,
    path: String,
    #[serde(default)]
    max_bytes: usize,
}

#[derive(Debug, Serialize)]
struct FsReadOutput {
    #[serde(skip_serializing_if = "Option::is_none")]
    contents: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    contents_b64: Option<String>,
    truncated: bool,
    size_bytes: usize,
}

#[derive(Debug, Deserialize)]
struct FsListInput {
    sandbox_id: String,
    #[serde(default)]
    path: String,
    #[serde(default)]
    recursive: bool,
}

#[derive(Debug, Serialize)]
struct FsListOutput {
    entries: Vec<FileEntry>,
}

#[derive(Debug, Deserialize)]
struct FsDeleteInput {
    sandbox_id: String,
    path: String,
    #[serde(default)]
    recursive: bool,
}

#[derive(Debug, Serialize)]
struct FsDeleteOutput {
    ok: bool,
    deleted: String,
}

#[derive(Debug, Deserialize)]
struct CloseInput {
    sandbox_id: String,
}

#[derive(Debug, Serialize)]
struct CloseOutput {
    ok: bool,
}

// ---------------------------------------------------------------------------
// Line protocol
// ---------------------------------------------------------------------------

/// One request line: `{"id": ..., "tool": "...", "args": {...}}`.
#[derive(Debug, Deserialize)]
pub struct ToolCall {
    #[serde(default)]
    pub id: Value,
    pub tool: String,
    #[serde(default)]
    pub args: Value,
}

/// One response line. Exactly one of `result` and `error` is set.
#[derive(Debug, Serialize)]
pub struct ToolResponse {
    #[serde(skip_serializing_if = "Value::is_null")]
    pub id: Value,
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ToolResponse {
    fn failure(id: Value, message: String) -> Self {
        Self {
            id,
            ok: false,
            result: None,
            error: Some(message),
        }
    }
}

// ---------------------------------------------------------------------------
// Dispatch
// ---------------------------------------------------------------------------

/// The tool set bound to one execution context.
pub struct SandboxTools {
    manager: Arc<SessionManager>,
    ctx: ExecutionContext,
    defaults: ToolDefaults,
    cancel: CancelToken,
}

impl SandboxTools {
    pub fn new(manager: Arc<SessionManager>, ctx: ExecutionContext, defaults: ToolDefaults) -> Self {
        Self {
            manager,
            ctx,
            defaults,
            cancel: CancelToken::new(),
        }
    }

    /// Uses `cancel` to interrupt running execs and waits.
    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn context(&self) -> &ExecutionContext {
        &self.ctx
    }

    pub fn descriptors(&self) -> Vec<ToolDescriptor> {
        descriptors(self.defaults.timeout_secs)
    }

    /// Runs the tool `name` with JSON `args`.
    pub async fn call(&self, name: &str, args: Value) -> Result<Value, ToolError> {
        debug!("Tool call {}", name);
        match name {
            SANDBOX_OPEN => encode(SANDBOX_OPEN, &self.open(parse(SANDBOX_OPEN, args)?).await?),
            SANDBOX_EXEC => encode(SANDBOX_EXEC, &self.exec(parse(SANDBOX_EXEC, args)?).await?),
            SANDBOX_EXEC_START => encode(
                SANDBOX_EXEC_START,
                &self.exec_start(parse(SANDBOX_EXEC_START, args)?).await?,
            ),
            SANDBOX_EXEC_WAIT => encode(
                SANDBOX_EXEC_WAIT,
                &self.exec_wait(parse(SANDBOX_EXEC_WAIT, args)?).await?,
            ),
            SANDBOX_EXEC_READ => self.exec_read(parse(SANDBOX_EXEC_READ, args)?).await,
            SANDBOX_FS_WRITE => encode(
                SANDBOX_FS_WRITE,
                &self.fs_write(parse(SANDBOX_FS_WRITE, args)?).await?,
            ),
            SANDBOX_FS_READ => encode(
                SANDBOX_FS_READ,
                &self.fs_read(parse(SANDBOX_FS_READ, args)?).await?,
            ),
            SANDBOX_FS_LIST => encode(
                SANDBOX_FS_LIST,
                &self.fs_list(parse(SANDBOX_FS_LIST, args)?).await?,
            ),
            SANDBOX_FS_DELETE => encode(
                SANDBOX_FS_DELETE,
                &self.fs_delete(parse(SANDBOX_FS_DELETE, args)?).await?,
            ),
            SANDBOX_CLOSE => encode(SANDBOX_CLOSE, &self.close(parse(SANDBOX_CLOSE, args)?).await?),
            other => Err(ToolError::UnknownTool(other.to_string())),
        }
    }

    /// Handles one JSON-lines request. Never fails: errors become responses.
    pub async fn handle_line(&self, line: &str) -> ToolResponse {
        let call: ToolCall = match serde_json::from_str(line) {
            Ok(call) => call,
            Err(e) => return ToolResponse::failure(Value::Null, format!("invalid tool call: {e}")),
        };
        match self.call(&call.tool, call.args).await {
            Ok(result) => ToolResponse {
                id: call.id,
                ok: true,
                result: Some(result),
                error: None,
            },
            Err(e) => ToolResponse::failure(call.id, e.to_string()),
        }
    }

    /// Answers one JSON request per line of `input` until EOF or until the
    /// cancel token fires. A call interrupted by the token is still answered.
    pub async fn serve<R, W>(&self, input: R, mut output: W) -> io::Result<()>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut lines = input.lines();
        loop {
            let line = tokio::select! {
                biased;
                () = self.cancel.cancelled() => return Ok(()),
                line = lines.next_line() => line?,
            };
            let Some(line) = line else {
                return Ok(());
            };
            if line.trim().is_empty() {
                continue;
            }

            let response = self.handle_line(&line).await;
            let mut out = serde_json::to_vec(&response)?;
            out.push(b'\n');
            output.write_all(&out).await?;
            output.flush().await?;
        }
    }

    fn session(&self, tool: &'static str, sandbox_id: &str) -> Result<Arc<Session>, ToolError> {
        require(tool, "sandbox_id", sandbox_id)?;
        self.manager
            .get_session_by_id(sandbox_id)
            .map_err(sandbox_err(tool))
    }

    async fn open(&self, input: OpenInput) -> Result<OpenOutput, ToolError> {
        if self.ctx.is_empty() {
            return Err(ToolError::invalid(
                SANDBOX_OPEN,
                "no workflow or agent run in context",
            ));
        }
        let key = self.ctx.session_key(input.session_key.as_deref());
        let image = input
            .runtime
            .filter(|r| !r.is_empty())
            .map(|r| runtime_to_image(&r))
            .or_else(|| self.defaults.image.clone());
        let opts = SessionOptions {
            image,
            env: self.defaults.env.clone(),
            limits: self.defaults.limits,
            allow_network: self.defaults.allow_network,
            ..SessionOptions::default()
        };

        let (session, created) = self
            .manager
            .get_or_create_session(&key, opts)
            .await
            .map_err(sandbox_err(SANDBOX_OPEN))?;
        if created {
            info!("Opened sandbox {} ({}) for {}", session.id, session.image, key);
        }
        Ok(OpenOutput {
            sandbox_id: session.id.clone(),
            image: session.image.clone(),
            workdir: session.workdir.clone(),
            created,
        })
    }

    fn exec_request(&self, tool: &'static str, input: ExecInput) -> Result<ExecRequest, ToolError> {
        let cmd = if input.cmd.is_empty() {
            let line = input.command.unwrap_or_default();
            shell_words::split(&line)
                .map_err(|e| ToolError::invalid(tool, format!("invalid command: {e}")))?
        } else {
            input.cmd
        };
        if cmd.is_empty() {
            return Err(ToolError::invalid(
                tool,
                "cmd is required and must be a non-empty array",
            ));
        }
        let timeout = input
            .timeout_seconds
            .unwrap_or(self.defaults.timeout_secs);
        Ok(ExecRequest {
            cmd,
            cwd: input.cwd.filter(|c| !c.is_empty()),
            env: input.env,
            timeout_seconds: Some(clamp_timeout(timeout)),
        })
    }

    async fn exec(&self, input: ExecInput) -> Result<ExecOutput, ToolError> {
        let session = self.session(SANDBOX_EXEC, &input.sandbox_id)?;
        let req = self.exec_request(SANDBOX_EXEC, input)?;
        let result = self
            .manager
            .backend()
            .exec(&session.id, req, &self.cancel)
            .await
            .map_err(sandbox_err(SANDBOX_EXEC))?;
        Ok(result.into())
    }

    async fn exec_start(&self, input: ExecInput) -> Result<ExecStartOutput, ToolError> {
        let session = self.session(SANDBOX_EXEC_START, &input.sandbox_id)?;
        let req = self.exec_request(SANDBOX_EXEC_START, input)?;
        let handle = self
            .manager
            .backend()
            .exec_async(&session.id, req)
            .await
            .map_err(sandbox_err(SANDBOX_EXEC_START))?;
        Ok(ExecStartOutput {
            exec_id: handle.id,
            started_at: handle.started_at,
        })
    }

    async fn exec_wait(&self, input: ExecWaitInput) -> Result<ExecOutput, ToolError> {
        let session = self.session(SANDBOX_EXEC_WAIT, &input.sandbox_id)?;
        require(SANDBOX_EXEC_WAIT, "exec_id", &input.exec_id)?;
        let timeout = clamp_timeout(input.timeout_seconds.unwrap_or(DEFAULT_WAIT_SECS));
        let result = self
            .manager
            .backend()
            .exec_wait(
                &session.id,
                &input.exec_id,
                Duration::from_secs(timeout),
                &self.cancel,
            )
            .await
            .map_err(sandbox_err(SANDBOX_EXEC_WAIT))?;
        Ok(result.into())
    }

    async fn exec_read(&self, input: ExecReadInput) -> Result<Value, ToolError> {
        let session = self.session(SANDBOX_EXEC_READ, &input.sandbox_id)?;
        require(SANDBOX_EXEC_READ, "exec_id", &input.exec_id)?;
        let chunks = self
            .manager
            .backend()
            .exec_read(&session.id, &input.exec_id, input.since_seq, input.max_chunks)
            .await
            .map_err(sandbox_err(SANDBOX_EXEC_READ))?;
        encode(SANDBOX_EXEC_READ, &chunks)
    }

    async fn fs_write(&self, input: FsWriteInput) -> Result<FsWriteOutput, ToolError> {
        let session = self.session(SANDBOX_FS_WRITE, &input.sandbox_id)?;
        require(SANDBOX_FS_WRITE, "path", &input.path)?;
        let content = match input.contents_b64.filter(|b| !b.is_empty()) {
            Some(encoded) => base64::engine::general_purpose::STANDARD
                .decode(encoded.trim())
                .map_err(|e| ToolError::invalid(SANDBOX_FS_WRITE, format!("invalid base64: {e}")))?,
            None => input.contents.into_bytes(),
        };
        let mode = parse_mode(SANDBOX_FS_WRITE, input.mode.as_deref())?;

        self.manager
            .backend()
            .write_file(&session.id, &input.path, &content, mode)
            .await
            .map_err(sandbox_err(SANDBOX_FS_WRITE))?;
        Ok(FsWriteOutput {
            ok: true,
            path: input.path,
            size_bytes: content.len(),
        })
    }

    async fn fs_read(&self, input: FsReadInput) -> Result<FsReadOutput, ToolError> {
        let session = self.session(SANDBOX_FS_READ, &input.sandbox_id)?;
        require(SANDBOX_FS_READ, "path", &input.path)?;
        let (bytes, truncated) = self
            .manager
            .backend()
            .read_file(&session.id, &input.path, input.max_bytes)
            .await
            .map_err(sandbox_err(SANDBOX_FS_READ))?;

        let size_bytes = bytes.len();
        let (contents, contents_b64) = match String::from_utf8(bytes) {
            Ok(text) => (Some(text), None),
            Err(e) => (
                None,
                Some(base64::engine::general_purpose::STANDARD.encode(e.into_bytes())),
            ),
        };
        Ok(FsReadOutput {
            contents,
            contents_b64,
            truncated,
            size_bytes,
        })
    }

    async fn fs_list(&self, input: FsListInput) -> Result<FsListOutput, ToolError> {
        let session = self.session(SANDBOX_FS_LIST, &input.sandbox_id)?;
        let path = if input.path.is_empty() {
            "."
        } else {
            input.path.as_str()
        };
        let entries = self
            .manager
            .backend()
            .list_files(&session.id, path, input.recursive)
            .await
            .map_err(sandbox_err(SANDBOX_FS_LIST))?;
        Ok(FsListOutput { entries })
    }

    async fn fs_delete(&self, input: FsDeleteInput) -> Result<FsDeleteOutput, ToolError> {
        let session = self.session(SANDBOX_FS_DELETE, &input.sandbox_id)?;
        require(SANDBOX_FS_DELETE, "path", &input.path)?;
        self.manager
            .backend()
            .delete_file(&session.id, &input.path, input.recursive)
            .await
            .map_err(sandbox_err(SANDBOX_FS_DELETE))?;
        Ok(FsDeleteOutput {
            ok: true,
            deleted: input.path,
        })
    }

    async fn close(&self, input: CloseInput) -> Result<CloseOutput, ToolError> {
        require(SANDBOX_CLOSE, "sandbox_id", &input.sandbox_id)?;
        self.manager
            .close_session(&input.sandbox_id)
            .await
            .map_err(sandbox_err(SANDBOX_CLOSE))?;
        Ok(CloseOutput { ok: true })
    }
}
