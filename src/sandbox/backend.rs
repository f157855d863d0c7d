//! The contract every sandbox engine adapter implements.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use super::cancel::CancelToken;
use super::error::Result;
use super::types::{
    ExecChunks, ExecHandle, ExecRequest, ExecResult, FileEntry, Session, SessionOptions,
};

/// Engine adapter for sandbox sessions.
///
/// Sessions are addressed by id. Implementations must be safe to call from
/// many tasks at once.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Checks that the engine is reachable.
    async fn ping(&self) -> Result<()>;

    /// Creates and starts a new isolated session.
    async fn create_session(&self, opts: SessionOptions) -> Result<Arc<Session>>;

    async fn get_session(&self, session_id: &str) -> Result<Arc<Session>>;

    /// Tears the session down and removes its workspace.
    async fn destroy_session(&self, session_id: &str) -> Result<()>;

    /// Runs a command to completion, or until `cancel` fires.
    async fn exec(
        &self,
        session_id: &str,
        req: ExecRequest,
        cancel: &CancelToken,
    ) -> Result<ExecResult>;

    /// Starts a command in the background and returns immediately.
    async fn exec_async(&self, session_id: &str, req: ExecRequest) -> Result<ExecHandle>;

    /// Waits up to `timeout` for a background command's result.
    async fn exec_wait(
        &self,
        session_id: &str,
        exec_id: &str,
        timeout: Duration,
        cancel: &CancelToken,
    ) -> Result<ExecResult>;

    /// Non-blocking snapshot of output with `seq > since_seq`.
    async fn exec_read(
        &self,
        session_id: &str,
        exec_id: &str,
        since_seq: i64,
        max_chunks: usize,
    ) -> Result<ExecChunks>;

    async fn write_file(
        &self,
        session_id: &str,
        path: &str,
        content: &[u8],
        mode: u32,
    ) -> Result<()>;

    /// Returns the content and whether it was cut. `max_bytes == 0` means
    /// the configured default.
    async fn read_file(
        &self,
        session_id: &str,
        path: &str,
        max_bytes: usize,
    ) -> Result<(Vec<u8>, bool)>;

    async fn list_files(
        &self,
        session_id: &str,
        path: &str,
        recursive: bool,
    ) -> Result<Vec<FileEntry>>;

    async fn delete_file(&self, session_id: &str, path: &str, recursive: bool) -> Result<()>;
}
