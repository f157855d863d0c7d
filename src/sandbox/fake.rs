//! In-memory backend for tests.
//!
//! Sessions are plain temp directories and commands are a tiny scripted
//! language (`echo`, `sleep`, `exit`, `warn`), so manager and tool tests run
//! without a container engine.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use tempfile::TempDir;

use super::backend::Backend;
use super::cancel::CancelToken;
use super::error::{ErrorKind, Result, SandboxError};
use super::output::{ExecState, StreamCapture};
use super::types::{
    new_exec_id, new_session_id, ExecChunks, ExecHandle, ExecRequest, ExecResult, FileEntry,
    Session, SessionOptions,
};
use super::workspace;

/// A backend that never touches a container engine.
pub(crate) struct FakeBackend {
    base: TempDir,
    sessions: Mutex<HashMap<String, Arc<Session>>>,
    execs: Mutex<HashMap<String, Arc<ExecState>>>,
    create_calls: AtomicUsize,
    destroy_calls: AtomicUsize,
    fail_create: AtomicBool,
    /// 1-based destroy call that fails.
    fail_destroy_call: Mutex<Option<usize>>,
    create_delay: Duration,
    last_labels: Mutex<BTreeMap<String, String>>,
    pub max_output_bytes: usize,
    pub max_file_read_bytes: usize,
}

impl FakeBackend {
    pub fn new() -> Self {
        Self {
            base: TempDir::new().expect("temp dir"),
            sessions: Mutex::new(HashMap::new()),
            execs: Mutex::new(HashMap::new()),
            create_calls: AtomicUsize::new(0),
            destroy_calls: AtomicUsize::new(0),
            fail_create: AtomicBool::new(false),
            fail_destroy_call: Mutex::new(None),
            create_delay: Duration::ZERO,
            last_labels: Mutex::new(BTreeMap::new()),
            max_output_bytes: 200_000,
            max_file_read_bytes: 262_144,
        }
    }

    /// Makes `create_session` slow enough for callers to overlap.
    pub fn with_create_delay(mut self, delay: Duration) -> Self {
        self.create_delay = delay;
        self
    }

    pub fn create_calls(&self) -> usize {
        self.create_calls.load(Ordering::SeqCst)
    }

    pub fn destroy_calls(&self) -> usize {
        self.destroy_calls.load(Ordering::SeqCst)
    }

    pub fn fail_creates(&self, fail: bool) {
        self.fail_create.store(fail, Ordering::SeqCst);
    }

    pub fn fail_destroy_call(&self, call: usize) {
        *self.fail_destroy_call.lock().unwrap() = Some(call);
    }

    pub fn last_labels(&self) -> BTreeMap<String, String> {
        self.last_labels.lock().unwrap().clone()
    }

    pub fn live_sessions(&self) -> usize {
        self.sessions.lock().unwrap().len()
    }

    fn session(&self, op: &'static str, session_id: &str) -> Result<Arc<Session>> {
        let session = self
            .sessions
            .lock()
            .unwrap()
            .get(session_id)
            .cloned()
            .ok_or_else(|| SandboxError::session_not_found(op, session_id))?;
        session.touch();
        Ok(session)
    }

    fn exec_state(
        &self,
        op: &'static str,
        session_id: &str,
        exec_id: &str,
    ) -> Result<Arc<ExecState>> {
        self.execs
            .lock()
            .unwrap()
            .get(exec_id)
            .filter(|s| s.handle.session_id == session_id)
            .cloned()
            .ok_or_else(|| SandboxError::exec_not_found(op, session_id, exec_id))
    }
}

/// Runs one scripted command.
async fn run_script(cmd: &[String], cancel: &CancelToken, max_bytes: usize) -> ExecResult {
    let started = Instant::now();
    let mut stdout = StreamCapture::new(max_bytes);
    let mut stderr = StreamCapture::new(max_bytes);
    let args = cmd.get(1..).unwrap_or_default();
    let mut exit_code = 0;
    let mut cancelled = false;

    match cmd.first().map(String::as_str) {
        Some("echo") => stdout.push(format!("{}\n", args.join(" ")).as_bytes()),
        Some("warn") => stderr.push(format!("{}\n", args.join(" ")).as_bytes()),
        Some("exit") => exit_code = args.first().and_then(|a| a.parse().ok()).unwrap_or(1),
        Some("sleep") => {
            let secs: f64 = args.first().and_then(|a| a.parse().ok()).unwrap_or(0.0);
            tokio::select! {
                () = tokio::time::sleep(Duration::from_secs_f64(secs)) => {}
                () = cancel.cancelled() => {
                    stdout.push(b"partial\n");
                    cancelled = true;
                    exit_code = -1;
                }
            }
        }
        other => {
            stderr.push(format!("{}: command not found\n", other.unwrap_or_default()).as_bytes());
            exit_code = 127;
        }
    }

    let (stdout, out_cut) = stdout.finish();
    let (stderr, err_cut) = stderr.finish();
    ExecResult {
        id: new_exec_id(),
        exit_code,
        stdout,
        stderr,
        duration: started.elapsed(),
        truncated: out_cut || err_cut,
        cancelled,
        timed_out: false,
    }
}

#[async_trait]
impl Backend for FakeBackend {
    async fn ping(&self) -> Result<()> {
        Ok(())
    }

    async fn create_session(&self, opts: SessionOptions) -> Result<Arc<Session>> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        if !self.create_delay.is_zero() {
            tokio::time::sleep(self.create_delay).await;
        }
        if self.fail_create.load(Ordering::SeqCst) {
            return Err(SandboxError::new(
                "CreateSession",
                "",
                ErrorKind::ImagePull {
                    image: opts.image.unwrap_or_default(),
                    message: "injected failure".to_string(),
                },
            ));
        }

        let id = new_session_id();
        let workspace_path = workspace::create_workspace(self.base.path(), &id)
            .map_err(|e| SandboxError::new("CreateSession", &id, e))?;
        *self.last_labels.lock().unwrap() = opts.labels.clone();

        let session = Arc::new(Session::new(
            id.clone(),
            format!("fake-{id}"),
            opts.image.unwrap_or_else(|| "python:3.11-slim".to_string()),
            opts.workdir.unwrap_or_else(|| "/workspace".to_string()),
            workspace_path,
            opts.env,
            opts.limits.unwrap_or_default(),
            Utc::now(),
        ));
        self.sessions.lock().unwrap().insert(id, Arc::clone(&session));
        Ok(session)
    }

    async fn get_session(&self, session_id: &str) -> Result<Arc<Session>> {
        self.session("GetSession", session_id)
    }

    async fn destroy_session(&self, session_id: &str) -> Result<()> {
        let call = self.destroy_calls.fetch_add(1, Ordering::SeqCst) + 1;
        if *self.fail_destroy_call.lock().unwrap() == Some(call) {
            return Err(SandboxError::new(
                "DestroySession",
                session_id,
                std::io::Error::other("injected failure"),
            ));
        }
        let session = self
            .sessions
            .lock()
            .unwrap()
            .remove(session_id)
            .ok_or_else(|| SandboxError::session_not_found("DestroySession", session_id))?;
        self.execs
            .lock()
            .unwrap()
            .retain(|_, s| s.handle.session_id != session_id);
        workspace::remove_workspace(&session.workspace_path)
            .map_err(|e| SandboxError::new("DestroySession", session_id, e))
    }

    async fn exec(
        &self,
        session_id: &str,
        req: ExecRequest,
        cancel: &CancelToken,
    ) -> Result<ExecResult> {
        self.session("Exec", session_id)?;
        Ok(run_script(&req.cmd, cancel, self.max_output_bytes).await)
    }

    async fn exec_async(&self, session_id: &str, req: ExecRequest) -> Result<ExecHandle> {
        self.session("ExecAsync", session_id)?;
        let handle = ExecHandle {
            id: new_exec_id(),
            session_id: session_id.to_string(),
            cmd: req.cmd.clone(),
            started_at: Utc::now(),
        };
        let state = Arc::new(ExecState::new(handle.clone()));
        self.execs
            .lock()
            .unwrap()
            .insert(handle.id.clone(), Arc::clone(&state));

        let max = self.max_output_bytes;
        tokio::spawn(async move {
            let mut result = run_script(&req.cmd, &CancelToken::new(), max).await;
            state.append(&result.stdout, &result.stderr);
            result.id = state.handle.id.clone();
            state.finish(result);
        });
        Ok(handle)
    }

    async fn exec_wait(
        &self,
        session_id: &str,
        exec_id: &str,
        timeout: Duration,
        cancel: &CancelToken,
    ) -> Result<ExecResult> {
        let state = self.exec_state("ExecWait", session_id, exec_id)?;
        let result = state
            .wait(timeout, cancel)
            .await
            .map_err(|kind| SandboxError::new("ExecWait", session_id, kind))?;
        self.execs.lock().unwrap().remove(exec_id);
        Ok(result)
    }

    async fn exec_read(
        &self,
        session_id: &str,
        exec_id: &str,
        since_seq: i64,
        max_chunks: usize,
    ) -> Result<ExecChunks> {
        let state = self.exec_state("ExecRead", session_id, exec_id)?;
        Ok(state.read(since_seq, max_chunks))
    }

    async fn write_file(
        &self,
        session_id: &str,
        path: &str,
        content: &[u8],
        mode: u32,
    ) -> Result<()> {
        let session = self.session("WriteFile", session_id)?;
        workspace::write_file(&session.workspace_path, path, content, mode)
            .map_err(|kind| SandboxError::new("WriteFile", session_id, kind))
    }

    async fn read_file(
        &self,
        session_id: &str,
        path: &str,
        max_bytes: usize,
    ) -> Result<(Vec<u8>, bool)> {
        let session = self.session("ReadFile", session_id)?;
        let limit = if max_bytes == 0 {
            self.max_file_read_bytes
        } else {
            max_bytes
        };
        workspace::read_file(&session.workspace_path, path, limit)
            .map_err(|kind| SandboxError::new("ReadFile", session_id, kind))
    }

    async fn list_files(
        &self,
        session_id: &str,
        path: &str,
        recursive: bool,
    ) -> Result<Vec<FileEntry>> {
        let session = self.session("ListFiles", session_id)?;
        workspace::list_files(&session.workspace_path, path, recursive)
            .map_err(|kind| SandboxError::new("ListFiles", session_id, kind))
    }

    async fn delete_file(&self, session_id: &str, path: &str, recursive: bool) -> Result<()> {
        let session = self.session("DeleteFile", session_id)?;
        workspace::delete_file(&session.workspace_path, path, recursive)
            .map_err(|kind| SandboxError::new("DeleteFile", session_id, kind))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fake_backend_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<FakeBackend>();
    }

    #[tokio::test]
    async fn test_cancelled_exec_shape() {
        let backend = FakeBackend::new();
        let session = backend.create_session(SessionOptions::default()).await.unwrap();
        let cancel = CancelToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let result = backend
            .exec(&session.id, ExecRequest::new(["sleep", "30"]), &cancel)
            .await
            .unwrap();
        assert!(result.cancelled);
        assert_eq!(result.exit_code, -1);
        assert_eq!(result.stdout, "partial\n");
    }

    #[tokio::test]
    async fn test_destroy_removes_workspace() {
        let backend = FakeBackend::new();
        let session = backend.create_session(SessionOptions::default()).await.unwrap();
        assert!(session.workspace_path.is_dir());

        backend.destroy_session(&session.id).await.unwrap();
        assert!(!session.workspace_path.exists());

        let err = backend.destroy_session(&session.id).await.unwrap_err();
        assert!(err.is_session_not_found());
        assert_eq!(backend.destroy_calls(), 2);
    }

    #[tokio::test]
    async fn test_read_file_zero_uses_default_limit() {
        let mut backend = FakeBackend::new();
        backend.max_file_read_bytes = 4;
        let session = backend.create_session(SessionOptions::default()).await.unwrap();
        backend
            .write_file(&session.id, "f.txt", b"abcdefgh", 0o644)
            .await
            .unwrap();

        let (content, truncated) = backend.read_file(&session.id, "f.txt", 0).await.unwrap();
        assert_eq!(content, b"abcd");
        assert!(truncated);

        let (content, truncated) = backend.read_file(&session.id, "f.txt", 100).await.unwrap();
        assert_eq!(content, b"abcdefgh");
        assert!(!truncated);
    }

    #[tokio::test]
    async fn test_exec_wait_consumes_and_read_of_other_session_fails() {
        let backend = FakeBackend::new();
        let a = backend.create_session(SessionOptions::default()).await.unwrap();
        let b = backend.create_session(SessionOptions::default()).await.unwrap();

        let handle = backend
            .exec_async(&a.id, ExecRequest::new(["echo", "hi"]))
            .await
            .unwrap();

        let err = backend.exec_read(&b.id, &handle.id, -1, 0).await.unwrap_err();
        assert!(err.is_not_found());

        let result = backend
            .exec_wait(&a.id, &handle.id, Duration::from_secs(5), &CancelToken::new())
            .await
            .unwrap();
        assert_eq!(result.stdout, "hi\n");
        assert_eq!(result.id, handle.id);

        let err = backend.exec_read(&a.id, &handle.id, -1, 0).await.unwrap_err();
        assert!(err.is_not_found());
    }
}
