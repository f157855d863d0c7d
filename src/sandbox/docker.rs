//! Docker-backed sandbox sessions.
//!
//! Each session is a long-lived container idling on `tail -f /dev/null`
//! with a host directory bind-mounted at its working directory. Commands
//! run through `docker exec`; file operations go straight to the host
//! directory.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use bollard::container::{
    Config as ContainerConfig, CreateContainerOptions, InspectContainerOptions,
    ListContainersOptions, LogOutput, RemoveContainerOptions,
};
use bollard::errors::Error as BollardError;
use bollard::exec::{CreateExecOptions, StartExecResults};
use bollard::models::ContainerSummary;
use bollard::Docker;
use chrono::Utc;
use futures_util::{Stream, StreamExt};
use tracing::{debug, info, warn};

use super::backend::Backend;
use super::cancel::CancelToken;
use super::error::{ErrorKind, Result, SandboxError};
use super::network::NetworkPolicy;
use super::output::{ExecState, PendingText, StreamCapture};
use super::registry::{self, ensure_image, is_image_allowed, runtime_to_image};
use super::types::{
    flatten_env, new_exec_id, new_session_id, ExecChunks, ExecHandle, ExecRequest, ExecResult,
    FileEntry, ResourceLimits, Session, SessionOptions,
};
use super::workspace;
use crate::config::SandboxConfig;

/// Label carrying the session id on every sandbox container.
pub const SESSION_LABEL: &str = "agent-sandbox.session";

/// Label carrying the session key, set by the manager.
pub const KEY_LABEL: &str = "agent-sandbox.key";

/// How often a background exec publishes buffered output.
const FLUSH_INTERVAL: Duration = Duration::from_millis(100);

/// Upper bound on the best-effort kill after a cancelled exec.
const KILL_TIMEOUT: Duration = Duration::from_secs(5);

/// Exit status `timeout(1)` reports when the deadline fired.
const TIMEOUT_EXIT_CODE: i64 = 124;

type OutputStream =
    Pin<Box<dyn Stream<Item = std::result::Result<LogOutput, BollardError>> + Send>>;

/// Byte caps for the two output streams of an exec.
#[derive(Debug, Clone, Copy)]
struct OutputLimits {
    stdout: usize,
    stderr: usize,
}

/// Runs sandbox sessions as local Docker containers.
pub struct DockerBackend {
    docker: Docker,
    config: SandboxConfig,
    sessions: RwLock<HashMap<String, Arc<Session>>>,
    execs: RwLock<HashMap<String, Arc<ExecState>>>,
}

impl DockerBackend {
    /// Connects to the local Docker daemon.
    pub fn connect(config: SandboxConfig) -> Result<Self> {
        let docker = Docker::connect_with_local_defaults()
            .map_err(|e| SandboxError::new("Connect", "", e))?;
        Ok(Self::with_client(docker, config))
    }

    pub fn with_client(docker: Docker, config: SandboxConfig) -> Self {
        Self {
            docker,
            config,
            sessions: RwLock::new(HashMap::new()),
            execs: RwLock::new(HashMap::new()),
        }
    }

    fn output_limits(&self) -> OutputLimits {
        OutputLimits {
            stdout: self.config.max_stdout_bytes,
            stderr: self.config.max_stderr_bytes,
        }
    }

    /// Removes sandbox containers this backend did not create, together
    /// with their workspace directories, and returns how many were removed.
    ///
    /// These are left behind when a process dies without closing its
    /// sessions. Sessions of other processes sharing the engine look the
    /// same and are removed too.
    pub async fn reap_orphans(&self) -> Result<usize> {
        const OP: &str = "ReapOrphans";

        let containers = self
            .docker
            .list_containers(Some(ListContainersOptions {
                all: true,
                filters: orphan_filters(),
                ..Default::default()
            }))
            .await
            .map_err(|e| SandboxError::new(OP, "", e))?;
        let live: HashSet<String> = self
            .sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();

        let orphans = orphaned(&containers, &live);
        for orphan in &orphans {
            info!(
                "Removing orphaned container {} of session {}",
                orphan.container_id, orphan.session_id
            );
            self.remove_container(&orphan.container_id).await;
            if let Some(dir) = orphan_workspace(&self.config.workspace_base_dir, &orphan.session_id)
            {
                if let Err(e) = workspace::remove_workspace(&dir) {
                    warn!("Failed to remove workspace {}: {}", dir.display(), e);
                }
            }
        }
        Ok(orphans.len())
    }

    /// Looks a session up without asking the engine, bumping its idle clock.
    fn lookup(&self, op: &'static str, session_id: &str) -> Result<Arc<Session>> {
        let sessions = self.sessions.read().unwrap_or_else(PoisonError::into_inner);
        let session = sessions
            .get(session_id)
            .cloned()
            .ok_or_else(|| SandboxError::session_not_found(op, session_id))?;
        session.touch();
        Ok(session)
    }

    /// Like [`lookup`](Self::lookup), but also requires a running container.
    async fn running(&self, op: &'static str, session_id: &str) -> Result<Arc<Session>> {
        let session = self.lookup(op, session_id)?;
        let inspect = self
            .docker
            .inspect_container(&session.container_id, None::<InspectContainerOptions>)
            .await;
        match inspect {
            Ok(info) if info.state.as_ref().and_then(|s| s.running) == Some(true) => {
                Ok(session)
            }
            Ok(_) => Err(SandboxError::new(op, session_id, ErrorKind::SessionClosed)),
            Err(e) if registry::is_not_found(&e) => {
                Err(SandboxError::new(op, session_id, ErrorKind::SessionClosed))
            }
            Err(e) => Err(SandboxError::new(op, session_id, e)),
        }
    }

    fn exec_state(
        &self,
        op: &'static str,
        session_id: &str,
        exec_id: &str,
    ) -> Result<Arc<ExecState>> {
        let execs = self.execs.read().unwrap_or_else(PoisonError::into_inner);
        execs
            .get(exec_id)
            .filter(|state| state.handle.session_id == session_id)
            .cloned()
            .ok_or_else(|| SandboxError::exec_not_found(op, session_id, exec_id))
    }

    /// Creates and starts the container. Removes it again if start fails.
    async fn start_container(
        &self,
        session_id: &str,
        config: ContainerConfig<String>,
    ) -> std::result::Result<String, BollardError> {
        let name = format!("sandbox-{session_id}");
        debug!("Creating container: {}", name);
        let created = self
            .docker
            .create_container(
                Some(CreateContainerOptions {
                    name: name.clone(),
                    platform: None,
                }),
                config,
            )
            .await?;

        debug!("Starting container: {}", name);
        if let Err(e) = self
            .docker
            .start_container::<String>(&created.id, None)
            .await
        {
            self.remove_container(&created.id).await;
            return Err(e);
        }
        Ok(created.id)
    }

    /// Force-removes a container, logging failures.
    async fn remove_container(&self, container_id: &str) {
        let removed = self
            .docker
            .remove_container(
                container_id,
                Some(RemoveContainerOptions {
                    force: true,
                    v: true,
                    ..Default::default()
                }),
            )
            .await;
        if let Err(e) = removed {
            if !registry::is_not_found(&e) {
                warn!("Failed to remove container {}: {}", container_id, e);
            }
        }
    }

    /// Creates an attached exec and starts it.
    async fn start_attached(
        &self,
        op: &'static str,
        session: &Session,
        cmd: Vec<String>,
        working_dir: String,
        env: Vec<String>,
    ) -> Result<(String, OutputStream)> {
        let exec = self
            .docker
            .create_exec(
                &session.container_id,
                CreateExecOptions {
                    cmd: Some(cmd),
                    attach_stdout: Some(true),
                    attach_stderr: Some(true),
                    working_dir: Some(working_dir),
                    env: Some(env),
                    ..Default::default()
                },
            )
            .await
            .map_err(|e| SandboxError::new(op, &session.id, e))?;

        match self
            .docker
            .start_exec(&exec.id, None)
            .await
            .map_err(|e| SandboxError::new(op, &session.id, e))?
        {
            StartExecResults::Attached { output, .. } => Ok((exec.id, output)),
            StartExecResults::Detached => Err(SandboxError::exec_failed(
                op,
                &session.id,
                "exec started detached",
            )),
        }
    }

    /// Command line, working directory and env for an exec request.
    fn prepare(
        &self,
        op: &'static str,
        session: &Session,
        req: &ExecRequest,
    ) -> Result<(Vec<String>, String, Vec<String>)> {
        if req.cmd.is_empty() {
            return Err(SandboxError::exec_failed(op, &session.id, "empty command"));
        }
        let timeout = req
            .timeout_seconds
            .filter(|t| *t > 0)
            .unwrap_or(self.config.default_timeout_secs);
        Ok((
            build_exec_command(&req.cmd, timeout),
            resolve_cwd(&session.workdir, req.cwd.as_deref()),
            flatten_env(&req.env),
        ))
    }

    /// Best-effort kill of a cancelled command, bounded by [`KILL_TIMEOUT`].
    async fn kill_command(&self, session: &Session, cmd: &[String]) {
        let kill = vec![
            "pkill".to_string(),
            "-KILL".to_string(),
            "-f".to_string(),
            pkill_pattern(cmd),
        ];
        let attempt = async {
            let (_, mut output) = self
                .start_attached("Kill", session, kill, session.workdir.clone(), Vec::new())
                .await?;
            while output.next().await.is_some() {}
            Ok::<_, SandboxError>(())
        };
        match tokio::time::timeout(KILL_TIMEOUT, attempt).await {
            Ok(Ok(())) => debug!("Killed cancelled command in session {}", session.id),
            Ok(Err(e)) => warn!("Failed to kill cancelled command: {}", e),
            Err(_) => warn!("Timed out killing cancelled command in session {}", session.id),
        }
    }

    async fn exit_code(&self, engine_exec_id: &str) -> std::result::Result<i64, BollardError> {
        let inspect = self.docker.inspect_exec(engine_exec_id).await?;
        Ok(inspect.exit_code.unwrap_or(-1))
    }
}

#[async_trait]
impl Backend for DockerBackend {
    async fn ping(&self) -> Result<()> {
        self.docker
            .ping()
            .await
            .map(|_| ())
            .map_err(|e| SandboxError::new("Ping", "", e))
    }

    async fn create_session(&self, opts: SessionOptions) -> Result<Arc<Session>> {
        const OP: &str = "CreateSession";

        let image = opts
            .image
            .as_deref()
            .filter(|i| !i.is_empty())
            .map_or_else(|| self.config.default_image.clone(), runtime_to_image);
        if !is_image_allowed(&image, &self.config.allowed_images) {
            return Err(SandboxError::new(OP, "", ErrorKind::ImageNotAllowed { image }));
        }
        ensure_image(
            &self.docker,
            &image,
            registry::credentials(&self.config.registry_auth),
        )
        .await
        .map_err(|kind| SandboxError::new(OP, "", kind))?;

        let id = new_session_id();
        let workdir = opts
            .workdir
            .filter(|w| !w.is_empty())
            .unwrap_or_else(|| self.config.default_workdir.clone());
        let limits = opts.limits.unwrap_or_else(|| self.config.limits());
        let network = NetworkPolicy::from_allowed(
            opts.allow_network
                .unwrap_or(self.config.allow_network_by_default),
        );

        let workspace_path = workspace::create_workspace(&self.config.workspace_base_dir, &id)
            .map_err(|e| SandboxError::new(OP, &id, e))?;

        let mut labels = opts.labels;
        labels.insert(SESSION_LABEL.to_string(), id.clone());
        let config = container_config(ContainerParams {
            image: &image,
            workdir: &workdir,
            workspace: &workspace_path,
            env: flatten_env(&opts.env),
            limits,
            network,
            labels: labels.into_iter().collect(),
        });

        let container_id = match self.start_container(&id, config).await {
            Ok(container_id) => container_id,
            Err(e) => {
                if let Err(cleanup) = workspace::remove_workspace(&workspace_path) {
                    warn!("Failed to remove workspace {}: {}", workspace_path.display(), cleanup);
                }
                return Err(SandboxError::new(OP, &id, e));
            }
        };

        info!(
            "Created session {} (image {}, network {})",
            id, image, network
        );
        let session = Arc::new(Session::new(
            id.clone(),
            container_id,
            image,
            workdir,
            workspace_path,
            opts.env,
            limits,
            Utc::now(),
        ));
        self.sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, Arc::clone(&session));
        Ok(session)
    }

    async fn get_session(&self, session_id: &str) -> Result<Arc<Session>> {
        self.running("GetSession", session_id).await
    }

    async fn destroy_session(&self, session_id: &str) -> Result<()> {
        const OP: &str = "DestroySession";

        let session = self
            .sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(session_id)
            .ok_or_else(|| SandboxError::session_not_found(OP, session_id))?;
        self.execs
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|_, state| state.handle.session_id != session_id);

        self.remove_container(&session.container_id).await;
        workspace::remove_workspace(&session.workspace_path)
            .map_err(|e| SandboxError::new(OP, session_id, e))?;

        info!("Destroyed session {}", session_id);
        Ok(())
    }

    async fn exec(
        &self,
        session_id: &str,
        req: ExecRequest,
        cancel: &CancelToken,
    ) -> Result<ExecResult> {
        const OP: &str = "Exec";

        let session = self.running(OP, session_id).await?;
        let (cmd, cwd, env) = self.prepare(OP, &session, &req)?;
        let started = Instant::now();
        debug!("exec in {}: {:?}", session_id, req.cmd);

        let (engine_exec_id, output) = self.start_attached(OP, &session, cmd, cwd, env).await?;

        let mut result = read_foreground(
            engine_exec_id.clone(),
            output,
            self.output_limits(),
            cancel,
            started,
        )
        .await
        .map_err(|e| SandboxError::new(OP, session_id, e))?;

        if result.cancelled {
            info!("exec in {} cancelled; killing {:?}", session_id, req.cmd);
            self.kill_command(&session, &req.cmd).await;
            return Ok(result);
        }

        result.exit_code = self
            .exit_code(&engine_exec_id)
            .await
            .map_err(|e| SandboxError::new(OP, session_id, e))?;
        result.timed_out = result.exit_code == TIMEOUT_EXIT_CODE;
        debug!(
            "exec in {} finished: exit {} in {:?}",
            session_id, result.exit_code, result.duration
        );
        Ok(result)
    }

    async fn exec_async(&self, session_id: &str, req: ExecRequest) -> Result<ExecHandle> {
        const OP: &str = "ExecAsync";

        let session = self.running(OP, session_id).await?;
        let (cmd, cwd, env) = self.prepare(OP, &session, &req)?;
        let started = Instant::now();
        let (engine_exec_id, output) = self.start_attached(OP, &session, cmd, cwd, env).await?;

        let handle = ExecHandle {
            id: new_exec_id(),
            session_id: session_id.to_string(),
            cmd: req.cmd,
            started_at: Utc::now(),
        };
        let state = Arc::new(ExecState::new(handle.clone()));
        self.execs
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(handle.id.clone(), Arc::clone(&state));

        let collector = Collector {
            docker: self.docker.clone(),
            engine_exec_id,
            state,
            limits: self.output_limits(),
            started,
        };
        tokio::spawn(collector.run(output));

        info!("Started exec {} in session {}", handle.id, session_id);
        Ok(handle)
    }

    async fn exec_wait(
        &self,
        session_id: &str,
        exec_id: &str,
        timeout: Duration,
        cancel: &CancelToken,
    ) -> Result<ExecResult> {
        const OP: &str = "ExecWait";

        let state = self.exec_state(OP, session_id, exec_id)?;
        let result = state
            .wait(timeout, cancel)
            .await
            .map_err(|kind| SandboxError::new(OP, session_id, kind))?;
        self.execs
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(exec_id);
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
        const OP: &str = "WriteFile";
        let session = self.lookup(OP, session_id)?;
        workspace::write_file(&session.workspace_path, path, content, mode)
            .map_err(|kind| SandboxError::new(OP, session_id, kind))
    }

    async fn read_file(
        &self,
        session_id: &str,
        path: &str,
        max_bytes: usize,
    ) -> Result<(Vec<u8>, bool)> {
        const OP: &str = "ReadFile";
        let session = self.lookup(OP, session_id)?;
        let limit = if max_bytes == 0 {
            self.config.max_file_read_bytes
        } else {
            max_bytes
        };
        workspace::read_file(&session.workspace_path, path, limit)
            .map_err(|kind| SandboxError::new(OP, session_id, kind))
    }

    async fn list_files(
        &self,
        session_id: &str,
        path: &str,
        recursive: bool,
    ) -> Result<Vec<FileEntry>> {
        const OP: &str = "ListFiles";
        let session = self.lookup(OP, session_id)?;
        workspace::list_files(&session.workspace_path, path, recursive)
            .map_err(|kind| SandboxError::new(OP, session_id, kind))
    }

    async fn delete_file(&self, session_id: &str, path: &str, recursive: bool) -> Result<()> {
        const OP: &str = "DeleteFile";
        let session = self.lookup(OP, session_id)?;
        workspace::delete_file(&session.workspace_path, path, recursive)
            .map_err(|kind| SandboxError::new(OP, session_id, kind))
    }
}

/// Reads a foreground exec's output until the stream ends or `cancel`
/// fires. The exit code is left at -1 for the caller to fill in.
async fn read_foreground(
    id: String,
    mut output: OutputStream,
    limits: OutputLimits,
    cancel: &CancelToken,
    started: Instant,
) -> std::result::Result<ExecResult, BollardError> {
    let mut stdout = StreamCapture::new(limits.stdout);
    let mut stderr = StreamCapture::new(limits.stderr);
    let mut cancelled = false;
    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => {
                cancelled = true;
                break;
            }
            item = output.next() => match item {
                Some(Ok(LogOutput::StdOut { message } | LogOutput::Console { message })) => {
                    stdout.push(&message);
                }
                Some(Ok(LogOutput::StdErr { message })) => stderr.push(&message),
                Some(Ok(LogOutput::StdIn { .. })) => {}
                Some(Err(e)) => return Err(e),
                None => break,
            },
        }
    }
    drop(output);

    let (stdout, out_cut) = stdout.finish();
    let (stderr, err_cut) = stderr.finish();
    Ok(ExecResult {
        id,
        exit_code: -1,
        stdout,
        stderr,
        duration: started.elapsed(),
        truncated: out_cut || err_cut,
        cancelled,
        timed_out: false,
    })
}

/// Publishes a background exec's output to `state` every
/// [`FLUSH_INTERVAL`] until the stream ends, and returns the captures for
/// the final result.
async fn collect_background(
    mut output: OutputStream,
    state: &ExecState,
    limits: OutputLimits,
) -> (StreamCapture, StreamCapture) {
    let mut stdout = StreamCapture::new(limits.stdout);
    let mut stderr = StreamCapture::new(limits.stderr);
    let mut pending_out = PendingText::new(limits.stdout);
    let mut pending_err = PendingText::new(limits.stderr);

    let mut tick = tokio::time::interval(FLUSH_INTERVAL);
    tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            item = output.next() => match item {
                Some(Ok(LogOutput::StdOut { message } | LogOutput::Console { message })) => {
                    stdout.push(&message);
                    pending_out.push(&message);
                }
                Some(Ok(LogOutput::StdErr { message })) => {
                    stderr.push(&message);
                    pending_err.push(&message);
                }
                Some(Ok(LogOutput::StdIn { .. })) => {}
                Some(Err(e)) => {
                    warn!("Error reading output of {}: {}", state.handle.id, e);
                    break;
                }
                None => break,
            },
            _ = tick.tick() => {
                state.append(&pending_out.drain(false), &pending_err.drain(false));
            }
        }
    }
    state.append(&pending_out.drain(true), &pending_err.drain(true));
    (stdout, stderr)
}

/// Owns the output stream of one background exec.
struct Collector {
    docker: Docker,
    engine_exec_id: String,
    state: Arc<ExecState>,
    limits: OutputLimits,
    started: Instant,
}

impl Collector {
    async fn run(self, output: OutputStream) {
        let (stdout, stderr) = collect_background(output, &self.state, self.limits).await;

        let exit_code = match self.docker.inspect_exec(&self.engine_exec_id).await {
            Ok(inspect) => inspect.exit_code.unwrap_or(-1),
            Err(e) => {
                warn!("Failed to inspect exec {}: {}", self.state.handle.id, e);
                -1
            }
        };

        let (stdout, out_cut) = stdout.finish();
        let (stderr, err_cut) = stderr.finish();
        self.state.finish(ExecResult {
            id: self.state.handle.id.clone(),
            exit_code,
            stdout,
            stderr,
            duration: self.started.elapsed(),
            truncated: out_cut || err_cut,
            cancelled: false,
            timed_out: exit_code == TIMEOUT_EXIT_CODE,
        });
        debug!("exec {} finished: exit {}", self.state.handle.id, exit_code);
    }
}

/// A labelled sandbox container with no session in this backend.
#[derive(Debug, PartialEq, Eq)]
struct Orphan {
    container_id: String,
    session_id: String,
}

/// Engine-side filter for containers carrying [`SESSION_LABEL`].
fn orphan_filters() -> HashMap<String, Vec<String>> {
    HashMap::from([("label".to_string(), vec![SESSION_LABEL.to_string()])])
}

fn orphaned(containers: &[ContainerSummary], live: &HashSet<String>) -> Vec<Orphan> {
    containers
        .iter()
        .filter_map(|c| {
            let container_id = c.id.clone()?;
            let session_id = c.labels.as_ref()?.get(SESSION_LABEL)?.clone();
            (!live.contains(&session_id)).then_some(Orphan {
                container_id,
                session_id,
            })
        })
        .collect()
}

/// Workspace directory of a session found on a container label. Labels
/// that could name anything but a direct child of `base` are ignored.
fn orphan_workspace(base: &Path, session_id: &str) -> Option<PathBuf> {
    let simple = !session_id.is_empty()
        && session_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    simple.then(|| base.join(session_id))
}

/// Inputs for a session container.
struct ContainerParams<'a> {
    image: &'a str,
    workdir: &'a str,
    workspace: &'a Path,
    env: Vec<String>,
    limits: ResourceLimits,
    network: NetworkPolicy,
    labels: HashMap<String, String>,
}

fn container_config(params: ContainerParams<'_>) -> ContainerConfig<String> {
    let bind = format!("{}:{}:rw", params.workspace.display(), params.workdir);
    ContainerConfig {
        image: Some(params.image.to_string()),
        cmd: Some(vec![
            "tail".to_string(),
            "-f".to_string(),
            "/dev/null".to_string(),
        ]),
        working_dir: Some(params.workdir.to_string()),
        env: Some(params.env),
        labels: Some(params.labels),
        host_config: Some(bollard::service::HostConfig {
            binds: Some(vec![bind]),
            memory: params.limits.memory_bytes(),
            nano_cpus: params.limits.nano_cpus(),
            network_mode: Some(params.network.network_mode().to_string()),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Prefixes the command with an in-container deadline.
fn build_exec_command(cmd: &[String], timeout_secs: u64) -> Vec<String> {
    let mut full = Vec::with_capacity(cmd.len() + 2);
    full.push("timeout".to_string());
    full.push(timeout_secs.to_string());
    full.extend(cmd.iter().cloned());
    full
}

/// Working directory for an exec: the session workdir, an absolute `cwd`,
/// or `cwd` joined onto the workdir.
fn resolve_cwd(workdir: &str, cwd: Option<&str>) -> String {
    match cwd {
        None | Some("") => workdir.to_string(),
        Some(abs) if abs.starts_with('/') => abs.to_string(),
        Some(rel) => format!("{}/{}", workdir.trim_end_matches('/'), rel),
    }
}

/// Extended-regex pattern matching the command line, for `pkill -f`.
fn pkill_pattern(cmd: &[String]) -> String {
    let joined = cmd.join(" ");
    let mut pattern = String::with_capacity(joined.len());
    for c in joined.chars() {
        if "\\.^$*+?()[]{}|".contains(c) {
            pattern.push('\\');
        }
        pattern.push(c);
    }
    pattern
}
