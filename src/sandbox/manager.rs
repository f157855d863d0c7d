//! Maps execution contexts to live sessions.
//!
//! The manager is the only owner of the key -> session mapping. Creation is
//! serialized per key: concurrent callers asking for the same key share one
//! backend `create_session`, while different keys proceed in parallel.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::backend::Backend;
use super::docker::KEY_LABEL;
use super::error::{Result, SandboxError};
use super::types::{Session, SessionKey, SessionOptions};

type Gate = Arc<tokio::sync::Mutex<()>>;

/// Floor for the sweep period; a zero interval would spin.
const MIN_SWEEP_INTERVAL: Duration = Duration::from_millis(1);

/// Concurrency-safe registry of sessions by [`SessionKey`].
pub struct SessionManager {
    backend: Arc<dyn Backend>,
    sessions: Mutex<HashMap<SessionKey, Arc<Session>>>,
    gates: Mutex<HashMap<SessionKey, Gate>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl SessionManager {
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        Self {
            backend,
            sessions: Mutex::new(HashMap::new()),
            gates: Mutex::new(HashMap::new()),
        }
    }

    /// The backend sessions are dispatched to.
    pub fn backend(&self) -> &Arc<dyn Backend> {
        &self.backend
    }

    fn registered(&self, key: &SessionKey) -> Option<Arc<Session>> {
        lock(&self.sessions).get(key).cloned()
    }

    fn gate(&self, key: &SessionKey) -> Gate {
        Arc::clone(lock(&self.gates).entry(key.clone()).or_default())
    }

    /// Drops the key's gate once nobody else holds it.
    fn release_gate(&self, key: &SessionKey) {
        let mut gates = lock(&self.gates);
        if gates.get(key).is_some_and(|g| Arc::strong_count(g) == 1) {
            gates.remove(key);
        }
    }

    /// Returns the live session for `key`, creating one if needed.
    ///
    /// The flag is true when this call created the session.
    pub async fn get_or_create_session(
        &self,
        key: &SessionKey,
        opts: SessionOptions,
    ) -> Result<(Arc<Session>, bool)> {
        if let Some(session) = self.registered(key) {
            return Ok((session, false));
        }

        let gate = self.gate(key);
        let result = {
            let _guard = gate.lock().await;
            match self.registered(key) {
                Some(session) => Ok((session, false)),
                None => self.create(key, opts).await.map(|session| (session, true)),
            }
        };
        drop(gate);
        self.release_gate(key);
        result
    }

    async fn create(&self, key: &SessionKey, mut opts: SessionOptions) -> Result<Arc<Session>> {
        opts.labels.insert(KEY_LABEL.to_string(), key.to_string());
        let session = self.backend.create_session(opts).await?;
        info!("Session {} created for {}", session.id, key);
        lock(&self.sessions).insert(key.clone(), Arc::clone(&session));
        Ok(session)
    }

    /// Looks a live session up by its id.
    pub fn get_session_by_id(&self, session_id: &str) -> Result<Arc<Session>> {
        lock(&self.sessions)
            .values()
            .find(|s| s.id == session_id)
            .cloned()
            .ok_or_else(|| SandboxError::session_not_found("GetSessionByID", session_id))
    }

    /// Unregisters `key` and destroys its session.
    pub async fn destroy_session(&self, key: &SessionKey) -> Result<()> {
        if self.destroy_gated(key).await? {
            Ok(())
        } else {
            Err(SandboxError::session_not_found(
                "DestroySession",
                key.to_string(),
            ))
        }
    }

    /// Destroys the session registered for `key` while holding the key's
    /// gate, so a creation in flight for it completes first. Returns false
    /// when nothing was registered.
    async fn destroy_gated(&self, key: &SessionKey) -> Result<bool> {
        let gate = self.gate(key);
        let result = {
            let _guard = gate.lock().await;
            let session = lock(&self.sessions).remove(key);
            match session {
                Some(session) => {
                    debug!("Destroying session {} for {}", session.id, key);
                    self.backend.destroy_session(&session.id).await.map(|()| true)
                }
                None => Ok(false),
            }
        };
        drop(gate);
        self.release_gate(key);
        result
    }

    /// Destroys the session with the given id, whatever its key.
    pub async fn close_session(&self, session_id: &str) -> Result<()> {
        let key = lock(&self.sessions)
            .iter()
            .find(|(_, s)| s.id == session_id)
            .map(|(k, _)| k.clone())
            .ok_or_else(|| SandboxError::session_not_found("CloseSession", session_id))?;
        self.destroy_session(&key).await
    }

    /// Destroys every session of a workflow run, in any namespace or slot.
    ///
    /// Every session is attempted; the first failure is returned.
    pub async fn cleanup_workflow(&self, workflow_id: &str) -> Result<()> {
        let keys: Vec<SessionKey> = lock(&self.sessions)
            .keys()
            .filter(|k| k.id == workflow_id)
            .cloned()
            .collect();
        if !keys.is_empty() {
            info!("Cleaning up {} session(s) of {}", keys.len(), workflow_id);
        }
        self.destroy_all(keys).await
    }

    /// Destroys sessions idle for longer than `max_idle` and returns how
    /// many were destroyed.
    ///
    /// Every idle session is attempted; the first failure is returned.
    pub async fn cleanup_idle_sessions(&self, max_idle: Duration) -> Result<usize> {
        let now = Utc::now();
        let idle: Vec<SessionKey> = lock(&self.sessions)
            .iter()
            .filter(|(_, s)| {
                (now - s.last_used_at())
                    .to_std()
                    .is_ok_and(|idle_for| idle_for > max_idle)
            })
            .map(|(k, _)| k.clone())
            .collect();

        let mut destroyed = 0;
        let mut first_error = None;
        for key in idle {
            match self.destroy_gated(&key).await {
                Ok(true) => destroyed += 1,
                Ok(false) => {}
                Err(e) => {
                    warn!("Failed to destroy idle session {}: {}", key, e);
                    first_error.get_or_insert(e);
                }
            }
        }
        if destroyed > 0 {
            info!("Destroyed {} idle session(s)", destroyed);
        }
        first_error.map_or(Ok(destroyed), Err)
    }

    /// Destroys every session, including ones still being created. The
    /// registry is empty afterwards.
    pub async fn close(&self) -> Result<()> {
        let mut keys: HashSet<SessionKey> = lock(&self.sessions).keys().cloned().collect();
        keys.extend(lock(&self.gates).keys().cloned());
        self.destroy_all(keys).await
    }

    async fn destroy_all(&self, keys: impl IntoIterator<Item = SessionKey>) -> Result<()> {
        let mut first_error = None;
        for key in keys {
            if let Err(e) = self.destroy_gated(&key).await {
                warn!("Failed to destroy session for {}: {}", key, e);
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    /// Number of registered sessions.
    pub fn count(&self) -> usize {
        lock(&self.sessions).len()
    }

    /// Runs [`cleanup_idle_sessions`](Self::cleanup_idle_sessions) every
    /// `interval` until the returned sweeper is shut down.
    pub fn spawn_idle_sweeper(
        self: &Arc<Self>,
        max_idle: Duration,
        interval: Duration,
    ) -> IdleSweeper {
        let (shutdown_tx, mut shutdown) = watch::channel(false);
        let manager = Arc::clone(self);
        let task = tokio::spawn(async move {
            let mut tick = tokio::time::interval(interval.max(MIN_SWEEP_INTERVAL));
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick fires immediately.
            tick.tick().await;
            loop {
                tokio::select! {
                    _ = tick.tick() => {
                        if let Err(e) = manager.cleanup_idle_sessions(max_idle).await {
                            warn!("Idle sweep failed: {}", e);
                        }
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
            debug!("Idle sweeper stopped");
        });
        IdleSweeper { shutdown_tx, task }
    }
}

/// Handle to a running idle sweeper.
pub struct IdleSweeper {
    shutdown_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl IdleSweeper {
    /// Stops the sweeper and waits for it to exit.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        if let Err(e) = self.task.await {
            warn!("Idle sweeper task failed: {}", e);
        }
    }
}
