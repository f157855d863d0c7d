//! Domain-specific error types for sandbox operations.
//!
//! Every failure surfaced by a backend is a [`SandboxError`] carrying the
//! operation name and session id, so callers can log and classify failures
//! by matching on [`ErrorKind`] rather than parsing message strings.

/// What went wrong, independent of where.
#[derive(Debug, thiserror::Error)]
pub enum ErrorKind {
    /// Requested image is not on the configured allow-list.
    #[error("image not allowed: {image}")]
    ImageNotAllowed { image: String },

    /// Image pull failed; the engine's message is kept verbatim.
    #[error("failed to pull image {image}: {message}")]
    ImagePull { image: String, message: String },

    /// No live session with this id.
    #[error("session not found")]
    SessionNotFound,

    /// The session's container is no longer running.
    #[error("session closed")]
    SessionClosed,

    /// No tracked async exec with this id in this session.
    #[error("exec not found: {exec_id}")]
    ExecNotFound { exec_id: String },

    /// A wait gave up before the exec finished.
    #[error("timed out after {timeout_ms} ms")]
    Timeout { timeout_ms: u64 },

    /// The caller cancelled the operation.
    #[error("operation cancelled")]
    Cancelled,

    /// A file path resolved outside the session workspace.
    #[error("path escapes workspace: {path}")]
    PathOutsideWorkspace { path: String },

    /// A file operation that is not permitted on this path.
    #[error("invalid path {path}: {reason}")]
    InvalidPath { path: String, reason: String },

    /// The command could not be run as requested.
    #[error("exec failed: {reason}")]
    Exec { reason: String },

    /// Container engine failure.
    #[error("container engine error: {0}")]
    Engine(#[from] bollard::errors::Error),

    /// Host filesystem failure.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// A failed backend operation, tagged with the operation and session.
#[derive(Debug, thiserror::Error)]
#[error("{op} (session {session}): {kind}")]
pub struct SandboxError {
    /// Operation name, e.g. `"CreateSession"`.
    pub op: &'static str,
    /// Session id, empty when no session exists yet.
    pub session: String,
    /// The underlying failure.
    pub kind: ErrorKind,
}

impl SandboxError {
    /// Creates an error for `op` on `session`.
    pub fn new(op: &'static str, session: impl Into<String>, kind: impl Into<ErrorKind>) -> Self {
        Self {
            op,
            session: session.into(),
            kind: kind.into(),
        }
    }

    /// Creates a `SessionNotFound` error.
    pub fn session_not_found(op: &'static str, session: impl Into<String>) -> Self {
        Self::new(op, session, ErrorKind::SessionNotFound)
    }

    /// Creates an `ExecNotFound` error.
    pub fn exec_not_found(
        op: &'static str,
        session: impl Into<String>,
        exec_id: impl Into<String>,
    ) -> Self {
        Self::new(
            op,
            session,
            ErrorKind::ExecNotFound {
                exec_id: exec_id.into(),
            },
        )
    }

    /// Creates an `Exec` error.
    pub fn exec_failed(
        op: &'static str,
        session: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::new(
            op,
            session,
            ErrorKind::Exec {
                reason: reason.into(),
            },
        )
    }

    /// Returns true if the session or exec does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self.kind,
            ErrorKind::SessionNotFound | ErrorKind::ExecNotFound { .. }
        )
    }

    /// Returns true if this is a session-not-found error.
    pub fn is_session_not_found(&self) -> bool {
        matches!(self.kind, ErrorKind::SessionNotFound)
    }

}

/// Result alias for backend operations.
pub type Result<T, E = SandboxError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_includes_op_and_session() {
        let err = SandboxError::session_not_found("GetSession", "abc123");
        assert_eq!(
            err.to_string(),
            "GetSession (session abc123): session not found"
        );
    }

    #[test]
    fn test_image_not_allowed_error() {
        let err = SandboxError::new(
            "CreateSession",
            "",
            ErrorKind::ImageNotAllowed {
                image: "alpine:latest".to_string(),
            },
        );
        assert!(matches!(err.kind, ErrorKind::ImageNotAllowed { .. }));
        assert!(!err.is_not_found());
        assert!(err.to_string().contains("image not allowed: alpine:latest"));
    }

    #[test]
    fn test_io_error_converts() {
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let err = SandboxError::new("WriteFile", "s1", io);
        assert!(matches!(err.kind, ErrorKind::Io(_)));
        assert!(err.to_string().contains("denied"));
    }

    #[test]
    fn test_error_variants_are_distinct() {
        let missing = SandboxError::session_not_found("DestroySession", "s1");
        let exec = SandboxError::exec_not_found("ExecRead", "s1", "e1");
        let path = SandboxError::new(
            "DeleteFile",
            "s1",
            ErrorKind::InvalidPath {
                path: ".".to_string(),
                reason: "cannot delete workspace root".to_string(),
            },
        );

        assert!(missing.is_not_found());
        assert!(missing.is_session_not_found());

        assert!(exec.is_not_found());
        assert!(!exec.is_session_not_found());

        assert!(!path.is_not_found());
        assert!(path.to_string().contains("cannot delete workspace root"));
    }
}
