//! Docker sandbox sessions for isolated command execution.
//!
//! A [`SessionManager`] maps execution contexts to long-lived containers
//! provided by a [`Backend`]; [`DockerBackend`] is the engine adapter.

mod backend;
mod cancel;
mod docker;
mod error;
#[cfg(test)]
pub(crate) mod fake;
mod manager;
mod network;
mod output;
mod registry;
mod types;
pub mod workspace;

pub use backend::Backend;
pub use cancel::CancelToken;
pub use docker::DockerBackend;
pub use error::{ErrorKind, Result, SandboxError};
pub use manager::{IdleSweeper, SessionManager};
pub use network::NetworkPolicy;
pub use registry::{is_image_allowed, runtime_to_image};
pub use types::{
    new_session_id, ExecChunks, ExecHandle, ExecRequest, ExecResult, FileEntry, FileType,
    Namespace, OutputChunk, OutputStream, ResourceLimits, Session, SessionKey, SessionOptions,
    DEFAULT_SLOT,
};
