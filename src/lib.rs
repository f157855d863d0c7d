//! Isolated, persistent Docker sandboxes for AI agent runs.
//!
//! An agent run asks for a sandbox by its execution context; the
//! [`sandbox::SessionManager`] hands back a long-lived container with a
//! bind-mounted workspace, reusing it for every later call from the same
//! workflow. Commands run synchronously or in the background with streamed
//! output, and files are read and written directly in the host-side
//! workspace. [`tools::SandboxTools`] exposes all of this as named tools a
//! model can call.

pub mod config;
pub mod sandbox;
pub mod tools;
