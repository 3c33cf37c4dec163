//! Preview Sandbox - isolated, short-lived front-end previews for embedded iframes
//!
//! Callers upload a project's files over HTTP; the server writes them into a
//! private workspace, starts a dev-server engine rooted there, and serves the
//! result under `/preview/<projectId>/`. Edits rewrite single files and push
//! live-update notifications to the open preview. Sessions are reaped after
//! a retention window.
//!
//! # Architecture
//!
//! - **SessionManager** - Owns the registry, per-project locks, and the
//!   engine factory; every lifecycle transition goes through it
//! - **Engine** - Opaque compiler/dev-server capability (`DevServer` built in)
//! - **Reaper** - Timer task that evicts sessions past retention
//! - **Router** - axum routes translating HTTP into manager calls
//!
//! # Modules
//!
//! - [`session`] - Project sessions, registry, manager, and reaper
//! - [`workspace`] - Path canonicalization and on-disk workspaces
//! - [`engine`] - Engine traits and the built-in dev server
//! - [`server`] - HTTP routes and DTOs
//! - [`config`] - Layered configuration
//! - [`error`] - Error types

pub mod config;
pub mod engine;
pub mod error;
pub mod server;
pub mod session;
pub mod workspace;

pub use config::Config;
pub use engine::{DevServer, Engine, EngineHandle};
pub use error::{Error, Result};
pub use session::{FileEntry, ProjectId, ProjectSession, Reaper, SessionManager};

/// Application version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name
pub const APP_NAME: &str = env!("CARGO_PKG_NAME");
