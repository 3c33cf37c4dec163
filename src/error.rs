//! Error types for preview-sandbox
//!
//! Uses `thiserror` for ergonomic error definitions with automatic `Display` and `Error` impls.

use std::path::PathBuf;

use thiserror::Error;

use crate::session::ProjectId;

/// Top-level error type for preview-sandbox
#[derive(Error, Debug)]
pub enum Error {
    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),

    #[error("Workspace error: {0}")]
    Workspace(#[from] WorkspaceError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether the caller sent something malformed (never worth retrying)
    pub fn is_invalid_input(&self) -> bool {
        matches!(
            self,
            Error::Session(SessionError::InvalidInput(_))
                | Error::Workspace(WorkspaceError::InvalidPath { .. })
        )
    }

    /// Whether the session was evicted or its engine closed under the request
    pub fn is_gone(&self) -> bool {
        matches!(
            self,
            Error::Session(SessionError::Gone(_))
                | Error::Engine(EngineError::Closed | EngineError::AlreadyClosed)
        )
    }
}

/// Session lifecycle errors
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Project not found: {0}")]
    NotFound(ProjectId),

    #[error("Project {0} was evicted while the request was in flight")]
    Gone(ProjectId),
}

/// Compiler/dev-server engine errors
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Failed to start engine for {root}: {reason}")]
    StartFailed { root: PathBuf, reason: String },

    #[error("Failed to serve {path}: {reason}")]
    ServeFailed { path: String, reason: String },

    #[error("Engine has been closed")]
    Closed,

    #[error("Engine was already closed")]
    AlreadyClosed,
}

/// Workspace materialization errors
#[derive(Error, Debug)]
pub enum WorkspaceError {
    #[error("Invalid path '{path}': {reason}")]
    InvalidPath { path: String, reason: String },

    #[error("Failed to create workspace {path}: {source}")]
    CreateFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write {path}: {source}")]
    WriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    LoadFailed(String),

    #[error("Failed to save configuration: {0}")]
    SaveFailed(String),

    #[error("Invalid configuration value for '{key}': {reason}")]
    InvalidValue { key: String, reason: String },

    #[error("Failed to create config directory: {0}")]
    DirectoryCreationFailed(PathBuf),
}

/// Result type alias using our error type
pub type Result<T> = std::result::Result<T, Error>;
