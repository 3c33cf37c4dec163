//! Core session types
//!
//! Defines the project session model:
//! - `ProjectId` is the caller-supplied key for a sandbox
//! - `ProjectSession` owns one workspace and one running engine

use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::engine::{EngineHandle, PreviewRequest, PreviewResponse, UpdateNotification};
use crate::error::{EngineError, Result, SessionError};

/// Longest accepted project id
pub const MAX_PROJECT_ID_LEN: usize = 128;

/// Caller-supplied project identifier
///
/// Opaque to the server, but it is embedded verbatim in preview URLs, so it
/// is limited to characters that are valid in a URL path segment.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ProjectId(String);

/// Unreserved and sub-delimiter characters of RFC 3986, plus `:` and `@`
fn is_segment_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || "-._~!$&'()*+,;=:@".contains(c)
}

impl ProjectId {
    /// Validate and wrap a raw id
    pub fn new(raw: impl Into<String>) -> std::result::Result<Self, SessionError> {
        let id = raw.into();

        if id.is_empty() {
            return Err(SessionError::InvalidInput(
                "projectId must not be empty".to_string(),
            ));
        }
        if id.chars().count() > MAX_PROJECT_ID_LEN {
            return Err(SessionError::InvalidInput(format!(
                "projectId is longer than {} characters",
                MAX_PROJECT_ID_LEN
            )));
        }
        if let Some(bad) = id.chars().find(|&c| !is_segment_char(c)) {
            return Err(SessionError::InvalidInput(format!(
                "projectId '{}' contains '{}', which is not allowed in a URL path segment",
                id.escape_debug(),
                bad.escape_debug()
            )));
        }
        if id == "." || id == ".." {
            return Err(SessionError::InvalidInput(format!(
                "projectId '{}' is a dot segment",
                id
            )));
        }

        Ok(Self(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Directory-safe rendering of the id, used as the workspace name prefix
    pub fn slug(&self) -> String {
        let slug: String = self
            .0
            .to_lowercase()
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '-' })
            .collect();
        let slug = slug.trim_matches('-');

        if slug.is_empty() {
            "project".to_string()
        } else {
            slug.chars().take(48).collect()
        }
    }

    /// Path under which the session is previewed
    pub fn preview_url(&self) -> String {
        format!("/preview/{}", self.0)
    }

    /// Websocket path the live client connects to
    pub fn live_url(&self) -> String {
        format!("/live/{}", self.0)
    }
}

impl TryFrom<String> for ProjectId {
    type Error = SessionError;

    fn try_from(value: String) -> std::result::Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<ProjectId> for String {
    fn from(id: ProjectId) -> Self {
        id.0
    }
}

impl fmt::Display for ProjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One virtual file as submitted by the caller
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEntry {
    /// Path relative to the workspace root (a leading `/` is allowed)
    pub path: String,
    /// Full file content
    pub content: String,
}

impl FileEntry {
    pub fn new(path: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            content: content.into(),
        }
    }
}

/// A live project sandbox: isolated workspace plus its running engine
///
/// The engine is closed at most once; after that every `serve` fails with
/// `SessionError::Gone`.
pub struct ProjectSession {
    /// Unique identifier
    pub id: ProjectId,
    /// Exclusive on-disk workspace
    pub workspace_path: PathBuf,
    /// Files as last loaded (diagnostics only)
    pub file_manifest: Vec<FileEntry>,
    /// When the session was created; never refreshed by updates
    pub created_at: DateTime<Utc>,
    /// Running engine bound to `workspace_path`
    engine: Box<dyn EngineHandle>,
    /// Set once the engine has been handed its close call
    closed: AtomicBool,
}

impl ProjectSession {
    /// Create a new session around an already started engine
    pub fn new(
        id: ProjectId,
        workspace_path: PathBuf,
        file_manifest: Vec<FileEntry>,
        engine: Box<dyn EngineHandle>,
    ) -> Self {
        Self {
            id,
            workspace_path,
            file_manifest,
            created_at: Utc::now(),
            engine,
            closed: AtomicBool::new(false),
        }
    }

    /// Override the creation time (sweeps in tests)
    pub fn with_created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = created_at;
        self
    }

    /// Age of the session at `now`
    pub fn age_at(&self, now: DateTime<Utc>) -> Duration {
        now - self.created_at
    }

    /// Whether the session is older than `retention` at `now`
    pub fn is_expired(&self, now: DateTime<Utc>, retention: std::time::Duration) -> bool {
        match Duration::from_std(retention) {
            Ok(retention) => self.age_at(now) > retention,
            // Retention beyond chrono's range never expires
            Err(_) => false,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Serve a preview request through the engine
    pub async fn serve(&self, request: PreviewRequest) -> Result<PreviewResponse> {
        if self.is_closed() {
            return Err(SessionError::Gone(self.id.clone()).into());
        }

        match self.engine.serve(request).await {
            Err(crate::error::Error::Engine(EngineError::Closed)) => {
                Err(SessionError::Gone(self.id.clone()).into())
            }
            other => other,
        }
    }

    /// Mark the module for `path` stale and notify preview clients
    pub async fn invalidate(&self, path: &std::path::Path) -> Result<bool> {
        if self.is_closed() {
            return Err(SessionError::Gone(self.id.clone()).into());
        }
        self.engine.invalidate(path).await
    }

    /// Subscribe to update notifications for this session
    pub fn subscribe(&self) -> Result<broadcast::Receiver<UpdateNotification>> {
        if self.is_closed() {
            return Err(SessionError::Gone(self.id.clone()).into());
        }
        Ok(self.engine.subscribe())
    }

    /// Close the engine
    ///
    /// Returns `Ok(false)` when the session had already been closed; the
    /// engine's own `close` is only ever reached once.
    pub async fn close(&self) -> Result<bool> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(false);
        }
        self.engine.close().await?;
        Ok(true)
    }
}

impl fmt::Debug for ProjectSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProjectSession")
            .field("id", &self.id)
            .field("workspace_path", &self.workspace_path)
            .field("files", &self.file_manifest.len())
            .field("created_at", &self.created_at)
            .field("closed", &self.is_closed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_project_id_validation() {
        assert!(ProjectId::new("demo").is_ok());
        assert!(ProjectId::new("  demo  ").is_err());
        assert!(ProjectId::new("demo ").is_err());
        assert!(ProjectId::new("").is_err());
        assert!(ProjectId::new("   ").is_err());
        assert!(ProjectId::new("a/b").is_err());
        assert!(ProjectId::new("a\\b").is_err());
        assert!(ProjectId::new("line\nbreak").is_err());
        assert!(ProjectId::new(".").is_err());
        assert!(ProjectId::new("..").is_err());
        assert!(ProjectId::new("...").is_ok());
        assert!(ProjectId::new("x".repeat(MAX_PROJECT_ID_LEN + 1)).is_err());
    }

    #[test]
    fn test_project_id_slug() {
        assert_eq!(ProjectId::new("My.App").unwrap().slug(), "my-app");
        assert_eq!(ProjectId::new("@@").unwrap().slug(), "project");
        assert_eq!(ProjectId::new("feature_x-1").unwrap().slug(), "feature_x-1");
    }

    #[test]
    fn test_preview_url() {
        assert_eq!(ProjectId::new("demo").unwrap().preview_url(), "/preview/demo");
    }

    #[test]
    fn test_url_breaking_characters_rejected() {
        for raw in ["a?b", "a#b", "100%", "my app", "caf\u{e9}", "a\"b", "a`b", "{x}"] {
            assert!(ProjectId::new(raw).is_err(), "{:?} was accepted", raw);
        }
        assert!(ProjectId::new("user@team:app~2").is_ok());
    }

    proptest! {
        #[test]
        fn accepted_ids_yield_plain_preview_paths(raw in "[ -~]{1,16}") {
            if let Ok(id) = ProjectId::new(raw) {
                let url = id.preview_url();
                let uri: http::Uri = url.parse().unwrap();
                prop_assert_eq!(uri.path(), url.as_str());
                prop_assert!(uri.query().is_none());
            }
        }
    }

    #[test]
    fn test_project_id_deserialize_validates() {
        let ok: std::result::Result<ProjectId, _> = serde_json::from_str(r#""demo""#);
        assert!(ok.is_ok());

        let bad: std::result::Result<ProjectId, _> = serde_json::from_str(r#""""#);
        assert!(bad.is_err());
    }
}
