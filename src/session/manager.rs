//! Session manager - coordinates session lifecycle
//!
//! Handles loading, updating, serving, and evicting project sessions,
//! coordinating between workspaces and engine instances.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, broadcast};
use tracing::{debug, info, instrument, warn};

use crate::config::Config;
use crate::engine::{
    DevServer, Engine, EngineOptions, PreviewRequest, PreviewResponse, UpdateNotification,
};
use crate::error::{Result, SessionError};
use crate::session::{FileEntry, ProjectId, ProjectSession, SessionRegistry};
use crate::workspace::{WorkspaceManager, path};

/// Result of a successful load
#[derive(Debug, Clone)]
pub struct LoadOutcome {
    pub project_id: ProjectId,
    pub preview_url: String,
    pub workspace_path: PathBuf,
    pub file_count: usize,
    /// Whether a previous session for the id was closed first
    pub replaced: bool,
}

/// Result of a successful file update
#[derive(Debug, Clone)]
pub struct UpdateOutcome {
    /// Absolute path that was written
    pub path: PathBuf,
    /// Whether a compiled module was marked stale
    pub invalidated: bool,
}

/// Session manager coordinates all session operations
///
/// Load, update and eviction of one project id never interleave: each
/// takes that project's lock for its whole duration. Serving does not
/// lock; a serve racing an eviction fails with `SessionError::Gone`.
pub struct SessionManager {
    /// Application configuration
    config: Config,
    /// Live sessions
    registry: SessionRegistry,
    /// Workspace storage
    workspaces: WorkspaceManager,
    /// Engine factory
    engine: Arc<dyn Engine>,
    /// Per-project mutual exclusion
    locks: Mutex<HashMap<ProjectId, Arc<Mutex<()>>>>,
    /// When the manager was created
    started_at: Instant,
}

impl SessionManager {
    /// Create a new session manager with a custom engine
    pub fn new(config: Config, engine: Arc<dyn Engine>) -> Self {
        let workspaces = WorkspaceManager::new(config.workspaces_dir());

        Self {
            config,
            registry: SessionRegistry::new(),
            workspaces,
            engine,
            locks: Mutex::new(HashMap::new()),
            started_at: Instant::now(),
        }
    }

    /// Create a session manager backed by the built-in dev server
    pub fn with_dev_server(config: Config) -> Self {
        Self::new(config, Arc::new(DevServer::new()))
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    pub fn workspaces(&self) -> &WorkspaceManager {
        &self.workspaces
    }

    /// Time since the manager was created
    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Number of registered sessions
    pub async fn active_projects(&self) -> usize {
        self.registry.len().await
    }

    /// Get a live session or fail with `NotFound`
    pub async fn lookup(&self, project_id: &ProjectId) -> Result<Arc<ProjectSession>> {
        self.registry
            .lookup(project_id)
            .await
            .ok_or_else(|| SessionError::NotFound(project_id.clone()).into())
    }

    /// Load a project, closing any session already registered under the id
    ///
    /// Paths are validated before anything is touched, so a bad re-load
    /// leaves the previous session running.
    #[instrument(skip(self, files), fields(project_id = %project_id, files = files.len()))]
    pub async fn load_or_replace(
        &self,
        project_id: ProjectId,
        files: Vec<FileEntry>,
    ) -> Result<LoadOutcome> {
        for file in &files {
            path::normalize(&file.path)?;
        }

        let lock = self.project_lock(&project_id).await;
        let _guard = lock.lock().await;

        let replaced = match self.registry.remove(&project_id).await {
            Some(previous) => {
                info!("Replacing existing session for {}", project_id);
                self.retire(previous, false).await;
                true
            }
            None => false,
        };

        let workspace = self.workspaces.materialize(&project_id, &files).await?;

        let options = EngineOptions::sandbox(
            &workspace.path,
            format!("{}/", project_id.preview_url()),
        )
        .with_live_client(self.config.live_reload.then(|| project_id.live_url()))
        .with_allowed_hosts(&self.config.allowed_hosts);

        let engine = match self.engine.start(options).await {
            Ok(engine) => engine,
            Err(e) => {
                warn!("Engine failed to start for {}: {}", project_id, e);
                if let Err(cleanup) = self.workspaces.remove(&workspace.path).await {
                    warn!("Failed to remove workspace {:?}: {}", workspace.path, cleanup);
                }
                return Err(e);
            }
        };

        let session = Arc::new(ProjectSession::new(
            project_id.clone(),
            workspace.path.clone(),
            files,
            engine,
        ));

        if let Some(orphan) = self.registry.insert(session).await {
            warn!("Registry already held a session for {}, closing it", project_id);
            self.retire(orphan, false).await;
        }

        info!(
            "Loaded project {} with {} files{}",
            project_id,
            workspace.file_count,
            if replaced { " (replaced)" } else { "" }
        );

        Ok(LoadOutcome {
            preview_url: project_id.preview_url(),
            project_id,
            workspace_path: workspace.path,
            file_count: workspace.file_count,
            replaced,
        })
    }

    /// Write one file into a session's workspace, then invalidate it
    ///
    /// Unknown projects fail with `NotFound` before any mutation.
    #[instrument(skip(self, content), fields(project_id = %project_id, bytes = content.len()))]
    pub async fn update_file(
        &self,
        project_id: &ProjectId,
        relative_path: &str,
        content: &str,
    ) -> Result<UpdateOutcome> {
        path::normalize(relative_path)?;

        if !self.registry.contains(project_id).await {
            return Err(SessionError::NotFound(project_id.clone()).into());
        }

        let lock = self.project_lock(project_id).await;
        let _guard = lock.lock().await;

        // Evicted while we waited for the lock
        let session = self.lookup(project_id).await?;

        let written = self
            .workspaces
            .write(&session.workspace_path, relative_path, content)
            .await?;
        let invalidated = session.invalidate(&written).await?;

        debug!(
            "Updated {:?} in {} (invalidated: {})",
            written, project_id, invalidated
        );

        Ok(UpdateOutcome {
            path: written,
            invalidated,
        })
    }

    /// Serve a preview request for a project
    pub async fn serve(
        &self,
        project_id: &ProjectId,
        request: PreviewRequest,
    ) -> Result<PreviewResponse> {
        let session = self.lookup(project_id).await?;
        session.serve(request).await
    }

    /// Subscribe to a project's update notifications
    pub async fn subscribe(
        &self,
        project_id: &ProjectId,
    ) -> Result<broadcast::Receiver<UpdateNotification>> {
        self.lookup(project_id).await?.subscribe()
    }

    /// Evict every session older than the retention threshold
    pub async fn sweep(&self) -> Vec<ProjectId> {
        self.sweep_at(Utc::now()).await
    }

    /// Evict every session older than the retention threshold at `now`
    #[instrument(skip(self))]
    pub async fn sweep_at(&self, now: DateTime<Utc>) -> Vec<ProjectId> {
        let retention = self.config.retention();

        let expired: Vec<ProjectId> = self
            .registry
            .entries()
            .await
            .into_iter()
            .filter(|(_, session)| session.is_expired(now, retention))
            .map(|(id, _)| id)
            .collect();

        let mut evicted = Vec::with_capacity(expired.len());
        for project_id in expired {
            let lock = self.project_lock(&project_id).await;
            let _guard = lock.lock().await;

            // A re-load may have replaced it with a fresh session meanwhile
            let still_expired = match self.registry.lookup(&project_id).await {
                Some(session) => session.is_expired(now, retention),
                None => false,
            };
            if !still_expired {
                continue;
            }

            if let Some(session) = self.registry.remove(&project_id).await {
                info!(
                    "Evicting {} (age {}s)",
                    project_id,
                    session.age_at(now).num_seconds()
                );
                self.retire(session, false).await;
                evicted.push(project_id);
            }
        }

        self.prune_locks().await;
        evicted
    }

    /// Close every registered session and remove its workspace
    ///
    /// Returns how many sessions were drained.
    #[instrument(skip(self))]
    pub async fn shutdown(&self) -> usize {
        let mut drained = 0;

        for project_id in self.registry.ids().await {
            let lock = self.project_lock(&project_id).await;
            let _guard = lock.lock().await;

            if let Some(session) = self.registry.remove(&project_id).await {
                self.retire(session, true).await;
                drained += 1;
            }
        }

        self.prune_locks().await;
        info!("Drained {} sessions", drained);
        drained
    }

    /// Close a session that is no longer registered and schedule its cleanup
    async fn retire(&self, session: Arc<ProjectSession>, wait_for_cleanup: bool) {
        match session.close().await {
            Ok(true) => debug!("Closed engine for {}", session.id),
            Ok(false) => debug!("Engine for {} was already closed", session.id),
            Err(e) => warn!("Failed to close engine for {}: {}", session.id, e),
        }

        if !self.config.cleanup_workspaces {
            return;
        }

        let workspaces = self.workspaces.clone();
        let workspace_path = session.workspace_path.clone();
        let cleanup = tokio::spawn(async move {
            if let Err(e) = workspaces.remove(&workspace_path).await {
                warn!("Failed to remove workspace {:?}: {}", workspace_path, e);
            }
        });

        if wait_for_cleanup {
            if let Err(e) = cleanup.await {
                warn!("Workspace cleanup task failed: {}", e);
            }
        }
    }

    /// Get (or create) the lock for a project
    async fn project_lock(&self, project_id: &ProjectId) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        locks
            .entry(project_id.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Drop lock entries nobody is holding or waiting on
    async fn prune_locks(&self) {
        let mut locks = self.locks.lock().await;
        locks.retain(|_, lock| Arc::strong_count(lock) > 1);
    }

    #[cfg(test)]
    async fn lock_count(&self) -> usize {
        self.locks.lock().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn test_manager(temp_dir: &TempDir) -> SessionManager {
        let mut config = Config::default();
        config.workspaces_dir = Some(temp_dir.path().to_path_buf());
        SessionManager::with_dev_server(config)
    }

    fn id(raw: &str) -> ProjectId {
        ProjectId::new(raw).unwrap()
    }

    #[tokio::test]
    async fn test_bad_reload_keeps_previous_session() {
        let temp_dir = TempDir::new().unwrap();
        let manager = test_manager(&temp_dir);

        manager
            .load_or_replace(id("demo"), vec![FileEntry::new("index.html", "v1")])
            .await
            .unwrap();

        let err = manager
            .load_or_replace(id("demo"), vec![FileEntry::new("../x", "v2")])
            .await
            .unwrap_err();
        assert!(err.is_invalid_input());

        let session = manager.lookup(&id("demo")).await.unwrap();
        assert!(!session.is_closed());
    }

    #[tokio::test]
    async fn test_configured_hosts_gate_previews() {
        let temp_dir = TempDir::new().unwrap();
        let mut config = Config::default();
        config.workspaces_dir = Some(temp_dir.path().to_path_buf());
        config.allowed_hosts = vec!["preview.local".to_string()];
        let manager = SessionManager::with_dev_server(config);

        manager
            .load_or_replace(id("demo"), vec![FileEntry::new("index.html", "hi")])
            .await
            .unwrap();

        let request = |host: &'static str| {
            let mut request = PreviewRequest::get("/");
            request
                .headers
                .insert(http::header::HOST, http::HeaderValue::from_static(host));
            request
        };

        let response = manager.serve(&id("demo"), request("preview.local:3001")).await.unwrap();
        assert_eq!(response.status, http::StatusCode::OK);

        let response = manager.serve(&id("demo"), request("evil.example")).await.unwrap();
        assert_eq!(response.status, http::StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_locks_pruned_after_sweep() {
        let temp_dir = TempDir::new().unwrap();
        let manager = test_manager(&temp_dir);

        manager.load_or_replace(id("a"), vec![]).await.unwrap();
        manager.load_or_replace(id("b"), vec![]).await.unwrap();
        assert_eq!(manager.lock_count().await, 2);

        manager.sweep_at(Utc::now()).await;
        assert_eq!(manager.lock_count().await, 0);
    }

    #[tokio::test]
    async fn test_update_unknown_creates_no_lock() {
        let temp_dir = TempDir::new().unwrap();
        let manager = test_manager(&temp_dir);

        assert!(manager.update_file(&id("ghost"), "a.js", "1").await.is_err());
        assert_eq!(manager.lock_count().await, 0);
    }

    #[tokio::test]
    async fn test_engine_start_failure_cleans_workspace() {
        struct FailingEngine;

        #[async_trait::async_trait]
        impl Engine for FailingEngine {
            async fn start(
                &self,
                options: EngineOptions,
            ) -> Result<Box<dyn crate::engine::EngineHandle>> {
                Err(crate::error::EngineError::StartFailed {
                    root: options.root,
                    reason: "no engine today".to_string(),
                }
                .into())
            }
        }

        let temp_dir = TempDir::new().unwrap();
        let mut config = Config::default();
        config.workspaces_dir = Some(temp_dir.path().to_path_buf());
        let manager = SessionManager::new(config, Arc::new(FailingEngine));

        let err = manager
            .load_or_replace(id("demo"), vec![FileEntry::new("index.html", "x")])
            .await
            .unwrap_err();
        assert!(matches!(err, crate::Error::Engine(_)));
        assert!(manager.lookup(&id("demo")).await.is_err());

        let mut entries = tokio::fs::read_dir(temp_dir.path()).await.unwrap();
        assert!(entries.next_entry().await.unwrap().is_none());
    }
}
