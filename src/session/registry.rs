//! In-memory session registry
//!
//! Maps project ids to live sessions. The map is the single source of
//! truth for which projects exist; nothing is persisted.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use super::{ProjectId, ProjectSession};

/// Registry of live sessions
///
/// Each method holds the lock only for the map operation itself.
/// Sequencing across operations (close-before-replace, per-project
/// exclusion) is the session manager's job.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: RwLock<HashMap<ProjectId, Arc<ProjectSession>>>,
}

impl SessionRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a session, returning whatever was registered under the id before
    ///
    /// The previous session is handed back, not closed: callers own it.
    pub async fn insert(&self, session: Arc<ProjectSession>) -> Option<Arc<ProjectSession>> {
        let mut sessions = self.sessions.write().await;
        sessions.insert(session.id.clone(), session)
    }

    /// Get a session by ID
    pub async fn lookup(&self, id: &ProjectId) -> Option<Arc<ProjectSession>> {
        self.sessions.read().await.get(id).cloned()
    }

    /// Remove a session
    pub async fn remove(&self, id: &ProjectId) -> Option<Arc<ProjectSession>> {
        self.sessions.write().await.remove(id)
    }

    /// Snapshot of all sessions for sweeping
    pub async fn entries(&self) -> Vec<(ProjectId, Arc<ProjectSession>)> {
        self.sessions
            .read()
            .await
            .iter()
            .map(|(id, session)| (id.clone(), session.clone()))
            .collect()
    }

    /// Registered project ids
    pub async fn ids(&self) -> Vec<ProjectId> {
        self.sessions.read().await.keys().cloned().collect()
    }

    pub async fn contains(&self, id: &ProjectId) -> bool {
        self.sessions.read().await.contains_key(id)
    }

    /// Count live sessions
    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }
}
