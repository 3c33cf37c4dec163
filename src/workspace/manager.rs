//! Workspace lifecycle management
//!
//! Provides workspace operations:
//! - Materialize a fresh, isolated workspace from a set of virtual files
//! - Write a single file into an existing workspace
//! - Remove a workspace

use std::path::{Path, PathBuf};

use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use super::path;
use crate::error::{Result, SessionError, WorkspaceError};
use crate::session::{FileEntry, ProjectId};

/// Materialized workspace information
#[derive(Debug, Clone)]
pub struct WorkspaceInfo {
    /// Path to the workspace directory
    pub path: PathBuf,
    /// Number of files written
    pub file_count: usize,
}

/// Workspace manager
///
/// Owns the workspaces root. Every materialization gets a brand-new
/// directory, so two sessions never share a path.
#[derive(Debug, Clone)]
pub struct WorkspaceManager {
    /// Base directory for workspaces
    workspaces_dir: PathBuf,
}

impl WorkspaceManager {
    /// Create a new workspace manager
    pub fn new(workspaces_dir: impl Into<PathBuf>) -> Self {
        Self {
            workspaces_dir: workspaces_dir.into(),
        }
    }

    /// Get the workspaces directory
    pub fn workspaces_dir(&self) -> &Path {
        &self.workspaces_dir
    }

    /// Write `files` into a fresh workspace for `project_id`
    ///
    /// All paths are validated before anything touches the disk. If a write
    /// fails half-way the partial workspace is removed before returning.
    #[instrument(skip(self, files), fields(project_id = %project_id, files = files.len()))]
    pub async fn materialize(
        &self,
        project_id: &ProjectId,
        files: &[FileEntry],
    ) -> Result<WorkspaceInfo> {
        let relative: Vec<PathBuf> = files
            .iter()
            .map(|file| path::normalize(&file.path))
            .collect::<std::result::Result<_, _>>()?;

        let workspace_path = self.allocate_path(project_id);

        tokio::fs::create_dir_all(&self.workspaces_dir)
            .await
            .map_err(|source| WorkspaceError::CreateFailed {
                path: self.workspaces_dir.clone(),
                source,
            })?;

        // create_dir (not _all) so an existing directory is never adopted
        tokio::fs::create_dir(&workspace_path)
            .await
            .map_err(|source| WorkspaceError::CreateFailed {
                path: workspace_path.clone(),
                source,
            })?;

        for (file, rel) in files.iter().zip(&relative) {
            let target = workspace_path.join(rel);
            if let Err(e) = write_file(&target, file.content.as_bytes()).await {
                warn!("Materialization of {} failed, removing partial workspace", project_id);
                if let Err(cleanup) = tokio::fs::remove_dir_all(&workspace_path).await {
                    warn!("Failed to remove partial workspace {:?}: {}", workspace_path, cleanup);
                }
                return Err(e);
            }
        }

        info!(
            "Materialized {} files for {} at {:?}",
            files.len(),
            project_id,
            workspace_path
        );

        Ok(WorkspaceInfo {
            path: workspace_path,
            file_count: files.len(),
        })
    }

    /// Overwrite (or create) one file inside an existing workspace
    ///
    /// Returns the absolute path that was written.
    pub async fn write(
        &self,
        workspace_path: &Path,
        relative_path: &str,
        content: &str,
    ) -> Result<PathBuf> {
        let target = path::resolve(workspace_path, relative_path)?;
        write_file(&target, content.as_bytes()).await?;
        debug!("Wrote {:?}", target);
        Ok(target)
    }

    /// Remove a workspace directory
    #[instrument(skip(self))]
    pub async fn remove(&self, workspace_path: &Path) -> Result<()> {
        if !workspace_path.starts_with(&self.workspaces_dir) {
            return Err(WorkspaceError::InvalidPath {
                path: workspace_path.display().to_string(),
                reason: "not inside the workspaces directory".to_string(),
            }
            .into());
        }

        tokio::fs::remove_dir_all(workspace_path).await?;
        info!("Removed workspace at {:?}", workspace_path);
        Ok(())
    }

    /// Pick an unused directory name: `<slug>-<8 hex chars>`
    fn allocate_path(&self, project_id: &ProjectId) -> PathBuf {
        let suffix = Uuid::new_v4().simple().to_string();
        self.workspaces_dir
            .join(format!("{}-{}", project_id.slug(), &suffix[..8]))
    }
}

/// Validate a raw id plus file list coming off the wire
pub fn validate_load(
    project_id: Option<String>,
    files: Option<Vec<FileEntry>>,
) -> std::result::Result<(ProjectId, Vec<FileEntry>), SessionError> {
    let project_id = project_id
        .ok_or_else(|| SessionError::InvalidInput("projectId is required".to_string()))?;
    let project_id = ProjectId::new(project_id)?;
    let files =
        files.ok_or_else(|| SessionError::InvalidInput("files must be an array".to_string()))?;
    Ok((project_id, files))
}

async fn write_file(target: &Path, content: &[u8]) -> Result<()> {
    if let Some(parent) = target.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|source| WorkspaceError::WriteFailed {
                path: parent.to_path_buf(),
                source,
            })?;
    }

    tokio::fs::write(target, content)
        .await
        .map_err(|source| WorkspaceError::WriteFailed {
            path: target.to_path_buf(),
            source,
        })?;

    Ok(())
}
