//! Lexical path canonicalization for caller-controlled paths
//!
//! Every path that reaches the filesystem goes through [`normalize`] first:
//! - a leading `/` is treated as the workspace root
//! - `.` components are dropped
//! - `..`, drive prefixes and NUL bytes are rejected
//!
//! Nothing here touches the disk, so a path is accepted or rejected before
//! any directory is created.

use std::path::{Component, Path, PathBuf};

use crate::error::WorkspaceError;

/// Normalize a workspace-relative path, rejecting anything that escapes the root
pub fn normalize(raw: &str) -> Result<PathBuf, WorkspaceError> {
    let invalid = |reason: &str| WorkspaceError::InvalidPath {
        path: raw.to_string(),
        reason: reason.to_string(),
    };

    if raw.contains('\0') {
        return Err(invalid("contains a NUL byte"));
    }

    // Backslashes are separators for the caller even on unix
    let unified = raw.replace('\\', "/");
    let trimmed = unified.trim_start_matches('/');

    let mut normalized = PathBuf::new();
    for component in Path::new(trimmed).components() {
        match component {
            Component::Normal(part) => normalized.push(part),
            Component::CurDir => {}
            Component::ParentDir => {
                return Err(invalid("parent directory components are not allowed"));
            }
            Component::RootDir | Component::Prefix(_) => {
                return Err(invalid("absolute paths are not allowed"));
            }
        }
    }

    if normalized.as_os_str().is_empty() {
        return Err(invalid("path is empty"));
    }

    Ok(normalized)
}

/// Resolve a caller path to an absolute path inside `root`
pub fn resolve(root: &Path, raw: &str) -> Result<PathBuf, WorkspaceError> {
    Ok(root.join(normalize(raw)?))
}
