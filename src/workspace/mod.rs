//! Per-project workspaces on disk
//!
//! - `WorkspaceManager` - Materialize, write into, and remove workspaces
//! - `path` - Lexical canonicalization of caller-supplied paths

mod manager;
pub mod path;

pub use manager::*;
