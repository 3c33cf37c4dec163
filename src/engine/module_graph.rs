//! Compiled module graph
//!
//! Caches the transformed output of every served file:
//! - Fresh nodes are served without touching the disk
//! - Invalidation marks a node stale and stamps it with a monotonic timestamp
//! - Hash-based ETags for conditional requests
//!
//! A compile holds a [`CompileGuard`] from before it reads the source until
//! its output is inserted. Invalidation waits for in-flight compiles, so it
//! always lands either before the read or on the inserted node.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Instant;

use chrono::Utc;
use tokio::sync::{RwLock, RwLockReadGuard};
use tracing::debug;
use xxhash_rust::xxh3::xxh3_64;

/// One compiled file
#[derive(Debug, Clone)]
pub struct ModuleNode {
    /// Absolute path of the source file
    pub file: PathBuf,
    /// URL the module was requested under
    pub url: String,
    /// Transformed output
    pub content: Arc<Vec<u8>>,
    /// Content hash for ETags
    pub hash: u64,
    /// When the node was compiled
    pub compiled_at: Instant,
    /// Timestamp of the last invalidation (0 if never)
    pub last_update_timestamp: i64,
    /// Whether the node must be recompiled before serving
    pub stale: bool,
}

impl ModuleNode {
    /// Create a fresh node
    pub fn new(file: PathBuf, url: impl Into<String>, content: Vec<u8>) -> Self {
        let hash = xxh3_64(&content);

        Self {
            file,
            url: url.into(),
            content: Arc::new(content),
            hash,
            compiled_at: Instant::now(),
            last_update_timestamp: 0,
            stale: false,
        }
    }

    /// Strong ETag for this node's content
    pub fn etag(&self) -> String {
        format!("\"{:016x}\"", self.hash)
    }
}

/// Held by a compile between reading the source and inserting the output
pub type CompileGuard<'a> = RwLockReadGuard<'a, ()>;

/// Module graph keyed by absolute file path
#[derive(Debug, Default)]
pub struct ModuleGraph {
    nodes: RwLock<HashMap<PathBuf, ModuleNode>>,
    /// Shared by compiles, exclusive for invalidation
    compile_gate: RwLock<()>,
    last_timestamp: AtomicI64,
}

impl ModuleGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get a node if it exists and is not stale
    pub async fn get_fresh(&self, file: &Path) -> Option<ModuleNode> {
        let nodes = self.nodes.read().await;
        match nodes.get(file) {
            Some(node) if !node.stale => {
                debug!("Module graph hit for {:?}", file);
                Some(node.clone())
            }
            _ => None,
        }
    }

    /// Start a compile; hold the guard until the output is inserted
    pub async fn begin_compile(&self) -> CompileGuard<'_> {
        self.compile_gate.read().await
    }

    /// Record freshly compiled output, keeping the node's update timestamp
    pub async fn insert(
        &self,
        file: PathBuf,
        url: impl Into<String>,
        content: Vec<u8>,
    ) -> ModuleNode {
        let mut node = ModuleNode::new(file.clone(), url, content);

        let mut nodes = self.nodes.write().await;
        if let Some(previous) = nodes.get(&file) {
            node.last_update_timestamp = previous.last_update_timestamp;
        }
        nodes.insert(file, node.clone());
        node
    }

    /// Mark a node stale
    ///
    /// Returns the node's URL and its new update timestamp, or `None` when
    /// the file was never compiled.
    pub async fn invalidate(&self, file: &Path) -> Option<(String, i64)> {
        let _gate = self.compile_gate.write().await;
        let mut nodes = self.nodes.write().await;
        let node = nodes.get_mut(file)?;

        let timestamp = self.next_timestamp();
        node.stale = true;
        node.last_update_timestamp = timestamp;
        debug!("Invalidated {:?} at {}", file, timestamp);

        Some((node.url.clone(), timestamp))
    }

    /// Wall-clock milliseconds, forced strictly above the previous value
    pub fn next_timestamp(&self) -> i64 {
        let now = Utc::now().timestamp_millis();
        let mut last = self.last_timestamp.load(Ordering::SeqCst);
        loop {
            let next = now.max(last + 1);
            match self
                .last_timestamp
                .compare_exchange(last, next, Ordering::SeqCst, Ordering::SeqCst)
            {
                Ok(_) => return next,
                Err(actual) => last = actual,
            }
        }
    }

    /// Drop every node
    pub async fn clear(&self) {
        self.nodes.write().await.clear();
    }
}
