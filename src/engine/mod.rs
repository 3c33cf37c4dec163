//! Compiler/dev-server engine integration
//!
//! The engine is an opaque capability behind two traits:
//! - `Engine` - Starts one instance bound to a workspace
//! - `EngineHandle` - A running instance: serve, invalidate, close
//!
//! `DevServer` is the built-in implementation: a request-driven static dev
//! server with an in-memory module graph and targeted invalidation.

mod dev_server;
pub mod mime;
mod module_graph;

pub use dev_server::*;
pub use module_graph::*;

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use http::{HeaderMap, HeaderValue, Method, StatusCode, header};
use serde::Serialize;
use tokio::sync::broadcast;

use crate::error::Result;

/// Which `Host` headers an engine instance accepts
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AllowedHosts {
    /// Any host; sessions sit behind proxies with generated hostnames
    Any,
    /// Only these hosts (compared without port)
    List(Vec<String>),
}

impl AllowedHosts {
    pub fn permits(&self, host: Option<&str>) -> bool {
        match self {
            Self::Any => true,
            Self::List(hosts) => {
                let Some(host) = host else { return false };
                let bare = host.rsplit_once(':').map_or(host, |(name, _)| name);
                hosts.iter().any(|allowed| allowed.eq_ignore_ascii_case(bare))
            }
        }
    }
}

/// How an engine instance is configured
#[derive(Debug, Clone)]
pub struct EngineOptions {
    /// Workspace the instance is rooted at
    pub root: PathBuf,
    /// URL prefix the instance is mounted under (`/preview/<id>/`)
    pub base: String,
    /// Serve through the host's router instead of listening on its own port
    pub middleware_mode: bool,
    /// Let the engine open its own live-reload socket
    pub hmr_transport: bool,
    /// Host header policy
    pub allowed_hosts: AllowedHosts,
    /// Websocket URL for the injected live client (`None` disables injection)
    pub live_client: Option<String>,
}

impl EngineOptions {
    /// Options for a sandbox session: middleware mode, no own HMR transport, any host
    pub fn sandbox(root: impl Into<PathBuf>, base: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            base: base.into(),
            middleware_mode: true,
            hmr_transport: false,
            allowed_hosts: AllowedHosts::Any,
            live_client: None,
        }
    }

    pub fn with_live_client(mut self, url: Option<String>) -> Self {
        self.live_client = url;
        self
    }

    /// Restrict the `Host` header; an empty list accepts any host
    pub fn with_allowed_hosts(mut self, hosts: &[String]) -> Self {
        self.allowed_hosts = if hosts.is_empty() {
            AllowedHosts::Any
        } else {
            AllowedHosts::List(hosts.to_vec())
        };
        self
    }
}

/// HTTP-shaped request relative to the engine's base
#[derive(Debug, Clone)]
pub struct PreviewRequest {
    pub method: Method,
    /// Path below the base, always starting with `/`
    pub path: String,
    pub headers: HeaderMap,
}

impl PreviewRequest {
    /// A bare GET for `path`
    pub fn get(path: impl Into<String>) -> Self {
        let path = path.into();
        let path = if path.starts_with('/') { path } else { format!("/{}", path) };
        Self {
            method: Method::GET,
            path,
            headers: HeaderMap::new(),
        }
    }

    pub fn host(&self) -> Option<&str> {
        self.headers.get(header::HOST).and_then(|v| v.to_str().ok())
    }
}

/// Response produced by the engine
#[derive(Debug, Clone)]
pub struct PreviewResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

impl PreviewResponse {
    pub fn new(status: StatusCode, content_type: &'static str, body: impl Into<Vec<u8>>) -> Self {
        let mut headers = HeaderMap::new();
        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(content_type));
        Self {
            status,
            headers,
            body: body.into(),
        }
    }

    pub fn text(status: StatusCode, body: impl Into<String>) -> Self {
        Self::new(status, mime::types::PLAIN, body.into())
    }

    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// Live-update notification pushed to preview clients
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UpdateNotification {
    /// Absolute path of the invalidated file
    pub path: PathBuf,
    /// URL of the module below the session base
    pub url: String,
    /// Monotonic millisecond timestamp
    pub timestamp: i64,
}

/// Factory for engine instances
#[async_trait]
pub trait Engine: Send + Sync {
    /// Start an instance rooted at `options.root`
    async fn start(&self, options: EngineOptions) -> Result<Box<dyn EngineHandle>>;
}

/// One running engine instance
///
/// `close` is not idempotent: callers close exactly once.
#[async_trait]
pub trait EngineHandle: Send + Sync {
    /// Serve a request from the instance's workspace
    async fn serve(&self, request: PreviewRequest) -> Result<PreviewResponse>;

    /// Mark the compiled module for `path` stale and notify clients.
    /// Returns `false` when the path was never compiled.
    async fn invalidate(&self, path: &Path) -> Result<bool>;

    /// Receive update notifications
    fn subscribe(&self) -> broadcast::Receiver<UpdateNotification>;

    /// Release all resources
    async fn close(&self) -> Result<()>;
}
