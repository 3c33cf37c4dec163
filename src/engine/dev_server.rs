//! Request-driven static dev server
//!
//! One `DevServerHandle` per session, rooted at the session workspace:
//! - Resolves request paths inside the workspace (never outside it)
//! - Compiles files into the module graph on first request
//! - Rebases root-absolute `src`/`href` in HTML onto the preview base
//! - Injects the live client into HTML
//! - Broadcasts update notifications on invalidation

use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use http::{HeaderValue, Method, StatusCode, header};
use regex::{Captures, Regex};
use tokio::sync::broadcast;
use tracing::{debug, info, instrument};

use super::{
    Engine, EngineHandle, EngineOptions, ModuleGraph, ModuleNode, PreviewRequest,
    PreviewResponse, UpdateNotification, mime,
};
use crate::error::{EngineError, Result};
use crate::workspace::path;

/// Capacity of the per-session update channel
pub const UPDATE_CHANNEL_CAPACITY: usize = 64;

static HEAD_CLOSE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)</head\s*>").unwrap());

static ROOT_ABSOLUTE_ATTR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)\b(src|href)(\s*=\s*)(?:"(/[^"]*)"|'(/[^']*)')"#).unwrap()
});

/// Factory for [`DevServerHandle`]s
#[derive(Debug, Clone, Default)]
pub struct DevServer;

impl DevServer {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Engine for DevServer {
    #[instrument(skip(self, options), fields(root = ?options.root))]
    async fn start(&self, options: EngineOptions) -> Result<Box<dyn EngineHandle>> {
        if !options.middleware_mode {
            return Err(EngineError::StartFailed {
                root: options.root.clone(),
                reason: "only middleware mode is supported".to_string(),
            }
            .into());
        }

        let metadata = tokio::fs::metadata(&options.root)
            .await
            .map_err(|e| EngineError::StartFailed {
                root: options.root.clone(),
                reason: e.to_string(),
            })?;
        if !metadata.is_dir() {
            return Err(EngineError::StartFailed {
                root: options.root.clone(),
                reason: "workspace root is not a directory".to_string(),
            }
            .into());
        }

        info!("Started dev server at {:?} (base {})", options.root, options.base);
        Ok(Box::new(DevServerHandle::new(options)))
    }
}

/// A running dev server bound to one workspace
pub struct DevServerHandle {
    options: EngineOptions,
    graph: ModuleGraph,
    updates: broadcast::Sender<UpdateNotification>,
    closed: AtomicBool,
}

impl DevServerHandle {
    pub fn new(options: EngineOptions) -> Self {
        let (updates, _) = broadcast::channel(UPDATE_CHANNEL_CAPACITY);
        Self {
            options,
            graph: ModuleGraph::new(),
            updates,
            closed: AtomicBool::new(false),
        }
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(EngineError::Closed.into());
        }
        Ok(())
    }

    /// Map a request path to a file, falling back to `index.html` for
    /// directories and extension-less client-side routes
    async fn locate(&self, url: &str) -> std::result::Result<Option<PathBuf>, ()> {
        let index_url;
        let url = if url.ends_with('/') {
            index_url = format!("{}index.html", url);
            index_url.as_str()
        } else {
            url
        };

        let file = path::resolve(&self.options.root, url).map_err(|_| ())?;

        match tokio::fs::metadata(&file).await {
            Ok(meta) if meta.is_file() => return Ok(Some(file)),
            Ok(meta) if meta.is_dir() => {
                let index = file.join("index.html");
                if tokio::fs::metadata(&index).await.is_ok_and(|m| m.is_file()) {
                    return Ok(Some(index));
                }
            }
            _ => {}
        }

        let has_extension = Path::new(url).extension().is_some();
        if !has_extension {
            let index = self.options.root.join("index.html");
            if tokio::fs::metadata(&index).await.is_ok_and(|m| m.is_file()) {
                debug!("SPA fallback for {} -> index.html", url);
                return Ok(Some(index));
            }
        }

        Ok(None)
    }

    /// Read and transform a file into a module graph node
    async fn compile(&self, file: PathBuf, url: &str) -> Result<ModuleNode> {
        let _compiling = self.graph.begin_compile().await;
        let raw = tokio::fs::read(&file)
            .await
            .map_err(|e| EngineError::ServeFailed {
                path: url.to_string(),
                reason: e.to_string(),
            })?;

        let content = if mime::is_html(mime::from_path(&file)) {
            let html = rebase_urls(&String::from_utf8_lossy(&raw), &self.options.base);
            match &self.options.live_client {
                Some(live_url) => inject_live_client(&html, live_url).into_bytes(),
                None => html.into_bytes(),
            }
        } else {
            raw
        };

        debug!("Compiled {:?} ({} bytes)", file, content.len());
        Ok(self.graph.insert(file, url, content).await)
    }
}

#[async_trait]
impl EngineHandle for DevServerHandle {
    async fn serve(&self, request: PreviewRequest) -> Result<PreviewResponse> {
        self.ensure_open()?;

        if !self.options.allowed_hosts.permits(request.host()) {
            return Ok(PreviewResponse::text(StatusCode::FORBIDDEN, "Host not allowed"));
        }

        if request.method != Method::GET && request.method != Method::HEAD {
            let mut response =
                PreviewResponse::text(StatusCode::METHOD_NOT_ALLOWED, "Method not allowed");
            response
                .headers
                .insert(header::ALLOW, HeaderValue::from_static("GET, HEAD"));
            return Ok(response);
        }

        let file = match self.locate(&request.path).await {
            Ok(Some(file)) => file,
            Ok(None) => return Ok(PreviewResponse::text(StatusCode::NOT_FOUND, "Not found")),
            Err(()) => return Ok(PreviewResponse::text(StatusCode::FORBIDDEN, "Forbidden")),
        };

        let node = match self.graph.get_fresh(&file).await {
            Some(node) => node,
            None => self.compile(file, &request.path).await?,
        };

        // A close that raced the compile wins
        self.ensure_open()?;

        let etag = node.etag();
        let content_type = mime::from_path(&node.file);

        let not_modified = request
            .headers
            .get(header::IF_NONE_MATCH)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|tags| tags.split(',').any(|t| t.trim() == etag || t.trim() == "*"));

        let (status, body) = if not_modified {
            (StatusCode::NOT_MODIFIED, Vec::new())
        } else if request.method == Method::HEAD {
            (StatusCode::OK, Vec::new())
        } else {
            (StatusCode::OK, node.content.as_ref().clone())
        };

        let mut response = PreviewResponse::new(status, content_type, body);
        if let Ok(value) = HeaderValue::from_str(&etag) {
            response.headers.insert(header::ETAG, value);
        }
        response
            .headers
            .insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
        Ok(response)
    }

    async fn invalidate(&self, path: &Path) -> Result<bool> {
        self.ensure_open()?;

        let Some((url, timestamp)) = self.graph.invalidate(path).await else {
            debug!("Invalidate of uncompiled {:?} ignored", path);
            return Ok(false);
        };

        let notification = UpdateNotification {
            path: path.to_path_buf(),
            url,
            timestamp,
        };
        // No subscribers is fine
        let receivers = self.updates.send(notification).unwrap_or(0);
        debug!("Pushed update for {:?} to {} clients", path, receivers);
        Ok(true)
    }

    fn subscribe(&self) -> broadcast::Receiver<UpdateNotification> {
        self.updates.subscribe()
    }

    async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Err(EngineError::AlreadyClosed.into());
        }
        self.graph.clear().await;
        info!("Closed dev server at {:?}", self.options.root);
        Ok(())
    }
}

/// Prefix root-absolute `src` and `href` values with `base`
///
/// Protocol-relative URLs and values already under the base are left alone.
pub fn rebase_urls(html: &str, base: &str) -> String {
    let prefix = base.trim_end_matches('/');
    if prefix.is_empty() {
        return html.to_string();
    }

    ROOT_ABSOLUTE_ATTR
        .replace_all(html, |caps: &Captures| {
            let (value, quote) = match (caps.get(3), caps.get(4)) {
                (Some(value), _) => (value.as_str(), '"'),
                (None, Some(value)) => (value.as_str(), '\''),
                (None, None) => return caps[0].to_string(),
            };
            let under_base = value
                .strip_prefix(prefix)
                .is_some_and(|rest| rest.is_empty() || rest.starts_with(['/', '?', '#']));
            if value.starts_with("//") || under_base {
                return caps[0].to_string();
            }
            format!("{}{}{q}{}{}{q}", &caps[1], &caps[2], prefix, value, q = quote)
        })
        .into_owned()
}

/// Script that reloads the page when the session pushes an update
pub fn live_client_script(live_url: &str) -> String {
    format!(
        r#"<script type="module">(() => {{
  const proto = location.protocol === "https:" ? "wss:" : "ws:";
  const socket = new WebSocket(`${{proto}}//${{location.host}}{live_url}`);
  socket.addEventListener("message", (event) => {{
    const message = JSON.parse(event.data);
    if (message.type === "update") location.reload();
  }});
}})();</script>"#
    )
}

/// Insert the live client before `</head>`, or at the top when there is none
pub fn inject_live_client(html: &str, live_url: &str) -> String {
    let script = live_client_script(live_url);
    match HEAD_CLOSE.find(html) {
        Some(m) => {
            let mut out = String::with_capacity(html.len() + script.len());
            out.push_str(&html[..m.start()]);
            out.push_str(&script);
            out.push_str(&html[m.start()..]);
            out
        }
        None => format!("{}{}", script, html),
    }
}
