//! Integration tests for the HTTP surface
//!
//! Requests go straight through the router with `tower::ServiceExt::oneshot`;
//! no socket is bound.

use std::sync::Arc;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::response::Response;
use chrono::{Duration, Utc};
use pretty_assertions::assert_eq;
use serde_json::{Value, json};
use tempfile::TempDir;
use tower::ServiceExt;

use preview_sandbox::{Config, ProjectId, SessionManager, server};

struct TestApp {
    router: Router,
    manager: Arc<SessionManager>,
    temp_dir: TempDir,
}

impl TestApp {
    fn new() -> Self {
        Self::with_config(|_| {})
    }

    fn with_config(adjust: impl FnOnce(&mut Config)) -> Self {
        let temp_dir = TempDir::new().unwrap();
        let mut config = Config::default();
        config.workspaces_dir = Some(temp_dir.path().to_path_buf());
        adjust(&mut config);

        let manager = Arc::new(SessionManager::with_dev_server(config));
        Self {
            router: server::router(manager.clone()),
            manager,
            temp_dir,
        }
    }

    fn workspaces(&self) -> std::path::PathBuf {
        self.temp_dir.path().to_path_buf()
    }

    async fn send(&self, request: Request<Body>) -> Response {
        self.router.clone().oneshot(request).await.unwrap()
    }

    async fn get(&self, uri: &str) -> Response {
        self.send(Request::get(uri).body(Body::empty()).unwrap()).await
    }

    async fn post_json(&self, uri: &str, body: Value) -> Response {
        self.send(
            Request::post(uri)
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
    }
}

async fn body_text(response: Response) -> String {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

async fn body_json(response: Response) -> Value {
    serde_json::from_str(&body_text(response).await).unwrap()
}

fn demo_project() -> Value {
    json!({
        "projectId": "demo",
        "files": [
            {
                "path": "/index.html",
                "content": "<!doctype html><html><head><title>Demo</title></head><body><div id=\"root\"></div><script type=\"module\" src=\"/src/main.jsx\"></script></body></html>"
            },
            { "path": "/src/main.jsx", "content": "import App from './App.jsx'" },
            { "path": "/src/App.jsx", "content": "export default () => 'v1'" }
        ]
    })
}

#[tokio::test]
async fn test_demo_scenario() {
    let app = TestApp::new();

    let response = app.post_json("/load-project", demo_project()).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["success"], true);
    assert_eq!(body["projectId"], "demo");
    assert_eq!(body["previewUrl"], "/preview/demo");

    let response = app.get("/preview/demo/").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()["content-type"],
        "text/html; charset=utf-8"
    );
    let html = body_text(response).await;
    assert!(html.contains("<title>Demo</title>"));
    assert!(html.contains("/live/demo"));

    let response = app.get("/preview/demo/src/App.jsx").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_text(response).await, "export default () => 'v1'");

    let response = app
        .post_json(
            "/update-file",
            json!({
                "projectId": "demo",
                "path": "/src/App.jsx",
                "content": "export default () => 'v2'"
            }),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await, json!({ "success": true }));

    let response = app.get("/preview/demo/src/App.jsx").await;
    assert_eq!(body_text(response).await, "export default () => 'v2'");

    let health = body_json(app.get("/health").await).await;
    assert_eq!(health["activeProjects"], 1);
}

#[tokio::test]
async fn test_minimal_project_previews_its_index() {
    let app = TestApp::new();

    let response = app
        .post_json(
            "/load-project",
            json!({
                "projectId": "demo",
                "files": [{ "path": "/index.html", "content": "<h1>hi</h1>" }]
            }),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    let response = app.get("/preview/demo/").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(body_text(response).await.contains("<h1>hi</h1>"));
}

#[tokio::test]
async fn test_spa_route_falls_back_to_index() {
    let app = TestApp::new();
    app.post_json("/load-project", demo_project()).await;

    let response = app.get("/preview/demo/settings/profile").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(body_text(response).await.contains("<title>Demo</title>"));
}

#[tokio::test]
async fn test_preview_without_trailing_slash_redirects() {
    let app = TestApp::new();
    app.post_json("/load-project", demo_project()).await;

    let response = app.get("/preview/demo").await;
    assert_eq!(response.status(), StatusCode::TEMPORARY_REDIRECT);
    assert_eq!(response.headers()["location"], "/preview/demo/");

    let response = app.get("/preview/demo?tab=2").await;
    assert_eq!(response.headers()["location"], "/preview/demo/?tab=2");
}

#[tokio::test]
async fn test_root_absolute_scripts_load_under_preview_base() {
    let app = TestApp::new();
    app.post_json("/load-project", demo_project()).await;

    let html = body_text(app.get("/preview/demo/").await).await;
    assert!(html.contains(r#"src="/preview/demo/src/main.jsx""#));
    assert!(!html.contains(r#"src="/src/main.jsx""#));

    let response = app.get("/preview/demo/src/main.jsx").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_text(response).await, "import App from './App.jsx'");
}

#[tokio::test]
async fn test_live_endpoint_unknown_project_is_404() {
    let app = TestApp::new();

    let response = app.get("/live/ghost").await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(body_json(response).await["error"], "Project not found");
}

#[tokio::test]
async fn test_live_endpoint_requires_upgrade() {
    let app = TestApp::new();
    app.post_json("/load-project", demo_project()).await;

    let response = app.get("/live/demo").await;
    assert_eq!(response.status(), StatusCode::UPGRADE_REQUIRED);
}

#[tokio::test]
async fn test_live_endpoint_disabled_is_404() {
    let app = TestApp::with_config(|config| config.live_reload = false);
    app.post_json("/load-project", demo_project()).await;

    let response = app.get("/live/demo").await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_update_unknown_project_is_404_without_workspace() {
    let app = TestApp::new();

    let response = app
        .post_json(
            "/update-file",
            json!({ "projectId": "ghost", "path": "a.js", "content": "x" }),
        )
        .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(body_json(response).await["error"], "Project not found");

    let mut entries = tokio::fs::read_dir(app.workspaces()).await.unwrap();
    assert!(entries.next_entry().await.unwrap().is_none());
}

#[tokio::test]
async fn test_missing_fields_are_bad_request() {
    let app = TestApp::new();

    let cases = vec![
        ("/load-project", json!({ "files": [] })),
        ("/load-project", json!({ "projectId": "demo" })),
        ("/load-project", json!({ "projectId": "", "files": [] })),
        ("/load-project", json!({ "projectId": "demo", "files": "nope" })),
        ("/update-file", json!({ "projectId": "demo", "path": "a.js" })),
        ("/update-file", json!({ "projectId": "demo", "content": "x" })),
        ("/update-file", json!({ "path": "a.js", "content": "x" })),
    ];

    for (uri, body) in cases {
        let response = app.post_json(uri, body.clone()).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST, "{} {}", uri, body);
        let error = body_json(response).await;
        assert!(error["error"].is_string());
    }
}

#[tokio::test]
async fn test_traversal_paths_are_bad_request() {
    let app = TestApp::new();

    let response = app
        .post_json(
            "/load-project",
            json!({
                "projectId": "evil",
                "files": [{ "path": "../../escape.txt", "content": "x" }]
            }),
        )
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(!app.workspaces().join("../escape.txt").exists());

    app.post_json("/load-project", demo_project()).await;
    let response = app
        .post_json(
            "/update-file",
            json!({ "projectId": "demo", "path": "../../escape.txt", "content": "x" }),
        )
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_preview_is_embeddable() {
    let app = TestApp::new();
    app.post_json("/load-project", demo_project()).await;

    let response = app.get("/preview/demo/").await;
    let headers = response.headers();
    assert_eq!(headers["content-security-policy"], "frame-ancestors *");
    assert_eq!(headers["cross-origin-resource-policy"], "cross-origin");
    assert_eq!(headers["cross-origin-embedder-policy"], "unsafe-none");
    assert_eq!(headers["cross-origin-opener-policy"], "unsafe-none");
    assert!(headers.get("x-frame-options").is_none());
}

#[tokio::test]
async fn test_preview_unknown_project_is_404() {
    let app = TestApp::new();

    let response = app.get("/preview/nobody/index.html").await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(body_json(response).await["error"], "Project not found");
}

#[tokio::test]
async fn test_preview_after_sweep_is_404() {
    let app = TestApp::new();
    app.post_json("/load-project", demo_project()).await;

    app.manager.sweep_at(Utc::now() + Duration::hours(1)).await;

    let response = app.get("/preview/demo/").await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_reload_replaces_served_content() {
    let app = TestApp::new();
    app.post_json("/load-project", demo_project()).await;

    let response = app
        .post_json(
            "/load-project",
            json!({
                "projectId": "demo",
                "files": [{ "path": "index.html", "content": "<p>second</p>" }]
            }),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    let html = body_text(app.get("/preview/demo/").await).await;
    assert!(html.contains("second"));

    // The first load's files are gone with its workspace
    let response = app.get("/preview/demo/src/App.jsx").await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_preview_conditional_get() {
    let app = TestApp::new();
    app.post_json("/load-project", demo_project()).await;

    let response = app.get("/preview/demo/src/main.jsx").await;
    let etag = response.headers()["etag"].to_str().unwrap().to_string();
    assert_eq!(response.headers()["cache-control"], "no-cache");

    let response = app
        .send(
            Request::get("/preview/demo/src/main.jsx")
                .header("if-none-match", &etag)
                .body(Body::empty())
                .unwrap(),
        )
        .await;
    assert_eq!(response.status(), StatusCode::NOT_MODIFIED);
}

#[tokio::test]
async fn test_preview_rejects_writes() {
    let app = TestApp::new();
    app.post_json("/load-project", demo_project()).await;

    let response = app
        .send(
            Request::post("/preview/demo/index.html")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
    assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
}

#[tokio::test]
async fn test_live_reload_disabled_skips_injection() {
    let app = TestApp::with_config(|config| config.live_reload = false);
    app.post_json("/load-project", demo_project()).await;

    let html = body_text(app.get("/preview/demo/").await).await;
    assert!(!html.contains("/live/demo"));
}

#[tokio::test]
async fn test_body_limit_is_enforced() {
    let app = TestApp::with_config(|config| config.max_body_bytes = 1024);

    let response = app
        .post_json(
            "/load-project",
            json!({
                "projectId": "big",
                "files": [{ "path": "index.html", "content": "x".repeat(4096) }]
            }),
        )
        .await;
    assert!(response.status().is_client_error());
    assert!(app.manager.lookup(&ProjectId::new("big").unwrap()).await.is_err());
}
