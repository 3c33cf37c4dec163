//! HTTP surface
//!
//! Routes:
//! - `GET  /health` - liveness plus active project count
//! - `POST /load-project` - create or replace a project session
//! - `POST /update-file` - rewrite one file and notify live clients
//! - `ANY  /preview/:project_id` - redirects to the trailing-slash form
//! - `ANY  /preview/:project_id/*path` - served by the project's engine
//! - `GET  /live/:project_id` - websocket of update notifications

mod dto;
mod error;
mod handlers;

pub use dto::*;
pub use error::*;
pub use handlers::AppState;

use std::future::Future;
use std::sync::Arc;

use axum::{
    Router,
    extract::DefaultBodyLimit,
    http::{HeaderName, HeaderValue, Method, header},
    middleware,
    response::Response,
    routing::{any, get, post},
};
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::error::Result;
use crate::session::SessionManager;

/// Build the application router
pub fn router(manager: Arc<SessionManager>) -> Router {
    let config = manager.config();
    let body_limit = config.max_body_bytes;
    let cors = cors_layer(&config.allowed_origins);

    let preview = Router::new()
        .route("/preview/:project_id", any(handlers::preview_redirect))
        .route("/preview/:project_id/", any(handlers::preview_root))
        .route("/preview/:project_id/*path", any(handlers::preview_path))
        .layer(middleware::map_response(embeddable));

    Router::new()
        .route("/health", get(handlers::health))
        .route("/load-project", post(handlers::load_project))
        .route("/update-file", post(handlers::update_file))
        .route("/live/:project_id", get(handlers::live))
        .merge(preview)
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .layer(CatchPanicLayer::custom(panic_response))
        .with_state(manager)
}

/// Bind the configured address and serve until `shutdown` resolves
pub async fn serve<F>(manager: Arc<SessionManager>, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let addr = manager.config().socket_addr()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Listening on http://{}", listener.local_addr()?);

    axum::serve(listener, router(manager))
        .with_graceful_shutdown(shutdown)
        .await?;

    Ok(())
}

/// Let any origin frame the preview
async fn embeddable(mut response: Response) -> Response {
    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_SECURITY_POLICY,
        HeaderValue::from_static("frame-ancestors *"),
    );
    headers.insert(
        HeaderName::from_static("cross-origin-resource-policy"),
        HeaderValue::from_static("cross-origin"),
    );
    headers.insert(
        HeaderName::from_static("cross-origin-embedder-policy"),
        HeaderValue::from_static("unsafe-none"),
    );
    headers.insert(
        HeaderName::from_static("cross-origin-opener-policy"),
        HeaderValue::from_static("unsafe-none"),
    );
    headers.remove(header::X_FRAME_OPTIONS);
    response
}

fn cors_layer(allowed_origins: &[String]) -> CorsLayer {
    let origin = if allowed_origins.iter().any(|o| o == "*") {
        AllowOrigin::any()
    } else {
        let origins: Vec<HeaderValue> = allowed_origins
            .iter()
            .filter_map(|o| match HeaderValue::from_str(o) {
                Ok(value) => Some(value),
                Err(_) => {
                    warn!("Ignoring invalid allowed origin {:?}", o);
                    None
                }
            })
            .collect();
        AllowOrigin::list(origins)
    };

    CorsLayer::new()
        .allow_origin(origin)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE])
}
