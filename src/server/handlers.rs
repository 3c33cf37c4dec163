//! HTTP handlers for the sandbox endpoints.
//!
//! Handlers only translate between HTTP and `SessionManager`; every
//! lifecycle rule lives in the manager.

use std::sync::Arc;

use axum::{
    Json,
    extract::{
        Path, State,
        rejection::JsonRejection,
        ws::{Message, WebSocketUpgrade},
    },
    http::{HeaderMap, Method, StatusCode, Uri},
    response::{IntoResponse, Redirect, Response},
};
use chrono::Utc;
use futures::{Sink, SinkExt, Stream, StreamExt};
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, info};

use super::dto::{
    HealthResponse, LiveMessage, LoadProjectRequest, LoadProjectResponse, SuccessResponse,
    UpdateFileRequest,
};
use super::error::ApiError;
use crate::engine::{PreviewRequest, UpdateNotification};
use crate::error::SessionError;
use crate::session::{ProjectId, SessionManager};
use crate::workspace::validate_load;

/// Shared handler state
pub type AppState = Arc<SessionManager>;

// ════════════════════════════════════════════════════════════════════════════
// Control endpoints
// ════════════════════════════════════════════════════════════════════════════

/// GET /health
pub async fn health(State(manager): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        uptime: manager.uptime().as_secs_f64(),
        timestamp: Utc::now().to_rfc3339(),
        active_projects: manager.active_projects().await,
    })
}

/// POST /load-project
pub async fn load_project(
    State(manager): State<AppState>,
    payload: Result<Json<LoadProjectRequest>, JsonRejection>,
) -> Result<Json<LoadProjectResponse>, ApiError> {
    let Json(request) = payload?;
    let (project_id, files) = validate_load(request.project_id, request.files)?;

    let outcome = manager.load_or_replace(project_id, files).await?;
    info!(
        "Project {} ready at {} ({} files)",
        outcome.project_id, outcome.preview_url, outcome.file_count
    );

    Ok(Json(LoadProjectResponse {
        success: true,
        project_id: outcome.project_id.to_string(),
        preview_url: outcome.preview_url,
    }))
}

/// POST /update-file
pub async fn update_file(
    State(manager): State<AppState>,
    payload: Result<Json<UpdateFileRequest>, JsonRejection>,
) -> Result<Json<SuccessResponse>, ApiError> {
    let Json(request) = payload?;

    let project_id = required(request.project_id, "projectId")?;
    let path = required(request.path, "path")?;
    let content = required(request.content, "content")?;
    let project_id = ProjectId::new(project_id)?;

    manager.update_file(&project_id, &path, &content).await?;
    Ok(Json(SuccessResponse::ok()))
}

fn required(value: Option<String>, field: &str) -> Result<String, SessionError> {
    value.ok_or_else(|| SessionError::InvalidInput(format!("{} is required", field)))
}

// ════════════════════════════════════════════════════════════════════════════
// Preview
// ════════════════════════════════════════════════════════════════════════════

/// ANY /preview/:project_id
///
/// Redirects to the trailing-slash form so relative URLs in the app
/// resolve below the preview base.
pub async fn preview_redirect(uri: Uri) -> Redirect {
    let location = match uri.query() {
        Some(query) => format!("{}/?{}", uri.path(), query),
        None => format!("{}/", uri.path()),
    };
    Redirect::temporary(&location)
}

/// ANY /preview/:project_id/
pub async fn preview_root(
    State(manager): State<AppState>,
    Path(project_id): Path<String>,
    method: Method,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    preview(manager, &project_id, "/".to_string(), method, headers).await
}

/// ANY /preview/:project_id/*path
pub async fn preview_path(
    State(manager): State<AppState>,
    Path((project_id, path)): Path<(String, String)>,
    method: Method,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    preview(manager, &project_id, format!("/{}", path), method, headers).await
}

async fn preview(
    manager: AppState,
    raw_id: &str,
    path: String,
    method: Method,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    // An id that could never have been loaded is simply unknown
    let project_id = ProjectId::new(raw_id).map_err(|_| ApiError::not_found(raw_id))?;

    let request = PreviewRequest {
        method,
        path,
        headers,
    };

    let response = manager.serve(&project_id, request).await?;
    Ok((response.status, response.headers, response.body).into_response())
}

// ════════════════════════════════════════════════════════════════════════════
// Live updates
// ════════════════════════════════════════════════════════════════════════════

/// GET /live/:project_id (websocket)
///
/// Unknown projects are 404 whether or not the request is an upgrade.
pub async fn live(
    State(manager): State<AppState>,
    Path(raw_id): Path<String>,
    ws: Option<WebSocketUpgrade>,
) -> Result<Response, ApiError> {
    if !manager.config().live_reload {
        return Err(ApiError::new(
            StatusCode::NOT_FOUND,
            "Live reload is disabled",
            None,
        ));
    }

    let project_id = ProjectId::new(raw_id.as_str()).map_err(|_| ApiError::not_found(&raw_id))?;
    let updates = manager.subscribe(&project_id).await?;

    let Some(ws) = ws else {
        return Err(ApiError::new(
            StatusCode::UPGRADE_REQUIRED,
            "Websocket upgrade required",
            None,
        ));
    };

    Ok(ws.on_upgrade(move |socket| {
        let (sender, receiver) = socket.split();
        forward_updates(sender, receiver, project_id, updates)
    }))
}

/// Push update notifications to one live client until either side goes away
async fn forward_updates<S, R, E>(
    mut sender: S,
    mut receiver: R,
    project_id: ProjectId,
    mut updates: broadcast::Receiver<UpdateNotification>,
) where
    S: Sink<Message> + Unpin,
    R: Stream<Item = Result<Message, E>> + Unpin,
{
    debug!("Live client connected to {}", project_id);

    if send_message(&mut sender, &LiveMessage::Connected).await.is_err() {
        return;
    }

    loop {
        tokio::select! {
            update = updates.recv() => match update {
                Ok(update) => {
                    if send_message(&mut sender, &LiveMessage::from(update)).await.is_err() {
                        break;
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    debug!("Live client for {} skipped {} updates", project_id, skipped);
                }
                // Session closed; its engine dropped the sender
                Err(RecvError::Closed) => break,
            },
            incoming = receiver.next() => match incoming {
                Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
                Some(Ok(_)) => {}
            },
        }
    }

    let _ = sender.close().await;
    debug!("Live client disconnected from {}", project_id);
}

async fn send_message<S>(sender: &mut S, message: &LiveMessage) -> Result<(), S::Error>
where
    S: Sink<Message> + Unpin,
{
    let text = match serde_json::to_string(message) {
        Ok(text) => text,
        Err(e) => {
            debug!("Failed to encode live message: {}", e);
            return Ok(());
        }
    };
    sender.send(Message::Text(text)).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::channel::mpsc;
    use pretty_assertions::assert_eq;
    use serde_json::Value;

    type Incoming = mpsc::UnboundedSender<Result<Message, axum::Error>>;

    fn spawn_forwarder() -> (
        broadcast::Sender<UpdateNotification>,
        mpsc::UnboundedReceiver<Message>,
        Incoming,
        tokio::task::JoinHandle<()>,
    ) {
        let (updates_tx, updates) = broadcast::channel(4);
        let (sender, outgoing) = mpsc::unbounded();
        let (incoming_tx, incoming) = mpsc::unbounded();
        let project_id = ProjectId::new("demo").unwrap();
        let task = tokio::spawn(forward_updates(sender, incoming, project_id, updates));
        (updates_tx, outgoing, incoming_tx, task)
    }

    async fn next_json(outgoing: &mut mpsc::UnboundedReceiver<Message>) -> Value {
        match outgoing.next().await {
            Some(Message::Text(text)) => serde_json::from_str(&text).unwrap(),
            other => panic!("expected a text frame, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_forward_updates_relays_until_session_closes() {
        let (updates_tx, mut outgoing, _incoming, task) = spawn_forwarder();

        assert_eq!(next_json(&mut outgoing).await["type"], "connected");

        updates_tx
            .send(UpdateNotification {
                path: "/ws/src/App.jsx".into(),
                url: "/src/App.jsx".to_string(),
                timestamp: 42,
            })
            .unwrap();
        let update = next_json(&mut outgoing).await;
        assert_eq!(update["type"], "update");
        assert_eq!(update["url"], "/src/App.jsx");
        assert_eq!(update["timestamp"], 42);

        // Closing the session drops the sender
        drop(updates_tx);
        task.await.unwrap();
        assert!(outgoing.next().await.is_none());
    }

    #[tokio::test]
    async fn test_forward_updates_stops_on_client_close() {
        let (_updates_tx, mut outgoing, incoming, task) = spawn_forwarder();
        assert_eq!(next_json(&mut outgoing).await["type"], "connected");

        incoming.unbounded_send(Ok(Message::Close(None))).unwrap();
        task.await.unwrap();
    }
}
