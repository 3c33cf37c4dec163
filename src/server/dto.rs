//! HTTP DTOs for the sandbox endpoints.
//!
//! Request fields are optional so that a missing field is reported as an
//! invalid-input error with a JSON body instead of a bare extractor rejection.

use serde::{Deserialize, Serialize};

use crate::engine::UpdateNotification;
use crate::session::FileEntry;

// ════════════════════════════════════════════════════════════════════════════
// Request DTOs
// ════════════════════════════════════════════════════════════════════════════

/// Body of `POST /load-project`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadProjectRequest {
    pub project_id: Option<String>,
    pub files: Option<Vec<FileEntry>>,
}

/// Body of `POST /update-file`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateFileRequest {
    pub project_id: Option<String>,
    pub path: Option<String>,
    pub content: Option<String>,
}

// ════════════════════════════════════════════════════════════════════════════
// Response DTOs
// ════════════════════════════════════════════════════════════════════════════

/// Response of `GET /health`
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: &'static str,
    /// Seconds since the server started
    pub uptime: f64,
    pub timestamp: String,
    pub active_projects: usize,
}

/// Response of `POST /load-project`
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadProjectResponse {
    pub success: bool,
    pub project_id: String,
    pub preview_url: String,
}

/// Bare success acknowledgement
#[derive(Debug, Clone, Serialize)]
pub struct SuccessResponse {
    pub success: bool,
}

impl SuccessResponse {
    pub fn ok() -> Self {
        Self { success: true }
    }
}

/// Message sent to live clients over the websocket
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum LiveMessage {
    Connected,
    Update {
        path: String,
        url: String,
        timestamp: i64,
    },
}

impl From<UpdateNotification> for LiveMessage {
    fn from(update: UpdateNotification) -> Self {
        Self::Update {
            path: update.path.display().to_string(),
            url: update.url,
            timestamp: update.timestamp,
        }
    }
}

/// Standard error response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>, details: Option<String>) -> Self {
        Self {
            error: error.into(),
            details,
        }
    }
}
