//! Mapping of crate errors onto HTTP responses.

use std::any::Any;

use axum::{
    Json,
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use tracing::{debug, error};

use super::dto::ErrorResponse;
use crate::error::{EngineError, Error, SessionError, WorkspaceError};

/// Error returned from every handler
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    body: ErrorResponse,
}

impl ApiError {
    pub fn new(status: StatusCode, error: impl Into<String>, details: Option<String>) -> Self {
        Self {
            status,
            body: ErrorResponse::new(error, details),
        }
    }

    pub fn not_found(project_id: &str) -> Self {
        Self::new(
            StatusCode::NOT_FOUND,
            "Project not found",
            Some(format!("No live session for project '{}'", project_id)),
        )
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }
}

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        let details = Some(err.to_string());

        let (status, message) = if err.is_invalid_input() {
            (StatusCode::BAD_REQUEST, "Invalid input")
        } else if err.is_gone() {
            (StatusCode::GONE, "Project is no longer available")
        } else {
            match &err {
                Error::Session(SessionError::NotFound(_)) => {
                    (StatusCode::NOT_FOUND, "Project not found")
                }
                Error::Workspace(WorkspaceError::CreateFailed { .. })
                | Error::Workspace(WorkspaceError::WriteFailed { .. }) => {
                    (StatusCode::INTERNAL_SERVER_ERROR, "Failed to write project files")
                }
                Error::Engine(EngineError::StartFailed { .. }) => {
                    (StatusCode::INTERNAL_SERVER_ERROR, "Failed to start preview engine")
                }
                Error::Engine(EngineError::ServeFailed { .. }) => {
                    (StatusCode::INTERNAL_SERVER_ERROR, "Failed to serve preview")
                }
                _ => (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error"),
            }
        };

        if status.is_server_error() {
            error!("{}: {}", message, err);
        } else {
            debug!("{}: {}", message, err);
        }

        Self::new(status, message, details)
    }
}

impl From<SessionError> for ApiError {
    fn from(err: SessionError) -> Self {
        Error::from(err).into()
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        debug!("Rejected request body: {}", rejection.body_text());
        Self::new(
            StatusCode::BAD_REQUEST,
            "Invalid input",
            Some(rejection.body_text()),
        )
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}

/// Response for a handler that panicked; keeps every other session alive
pub fn panic_response(panic: Box<dyn Any + Send + 'static>) -> Response {
    let details = if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else {
        "unknown panic".to_string()
    };

    error!("Handler panicked: {}", details);
    ApiError::new(
        StatusCode::INTERNAL_SERVER_ERROR,
        "Internal server error",
        Some(details),
    )
    .into_response()
}
