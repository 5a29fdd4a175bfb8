use std::path::PathBuf;

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Redirect, Response},
};
use serde::Serialize;
use tracing::{error, warn};
use utoipa::ToSchema;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Where a locked module sends the student back to.
pub const LOCKED_REDIRECT: &str = "/curso?warning=module_locked";

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("module {order} of {course}/{level} is locked until the previous module is completed")]
    Locked {
        course: String,
        level: String,
        order: i64,
    },
    #[error("module {order} of {course}/{level} not found")]
    ModuleNotFound {
        course: String,
        level: String,
        order: i64,
    },
    #[error("content of module {order} of {course}/{level} not found")]
    ContentNotFound {
        course: String,
        level: String,
        order: i64,
    },
    #[error("invalid content file {}: {source}", .path.display())]
    InvalidContent {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("unknown level: {0}")]
    UnknownLevel(String),
    #[error("access to course {0} denied")]
    CourseForbidden(String),
    #[error("unknown course: {0}")]
    UnknownCourse(String),
    #[error("{0} is required")]
    MissingField(&'static str),
    #[error("this email is already registered")]
    DuplicateEmail(String),
    #[error("invalid email or password")]
    InvalidCredentials,
    #[error("login required")]
    Unauthorized,
    #[error("the tutor service is unavailable, please try again later")]
    AiUnavailable,
    #[error("tutor backend error: {0}")]
    Ai(String),
    #[error("session error: {0}")]
    Session(#[from] tower_sessions::session::Error),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Fatal error: {0}")]
    Fatal(#[from] anyhow::Error),
}

#[derive(Serialize, ToSchema)]
pub struct ErrorBody {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
}

impl Error {
    pub fn status(&self) -> StatusCode {
        match self {
            Error::Locked { .. } => StatusCode::SEE_OTHER,
            Error::ModuleNotFound { .. }
            | Error::ContentNotFound { .. }
            | Error::InvalidContent { .. }
            | Error::Configuration(_)
            | Error::UnknownLevel(_) => StatusCode::NOT_FOUND,
            Error::CourseForbidden(_) => StatusCode::FORBIDDEN,
            Error::UnknownCourse(_) | Error::MissingField(_) => StatusCode::BAD_REQUEST,
            Error::DuplicateEmail(_) => StatusCode::CONFLICT,
            Error::InvalidCredentials | Error::Unauthorized => StatusCode::UNAUTHORIZED,
            Error::AiUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            Error::Ai(_) => StatusCode::BAD_GATEWAY,
            Error::Session(_) | Error::Database(_) | Error::Io(_) | Error::Fatal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    fn field(&self) -> Option<&'static str> {
        match self {
            Error::DuplicateEmail(_) => Some("email"),
            Error::UnknownCourse(_) => Some("course"),
            Error::MissingField(field) => Some(*field),
            _ => None,
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        match &self {
            Error::Locked { .. } => {
                warn!(error = %self, "module access denied");
                return Redirect::to(LOCKED_REDIRECT).into_response();
            }
            // reference data problems are for operators, students only see a 404
            Error::InvalidContent { .. } | Error::Configuration(_) => {
                error!(error = %self, "reference data error")
            }
            _ => {}
        }
        let status = self.status();
        if status.is_server_error() {
            error!(error = %self, "request failed");
        }
        let body = ErrorBody {
            error: self.to_string(),
            field: self.field().map(String::from),
        };
        (status, Json(body)).into_response()
    }
}
