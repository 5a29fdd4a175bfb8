use std::sync::Arc;

use axum::{
    Json,
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Redirect, Response},
};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tower_sessions::Session;
use tracing::{debug, info};
use utoipa::ToSchema;

use super::AppState;
use crate::{
    error::{Error, Result},
    student::{self, StudentInfo},
    tutor::ChatKey,
};

pub const STUDENT_KEY: &str = "student";

/// What the session remembers about the logged-in student.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StudentContext {
    pub id: i64,
    pub name: String,
    /// Course slug
    pub course: String,
    /// Active level, updated when the student moves up.
    pub level: String,
    /// Identifies this login for the tutor conversation cache.
    pub chat_session: String,
}

impl StudentContext {
    fn new(student: StudentInfo) -> Self {
        let chat_session = format!(
            "{:x}-{:x}",
            student.id,
            OffsetDateTime::now_utc().unix_timestamp_nanos()
        );
        Self {
            id: student.id,
            name: student.name,
            course: student.course,
            level: student.level,
            chat_session,
        }
    }

    pub fn chat_key(&self, state: &AppState) -> ChatKey {
        let course = state
            .config
            .course_name(&self.course)
            .unwrap_or(&self.course)
            .to_string();
        ChatKey {
            chat_session: self.chat_session.clone(),
            course,
        }
    }

    pub async fn save(&self, session: &Session) -> Result<()> {
        session.insert(STUDENT_KEY, self).await?;
        Ok(())
    }
}

/// Reject requests without a logged-in student, otherwise hand the
/// [`StudentContext`] to the handler as an extension.
pub async fn require_login(session: Session, mut request: Request, next: Next) -> Result<Response> {
    let Some(student) = session.get::<StudentContext>(STUDENT_KEY).await? else {
        debug!(path = %request.uri().path(), "request without login");
        return Err(Error::Unauthorized);
    };
    request.extensions_mut().insert(student);
    Ok(next.run(request).await)
}

fn required<'a>(value: &'a str, field: &'static str) -> Result<&'a str> {
    let value = value.trim();
    if value.is_empty() {
        return Err(Error::MissingField(field));
    }
    Ok(value)
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct RegisterRequest {
    pub name: String,
    pub email: String,
    pub password: String,
    /// Display name or slug of one of the offered courses.
    pub course: String,
}

#[utoipa::path(
    post,
    path = "/cadastro",
    tag = "auth",
    request_body = RegisterRequest,
    responses(
        (status = 201, description = "Student registered", body = StudentInfo),
        (status = 400, description = "Missing field or unknown course", body = crate::error::ErrorBody),
        (status = 409, description = "Email already registered", body = crate::error::ErrorBody)
    )
)]
pub async fn register(
    State(state): State<Arc<AppState>>,
    Json(req): Json<RegisterRequest>,
) -> Result<impl IntoResponse> {
    let name = required(&req.name, "name")?;
    let email = required(&req.email, "email")?;
    if req.password.is_empty() {
        return Err(Error::MissingField("password"));
    }
    let course_name = required(&req.course, "course")?;
    let course = state
        .config
        .course_slug(course_name)
        .ok_or_else(|| Error::UnknownCourse(course_name.to_string()))?;
    let level = state.engine.levels().first();
    let id = student::create_student(&state.database, name, email, &req.password, &course, level)
        .await?;
    info!(student_id = id, %course, "student registered");
    let student = student::get_student_info(&state.database, id).await?;
    Ok((StatusCode::CREATED, Json(student)))
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct LoginResponse {
    pub student: StudentInfo,
    /// Where the client should go next.
    pub redirect: String,
}

#[utoipa::path(
    post,
    path = "/login",
    tag = "auth",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Logged in, session cookie set", body = LoginResponse),
        (status = 401, description = "Invalid email or password", body = crate::error::ErrorBody)
    )
)]
pub async fn login(
    State(state): State<Arc<AppState>>,
    session: Session,
    Json(req): Json<LoginRequest>,
) -> Result<Json<LoginResponse>> {
    let student = student::login(&state.database, &req.email, &req.password).await?;
    // new session id on privilege change
    session.cycle_id().await?;
    StudentContext::new(student.clone()).save(&session).await?;
    info!(student_id = student.id, "student logged in");
    Ok(Json(LoginResponse {
        student,
        redirect: "/curso".to_string(),
    }))
}

#[utoipa::path(
    post,
    path = "/logout",
    tag = "auth",
    responses(
        (status = 303, description = "Session cleared, redirect to the landing page")
    )
)]
pub async fn logout(State(state): State<Arc<AppState>>, session: Session) -> Result<Redirect> {
    if let Some(student) = session.get::<StudentContext>(STUDENT_KEY).await? {
        state.tutor.forget(&student.chat_key(&state)).await;
        info!(student_id = student.id, "student logged out");
    }
    session.flush().await?;
    Ok(Redirect::to("/"))
}
