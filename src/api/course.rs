use std::{collections::BTreeMap, sync::Arc};

use axum::{
    Extension, Json,
    extract::{Path, Query, State},
};
use serde::{Deserialize, Serialize};
use tower_sessions::Session;
use tracing::info;
use utoipa::{IntoParams, ToSchema};

use super::{AppState, auth::StudentContext};
use crate::{
    content::{ModuleKey, ModuleView},
    error::{Error, ErrorBody, Result},
    progression::{Advancement, CourseProgress, ScoreReport, evaluate_submission},
    student::{self, StudentInfo},
    utils::slugify,
};

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct HomeQuery {
    /// Notice to show, e.g. `module_locked` after a locked module was requested.
    pub warning: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct CourseHome {
    pub name: String,
    pub course: String,
    pub course_name: String,
    pub level: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
    pub progress: CourseProgress,
}

#[utoipa::path(
    get,
    path = "/curso",
    tag = "course",
    params(HomeQuery),
    responses(
        (status = 200, description = "Levels and modules of the student's course", body = CourseHome),
        (status = 401, description = "Not logged in", body = ErrorBody)
    )
)]
pub async fn course_home(
    State(state): State<Arc<AppState>>,
    Extension(student): Extension<StudentContext>,
    Query(query): Query<HomeQuery>,
) -> Result<Json<CourseHome>> {
    let progress = state.engine.progress_summary(student.id, &student.course).await?;
    let course_name = state
        .config
        .course_name(&student.course)
        .unwrap_or(&student.course)
        .to_string();
    Ok(Json(CourseHome {
        name: student.name,
        course: student.course,
        course_name,
        level: student.level,
        warning: query.warning,
        progress,
    }))
}

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct LevelQuery {
    /// Level of the module, the student's active level when absent.
    pub level: Option<String>,
}

/// Key of the requested module, refusing courses the student is not enrolled in.
fn module_key(
    state: &AppState,
    student: &StudentContext,
    course: &str,
    order: i64,
    level: Option<String>,
) -> Result<ModuleKey> {
    if slugify(course) != student.course {
        return Err(Error::CourseForbidden(course.to_string()));
    }
    let level = level.unwrap_or_else(|| student.level.clone());
    let level = state
        .engine
        .levels()
        .canonical(&level)
        .ok_or(Error::UnknownLevel(level.clone()))?;
    Ok(ModuleKey::new(&student.course, level, order))
}

#[utoipa::path(
    get,
    path = "/curso/{course}/modulo/{order}",
    tag = "course",
    params(
        ("course" = String, Path, description = "Course slug"),
        ("order" = i64, Path, description = "Module order within the level, from 1"),
        LevelQuery
    ),
    responses(
        (status = 200, description = "Module content without the answer key", body = ModuleView),
        (status = 303, description = "Module locked, redirect to the course home"),
        (status = 403, description = "Not enrolled in this course", body = ErrorBody),
        (status = 404, description = "Module not found", body = ErrorBody)
    )
)]
pub async fn view_module(
    State(state): State<Arc<AppState>>,
    Extension(student): Extension<StudentContext>,
    Path((course, order)): Path<(String, i64)>,
    Query(query): Query<LevelQuery>,
) -> Result<Json<ModuleView>> {
    let key = module_key(&state, &student, &course, order, query.level)?;
    state.engine.ensure_access(student.id, &key).await?;
    let content = state.content.get(&key).await?;
    Ok(Json(content.view(&key)))
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct SubmitRequest {
    /// question id -> chosen answer. Form style keys (`pergunta_<id>`) are accepted too.
    pub answers: BTreeMap<String, String>,
}

impl SubmitRequest {
    fn into_answers(self) -> BTreeMap<String, String> {
        self.answers
            .into_iter()
            .map(|(id, answer)| match id.strip_prefix("pergunta_") {
                Some(stripped) => (stripped.to_string(), answer),
                None => (id, answer),
            })
            .collect()
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct SubmissionResult {
    pub report: ScoreReport,
    pub advancement: Advancement,
    /// Set when the client should return to the course home.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub redirect: Option<String>,
}

#[utoipa::path(
    post,
    path = "/curso/{course}/modulo/{order}",
    tag = "course",
    params(
        ("course" = String, Path, description = "Course slug"),
        ("order" = i64, Path, description = "Module order within the level, from 1"),
        LevelQuery
    ),
    request_body = SubmitRequest,
    responses(
        (status = 200, description = "Graded submission and its effect on progress", body = SubmissionResult),
        (status = 303, description = "Module locked, redirect to the course home"),
        (status = 403, description = "Not enrolled in this course", body = ErrorBody),
        (status = 404, description = "Module not found", body = ErrorBody)
    )
)]
pub async fn submit_module(
    State(state): State<Arc<AppState>>,
    Extension(mut student): Extension<StudentContext>,
    session: Session,
    Path((course, order)): Path<(String, i64)>,
    Query(query): Query<LevelQuery>,
    Json(req): Json<SubmitRequest>,
) -> Result<Json<SubmissionResult>> {
    let key = module_key(&state, &student, &course, order, query.level)?;
    state.engine.ensure_access(student.id, &key).await?;
    let content = state.content.get(&key).await?;
    let threshold = content
        .pass_threshold
        .unwrap_or(state.config.default_pass_threshold);
    let report = evaluate_submission(&key, &content.correct_answers, &req.into_answers(), threshold);
    let advancement = state
        .engine
        .advance(student.id, &key, report.score_percent, report.passed)
        .await?;
    if let Advancement::LevelAdvanced { .. } = &advancement {
        student.level = student::get_student_level(&state.database, student.id).await?;
        student.save(&session).await?;
        info!(student_id = student.id, level = %student.level, "active level updated");
    }
    let redirect = advancement.leaves_module().then(|| "/curso".to_string());
    Ok(Json(SubmissionResult {
        report,
        advancement,
        redirect,
    }))
}

#[derive(Debug, Serialize, ToSchema)]
pub struct Profile {
    pub student: StudentInfo,
    pub course_name: String,
    pub progress: CourseProgress,
}

#[utoipa::path(
    get,
    path = "/perfil",
    tag = "course",
    responses(
        (status = 200, description = "Student data and progress", body = Profile),
        (status = 401, description = "Not logged in", body = ErrorBody)
    )
)]
pub async fn profile(
    State(state): State<Arc<AppState>>,
    Extension(student): Extension<StudentContext>,
    session: Session,
) -> Result<Json<Profile>> {
    let info = match student::get_student_info(&state.database, student.id).await {
        Ok(info) => info,
        Err(e) => {
            // account removed under a live session
            session.flush().await?;
            return Err(e);
        }
    };
    let progress = state.engine.progress_summary(info.id, &info.course).await?;
    let course_name = state
        .config
        .course_name(&info.course)
        .unwrap_or(&info.course)
        .to_string();
    Ok(Json(Profile {
        student: info,
        course_name,
        progress,
    }))
}

#[cfg(test)]
mod tests {
    use axum::http::{StatusCode, header};
    use serde_json::{Value, json};

    use crate::{
        api::tests::{json_body, logged_in, send, test_app},
        error::LOCKED_REDIRECT,
    };

    /// `right` answers correct out of ten, the rest wrong.
    fn answers(right: usize) -> Value {
        let answers: serde_json::Map<String, Value> = (1..=10)
            .map(|i| (i.to_string(), json!(if i <= right { "a" } else { "b" })))
            .collect();
        json!({ "answers": answers })
    }

    #[tokio::test]
    async fn test_view_first_module_and_lock() {
        let (app, _dir) = test_app().await;
        let cookie = logged_in(&app, "ana@example.com").await;

        let first = send(&app, "GET", "/curso/ingles/modulo/1", Some(&cookie), None).await;
        assert_eq!(first.status(), StatusCode::OK);
        let view = json_body(first).await;
        assert_eq!(view["title"], "Greetings");
        assert_eq!(view["questions"].as_array().unwrap().len(), 10);
        assert!(view.get("correct_answers").is_none());

        let locked = send(&app, "GET", "/curso/ingles/modulo/2", Some(&cookie), None).await;
        assert_eq!(locked.status(), StatusCode::SEE_OTHER);
        assert_eq!(locked.headers()[header::LOCATION], LOCKED_REDIRECT);

        let locked_submit = send(&app, "POST", "/curso/ingles/modulo/2", Some(&cookie), Some(answers(10))).await;
        assert_eq!(locked_submit.status(), StatusCode::SEE_OTHER);

        let other_course = send(&app, "GET", "/curso/espanhol/modulo/1", Some(&cookie), None).await;
        assert_eq!(other_course.status(), StatusCode::FORBIDDEN);

        let unknown_level = send(&app, "GET", "/curso/ingles/modulo/1?level=Expert", Some(&cookie), None).await;
        assert_eq!(unknown_level.status(), StatusCode::NOT_FOUND);

        let home = send(&app, "GET", "/curso?warning=module_locked", Some(&cookie), None).await;
        let home = json_body(home).await;
        assert_eq!(home["warning"], "module_locked");
        assert_eq!(home["course_name"], "Inglês");
        assert_eq!(home["progress"]["total"], 3);
    }

    #[tokio::test]
    async fn test_submit_unlocks_and_advances() {
        let (app, _dir) = test_app().await;
        let cookie = logged_in(&app, "ana@example.com").await;

        let form_keys = json!({"answers": {"pergunta_1": "A", "pergunta_2": "a"}});
        let failed = send(&app, "POST", "/curso/ingles/modulo/1", Some(&cookie), Some(form_keys)).await;
        assert_eq!(json_body(failed).await["report"]["correct_count"], 2);

        let failed = send(&app, "POST", "/curso/ingles/modulo/1", Some(&cookie), Some(answers(5))).await;
        assert_eq!(failed.status(), StatusCode::OK);
        let failed = json_body(failed).await;
        assert_eq!(failed["report"]["passed"], false);
        assert_eq!(failed["advancement"]["kind"], "stayed");

        let passed = send(&app, "POST", "/curso/ingles/modulo/1", Some(&cookie), Some(answers(8))).await;
        let passed = json_body(passed).await;
        assert_eq!(passed["report"]["score_percent"], 80.0);
        assert_eq!(passed["advancement"]["kind"], "unlocked");
        assert_eq!(passed["advancement"]["module"]["order"], 2);
        assert!(passed.get("redirect").is_none());

        let second = send(&app, "GET", "/curso/ingles/modulo/2", Some(&cookie), None).await;
        assert_eq!(second.status(), StatusCode::OK);

        let advanced = send(&app, "POST", "/curso/ingles/modulo/2", Some(&cookie), Some(answers(10))).await;
        let advanced = json_body(advanced).await;
        assert_eq!(advanced["advancement"]["kind"], "level_advanced");
        assert_eq!(advanced["advancement"]["to"], "Intermediate");
        assert_eq!(advanced["redirect"], "/curso");

        // the session follows the new level
        let home = json_body(send(&app, "GET", "/curso", Some(&cookie), None).await).await;
        assert_eq!(home["level"], "Intermediate");
        let next = send(&app, "GET", "/curso/ingles/modulo/1", Some(&cookie), None).await;
        assert_eq!(json_body(next).await["title"], "Travel");

        let profile = json_body(send(&app, "GET", "/perfil", Some(&cookie), None).await).await;
        assert_eq!(profile["student"]["level"], "Intermediate");
        assert_eq!(profile["progress"]["completed"], 2);
    }
}
