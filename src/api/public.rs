use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, State},
    response::{IntoResponse, Redirect, Response},
};
use serde::Serialize;
use tracing::debug;
use utoipa::ToSchema;

use super::AppState;
use crate::{error::Result, utils::slugify};

#[derive(Debug, Serialize, ToSchema)]
pub struct CourseOffer {
    pub name: String,
    pub slug: String,
    pub checkout: String,
}

impl CourseOffer {
    fn new(name: &str) -> Self {
        let slug = slugify(name);
        Self {
            name: name.to_string(),
            checkout: format!("/pagamento/{slug}"),
            slug,
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct Landing {
    pub name: String,
    pub courses: Vec<CourseOffer>,
}

#[utoipa::path(
    get,
    path = "/",
    tag = "public",
    responses(
        (status = 200, description = "Application name and offered courses", body = Landing)
    )
)]
pub async fn landing(State(state): State<Arc<AppState>>) -> Json<Landing> {
    Json(Landing {
        name: "LevelUp".to_string(),
        courses: state
            .config
            .courses
            .iter()
            .map(|name| CourseOffer::new(name))
            .collect(),
    })
}

#[derive(Debug, Serialize, ToSchema)]
pub struct LevelOutline {
    pub level: String,
    pub modules: Vec<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct Checkout {
    pub course: CourseOffer,
    pub levels: Vec<LevelOutline>,
    /// Where to send the registration form for this course.
    pub register: String,
}

#[utoipa::path(
    get,
    path = "/pagamento/{course}",
    tag = "public",
    params(("course" = String, Path, description = "Course name or slug")),
    responses(
        (status = 200, description = "Simulated checkout for the course", body = Checkout),
        (status = 303, description = "Unknown course, redirect to the landing page")
    )
)]
pub async fn payment(
    State(state): State<Arc<AppState>>,
    Path(course): Path<String>,
) -> Result<Response> {
    let Some(name) = state
        .config
        .course_slug(&course)
        .and_then(|slug| state.config.course_name(&slug))
    else {
        debug!(%course, "checkout for unknown course");
        return Ok(Redirect::to("/").into_response());
    };
    let offer = CourseOffer::new(name);
    let modules = state.catalog.modules(&offer.slug).await?;
    let levels = state
        .catalog
        .levels()
        .iter()
        .map(|level| LevelOutline {
            level: level.to_string(),
            modules: modules
                .iter()
                .filter(|m| m.level == level)
                .map(|m| m.name.clone())
                .collect(),
        })
        .collect();
    Ok(Json(Checkout {
        course: offer,
        levels,
        register: "/cadastro".to_string(),
    })
    .into_response())
}

#[cfg(test)]
mod tests {
    use axum::http::{StatusCode, header};

    use crate::api::tests::{json_body, send, test_app};

    #[tokio::test]
    async fn test_landing_and_checkout() {
        let (app, _dir) = test_app().await;
        let landing = json_body(send(&app, "GET", "/", None, None).await).await;
        assert_eq!(landing["courses"][0]["slug"], "ingles");
        assert_eq!(landing["courses"][0]["checkout"], "/pagamento/ingles");

        let checkout = send(&app, "GET", "/pagamento/Ingl%C3%AAs", None, None).await;
        assert_eq!(checkout.status(), StatusCode::OK);
        let checkout = json_body(checkout).await;
        assert_eq!(checkout["course"]["name"], "Inglês");
        assert_eq!(checkout["levels"][0]["modules"][1], "Numbers");
        assert_eq!(checkout["levels"][1]["modules"][0], "Travel");

        let unknown = send(&app, "GET", "/pagamento/klingon", None, None).await;
        assert_eq!(unknown.status(), StatusCode::SEE_OTHER);
        assert_eq!(unknown.headers()[header::LOCATION], "/");
    }
}
