pub mod auth;
pub mod chat;
pub mod course;
pub mod public;

use std::sync::Arc;

use axum::{
    Router, middleware,
    routing::{get, post},
};
use sqlx::SqlitePool;
use tower_http::trace::TraceLayer;
use tower_sessions::{SessionManagerLayer, SessionStore};
use tracing::warn;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::{
    catalog::Catalog,
    config::Config,
    content::ContentStore,
    error::Result,
    progression::ProgressionEngine,
    tutor::TutorBridge,
    utils::slugify,
};

/// Everything a request handler needs, shared behind an `Arc`.
pub struct AppState {
    pub config: Config,
    pub database: SqlitePool,
    pub content: ContentStore,
    pub catalog: Catalog,
    pub engine: ProgressionEngine,
    pub tutor: TutorBridge,
}

impl AppState {
    /// Build the shared state and register the modules found under the content root.
    pub async fn new(config: Config, database: SqlitePool, tutor: TutorBridge) -> Result<Self> {
        let levels = config.level_sequence()?;
        let content = ContentStore::new(&config.content_path);
        let catalog = Catalog::new(database.clone(), levels.clone());
        catalog.scan(&content).await?;
        let registered = catalog.list_courses().await?;
        for course in &config.courses {
            if !registered.contains(&slugify(course)) {
                warn!(course = %course, "course has no modules");
            }
        }
        let engine = ProgressionEngine::new(database.clone(), levels);
        Ok(Self {
            config,
            database,
            content,
            catalog,
            engine,
            tutor,
        })
    }
}

#[derive(OpenApi)]
#[openapi(
    paths(
        public::landing,
        public::payment,
        auth::register,
        auth::login,
        auth::logout,
        course::course_home,
        course::view_module,
        course::submit_module,
        course::profile,
        chat::chat,
        chat::chat_ws,
    ),
    tags(
        (name = "public", description = "Landing and checkout"),
        (name = "auth", description = "Registration and sessions"),
        (name = "course", description = "Modules, quizzes and progress"),
        (name = "tutor", description = "AI tutor chat"),
    )
)]
pub struct ApiDoc;

pub fn build_router<S: SessionStore + Clone>(
    state: Arc<AppState>,
    sessions: SessionManagerLayer<S>,
) -> Router {
    let protected = Router::new()
        .route("/curso", get(course::course_home))
        .route(
            "/curso/{course}/modulo/{order}",
            get(course::view_module).post(course::submit_module),
        )
        .route("/perfil", get(course::profile))
        .route("/chat", post(chat::chat))
        .route("/chat/ws", get(chat::chat_ws))
        .route_layer(middleware::from_fn(auth::require_login));

    Router::new()
        .route("/", get(public::landing))
        .route("/pagamento/{course}", get(public::payment))
        .route("/cadastro", post(auth::register))
        .route("/login", post(auth::login))
        .route("/logout", get(auth::logout).post(auth::logout))
        .merge(protected)
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .layer(sessions)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[cfg(test)]
pub(crate) mod tests {
    use axum::{
        body::{Body, to_bytes},
        http::{Request, Response, StatusCode, header},
    };
    use serde_json::{Value, json};
    use tower::ServiceExt;
    use tower_sessions::MemoryStore;

    use super::*;
    use crate::{
        config::TutorConfig,
        content::tests::{quiz, write_module},
        database::memory_pool,
        tutor::{backend::OpenAiBackend, credentials::CredentialPool},
    };

    /// A router over a temporary content tree: Inglês with two Basic modules
    /// and one Intermediate module.
    pub async fn test_app() -> (Router, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        write_module(dir.path(), "ingles", "basic", 1, &quiz("Greetings", 10));
        write_module(dir.path(), "ingles", "basic", 2, &quiz("Numbers", 10));
        write_module(dir.path(), "ingles", "intermediate", 1, &quiz("Travel", 10));
        let config = Config {
            content_path: dir.path().to_path_buf(),
            ..Config::default()
        };
        let tutor = TutorBridge::new(
            OpenAiBackend,
            Arc::new(CredentialPool::default()),
            &TutorConfig::default(),
        );
        let state = AppState::new(config, memory_pool().await, tutor).await.unwrap();
        let sessions = SessionManagerLayer::new(MemoryStore::default()).with_secure(false);
        (build_router(Arc::new(state), sessions), dir)
    }

    pub async fn send(
        app: &Router,
        method: &str,
        uri: &str,
        cookie: Option<&str>,
        body: Option<Value>,
    ) -> Response<Body> {
        let mut request = Request::builder().method(method).uri(uri);
        if let Some(cookie) = cookie {
            request = request.header(header::COOKIE, cookie);
        }
        let request = match body {
            Some(body) => request
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string())),
            None => request.body(Body::empty()),
        }
        .unwrap();
        app.clone().oneshot(request).await.unwrap()
    }

    pub async fn json_body(response: Response<Body>) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    /// Register and log in a student of Inglês, returning the session cookie.
    pub async fn logged_in(app: &Router, email: &str) -> String {
        let registered = send(
            app,
            "POST",
            "/cadastro",
            None,
            Some(json!({"name": "Ana", "email": email, "password": "s3cret", "course": "Inglês"})),
        )
        .await;
        assert_eq!(registered.status(), StatusCode::CREATED);
        let response = send(
            app,
            "POST",
            "/login",
            None,
            Some(json!({"email": email, "password": "s3cret"})),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
        let cookie = response
            .headers()
            .get(header::SET_COOKIE)
            .unwrap()
            .to_str()
            .unwrap();
        cookie.split(';').next().unwrap().to_string()
    }

    #[tokio::test]
    async fn test_login_guard() {
        let (app, _dir) = test_app().await;
        for uri in ["/curso", "/perfil", "/curso/ingles/modulo/1"] {
            let response = send(&app, "GET", uri, None, None).await;
            assert_eq!(response.status(), StatusCode::UNAUTHORIZED, "{uri}");
        }
        let response = send(&app, "GET", "/", None, None).await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_openapi_served() {
        let (app, _dir) = test_app().await;
        let response = send(&app, "GET", "/api-docs/openapi.json", None, None).await;
        assert_eq!(response.status(), StatusCode::OK);
        let doc = json_body(response).await;
        assert!(doc["paths"]["/curso/{course}/modulo/{order}"].is_object());
    }
}
