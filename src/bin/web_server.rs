use std::{net::SocketAddr, path::PathBuf, sync::Arc};

use axum_server::tls_rustls::RustlsConfig;
use clap::Parser;
use levelup::{
    api::{AppState, build_router},
    config::Config,
    database,
    tutor::{TutorBridge, backend::OpenAiBackend, credentials::CredentialPool},
    utils::init_log,
};
use rustls::crypto::{CryptoProvider, aws_lc_rs};
use tower_sessions::{Expiry, SessionManagerLayer, session_store::ExpiredDeletion};
use tower_sessions_sqlx_store::SqliteStore;
use tracing::{error, info, warn};

#[derive(Debug, Parser)]
#[command(author, version, about = "LevelUp language course server", long_about = None)]
struct Args {
    /// TOML configuration file; built-in defaults when absent
    #[arg(short, long)]
    config: Option<PathBuf>,
    /// SQLite database file, overrides the configuration
    #[arg(short, long)]
    database: Option<PathBuf>,
    /// Module content directory, overrides the configuration
    #[arg(long)]
    content: Option<PathBuf>,
    #[arg(short = 'H', long, default_value = "127.0.0.1")]
    host: String,
    #[arg(short, long, default_value = "8080")]
    port: u16,
    /// Directory for daily rotated log files, stdout when absent
    #[arg(long)]
    log_dir: Option<PathBuf>,
    /// PEM certificate; serves HTTPS together with --tls-key
    #[arg(long, requires = "tls_key")]
    tls_cert: Option<PathBuf>,
    #[arg(long, requires = "tls_cert")]
    tls_key: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    let args = Args::parse();
    let _guard = init_log(args.log_dir.clone())?;

    let mut config = match &args.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };
    if let Some(path) = args.database {
        config.database_path = path;
    }
    if let Some(path) = args.content {
        config.content_path = path;
    }

    let database = database::connect(&config.database_path).await?;
    let session_store = SqliteStore::new(database.clone());
    session_store.migrate().await?;
    let deletion_task = tokio::task::spawn(
        session_store
            .clone()
            .continuously_delete_expired(tokio::time::Duration::from_secs(60 * 60)),
    );
    let sessions = SessionManagerLayer::new(session_store)
        .with_secure(args.tls_cert.is_some())
        .with_expiry(Expiry::OnInactivity(time::Duration::days(config.session_days)));

    let tutor = TutorBridge::new(
        OpenAiBackend,
        Arc::new(CredentialPool::from_env()),
        &config.tutor,
    );
    if !tutor.is_available() {
        warn!("no tutor credentials in OPENAI_API_KEYS or OPENAI_API_KEY, chat answers 503");
    }
    let state = AppState::new(config, database, tutor).await?;
    let app = build_router(Arc::new(state), sessions);

    let addr: SocketAddr = format!("{}:{}", args.host, args.port).parse()?;
    match (args.tls_cert, args.tls_key) {
        (Some(cert), Some(key)) => {
            CryptoProvider::install_default(aws_lc_rs::default_provider()).map_err(|e| {
                anyhow::anyhow!("Failed to initialize rustls crypto provider: {:?}", e)
            })?;
            let tls = RustlsConfig::from_pem_file(cert, key).await?;
            info!("Starting server at https://{addr}, Swagger UI at https://{addr}/swagger-ui");
            axum_server::bind_rustls(addr, tls)
                .serve(app.into_make_service())
                .await?;
        }
        _ => {
            info!("Starting server at http://{addr}, Swagger UI at http://{addr}/swagger-ui");
            let listener = tokio::net::TcpListener::bind(addr).await?;
            axum::serve(listener, app).await?;
        }
    }

    deletion_task.abort();
    if let Ok(Err(e)) = deletion_task.await {
        error!("session cleanup task failed: {}", e);
    }
    Ok(())
}
