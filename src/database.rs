use std::path::Path;

use sqlx::{
    SqlitePool,
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
};
use tracing::info;

use crate::error::Result;

/// Open (creating if needed) the SQLite database and bring its schema up to date.
pub async fn connect(path: impl AsRef<Path>) -> Result<SqlitePool> {
    let path = path.as_ref();
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await?;
        }
    }
    let options = SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(true)
        .foreign_keys(true);
    let database = SqlitePoolOptions::new().connect_with(options).await?;
    migrate(&database).await?;
    info!(path = %path.display(), "database ready");
    Ok(database)
}

pub async fn migrate(database: &SqlitePool) -> Result<()> {
    sqlx::migrate!("./migrations")
        .run(database)
        .await
        .map_err(sqlx::Error::from)?;
    Ok(())
}

/// Single-connection in-memory database; every pooled connection would
/// otherwise get its own empty database.
#[cfg(test)]
pub(crate) async fn memory_pool() -> SqlitePool {
    let options = SqliteConnectOptions::new()
        .in_memory(true)
        .foreign_keys(true);
    let database = SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect_with(options)
        .await
        .unwrap();
    migrate(&database).await.unwrap();
    database
}
