use argon2::{
    Argon2, PasswordVerifier,
    password_hash::{PasswordHash, PasswordHasher, SaltString, rand_core::OsRng},
};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqliteExecutor, SqlitePool};
use tracing::debug;
use utoipa::ToSchema;

use crate::{
    error::{Error, Result},
    utils::now_utc,
};

#[derive(Debug, Clone, Serialize, Deserialize, FromRow, ToSchema)]
pub struct StudentInfo {
    pub id: i64,
    pub name: String,
    pub email: String,
    /// Course slug
    pub course: String,
    pub level: String,
}

#[derive(FromRow)]
struct StudentCredentials {
    id: i64,
    name: String,
    email: String,
    course: String,
    level: String,
    password: String,
}

fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Register a student on `course` (slug) starting at `level`.
pub async fn create_student(
    database: &SqlitePool,
    name: &str,
    email: &str,
    password: &str,
    course: &str,
    level: &str,
) -> Result<i64> {
    let email = normalize_email(email);
    let exists: bool = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM student WHERE email = ?)")
        .bind(&email)
        .fetch_one(database)
        .await?;
    if exists {
        return Err(Error::DuplicateEmail(email));
    }
    let salt = SaltString::generate(&mut OsRng);
    let password_hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| anyhow::anyhow!("Failed to hash password: {}", e))?
        .to_string();
    let student = sqlx::query(
        "INSERT INTO student (name, email, password, course, level, create_time) VALUES (?, ?, ?, ?, ?, ?)",
    )
    .bind(name.trim())
    .bind(&email)
    .bind(password_hash)
    .bind(course)
    .bind(level)
    .bind(now_utc())
    .execute(database)
    .await
    .map_err(|e| match e {
        // lost a race against a concurrent registration
        sqlx::Error::Database(db) if db.is_unique_violation() => Error::DuplicateEmail(email.clone()),
        e => e.into(),
    })?;
    Ok(student.last_insert_rowid())
}

/// Check credentials. Unknown email and wrong password are indistinguishable to the caller.
pub async fn login(database: &SqlitePool, email: &str, password: &str) -> Result<StudentInfo> {
    let email = normalize_email(email);
    let student = sqlx::query_as::<_, StudentCredentials>(
        "SELECT id, name, email, course, level, password FROM student WHERE email = ?",
    )
    .bind(&email)
    .fetch_optional(database)
    .await?;
    let Some(student) = student else {
        debug!(%email, "login for unknown email");
        return Err(Error::InvalidCredentials);
    };
    let parsed_hash = PasswordHash::new(&student.password)
        .map_err(|e| anyhow::anyhow!("Failed to parse password hash: {}", e))?;
    if Argon2::default()
        .verify_password(password.as_bytes(), &parsed_hash)
        .is_err()
    {
        debug!(student_id = student.id, "login with wrong password");
        return Err(Error::InvalidCredentials);
    }
    Ok(StudentInfo {
        id: student.id,
        name: student.name,
        email: student.email,
        course: student.course,
        level: student.level,
    })
}

pub async fn get_student_info(database: &SqlitePool, id: i64) -> Result<StudentInfo> {
    sqlx::query_as::<_, StudentInfo>(
        "SELECT id, name, email, course, level FROM student WHERE id = ?",
    )
    .bind(id)
    .fetch_optional(database)
    .await?
    .ok_or(Error::Unauthorized)
}

pub async fn get_student_level<'e>(executor: impl SqliteExecutor<'e>, id: i64) -> Result<String> {
    sqlx::query_scalar("SELECT level FROM student WHERE id = ?")
        .bind(id)
        .fetch_optional(executor)
        .await?
        .ok_or(Error::Unauthorized)
}

pub async fn set_student_level<'e>(
    executor: impl SqliteExecutor<'e>,
    id: i64,
    level: &str,
) -> Result<()> {
    sqlx::query("UPDATE student SET level = ? WHERE id = ?")
        .bind(level)
        .bind(id)
        .execute(executor)
        .await?;
    Ok(())
}

/// Insert a student without hashing, for tests that only need a row.
#[cfg(test)]
pub(crate) async fn insert_test_student(database: &SqlitePool, course: &str, level: &str) -> i64 {
    use std::sync::atomic::{AtomicUsize, Ordering};
    static NEXT: AtomicUsize = AtomicUsize::new(0);
    let n = NEXT.fetch_add(1, Ordering::Relaxed);
    sqlx::query(
        "INSERT INTO student (name, email, password, course, level, create_time) VALUES (?, ?, '', ?, ?, ?)",
    )
    .bind("Ana")
    .bind(format!("ana.{n}@example.com"))
    .bind(course)
    .bind(level)
    .bind(now_utc())
    .execute(database)
    .await
    .unwrap()
    .last_insert_rowid()
}
