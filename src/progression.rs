pub mod score;

use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqliteExecutor, SqlitePool};
use tracing::{error, info, warn};
use utoipa::ToSchema;

pub use score::{ScoreReport, evaluate_submission};

use crate::{
    content::ModuleKey,
    error::{Error, Result},
    level::LevelSequence,
    student,
    utils::now_utc,
};

/// Per student and module. `NotStarted` is never stored: it is the absence of a row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Deserialize, Serialize, Hash, ToSchema)]
#[repr(i64)]
pub enum ProgressStatus {
    NotStarted = 0,
    InProgress = 1,
    Completed = 2,
}

impl From<i64> for ProgressStatus {
    fn from(value: i64) -> Self {
        match value {
            1 => ProgressStatus::InProgress,
            2 => ProgressStatus::Completed,
            _ => ProgressStatus::NotStarted,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize, ToSchema)]
pub struct ModuleRef {
    pub id: i64,
    pub course: String,
    pub level: String,
    #[sqlx(rename = "position")]
    pub order: i64,
    pub name: String,
}

/// What a graded submission did to the student's position in the course.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Advancement {
    /// Not passed, nothing unlocked.
    Stayed,
    /// Passed, `module` is open: the next one of the level, or the first of
    /// the next level when the student already reached it.
    Unlocked { module: ModuleRef },
    /// Passed the last module of a level, the student moved up.
    LevelAdvanced { from: String, to: String },
    /// Passed the last module of the terminal level.
    CourseCompleted,
}

impl Advancement {
    /// Whether the client should go back to the course home instead of showing the score.
    pub fn leaves_module(&self) -> bool {
        matches!(
            self,
            Advancement::LevelAdvanced { .. } | Advancement::CourseCompleted
        )
    }
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ModuleProgress {
    pub id: i64,
    pub order: i64,
    pub name: String,
    pub status: ProgressStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct LevelProgress {
    pub level: String,
    pub completed: usize,
    pub total: usize,
    pub modules: Vec<ModuleProgress>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct CourseProgress {
    pub course: String,
    pub completed: usize,
    pub total: usize,
    pub levels: Vec<LevelProgress>,
}

#[derive(FromRow)]
struct ProgressRow {
    id: i64,
    level: String,
    position: i64,
    name: String,
    status: Option<i64>,
    score: Option<f64>,
}

const MODULE_COLUMNS: &str = "SELECT id, course, level, position, name FROM module";

/// Grading outcome to persistence: records attempts, unlocks modules, moves
/// students between levels and answers whether a module may be opened.
#[derive(Debug, Clone)]
pub struct ProgressionEngine {
    database: SqlitePool,
    levels: LevelSequence,
}

impl ProgressionEngine {
    pub fn new(database: SqlitePool, levels: LevelSequence) -> Self {
        Self { database, levels }
    }

    pub fn levels(&self) -> &LevelSequence {
        &self.levels
    }

    pub async fn find_module(&self, key: &ModuleKey) -> Result<Option<ModuleRef>> {
        find_module(&self.database, key).await
    }

    async fn last_module(&self, course: &str, level: &str) -> Result<Option<ModuleRef>> {
        let module = sqlx::query_as::<_, ModuleRef>(&format!(
            "{MODULE_COLUMNS} WHERE course = ? AND level = ? ORDER BY position DESC LIMIT 1"
        ))
        .bind(course)
        .bind(level)
        .fetch_optional(&self.database)
        .await?;
        Ok(module)
    }

    pub async fn status(&self, student_id: i64, module_id: i64) -> Result<ProgressStatus> {
        let status: Option<i64> = sqlx::query_scalar(
            "SELECT status FROM module_progress WHERE student_id = ? AND module_id = ?",
        )
        .bind(student_id)
        .bind(module_id)
        .fetch_optional(&self.database)
        .await?;
        Ok(status.map_or(ProgressStatus::NotStarted, ProgressStatus::from))
    }

    /// Upsert the attempt. Status never moves backwards: a failed retake of a
    /// completed module keeps it completed but records the new score.
    async fn record_attempt(&self, student_id: i64, module_id: i64, score: f64, passed: bool) -> Result<()> {
        let now = now_utc();
        let (status, complete_time) = if passed {
            (ProgressStatus::Completed, Some(now))
        } else {
            (ProgressStatus::InProgress, None)
        };
        sqlx::query(
            "INSERT INTO module_progress (student_id, module_id, status, score, update_time, complete_time)
             VALUES (?, ?, ?, ?, ?, ?)
             ON CONFLICT (student_id, module_id) DO UPDATE SET
                 status = MAX(status, excluded.status),
                 score = excluded.score,
                 update_time = excluded.update_time,
                 complete_time = COALESCE(complete_time, excluded.complete_time)",
        )
        .bind(student_id)
        .bind(module_id)
        .bind(status as i64)
        .bind(score)
        .bind(now)
        .bind(complete_time)
        .execute(&self.database)
        .await?;
        Ok(())
    }

    /// Record a graded attempt of `key` and apply its consequences.
    pub async fn advance(
        &self,
        student_id: i64,
        key: &ModuleKey,
        score: f64,
        passed: bool,
    ) -> Result<Advancement> {
        let level = self.levels.canonical(&key.level).ok_or_else(|| key.not_found())?;
        let key = ModuleKey::new(&key.course, level, key.order);
        let module = self.find_module(&key).await?.ok_or_else(|| key.not_found())?;
        self.record_attempt(student_id, module.id, score, passed).await?;
        if !passed {
            info!(student_id, module_id = module.id, score, "module attempted, not passed");
            return Ok(Advancement::Stayed);
        }

        if let Some(next) = self.find_module(&key.with_order(key.order + 1)).await? {
            unlock(&self.database, student_id, next.id).await?;
            info!(student_id, module_id = module.id, next_module_id = next.id, "module completed, next unlocked");
            return Ok(Advancement::Unlocked { module: next });
        }

        if self.levels.is_terminal(level) {
            info!(student_id, course = %key.course, "course completed");
            return Ok(Advancement::CourseCompleted);
        }
        let next_level = self.levels.next(level).ok_or_else(|| key.not_found())?;

        // take the write lock before reading so concurrent passes queue on the
        // busy timeout instead of failing the lock upgrade
        let mut tx = self.database.begin_with("BEGIN IMMEDIATE").await?;
        let current = student::get_student_level(&mut *tx, student_id).await?;
        // retaking an earlier level never demotes the student
        let behind = self.levels.position(&current) < self.levels.position(next_level);
        if behind {
            student::set_student_level(&mut *tx, student_id, next_level).await?;
        }
        let first = find_module(&mut *tx, &ModuleKey::new(&key.course, next_level, 1)).await?;
        match &first {
            Some(first) => unlock(&mut *tx, student_id, first.id).await?,
            None => warn!(course = %key.course, level = next_level, "next level has no modules"),
        }
        tx.commit().await?;

        if behind {
            info!(student_id, from = level, to = next_level, "level advanced");
            return Ok(Advancement::LevelAdvanced {
                from: level.to_string(),
                to: next_level.to_string(),
            });
        }
        info!(student_id, module_id = module.id, level = %current, "level already reached, retake recorded");
        Ok(match first {
            Some(module) => Advancement::Unlocked { module },
            None => Advancement::Stayed,
        })
    }

    /// Whether the student may open the module at `key`. `Ok(false)` means
    /// locked; a missing predecessor is an error, not a lock.
    pub async fn can_access(&self, student_id: i64, key: &ModuleKey) -> Result<bool> {
        if key.order < 1 {
            return Err(key.not_found());
        }
        let Some(level) = self.levels.canonical(&key.level) else {
            return Err(key.not_found());
        };
        let predecessor = if key.order == 1 {
            let Some(previous_level) = self.levels.previous(level) else {
                return Ok(true);
            };
            self.last_module(&key.course, previous_level)
                .await?
                .ok_or_else(|| {
                    error!(course = %key.course, level = previous_level, "previous level has no modules");
                    Error::Configuration(format!(
                        "no modules registered for {}/{}",
                        key.course, previous_level
                    ))
                })?
        } else {
            let previous = ModuleKey::new(&key.course, level, key.order - 1);
            self.find_module(&previous)
                .await?
                .ok_or_else(|| previous.not_found())?
        };
        Ok(self.status(student_id, predecessor.id).await? == ProgressStatus::Completed)
    }

    /// `can_access`, turning a lock into [`Error::Locked`].
    pub async fn ensure_access(&self, student_id: i64, key: &ModuleKey) -> Result<()> {
        if self.can_access(student_id, key).await? {
            Ok(())
        } else {
            Err(key.locked())
        }
    }

    /// Every module of `course` with the student's status, grouped by level in sequence order.
    pub async fn progress_summary(&self, student_id: i64, course: &str) -> Result<CourseProgress> {
        let rows = sqlx::query_as::<_, ProgressRow>(
            "SELECT m.id, m.level, m.position, m.name, p.status, p.score
             FROM module m
             LEFT JOIN module_progress p ON p.module_id = m.id AND p.student_id = ?
             WHERE m.course = ?
             ORDER BY m.position",
        )
        .bind(student_id)
        .bind(course)
        .fetch_all(&self.database)
        .await?;

        let mut levels: Vec<LevelProgress> = self
            .levels
            .iter()
            .map(|level| LevelProgress {
                level: level.to_string(),
                completed: 0,
                total: 0,
                modules: vec![],
            })
            .collect();
        for row in rows {
            let Some(i) = self.levels.position(&row.level) else {
                continue;
            };
            let status = row.status.map_or(ProgressStatus::NotStarted, ProgressStatus::from);
            let level = &mut levels[i];
            level.total += 1;
            if status == ProgressStatus::Completed {
                level.completed += 1;
            }
            level.modules.push(ModuleProgress {
                id: row.id,
                order: row.position,
                name: row.name,
                status,
                score: row.score,
            });
        }
        Ok(CourseProgress {
            course: course.to_string(),
            completed: levels.iter().map(|l| l.completed).sum(),
            total: levels.iter().map(|l| l.total).sum(),
            levels,
        })
    }
}

async fn find_module<'e>(executor: impl SqliteExecutor<'e>, key: &ModuleKey) -> Result<Option<ModuleRef>> {
    let module = sqlx::query_as::<_, ModuleRef>(&format!(
        "{MODULE_COLUMNS} WHERE course = ? AND level = ? AND position = ?"
    ))
    .bind(&key.course)
    .bind(&key.level)
    .bind(key.order)
    .fetch_optional(executor)
    .await?;
    Ok(module)
}

/// Make a module attemptable. Existing rows are left alone so unlocking never
/// resets a module that was already started or completed.
async fn unlock<'e>(executor: impl SqliteExecutor<'e>, student_id: i64, module_id: i64) -> Result<()> {
    sqlx::query(
        "INSERT INTO module_progress (student_id, module_id, status, score, update_time)
         VALUES (?, ?, ?, 0, ?)
         ON CONFLICT (student_id, module_id) DO NOTHING",
    )
    .bind(student_id)
    .bind(module_id)
    .bind(ProgressStatus::InProgress as i64)
    .bind(now_utc())
    .execute(executor)
    .await?;
    Ok(())
}
