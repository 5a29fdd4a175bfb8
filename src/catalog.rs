use std::{collections::HashSet, sync::LazyLock};

use regex::Regex;
use sqlx::SqlitePool;
use tracing::{error, info, warn};
use walkdir::WalkDir;

use crate::{
    content::{ContentStore, ModuleKey},
    error::Result,
    level::LevelSequence,
    progression::ModuleRef,
    utils::slugify,
};

static MODULE_FILE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^module_(\d+)\.json$").expect("valid module file pattern"));

/// Registers the modules found in the content store so progress rows have a
/// module identity to point at.
#[derive(Debug, Clone)]
pub struct Catalog {
    database: SqlitePool,
    levels: LevelSequence,
}

impl Catalog {
    pub fn new(database: SqlitePool, levels: LevelSequence) -> Self {
        Self { database, levels }
    }

    /// Walk `<root>/<course>/<level>/module_<n>.json` and register every
    /// readable module, then prune rows whose content is gone. Returns how
    /// many modules were registered.
    pub async fn scan(&self, content: &ContentStore) -> Result<usize> {
        let root = content.root();
        let mut keys = Vec::new();
        for entry in WalkDir::new(root).min_depth(3).max_depth(3).sort_by_file_name() {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    error!("walkdir error: {}", e);
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }
            let file_name = entry.file_name().to_string_lossy();
            let Some(captures) = MODULE_FILE.captures(&file_name) else {
                continue;
            };
            let order = match captures[1].parse::<i64>() {
                Ok(order) if order > 0 => order,
                _ => {
                    warn!(path = %entry.path().display(), "invalid module order, skipped");
                    continue;
                }
            };
            let Ok(rel_path) = entry.path().strip_prefix(root) else {
                continue;
            };
            let mut dirs = rel_path.iter().map(|c| c.to_string_lossy());
            let (Some(course), Some(level)) = (dirs.next(), dirs.next()) else {
                continue;
            };
            let Some(level) = self.levels.canonical(&level) else {
                warn!(path = %entry.path().display(), %level, "unknown level, skipped");
                continue;
            };
            keys.push(ModuleKey::new(&course, level, order));
        }

        let mut seen = HashSet::new();
        for key in keys {
            let name = match content.load(&key).await {
                Ok(Some(module)) => module.title.clone(),
                Ok(None) => continue,
                Err(e) => {
                    error!(course = %key.course, level = %key.level, order = key.order, "skip module: {}", e);
                    continue;
                }
            };
            seen.insert(register_module(&self.database, &key, &name).await?);
        }
        let pruned = self.prune(&seen).await?;
        info!(registered = seen.len(), pruned, root = %root.display(), "content catalog scanned");
        Ok(seen.len())
    }

    /// Delete module rows not in `seen`. A row some student already has
    /// progress on is kept and reported instead.
    async fn prune(&self, seen: &HashSet<i64>) -> Result<usize> {
        let modules = sqlx::query_as::<_, ModuleRef>("SELECT id, course, level, position, name FROM module")
            .fetch_all(&self.database)
            .await?;
        let mut pruned = 0;
        for module in modules.into_iter().filter(|m| !seen.contains(&m.id)) {
            let deleted = sqlx::query(
                "DELETE FROM module WHERE id = ?
                 AND NOT EXISTS (SELECT 1 FROM module_progress WHERE module_id = ?)",
            )
            .bind(module.id)
            .bind(module.id)
            .execute(&self.database)
            .await?
            .rows_affected();
            if deleted == 0 {
                error!(
                    course = %module.course,
                    level = %module.level,
                    order = module.order,
                    "module content missing but students have progress on it"
                );
            } else {
                pruned += 1;
            }
        }
        Ok(pruned)
    }

    pub async fn list_courses(&self) -> Result<Vec<String>> {
        let courses = sqlx::query_scalar("SELECT DISTINCT course FROM module ORDER BY course")
            .fetch_all(&self.database)
            .await?;
        Ok(courses)
    }

    /// Modules of `course` (slug) in level sequence order, then by order.
    pub async fn modules(&self, course: &str) -> Result<Vec<ModuleRef>> {
        let mut modules = sqlx::query_as::<_, ModuleRef>(
            "SELECT id, course, level, position, name FROM module WHERE course = ? ORDER BY position",
        )
        .bind(slugify(course))
        .fetch_all(&self.database)
        .await?;
        modules.retain(|m| self.levels.position(&m.level).is_some());
        modules.sort_by_key(|m| (self.levels.position(&m.level), m.order));
        Ok(modules)
    }

    pub fn levels(&self) -> &LevelSequence {
        &self.levels
    }
}

/// Insert or rename the module at `key`, returning its id.
pub async fn register_module(database: &SqlitePool, key: &ModuleKey, name: &str) -> Result<i64> {
    let id = sqlx::query_scalar(
        "INSERT INTO module (course, level, position, name) VALUES (?, ?, ?, ?)
         ON CONFLICT (course, level, position) DO UPDATE SET name = excluded.name
         RETURNING id",
    )
    .bind(slugify(&key.course))
    .bind(&key.level)
    .bind(key.order)
    .bind(name)
    .fetch_one(database)
    .await?;
    Ok(id)
}
