use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::{error::Result, level::LevelSequence, utils::slugify};

/// Server configuration, read from a TOML file. Secrets (tutor API keys) come
/// from the environment instead, see [`crate::tutor::credentials`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub database_path: PathBuf,
    pub content_path: PathBuf,
    /// Display names of the courses students can enrol in.
    pub courses: Vec<String>,
    /// Level names in progression order, the last one is terminal.
    pub levels: Vec<String>,
    /// Correct answers needed to pass a module that sets no threshold of its own.
    pub default_pass_threshold: usize,
    /// Sessions expire after this many days without a request.
    pub session_days: i64,
    pub tutor: TutorConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from("database/levelup.db"),
            content_path: PathBuf::from("content"),
            courses: vec!["Inglês".to_string(), "Espanhol".to_string()],
            levels: LevelSequence::default().iter().map(String::from).collect(),
            default_pass_threshold: 7,
            session_days: 5,
            tutor: TutorConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TutorConfig {
    pub model: String,
    /// Maximum number of live tutor conversations kept in memory.
    pub cache_capacity: u64,
    /// Conversations idle for longer than this are dropped.
    pub idle_minutes: u64,
    /// Rough token budget of a conversation; oldest turns are dropped beyond it.
    pub token_budget: u64,
}

impl Default for TutorConfig {
    fn default() -> Self {
        Self {
            model: "gpt-4o-mini".to_string(),
            cache_capacity: 1000,
            idle_minutes: 30,
            token_budget: 6000,
        }
    }
}

impl Config {
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let mut config: Config = toml::from_str(&content)?;
        if let Ok(model) = dotenvy::var("AI_MODEL") {
            config.tutor.model = model;
        }
        Ok(config)
    }

    pub fn level_sequence(&self) -> Result<LevelSequence> {
        LevelSequence::new(self.levels.iter().cloned())
    }

    /// Slug of the configured course matching `name`, if any.
    pub fn course_slug(&self, name: &str) -> Option<String> {
        let slug = slugify(name);
        self.courses
            .iter()
            .any(|c| slugify(c) == slug)
            .then_some(slug)
    }

    /// Display name of the course with the given slug.
    pub fn course_name(&self, slug: &str) -> Option<&str> {
        self.courses
            .iter()
            .find(|c| slugify(c) == slug)
            .map(String::as_str)
    }
}
