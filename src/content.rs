use std::{
    collections::BTreeMap,
    io::ErrorKind,
    path::{Path, PathBuf},
    sync::Arc,
};

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, warn};
use utoipa::ToSchema;

use crate::{
    error::{Error, Result},
    utils::slugify,
};

/// Identifies a module: course slug, canonical level name and order (1-based).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ModuleKey {
    pub course: String,
    pub level: String,
    pub order: i64,
}

impl ModuleKey {
    pub fn new(course: &str, level: &str, order: i64) -> Self {
        Self {
            course: slugify(course),
            level: level.to_string(),
            order,
        }
    }

    pub fn with_order(&self, order: i64) -> Self {
        Self {
            order,
            ..self.clone()
        }
    }

    pub fn not_found(&self) -> Error {
        Error::ModuleNotFound {
            course: self.course.clone(),
            level: self.level.clone(),
            order: self.order,
        }
    }

    pub fn locked(&self) -> Error {
        Error::Locked {
            course: self.course.clone(),
            level: self.level.clone(),
            order: self.order,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Question {
    pub id: String,
    pub prompt: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub choices: Vec<String>,
}

/// A module definition as stored in `<root>/<course>/<level>/module_<order>.json`.
#[derive(Debug, Clone, Deserialize)]
pub struct ModuleContent {
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub video_url: Option<String>,
    #[serde(default)]
    pub questions: Vec<Question>,
    /// question id -> correct choice
    #[serde(default, alias = "respostas_corretas")]
    pub correct_answers: BTreeMap<String, String>,
    /// Absolute number of correct answers needed to pass.
    #[serde(default)]
    pub pass_threshold: Option<usize>,
}

/// What a student gets to see of a module: everything but the answer key.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ModuleView {
    pub course: String,
    pub level: String,
    pub order: i64,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub video_url: Option<String>,
    pub questions: Vec<Question>,
}

impl ModuleContent {
    pub fn view(&self, key: &ModuleKey) -> ModuleView {
        ModuleView {
            course: key.course.clone(),
            level: key.level.clone(),
            order: key.order,
            title: self.title.clone(),
            description: self.description.clone(),
            video_url: self.video_url.clone(),
            questions: self.questions.clone(),
        }
    }
}

/// Read-only module definitions on disk, cached after first load.
#[derive(Debug)]
pub struct ContentStore {
    root: PathBuf,
    cache: DashMap<ModuleKey, Arc<ModuleContent>>,
}

impl ContentStore {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            cache: DashMap::new(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn module_path(&self, key: &ModuleKey) -> PathBuf {
        self.root
            .join(slugify(&key.course))
            .join(slugify(&key.level))
            .join(format!("module_{}.json", key.order))
    }

    /// Load a module definition. A missing file is `Ok(None)`, a malformed one is an error.
    pub async fn load(&self, key: &ModuleKey) -> Result<Option<Arc<ModuleContent>>> {
        if let Some(content) = self.cache.get(key) {
            return Ok(Some(content.value().clone()));
        }
        let path = self.module_path(key);
        let raw = match tokio::fs::read_to_string(&path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                warn!(path = %path.display(), "module content not found");
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };
        let content: ModuleContent = serde_json::from_str(&raw).map_err(|source| {
            error!(path = %path.display(), error = %source, "malformed module content");
            Error::InvalidContent {
                path: path.clone(),
                source,
            }
        })?;
        if let Some(threshold) = content.pass_threshold {
            if threshold > content.correct_answers.len() {
                warn!(
                    path = %path.display(),
                    threshold,
                    questions = content.correct_answers.len(),
                    "pass threshold exceeds the number of questions"
                );
            }
        }
        debug!(path = %path.display(), "module content loaded");
        let content = Arc::new(content);
        self.cache.insert(key.clone(), content.clone());
        Ok(Some(content))
    }

    pub async fn get(&self, key: &ModuleKey) -> Result<Arc<ModuleContent>> {
        self.load(key).await?.ok_or_else(|| Error::ContentNotFound {
            course: key.course.clone(),
            level: key.level.clone(),
            order: key.order,
        })
    }
}
