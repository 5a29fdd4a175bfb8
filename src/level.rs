use crate::{
    error::{Error, Result},
    utils::slugify,
};

/// Fixed total order over level names. The last level is terminal: finishing
/// it completes the course.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LevelSequence {
    levels: Vec<String>,
}

impl Default for LevelSequence {
    fn default() -> Self {
        Self {
            levels: vec![
                "Basic".to_string(),
                "Intermediate".to_string(),
                "Advanced".to_string(),
            ],
        }
    }
}

impl LevelSequence {
    pub fn new(levels: impl IntoIterator<Item = impl Into<String>>) -> Result<Self> {
        let levels: Vec<String> = levels.into_iter().map(Into::into).collect();
        if levels.is_empty() {
            return Err(Error::Configuration("level sequence is empty".to_string()));
        }
        for (i, level) in levels.iter().enumerate() {
            if slugify(level).is_empty() {
                return Err(Error::Configuration("level name is empty".to_string()));
            }
            if levels[..i].iter().any(|l| slugify(l) == slugify(level)) {
                return Err(Error::Configuration(format!("duplicate level: {level}")));
            }
        }
        Ok(Self { levels })
    }

    /// Index of `level`, matched on its slug so `basic`, `Basic` and `BASIC` agree.
    pub fn position(&self, level: &str) -> Option<usize> {
        let slug = slugify(level);
        self.levels.iter().position(|l| slugify(l) == slug)
    }

    /// The configured spelling of `level`.
    pub fn canonical(&self, level: &str) -> Option<&str> {
        self.position(level).map(|i| self.levels[i].as_str())
    }

    pub fn first(&self) -> &str {
        &self.levels[0]
    }

    pub fn next(&self, level: &str) -> Option<&str> {
        let i = self.position(level)?;
        self.levels.get(i + 1).map(String::as_str)
    }

    pub fn previous(&self, level: &str) -> Option<&str> {
        let i = self.position(level)?;
        i.checked_sub(1).map(|i| self.levels[i].as_str())
    }

    pub fn is_terminal(&self, level: &str) -> bool {
        self.position(level) == Some(self.levels.len() - 1)
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.levels.iter().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_sequence() {
        let levels = LevelSequence::default();
        assert_eq!(levels.first(), "Basic");
        assert_eq!(levels.next("basic"), Some("Intermediate"));
        assert_eq!(levels.next("Intermediate"), Some("Advanced"));
        assert_eq!(levels.next("Advanced"), None);
        assert_eq!(levels.previous("Basic"), None);
        assert_eq!(levels.previous("ADVANCED"), Some("Intermediate"));
        assert!(levels.is_terminal("advanced"));
        assert!(!levels.is_terminal("Basic"));
        assert_eq!(levels.canonical("intermediate"), Some("Intermediate"));
        assert_eq!(levels.next("Expert"), None);
    }

    #[test]
    fn test_invalid_sequences() {
        assert!(LevelSequence::new(Vec::<String>::new()).is_err());
        assert!(LevelSequence::new(["Basic", "basic"]).is_err());
        assert!(LevelSequence::new(["Basic", " "]).is_err());
        let single = LevelSequence::new(["Only"]).unwrap();
        assert_eq!(single.first(), "Only");
        assert!(single.is_terminal("Only"));
    }
}
