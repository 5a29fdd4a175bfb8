use std::{
    fmt,
    sync::atomic::{AtomicUsize, Ordering},
};

use async_openai::config::OpenAIConfig;
use serde::{Deserialize, Serialize};
use tracing::warn;

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

#[derive(Clone, Serialize, Deserialize)]
pub struct Credential {
    pub api_key: String,
    pub base_url: String,
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("api_key", &"***")
            .field("base_url", &self.base_url)
            .finish()
    }
}

impl From<&Credential> for OpenAIConfig {
    fn from(credential: &Credential) -> Self {
        OpenAIConfig::default()
            .with_api_base(&credential.base_url)
            .with_api_key(&credential.api_key)
    }
}

/// Ordered API credentials for the tutor backend and the one currently in use.
#[derive(Debug, Default)]
pub struct CredentialPool {
    credentials: Vec<Credential>,
    current: AtomicUsize,
}

impl CredentialPool {
    pub fn new(credentials: Vec<Credential>) -> Self {
        Self {
            credentials,
            current: AtomicUsize::new(0),
        }
    }

    /// Keys from `OPENAI_API_KEYS` (comma separated) or `OPENAI_API_KEY`, all
    /// sharing `OPENAI_BASE_URL`.
    pub fn from_env() -> Self {
        let keys = dotenvy::var("OPENAI_API_KEYS")
            .or_else(|_| dotenvy::var("OPENAI_API_KEY"))
            .unwrap_or_default();
        let base_url = dotenvy::var("OPENAI_BASE_URL").unwrap_or_else(|_| DEFAULT_BASE_URL.to_string());
        let credentials: Vec<Credential> = keys
            .split(',')
            .map(str::trim)
            .filter(|key| !key.is_empty())
            .map(|key| Credential {
                api_key: key.to_string(),
                base_url: base_url.clone(),
            })
            .collect();
        if credentials.is_empty() {
            warn!("no tutor API keys configured, the tutor chat is disabled");
        }
        Self::new(credentials)
    }

    pub fn len(&self) -> usize {
        self.credentials.len()
    }

    pub fn is_empty(&self) -> bool {
        self.credentials.is_empty()
    }

    pub fn current(&self) -> Option<(usize, &Credential)> {
        let index = self.current.load(Ordering::Acquire);
        self.credentials.get(index).map(|c| (index, c))
    }

    pub fn get(&self, index: usize) -> Option<&Credential> {
        self.credentials.get(index)
    }

    /// Switch to the next credential, wrapping around. `None` when there is
    /// nothing to switch to.
    pub fn rotate(&self) -> Option<usize> {
        self.rotate_after(self.current.load(Ordering::Acquire))
    }

    /// Move past `failed` only if it is still the current credential, so two
    /// requests failing on the same key rotate once.
    pub fn rotate_after(&self, failed: usize) -> Option<usize> {
        let len = self.credentials.len();
        if len < 2 {
            return None;
        }
        let next = (failed + 1) % len;
        match self
            .current
            .compare_exchange(failed, next, Ordering::AcqRel, Ordering::Acquire)
        {
            Ok(_) => Some(next),
            Err(already) => Some(already),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool(keys: &[&str]) -> CredentialPool {
        CredentialPool::new(
            keys.iter()
                .map(|k| Credential {
                    api_key: k.to_string(),
                    base_url: DEFAULT_BASE_URL.to_string(),
                })
                .collect(),
        )
    }

    #[test]
    fn test_rotate() {
        let pool = pool(&["k1", "k2", "k3"]);
        assert_eq!(pool.current().unwrap().1.api_key, "k1");
        assert_eq!(pool.rotate(), Some(1));
        assert_eq!(pool.current().unwrap().1.api_key, "k2");
        assert_eq!(pool.rotate(), Some(2));
        assert_eq!(pool.rotate(), Some(0));
        assert_eq!(pool.current().unwrap().0, 0);
        assert_eq!(pool.get(0).unwrap().api_key, "k1");
    }

    #[test]
    fn test_rotate_after_same_failure_once() {
        let pool = pool(&["k1", "k2", "k3"]);
        assert_eq!(pool.rotate_after(0), Some(1));
        // a second request that also failed on k1 does not skip k2
        assert_eq!(pool.rotate_after(0), Some(1));
        assert_eq!(pool.current().unwrap().1.api_key, "k2");
    }

    #[test]
    fn test_nothing_to_rotate() {
        let single = pool(&["only"]);
        assert_eq!(single.rotate(), None);
        assert_eq!(single.current().unwrap().0, 0);
        let empty = CredentialPool::default();
        assert!(empty.current().is_none());
        assert_eq!(empty.rotate(), None);
    }

    #[test]
    fn test_debug_hides_key() {
        let credential = Credential {
            api_key: "sk-secret".to_string(),
            base_url: DEFAULT_BASE_URL.to_string(),
        };
        assert!(!format!("{credential:?}").contains("sk-secret"));
    }
}
