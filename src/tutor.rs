pub mod backend;
pub mod conversation;
pub mod credentials;

use std::{sync::Arc, time::Duration};

use moka::{future::Cache, policy::EvictionPolicy};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, error, warn};

use crate::{
    config::TutorConfig,
    error::{Error, Result},
};
use backend::{BackendError, ChatBackend, OpenAiBackend};
use conversation::TutorConversation;
use credentials::CredentialPool;

/// One conversation per login session and course.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChatKey {
    pub chat_session: String,
    /// Course display name, also used in the tutor instruction.
    pub course: String,
}

type SharedConversation = Arc<Mutex<TutorConversation>>;

pub struct TutorBridge<B = OpenAiBackend> {
    backend: B,
    credentials: Arc<CredentialPool>,
    model: String,
    token_budget: u64,
    conversations: Cache<ChatKey, SharedConversation>,
}

impl<B: ChatBackend> TutorBridge<B> {
    pub fn new(backend: B, credentials: Arc<CredentialPool>, config: &TutorConfig) -> Self {
        let conversations = Cache::builder()
            .max_capacity(config.cache_capacity)
            .time_to_idle(Duration::from_secs(config.idle_minutes * 60))
            .eviction_policy(EvictionPolicy::lru())
            .build();
        Self {
            backend,
            credentials,
            model: config.model.clone(),
            token_budget: config.token_budget,
            conversations,
        }
    }

    pub fn is_available(&self) -> bool {
        !self.credentials.is_empty()
    }

    pub fn credentials(&self) -> &CredentialPool {
        &self.credentials
    }

    /// Answer `text` in the conversation for `key`. When the current
    /// credential is exhausted the bridge rotates and retries once with a
    /// fresh conversation.
    pub async fn reply(&self, key: &ChatKey, student_name: &str, text: &str) -> Result<String> {
        let text = text.trim();
        if text.is_empty() {
            return Err(Error::MissingField("message"));
        }
        let Some((index, credential)) = self.credentials.current() else {
            warn!("tutor request with no credentials configured");
            return Err(Error::AiUnavailable);
        };
        let budget = self.token_budget;
        let conversation = self
            .conversations
            .get_with_by_ref(key, async {
                debug!(course = %key.course, "new tutor conversation");
                Arc::new(Mutex::new(TutorConversation::new(student_name, &key.course, budget)))
            })
            .await;
        let mut conversation = conversation.lock().await;

        let messages = conversation.request(text)?;
        let failure = match self.backend.complete(credential, &self.model, messages).await {
            Ok(reply) => {
                conversation.record(text, &reply);
                return Ok(reply);
            }
            Err(BackendError::Other(message)) => {
                warn!(credential = index, "tutor request failed: {}", message);
                return Err(Error::Ai(message));
            }
            Err(BackendError::Exhausted(message)) => message,
        };

        warn!(credential = index, "tutor credential exhausted: {}", failure);
        let Some(next) = self.credentials.rotate_after(index) else {
            error!(
                credentials = self.credentials.len(),
                "all tutor credentials exhausted: {}", failure
            );
            return Err(Error::AiUnavailable);
        };
        let Some(credential) = self.credentials.get(next) else {
            return Err(Error::AiUnavailable);
        };
        conversation.reset();
        let messages = conversation.request(text)?;
        match self.backend.complete(credential, &self.model, messages).await {
            Ok(reply) => {
                conversation.record(text, &reply);
                Ok(reply)
            }
            Err(e) => {
                error!(
                    credential = next,
                    credentials = self.credentials.len(),
                    "tutor retry failed after rotation: {}", e
                );
                Err(Error::AiUnavailable)
            }
        }
    }

    pub async fn forget(&self, key: &ChatKey) {
        self.conversations.invalidate(key).await;
    }

    #[cfg(test)]
    async fn cached_conversations(&self) -> u64 {
        self.conversations.run_pending_tasks().await;
        self.conversations.entry_count()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::Mutex as StdMutex;

    use async_openai::types::ChatCompletionRequestMessage;

    use super::*;
    use credentials::{Credential, DEFAULT_BASE_URL};

    /// Answers from a script, recording which key and how many messages each call used.
    #[derive(Default)]
    pub(crate) struct ScriptedBackend {
        script: StdMutex<Vec<std::result::Result<String, BackendError>>>,
        calls: StdMutex<Vec<(String, usize)>>,
    }

    impl ScriptedBackend {
        pub(crate) fn new(script: Vec<std::result::Result<String, BackendError>>) -> Self {
            Self {
                script: StdMutex::new(script.into_iter().rev().collect()),
                calls: StdMutex::default(),
            }
        }
        fn calls(&self) -> Vec<(String, usize)> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl ChatBackend for ScriptedBackend {
        fn complete(
            &self,
            credential: &Credential,
            _model: &str,
            messages: Vec<ChatCompletionRequestMessage>,
        ) -> impl Future<Output = std::result::Result<String, BackendError>> + Send {
            self.calls
                .lock()
                .unwrap()
                .push((credential.api_key.clone(), messages.len()));
            let next = self
                .script
                .lock()
                .unwrap()
                .pop()
                .unwrap_or_else(|| Ok("ok".to_string()));
            async move { next }
        }
    }

    pub(crate) fn pool(keys: &[&str]) -> Arc<CredentialPool> {
        Arc::new(CredentialPool::new(
            keys.iter()
                .map(|k| Credential {
                    api_key: k.to_string(),
                    base_url: DEFAULT_BASE_URL.to_string(),
                })
                .collect(),
        ))
    }

    fn key(session: &str) -> ChatKey {
        ChatKey {
            chat_session: session.to_string(),
            course: "Inglês".to_string(),
        }
    }

    fn exhausted() -> std::result::Result<String, BackendError> {
        Err(BackendError::Exhausted("insufficient_quota".to_string()))
    }

    #[tokio::test]
    async fn test_conversation_continues() {
        let backend = ScriptedBackend::new(vec![Ok("Hello!".into()), Ok("Goodbye!".into())]);
        let bridge = TutorBridge::new(backend, pool(&["k1"]), &TutorConfig::default());
        assert_eq!(bridge.reply(&key("s1"), "Ana", "hello?").await.unwrap(), "Hello!");
        assert_eq!(bridge.reply(&key("s1"), "Ana", "goodbye?").await.unwrap(), "Goodbye!");
        // system + question, then system + exchange + question
        assert_eq!(
            bridge.backend.calls(),
            vec![("k1".to_string(), 2), ("k1".to_string(), 4)]
        );
    }

    #[tokio::test]
    async fn test_rotates_with_fresh_conversation() {
        let backend = ScriptedBackend::new(vec![Ok("first".into()), exhausted(), Ok("second".into())]);
        let bridge = TutorBridge::new(backend, pool(&["k1", "k2"]), &TutorConfig::default());
        bridge.reply(&key("s1"), "Ana", "one").await.unwrap();
        assert_eq!(bridge.reply(&key("s1"), "Ana", "two").await.unwrap(), "second");
        assert_eq!(
            bridge.backend.calls(),
            vec![
                ("k1".to_string(), 2),
                ("k1".to_string(), 4),
                // prior context dropped on retry
                ("k2".to_string(), 2),
            ]
        );
        assert_eq!(bridge.credentials().current().unwrap().0, 1);
    }

    #[tokio::test]
    async fn test_exhausted_everywhere() {
        let single = TutorBridge::new(
            ScriptedBackend::new(vec![exhausted()]),
            pool(&["k1"]),
            &TutorConfig::default(),
        );
        assert!(matches!(
            single.reply(&key("s1"), "Ana", "hi").await,
            Err(Error::AiUnavailable)
        ));

        let both = TutorBridge::new(
            ScriptedBackend::new(vec![exhausted(), exhausted()]),
            pool(&["k1", "k2"]),
            &TutorConfig::default(),
        );
        assert!(matches!(
            both.reply(&key("s1"), "Ana", "hi").await,
            Err(Error::AiUnavailable)
        ));
        assert_eq!(both.backend.calls().len(), 2);

        let empty = TutorBridge::new(ScriptedBackend::default(), pool(&[]), &TutorConfig::default());
        assert!(!empty.is_available());
        assert!(matches!(
            empty.reply(&key("s1"), "Ana", "hi").await,
            Err(Error::AiUnavailable)
        ));
        assert!(empty.backend.calls().is_empty());
    }

    #[tokio::test]
    async fn test_other_failure_does_not_rotate() {
        let backend = ScriptedBackend::new(vec![Err(BackendError::Other("boom".into()))]);
        let bridge = TutorBridge::new(backend, pool(&["k1", "k2"]), &TutorConfig::default());
        assert!(matches!(
            bridge.reply(&key("s1"), "Ana", "hi").await,
            Err(Error::Ai(message)) if message == "boom"
        ));
        assert_eq!(bridge.credentials().current().unwrap().0, 0);
    }

    #[tokio::test]
    async fn test_cache_bounded_and_forget() {
        let config = TutorConfig {
            cache_capacity: 2,
            ..TutorConfig::default()
        };
        let bridge = TutorBridge::new(ScriptedBackend::default(), pool(&["k1"]), &config);
        for session in ["s1", "s2", "s3", "s4"] {
            bridge.reply(&key(session), "Ana", "hi").await.unwrap();
        }
        assert!(bridge.cached_conversations().await <= 2);

        bridge.reply(&key("s5"), "Ana", "hi").await.unwrap();
        bridge.forget(&key("s5")).await;
        bridge.reply(&key("s5"), "Ana", "again").await.unwrap();
        // forgotten conversation starts over
        assert_eq!(bridge.backend.calls().last().unwrap().1, 2);
    }

    #[tokio::test]
    async fn test_empty_message() {
        let bridge = TutorBridge::new(ScriptedBackend::default(), pool(&["k1"]), &TutorConfig::default());
        assert!(matches!(
            bridge.reply(&key("s1"), "Ana", "   ").await,
            Err(Error::MissingField("message"))
        ));
    }
}
