use async_openai::{
    Client,
    config::OpenAIConfig,
    error::OpenAIError,
    types::{ChatCompletionRequestMessage, CreateChatCompletionRequestArgs},
};
use thiserror::Error;

use super::credentials::Credential;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum BackendError {
    /// The credential can no longer be used: quota, rate limit or rejected key.
    #[error("credential exhausted: {0}")]
    Exhausted(String),
    #[error("{0}")]
    Other(String),
}

/// One chat completion against an OpenAI-compatible service.
pub trait ChatBackend: Send + Sync + 'static {
    fn complete(
        &self,
        credential: &Credential,
        model: &str,
        messages: Vec<ChatCompletionRequestMessage>,
    ) -> impl Future<Output = Result<String, BackendError>> + Send;
}

#[derive(Debug, Clone, Default)]
pub struct OpenAiBackend;

impl ChatBackend for OpenAiBackend {
    fn complete(
        &self,
        credential: &Credential,
        model: &str,
        messages: Vec<ChatCompletionRequestMessage>,
    ) -> impl Future<Output = Result<String, BackendError>> + Send {
        let client = Client::with_config(OpenAIConfig::from(credential));
        let request = CreateChatCompletionRequestArgs::default()
            .model(model)
            .messages(messages)
            .build();
        async move {
            let request = request.map_err(classify)?;
            let response = client.chat().create(request).await.map_err(classify)?;
            response
                .choices
                .into_iter()
                .next()
                .and_then(|choice| choice.message.content)
                .ok_or_else(|| BackendError::Other("No response from the tutor model".to_string()))
        }
    }
}

fn classify(e: OpenAIError) -> BackendError {
    match &e {
        OpenAIError::ApiError(api) => {
            let exhausted = [api.r#type.as_deref(), api.code.as_deref(), Some(api.message.as_str())]
                .into_iter()
                .flatten()
                .any(is_exhaustion);
            if exhausted {
                BackendError::Exhausted(api.message.clone())
            } else {
                BackendError::Other(api.message.clone())
            }
        }
        OpenAIError::Reqwest(re)
            if re
                .status()
                .is_some_and(|s| matches!(s.as_u16(), 401 | 403 | 429)) =>
        {
            BackendError::Exhausted(e.to_string())
        }
        _ => BackendError::Other(e.to_string()),
    }
}

/// Whether an error type, code or message marks a credential as unusable.
pub fn is_exhaustion(marker: &str) -> bool {
    const MARKERS: [&str; 8] = [
        "quota",
        "rate_limit",
        "rate limit",
        "resource_exhausted",
        "permission",
        "invalid_api_key",
        "incorrect api key",
        "billing",
    ];
    let marker = marker.to_lowercase();
    MARKERS.iter().any(|m| marker.contains(m))
}
