pub mod openai;

use crate::store::models::Message;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub const OPENROUTER_BASE_URL: &str = "https://openrouter.ai/api/v1";
pub const DEFAULT_MODEL: &str = "openai/gpt-3.5-turbo";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StreamChunk {
    pub delta: String,
    pub done: bool,
}

/// Anything that can turn a conversation into the next assistant turn.
#[async_trait]
pub trait CompletionClient: Send + Sync {
    /// Send the full conversation and wait for one assistant message.
    async fn complete(&self, messages: &[Message]) -> Result<Message, LlmError>;

    /// Like [`complete`](Self::complete), reporting text as it arrives.
    async fn complete_stream(
        &self,
        messages: &[Message],
        on_chunk: &(dyn Fn(StreamChunk) + Send + Sync),
    ) -> Result<Message, LlmError> {
        let message = self.complete(messages).await?;
        on_chunk(StreamChunk {
            delta: message.content.clone(),
            done: false,
        });
        on_chunk(StreamChunk {
            delta: String::new(),
            done: true,
        });
        Ok(message)
    }
}

/// Completion backends. Both speak the OpenAI `/chat/completions` format.
#[derive(Debug, Clone)]
pub enum Provider {
    OpenAi(openai::OpenAiConfig),
    Ollama(openai::OpenAiConfig),
}

impl Provider {
    /// OpenRouter with the hosted default model.
    pub fn openrouter(api_key: String) -> Self {
        Provider::OpenAi(openai::OpenAiConfig {
            api_key,
            base_url: OPENROUTER_BASE_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            temperature: 0.0,
        })
    }

    pub fn ollama(host: &str, model: String) -> Self {
        Provider::Ollama(openai::OpenAiConfig {
            api_key: String::new(),
            base_url: format!("{}/v1", host.trim_end_matches('/')),
            model,
            temperature: 0.0,
        })
    }

    pub fn config(&self) -> &openai::OpenAiConfig {
        match self {
            Provider::OpenAi(config) | Provider::Ollama(config) => config,
        }
    }

    pub fn config_mut(&mut self) -> &mut openai::OpenAiConfig {
        match self {
            Provider::OpenAi(config) | Provider::Ollama(config) => config,
        }
    }
}

#[async_trait]
impl CompletionClient for Provider {
    async fn complete(&self, messages: &[Message]) -> Result<Message, LlmError> {
        openai::chat(self.config(), messages).await
    }

    async fn complete_stream(
        &self,
        messages: &[Message],
        on_chunk: &(dyn Fn(StreamChunk) + Send + Sync),
    ) -> Result<Message, LlmError> {
        openai::chat_stream(self.config(), messages, on_chunk).await
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("API error: {status} - {message}")]
    Api { status: u16, message: String },
    #[error("Parse error: {0}")]
    Parse(String),
    #[error("Model returned no message")]
    EmptyResponse,
}
