//! One user's live conversation: load on start, then append, complete, save
//! for every turn.

use crate::llm::{CompletionClient, LlmError, StreamChunk};
use crate::store::models::{ConversationHistory, Message};
use crate::store::{ConversationStore, StoreError};
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    #[error("Message is empty")]
    EmptyPrompt,
    #[error("Completion failed: {0}")]
    Completion(#[from] LlmError),
    /// The turn happened and is kept in memory, but is not on disk.
    #[error("Reply received but history was not saved: {source}")]
    NotSaved { reply: Message, source: StoreError },
}

pub struct ChatSession {
    store: ConversationStore,
    client: Arc<dyn CompletionClient>,
    username: String,
    history: ConversationHistory,
}

impl ChatSession {
    /// Resume `username`'s stored conversation, or begin an empty one.
    pub fn start(
        store: ConversationStore,
        client: Arc<dyn CompletionClient>,
        username: impl Into<String>,
    ) -> Result<Self, StoreError> {
        let username = username.into();
        let history = store.load(&username)?;
        info!(username = %username, messages = history.len(), "session started");
        Ok(Self {
            store,
            client,
            username,
            history,
        })
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn history(&self) -> &[Message] {
        &self.history
    }

    pub async fn send(&mut self, prompt: &str) -> Result<Message, ChatError> {
        self.turn(prompt, None).await
    }

    /// Same as [`send`](Self::send), passing reply text to `on_chunk` as it arrives.
    pub async fn send_streaming(
        &mut self,
        prompt: &str,
        on_chunk: &(dyn Fn(StreamChunk) + Send + Sync),
    ) -> Result<Message, ChatError> {
        self.turn(prompt, Some(on_chunk)).await
    }

    async fn turn(
        &mut self,
        prompt: &str,
        on_chunk: Option<&(dyn Fn(StreamChunk) + Send + Sync)>,
    ) -> Result<Message, ChatError> {
        if prompt.trim().is_empty() {
            return Err(ChatError::EmptyPrompt);
        }

        // 1. User turn joins the context sent to the model
        self.history.push(Message::user(prompt));

        // 2. Ask for the assistant turn
        let result = match on_chunk {
            Some(on_chunk) => self.client.complete_stream(&self.history, on_chunk).await,
            None => self.client.complete(&self.history).await,
        };
        let reply = match result {
            Ok(reply) => Message::assistant(reply.content),
            Err(e) => {
                // Nothing was saved for this turn; forget the prompt too.
                self.history.pop();
                warn!(username = %self.username, error = %e, "completion failed");
                return Err(e.into());
            }
        };
        self.history.push(reply.clone());

        // 3. Persist the whole conversation
        if let Err(source) = self.store.save(&self.username, &self.history) {
            warn!(username = %self.username, error = %source, "history not saved");
            return Err(ChatError::NotSaved { reply, source });
        }

        Ok(reply)
    }
}
