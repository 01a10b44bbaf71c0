use serde::{Deserialize, Serialize};
use strum::EnumString;

/// Who authored a conversation turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    /// Label shown next to a message in the terminal.
    pub fn label(self) -> &'static str {
        match self {
            Role::User => "You",
            Role::Assistant => "Assistant",
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }
}

/// Ordered turns of one user's conversation, oldest first.
pub type ConversationHistory = Vec<Message>;

/// Record entry as it sits on disk, before the role is checked.
#[derive(Debug, Deserialize)]
pub(crate) struct StoredMessage {
    pub role: String,
    pub content: String,
}

impl StoredMessage {
    /// Hands the role string back when it is not one this client understands.
    pub fn into_message(self) -> Result<Message, String> {
        match self.role.parse::<Role>() {
            Ok(role) => Ok(Message {
                role,
                content: self.content,
            }),
            Err(_) => Err(self.role),
        }
    }
}
