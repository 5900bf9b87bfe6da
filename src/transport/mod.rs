//! Chat transport: render a prompt with choices, edit it, delete it.

mod telegram;
#[cfg(test)]
pub mod testing;

pub use telegram::*;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::UserId;

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Chat API error {code}: {description}")]
    Api { code: i64, description: String },

    #[error("User {0} blocked the bot")]
    Blocked(UserId),

    #[error("Message is already gone")]
    MessageGone,

    #[error("Message is not modified")]
    NotModified,
}

/// Longest choice a button can carry back verbatim.
pub const MAX_CHOICE_BYTES: usize = 64;

/// Text plus the reply options offered with it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Prompt {
    pub text: String,
    pub choices: Vec<String>,
}

impl Prompt {
    pub fn new(text: impl Into<String>, choices: Vec<String>) -> Self {
        Self {
            text: text.into(),
            choices,
        }
    }

    /// A prompt without choices.
    pub fn text(text: impl Into<String>) -> Self {
        Self::new(text, Vec::new())
    }
}

/// Handle to a message the bot has sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageRef {
    pub chat_id: i64,
    pub message_id: i64,
}

#[async_trait]
pub trait ChatTransport: Send + Sync {
    async fn send_prompt(&self, user_id: UserId, prompt: &Prompt)
        -> Result<MessageRef, TransportError>;

    /// Replace text and choices of an earlier prompt. An unchanged prompt is not an error.
    async fn edit_prompt(&self, message: MessageRef, prompt: &Prompt)
        -> Result<(), TransportError>;

    /// Best effort: a message that is already gone is not an error.
    async fn delete_message(&self, message: MessageRef) -> Result<(), TransportError>;
}
