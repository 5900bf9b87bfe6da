use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::Notify;

use super::{ChatTransport, MessageRef, Prompt, TransportError};
use crate::models::UserId;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Sent {
    Prompt { user_id: UserId, prompt: Prompt },
    Edit { message: MessageRef, prompt: Prompt },
    Delete { message: MessageRef },
}

/// In-memory transport that records every call.
#[derive(Default)]
pub struct RecordingTransport {
    sent: Mutex<Vec<Sent>>,
    next_id: AtomicI64,
    blocked: Mutex<Vec<UserId>>,
    hold: Mutex<Option<SendHold>>,
}

/// Pauses the next `send_prompt` until released.
#[derive(Clone, Default)]
pub struct SendHold {
    pub reached: Arc<Notify>,
    pub release: Arc<Notify>,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every send to `user_id` fail with `Blocked`.
    pub fn block(&self, user_id: UserId) {
        self.blocked.lock().unwrap().push(user_id);
    }

    /// Stall the next send. Later sends go through untouched.
    pub fn hold_next_send(&self) -> SendHold {
        let hold = SendHold::default();
        *self.hold.lock().unwrap() = Some(hold.clone());
        hold
    }

    pub fn sent(&self) -> Vec<Sent> {
        self.sent.lock().unwrap().clone()
    }

    /// The most recent prompt or edit, whichever came last.
    pub fn last_prompt(&self) -> Option<Prompt> {
        self.sent.lock().unwrap().iter().rev().find_map(|s| match s {
            Sent::Prompt { prompt, .. } | Sent::Edit { prompt, .. } => Some(prompt.clone()),
            Sent::Delete { .. } => None,
        })
    }

    pub fn prompts_to(&self, user_id: UserId) -> Vec<Prompt> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter_map(|s| match s {
                Sent::Prompt { user_id: u, prompt } if *u == user_id => Some(prompt.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn clear(&self) {
        self.sent.lock().unwrap().clear();
    }
}

#[async_trait]
impl ChatTransport for RecordingTransport {
    async fn send_prompt(
        &self,
        user_id: UserId,
        prompt: &Prompt,
    ) -> Result<MessageRef, TransportError> {
        let hold = self.hold.lock().unwrap().take();
        if let Some(hold) = hold {
            hold.reached.notify_one();
            hold.release.notified().await;
        }
        if self.blocked.lock().unwrap().contains(&user_id) {
            return Err(TransportError::Blocked(user_id));
        }
        let message_id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        self.sent.lock().unwrap().push(Sent::Prompt {
            user_id,
            prompt: prompt.clone(),
        });
        Ok(MessageRef {
            chat_id: user_id,
            message_id,
        })
    }

    async fn edit_prompt(&self, message: MessageRef, prompt: &Prompt) -> Result<(), TransportError> {
        self.sent.lock().unwrap().push(Sent::Edit {
            message,
            prompt: prompt.clone(),
        });
        Ok(())
    }

    async fn delete_message(&self, message: MessageRef) -> Result<(), TransportError> {
        self.sent.lock().unwrap().push(Sent::Delete { message });
        Ok(())
    }
}
