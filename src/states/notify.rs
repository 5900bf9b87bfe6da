use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use super::StateBackend;
use crate::models::UserId;

/// Broadcast buffer. Consumers further behind than this get a resync.
pub const CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StateAction {
    Set,
    Unset,
    Refresh,
}

/// A state-store mutation to announce.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StateChangeEvent {
    Set { user_id: UserId, state_key: String },
    Unset { user_id: UserId, state_key: String },
    /// Discard cached state and re-read everything. Always carries counter 0.
    Refresh,
}

/// Wire shape of a broadcast message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateChangeMessage {
    pub user_id: UserId,
    pub user_state: String,
    pub action: StateAction,
    pub incr_value: i64,
}

impl StateChangeMessage {
    /// The resync signal: `{0, "null", "refresh", 0}`.
    pub fn refresh() -> Self {
        Self {
            user_id: 0,
            user_state: "null".into(),
            action: StateAction::Refresh,
            incr_value: 0,
        }
    }
}

/// Counter bump plus fan-out to live subscribers.
///
/// Best effort: a counter failure degrades to a refresh, a send with no
/// subscribers is dropped.
#[derive(Clone)]
pub struct ChangeNotifier {
    backend: Arc<dyn StateBackend>,
    tx: broadcast::Sender<StateChangeMessage>,
}

impl ChangeNotifier {
    pub fn new(backend: Arc<dyn StateBackend>) -> Self {
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { backend, tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StateChangeMessage> {
        self.tx.subscribe()
    }

    /// Stamp `event` with the next counter value and broadcast it.
    ///
    /// If the counter cannot be advanced the change is announced as a
    /// refresh instead, so consumers resync rather than miss it.
    pub fn publish(&self, event: StateChangeEvent) -> StateChangeMessage {
        let stamped = match event {
            StateChangeEvent::Refresh => None,
            StateChangeEvent::Set { user_id, state_key } => {
                self.next_counter().map(|incr_value| StateChangeMessage {
                    user_id,
                    user_state: state_key,
                    action: StateAction::Set,
                    incr_value,
                })
            }
            StateChangeEvent::Unset { user_id, state_key } => {
                self.next_counter().map(|incr_value| StateChangeMessage {
                    user_id,
                    user_state: state_key,
                    action: StateAction::Unset,
                    incr_value,
                })
            }
        };
        let message = match stamped {
            Some(message) => message,
            None => {
                if let Err(e) = self.backend.write_counter(0) {
                    tracing::warn!(error = %e, "Failed to reset change counter");
                }
                StateChangeMessage::refresh()
            }
        };

        // Err only means nobody is listening right now.
        if self.tx.send(message.clone()).is_err() {
            tracing::trace!(incr_value = message.incr_value, "No state subscribers");
        }
        message
    }

    /// Read-increment-write. A missing counter starts at 0.
    fn next_counter(&self) -> Option<i64> {
        let next = match self.backend.read_counter() {
            Ok(None) => 0,
            Ok(Some(current)) => current + 1,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to read change counter");
                return None;
            }
        };
        if let Err(e) = self.backend.write_counter(next) {
            tracing::warn!(error = %e, "Failed to write change counter");
            return None;
        }
        Some(next)
    }
}
