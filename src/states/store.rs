use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::broadcast;

use super::{ChangeNotifier, StateBackend, StateChangeEvent, StateChangeMessage, StateEntry, StateError};
use crate::models::UserId;

/// Full view of the store, as a dashboard would rebuild it after a refresh.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StateSnapshot {
    pub states: BTreeMap<String, Vec<UserId>>,
    pub user_states: BTreeMap<UserId, String>,
    pub incr_value: i64,
}

impl StateSnapshot {
    /// Flatten into the durable key layout:
    /// `state:<key>` → ids, `user_state:<id>` → key, `incr_value` → counter.
    pub fn to_keyed(&self) -> serde_json::Map<String, serde_json::Value> {
        let mut map = serde_json::Map::new();
        for (key, users) in &self.states {
            map.insert(format!("state:{key}"), serde_json::json!(users));
        }
        for (user_id, key) in &self.user_states {
            map.insert(format!("user_state:{user_id}"), serde_json::json!(key));
        }
        map.insert("incr_value".into(), serde_json::json!(self.incr_value));
        map
    }
}

/// Owner of every state mutation. Each mutation emits at most one event.
pub struct UserStateStore {
    backend: Arc<dyn StateBackend>,
    notifier: ChangeNotifier,
}

impl UserStateStore {
    pub fn new(backend: Arc<dyn StateBackend>) -> Self {
        let notifier = ChangeNotifier::new(backend.clone());
        Self { backend, notifier }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StateChangeMessage> {
        self.notifier.subscribe()
    }

    /// Move `user_id` into `state_key`, evicting any previous state.
    /// Emits one `set` event. Returns the evicted key.
    pub fn enter(&self, user_id: UserId, state_key: &str) -> Result<Option<String>, StateError> {
        let now = chrono::Utc::now().naive_utc();
        let previous = self.backend.replace_user_state(user_id, state_key, now)?;
        tracing::debug!(user_id, state_key, previous = ?previous, "State entered");
        self.notifier.publish(StateChangeEvent::Set {
            user_id,
            state_key: state_key.to_string(),
        });
        Ok(previous)
    }

    /// Drop the user's state. No-op without one; emits `unset` only on removal.
    pub fn leave(&self, user_id: UserId) -> Result<Option<String>, StateError> {
        let removed = self.backend.clear_user_state(user_id, None)?;
        if let Some(state_key) = &removed {
            self.announce_unset(user_id, state_key);
        }
        Ok(removed)
    }

    /// Drop the user's state only if it is still `expected`.
    pub fn leave_if(&self, user_id: UserId, expected: &str) -> Result<bool, StateError> {
        let removed = self.backend.clear_user_state(user_id, Some(expected))?;
        if let Some(state_key) = &removed {
            self.announce_unset(user_id, state_key);
        }
        Ok(removed.is_some())
    }

    fn announce_unset(&self, user_id: UserId, state_key: &str) {
        tracing::debug!(user_id, state_key, "State left");
        self.notifier.publish(StateChangeEvent::Unset {
            user_id,
            state_key: state_key.to_string(),
        });
    }

    pub fn current(&self, user_id: UserId) -> Result<Option<String>, StateError> {
        self.backend.user_state(user_id)
    }

    pub fn members(&self, state_key: &str) -> Result<Vec<UserId>, StateError> {
        self.backend.members(state_key)
    }

    pub fn entries(&self) -> Result<Vec<StateEntry>, StateError> {
        self.backend.entries()
    }

    /// Guarantee every key exists, reset the counter and tell consumers to resync.
    /// Existing user mappings are left alone so in-flight users survive a restart.
    pub fn reseed(&self, state_keys: &[String]) -> Result<(), StateError> {
        self.backend.ensure_states(state_keys)?;
        self.notifier.publish(StateChangeEvent::Refresh);
        tracing::info!(keys = state_keys.len(), "State keys reseeded");
        Ok(())
    }

    pub fn snapshot(&self) -> Result<StateSnapshot, StateError> {
        let mut states: BTreeMap<String, Vec<UserId>> = self
            .backend
            .state_keys()?
            .into_iter()
            .map(|key| (key, Vec::new()))
            .collect();
        let mut user_states = BTreeMap::new();
        for entry in self.backend.entries()? {
            states
                .entry(entry.state_key.clone())
                .or_default()
                .push(entry.user_id);
            user_states.insert(entry.user_id, entry.state_key);
        }
        Ok(StateSnapshot {
            states,
            user_states,
            incr_value: self.backend.read_counter()?.unwrap_or(0),
        })
    }
}
