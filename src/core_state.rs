//! Shared application state.
//!
//! `CoreState` is built once at startup and handed, behind an `Arc`, to the
//! bot dispatcher, the scheduler and the dashboard API. Construction wires
//! the pieces in dependency order: registry, state store (reseeded with
//! every known key), record store, engine.

use std::sync::{Arc, Mutex};
use std::time::Instant;

use rusqlite::Connection;
use thiserror::Error;

use crate::db::{DatabaseError, SqliteRecordStore};
use crate::forms::{ConversationEngine, RegistryError, StateRegistry};
use crate::states::{SqliteStateBackend, StateError, UserStateStore};
use crate::transport::ChatTransport;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Form registry is invalid: {0}")]
    Registry(#[from] RegistryError),

    #[error("State store error: {0}")]
    State(#[from] StateError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),
}

pub struct CoreState {
    pub conn: Arc<Mutex<Connection>>,
    pub registry: Arc<StateRegistry>,
    pub states: Arc<UserStateStore>,
    pub records: Arc<SqliteRecordStore>,
    pub engine: Arc<ConversationEngine>,
    pub transport: Arc<dyn ChatTransport>,
    pub started_at: Instant,
}

impl CoreState {
    /// Wire up every component around an already migrated connection.
    pub fn new(conn: Connection, transport: Arc<dyn ChatTransport>) -> Result<Self, CoreError> {
        let conn = Arc::new(Mutex::new(conn));
        let registry = Arc::new(StateRegistry::build()?);

        let backend = Arc::new(SqliteStateBackend::new(conn.clone()));
        let states = Arc::new(UserStateStore::new(backend));
        states.reseed(registry.all_state_keys())?;

        let records = Arc::new(SqliteRecordStore::new(conn.clone()));
        let engine = Arc::new(ConversationEngine::new(
            registry.clone(),
            states.clone(),
            records.clone(),
            transport.clone(),
        ));

        Ok(Self {
            conn,
            registry,
            states,
            records,
            engine,
            transport,
            started_at: Instant::now(),
        })
    }

    /// Run `f` against the shared connection.
    pub fn with_conn<T>(
        &self,
        f: impl FnOnce(&Connection) -> Result<T, DatabaseError>,
    ) -> Result<T, DatabaseError> {
        let conn = self.conn.lock().map_err(|_| DatabaseError::LockPoisoned)?;
        f(&conn)
    }

    pub fn uptime_secs(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }
}
