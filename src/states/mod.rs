//! Per-user form state tracking and the change-notification side channel.
//!
//! The durable mapping `user -> state key` lives behind `StateBackend`.
//! `UserStateStore` is the only writer; every mutation it performs is
//! announced through `ChangeNotifier` so an external dashboard can mirror
//! who is filling out which form.

mod backend;
mod notify;
mod store;

pub use backend::*;
pub use notify::*;
pub use store::*;

use thiserror::Error;

use crate::db::DatabaseError;

#[derive(Error, Debug)]
pub enum StateError {
    #[error("State storage error: {0}")]
    Storage(#[from] DatabaseError),

    #[error("Corrupt state entry for user {user_id}: {reason}")]
    Corrupt { user_id: i64, reason: String },
}

impl From<rusqlite::Error> for StateError {
    fn from(err: rusqlite::Error) -> Self {
        Self::Storage(DatabaseError::from(err))
    }
}
