use std::sync::{Arc, Mutex};

use chrono::NaiveDateTime;
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;

use super::StateError;
use crate::db::{DatabaseError, DATETIME_FORMAT};
use crate::models::UserId;

/// Name of the change counter row.
pub const COUNTER_NAME: &str = "incr_value";

/// One user's current state and when they entered it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StateEntry {
    pub user_id: UserId,
    pub state_key: String,
    pub entered_at: NaiveDateTime,
}

/// Durable storage for per-user state and the change counter.
///
/// Each method is atomic on its own. A user owns at most one row, so the
/// reverse index `state -> members` can never list a user twice.
pub trait StateBackend: Send + Sync {
    /// Point `user_id` at `state_key`, returning the state it replaced.
    fn replace_user_state(
        &self,
        user_id: UserId,
        state_key: &str,
        at: NaiveDateTime,
    ) -> Result<Option<String>, StateError>;

    /// Remove the user's state. With `expected`, only when it still matches.
    /// Returns the removed key.
    fn clear_user_state(
        &self,
        user_id: UserId,
        expected: Option<&str>,
    ) -> Result<Option<String>, StateError>;

    fn user_state(&self, user_id: UserId) -> Result<Option<String>, StateError>;

    /// Users currently in `state_key`, ascending.
    fn members(&self, state_key: &str) -> Result<Vec<UserId>, StateError>;

    /// Make sure every key has a (possibly empty) member set.
    fn ensure_states(&self, state_keys: &[String]) -> Result<(), StateError>;

    /// Every known key, including keys only referenced by user rows.
    fn state_keys(&self) -> Result<Vec<String>, StateError>;

    fn entries(&self) -> Result<Vec<StateEntry>, StateError>;

    fn read_counter(&self) -> Result<Option<i64>, StateError>;

    fn write_counter(&self, value: i64) -> Result<(), StateError>;
}

// ═══════════════════════════════════════════
// SQLite backend
// ═══════════════════════════════════════════

/// State backend sharing the application's SQLite connection.
#[derive(Clone)]
pub struct SqliteStateBackend {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStateBackend {
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>, StateError> {
        self.conn
            .lock()
            .map_err(|_| StateError::Storage(DatabaseError::LockPoisoned))
    }
}

fn current_key(conn: &Connection, user_id: UserId) -> Result<Option<String>, rusqlite::Error> {
    conn.query_row(
        "SELECT state_key FROM user_states WHERE user_id = ?1",
        params![user_id],
        |row| row.get(0),
    )
    .optional()
}

impl StateBackend for SqliteStateBackend {
    fn replace_user_state(
        &self,
        user_id: UserId,
        state_key: &str,
        at: NaiveDateTime,
    ) -> Result<Option<String>, StateError> {
        let conn = self.lock()?;
        let tx = conn.unchecked_transaction()?;
        let previous = current_key(&tx, user_id)?;
        tx.execute(
            "INSERT OR IGNORE INTO state_keys (state_key) VALUES (?1)",
            params![state_key],
        )?;
        tx.execute(
            "INSERT INTO user_states (user_id, state_key, entered_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(user_id) DO UPDATE SET
                 state_key = excluded.state_key,
                 entered_at = excluded.entered_at",
            params![user_id, state_key, at.format(DATETIME_FORMAT).to_string()],
        )?;
        tx.commit()?;
        Ok(previous)
    }

    fn clear_user_state(
        &self,
        user_id: UserId,
        expected: Option<&str>,
    ) -> Result<Option<String>, StateError> {
        let conn = self.lock()?;
        let tx = conn.unchecked_transaction()?;
        let Some(current) = current_key(&tx, user_id)? else {
            return Ok(None);
        };
        if expected.is_some_and(|e| e != current) {
            return Ok(None);
        }
        tx.execute("DELETE FROM user_states WHERE user_id = ?1", params![user_id])?;
        tx.commit()?;
        Ok(Some(current))
    }

    fn user_state(&self, user_id: UserId) -> Result<Option<String>, StateError> {
        let conn = self.lock()?;
        Ok(current_key(&conn, user_id)?)
    }

    fn members(&self, state_key: &str) -> Result<Vec<UserId>, StateError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT user_id FROM user_states WHERE state_key = ?1 ORDER BY user_id",
        )?;
        let rows = stmt.query_map(params![state_key], |row| row.get(0))?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    fn ensure_states(&self, state_keys: &[String]) -> Result<(), StateError> {
        let conn = self.lock()?;
        let tx = conn.unchecked_transaction()?;
        {
            let mut stmt = tx.prepare("INSERT OR IGNORE INTO state_keys (state_key) VALUES (?1)")?;
            for key in state_keys {
                stmt.execute(params![key])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    fn state_keys(&self) -> Result<Vec<String>, StateError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT state_key FROM state_keys
             UNION
             SELECT state_key FROM user_states
             ORDER BY 1",
        )?;
        let rows = stmt.query_map([], |row| row.get(0))?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    fn entries(&self) -> Result<Vec<StateEntry>, StateError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT user_id, state_key, entered_at FROM user_states ORDER BY user_id",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
            ))
        })?;
        let mut entries = Vec::new();
        for row in rows {
            let (user_id, state_key, raw_at) = row?;
            let entered_at = NaiveDateTime::parse_from_str(&raw_at, DATETIME_FORMAT).map_err(
                |e| StateError::Corrupt {
                    user_id,
                    reason: format!("entered_at '{raw_at}': {e}"),
                },
            )?;
            entries.push(StateEntry {
                user_id,
                state_key,
                entered_at,
            });
        }
        Ok(entries)
    }

    fn read_counter(&self) -> Result<Option<i64>, StateError> {
        let conn = self.lock()?;
        Ok(conn
            .query_row(
                "SELECT value FROM counters WHERE name = ?1",
                params![COUNTER_NAME],
                |row| row.get(0),
            )
            .optional()?)
    }

    fn write_counter(&self, value: i64) -> Result<(), StateError> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO counters (name, value) VALUES (?1, ?2)
             ON CONFLICT(name) DO UPDATE SET value = excluded.value",
            params![COUNTER_NAME, value],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::sqlite::open_memory_database;

    fn backend() -> SqliteStateBackend {
        SqliteStateBackend::new(Arc::new(Mutex::new(open_memory_database().unwrap())))
    }

    fn now() -> NaiveDateTime {
        chrono::Utc::now().naive_utc()
    }

    #[test]
    fn replace_returns_previous_and_moves_membership() {
        let b = backend();
        assert_eq!(b.replace_user_state(1, "F:0:a", now()).unwrap(), None);
        assert_eq!(
            b.replace_user_state(1, "F:1:b", now()).unwrap().as_deref(),
            Some("F:0:a")
        );
        assert!(b.members("F:0:a").unwrap().is_empty());
        assert_eq!(b.members("F:1:b").unwrap(), vec![1]);
    }

    #[test]
    fn conditional_clear_respects_expected_key() {
        let b = backend();
        b.replace_user_state(1, "F:0:a", now()).unwrap();
        assert_eq!(b.clear_user_state(1, Some("F:1:b")).unwrap(), None);
        assert_eq!(b.user_state(1).unwrap().as_deref(), Some("F:0:a"));
        assert_eq!(
            b.clear_user_state(1, Some("F:0:a")).unwrap().as_deref(),
            Some("F:0:a")
        );
        assert_eq!(b.user_state(1).unwrap(), None);
    }

    #[test]
    fn counter_absent_until_written() {
        let b = backend();
        assert_eq!(b.read_counter().unwrap(), None);
        b.write_counter(4).unwrap();
        assert_eq!(b.read_counter().unwrap(), Some(4));
    }

    #[test]
    fn ensured_keys_listed_even_when_empty() {
        let b = backend();
        b.ensure_states(&["F:0:a".to_string(), "F:1:b".to_string()]).unwrap();
        b.replace_user_state(2, "Legacy:0:x", now()).unwrap();
        let keys = b.state_keys().unwrap();
        assert!(keys.contains(&"F:0:a".to_string()));
        assert!(keys.contains(&"Legacy:0:x".to_string()));
    }

    #[test]
    fn state_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.db");
        {
            let conn = crate::db::open_database(&path).unwrap();
            let b = SqliteStateBackend::new(Arc::new(Mutex::new(conn)));
            b.replace_user_state(9, "F:0:a", now()).unwrap();
        }
        let conn = crate::db::open_database(&path).unwrap();
        let b = SqliteStateBackend::new(Arc::new(Mutex::new(conn)));
        assert_eq!(b.user_state(9).unwrap().as_deref(), Some("F:0:a"));
    }
}
