//! Repository layer: entity-scoped database operations.
//!
//! Free functions per entity take a `&Connection`; `SqliteRecordStore`
//! wraps them behind the `RecordStore` contract the conversation engine
//! consumes.

mod drug;
mod drug_use;
mod pain_case;
mod pressure;
mod user;

use std::sync::{Arc, Mutex};

use chrono::{Days, NaiveDate};
use rusqlite::Connection;
use uuid::Uuid;

use super::DatabaseError;
use crate::models::{NewRecord, Record, RecordFilter, RecordKind, UserId};

pub use drug::*;
pub use drug_use::*;
pub use pain_case::*;
pub use pressure::*;
pub use user::*;

pub const DATE_FORMAT: &str = "%Y-%m-%d";
pub const DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Data-access contract consumed by the conversation engine.
pub trait RecordStore: Send + Sync {
    fn create_record(&self, record: NewRecord) -> Result<Uuid, DatabaseError>;
    fn get_records_for_owner(
        &self,
        owner_id: UserId,
        kind: RecordKind,
        filter: &RecordFilter,
    ) -> Result<Vec<Record>, DatabaseError>;
    fn delete_record(&self, kind: RecordKind, id: &Uuid) -> Result<(), DatabaseError>;
}

/// Inclusive `[from, to]` date bounds for a filter, evaluated against `today`.
pub(crate) fn date_bounds(
    filter: &RecordFilter,
    today: NaiveDate,
) -> (Option<String>, Option<String>) {
    match filter {
        RecordFilter::All => (None, None),
        RecordFilter::On { date } => {
            let d = date.format(DATE_FORMAT).to_string();
            (Some(d.clone()), Some(d))
        }
        RecordFilter::LastDays { days } => {
            let span = u64::from(days.saturating_sub(1));
            let from = today.checked_sub_days(Days::new(span)).unwrap_or(today);
            (
                Some(from.format(DATE_FORMAT).to_string()),
                Some(today.format(DATE_FORMAT).to_string()),
            )
        }
    }
}

pub(crate) fn parse_uuid(idx: usize, raw: &str) -> Result<Uuid, rusqlite::Error> {
    Uuid::parse_str(raw).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}

pub(crate) fn parse_date(idx: usize, raw: &str) -> Result<NaiveDate, rusqlite::Error> {
    NaiveDate::parse_from_str(raw, DATE_FORMAT).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}

pub(crate) fn parse_datetime(
    idx: usize,
    raw: &str,
) -> Result<chrono::NaiveDateTime, rusqlite::Error> {
    chrono::NaiveDateTime::parse_from_str(raw, DATETIME_FORMAT).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}

pub(crate) fn parse_string_list(idx: usize, raw: &str) -> Result<Vec<String>, rusqlite::Error> {
    serde_json::from_str(raw).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}

// ═══════════════════════════════════════════
// SQLite-backed record store
// ═══════════════════════════════════════════

#[derive(Clone)]
pub struct SqliteRecordStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteRecordStore {
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    /// Run `f` against the shared connection.
    pub fn with_conn<T>(
        &self,
        f: impl FnOnce(&Connection) -> Result<T, DatabaseError>,
    ) -> Result<T, DatabaseError> {
        let conn = self.conn.lock().map_err(|_| DatabaseError::LockPoisoned)?;
        f(&conn)
    }
}

impl RecordStore for SqliteRecordStore {
    fn create_record(&self, record: NewRecord) -> Result<Uuid, DatabaseError> {
        self.with_conn(|conn| match &record {
            NewRecord::PainCase(p) => insert_pain_case(conn, p),
            NewRecord::DrugUse(d) => insert_drug_use(conn, d),
            NewRecord::Drug(d) => insert_drug(conn, d),
            NewRecord::Pressure(p) => insert_pressure(conn, p),
        })
    }

    fn get_records_for_owner(
        &self,
        owner_id: UserId,
        kind: RecordKind,
        filter: &RecordFilter,
    ) -> Result<Vec<Record>, DatabaseError> {
        let today = chrono::Local::now().date_naive();
        self.with_conn(|conn| {
            let records = match kind {
                RecordKind::PainCase => get_pain_cases_for_owner(conn, owner_id, filter, today)?
                    .into_iter()
                    .map(Record::PainCase)
                    .collect(),
                RecordKind::DrugUse => get_drug_uses_for_owner(conn, owner_id, filter, today)?
                    .into_iter()
                    .map(Record::DrugUse)
                    .collect(),
                RecordKind::Drug => get_drugs_for_owner(conn, owner_id)?
                    .into_iter()
                    .map(Record::Drug)
                    .collect(),
                RecordKind::Pressure => get_pressures_for_owner(conn, owner_id, filter, today)?
                    .into_iter()
                    .map(Record::Pressure)
                    .collect(),
            };
            Ok(records)
        })
    }

    fn delete_record(&self, kind: RecordKind, id: &Uuid) -> Result<(), DatabaseError> {
        self.with_conn(|conn| match kind {
            RecordKind::PainCase => delete_pain_case(conn, id),
            RecordKind::DrugUse => delete_drug_use(conn, id),
            RecordKind::Drug => delete_drug(conn, id),
            RecordKind::Pressure => delete_pressure(conn, id),
        })
    }
}
