use chrono::NaiveDate;
use rusqlite::{params, Connection};
use uuid::Uuid;

use super::{date_bounds, parse_date, parse_uuid, DATE_FORMAT};
use crate::db::DatabaseError;
use crate::models::{DrugUse, NewDrugUse, RecordFilter, UserId};

/// Insert a free-standing drug use (not tied to a pain case).
pub fn insert_drug_use(conn: &Connection, drug_use: &NewDrugUse) -> Result<Uuid, DatabaseError> {
    let id = Uuid::new_v4();
    conn.execute(
        "INSERT INTO drug_uses (id, owner_id, date, drug_name, amount, pain_case_id)
         VALUES (?1, ?2, ?3, ?4, ?5, NULL)",
        params![
            id.to_string(),
            drug_use.owner_id,
            drug_use.date.format(DATE_FORMAT).to_string(),
            drug_use.drug_name,
            drug_use.amount,
        ],
    )?;
    Ok(id)
}

pub fn get_drug_uses_for_owner(
    conn: &Connection,
    owner_id: UserId,
    filter: &RecordFilter,
    today: NaiveDate,
) -> Result<Vec<DrugUse>, DatabaseError> {
    let (from, to) = date_bounds(filter, today);
    let mut stmt = conn.prepare(
        "SELECT id, owner_id, date, drug_name, amount, pain_case_id
         FROM drug_uses
         WHERE owner_id = ?1
           AND (?2 IS NULL OR date >= ?2)
           AND (?3 IS NULL OR date <= ?3)
         ORDER BY date DESC",
    )?;
    let rows = stmt.query_map(params![owner_id, from, to], row_to_drug_use)?;
    rows.collect::<Result<Vec<_>, _>>().map_err(DatabaseError::from)
}

pub fn delete_drug_use(conn: &Connection, id: &Uuid) -> Result<(), DatabaseError> {
    let affected = conn.execute(
        "DELETE FROM drug_uses WHERE id = ?1",
        params![id.to_string()],
    )?;
    if affected == 0 {
        return Err(DatabaseError::NotFound {
            entity_type: "drug_use".into(),
            id: id.to_string(),
        });
    }
    Ok(())
}

fn row_to_drug_use(row: &rusqlite::Row) -> Result<DrugUse, rusqlite::Error> {
    let id_str: String = row.get(0)?;
    let date_str: String = row.get(2)?;
    let pain_case: Option<String> = row.get(5)?;

    Ok(DrugUse {
        id: parse_uuid(0, &id_str)?,
        owner_id: row.get(1)?,
        date: parse_date(2, &date_str)?,
        drug_name: row.get(3)?,
        amount: row.get(4)?,
        pain_case_id: pain_case.as_deref().map(|s| parse_uuid(5, s)).transpose()?,
    })
}
