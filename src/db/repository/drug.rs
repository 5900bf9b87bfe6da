use rusqlite::{params, Connection};
use uuid::Uuid;

use super::parse_uuid;
use crate::db::DatabaseError;
use crate::models::{Drug, NewDrug, UserId, GLOBAL_DRUG_OWNER};

pub fn insert_drug(conn: &Connection, drug: &NewDrug) -> Result<Uuid, DatabaseError> {
    let id = Uuid::new_v4();
    conn.execute(
        "INSERT INTO drugs (id, owner_id, name, daily_max_mg, is_painkiller, is_temp_reducer)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            id.to_string(),
            drug.owner_id,
            drug.name,
            drug.daily_max_mg,
            drug.is_painkiller as i32,
            drug.is_temp_reducer as i32,
        ],
    )
    .map_err(|e| match e {
        rusqlite::Error::SqliteFailure(err, _)
            if err.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            DatabaseError::ConstraintViolation(format!("drug '{}' already exists", drug.name))
        }
        other => DatabaseError::from(other),
    })?;
    Ok(id)
}

/// The owner's catalogue plus the global one, by name.
pub fn get_drugs_for_owner(conn: &Connection, owner_id: UserId) -> Result<Vec<Drug>, DatabaseError> {
    let mut stmt = conn.prepare(
        "SELECT id, owner_id, name, daily_max_mg, is_painkiller, is_temp_reducer
         FROM drugs
         WHERE owner_id = ?1 OR owner_id = ?2
         ORDER BY name COLLATE NOCASE",
    )?;
    let rows = stmt.query_map(params![owner_id, GLOBAL_DRUG_OWNER], row_to_drug)?;
    rows.collect::<Result<Vec<_>, _>>().map_err(DatabaseError::from)
}

pub fn delete_drug(conn: &Connection, id: &Uuid) -> Result<(), DatabaseError> {
    let affected = conn.execute("DELETE FROM drugs WHERE id = ?1", params![id.to_string()])?;
    if affected == 0 {
        return Err(DatabaseError::NotFound {
            entity_type: "drug".into(),
            id: id.to_string(),
        });
    }
    Ok(())
}

fn row_to_drug(row: &rusqlite::Row) -> Result<Drug, rusqlite::Error> {
    let id_str: String = row.get(0)?;
    Ok(Drug {
        id: parse_uuid(0, &id_str)?,
        owner_id: row.get(1)?,
        name: row.get(2)?,
        daily_max_mg: row.get(3)?,
        is_painkiller: row.get::<_, i32>(4)? != 0,
        is_temp_reducer: row.get::<_, i32>(5)? != 0,
    })
}
