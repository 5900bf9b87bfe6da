use chrono::NaiveDate;
use rusqlite::{params, Connection};
use uuid::Uuid;

use super::{date_bounds, parse_datetime, parse_uuid, DATETIME_FORMAT};
use crate::db::DatabaseError;
use crate::models::{NewPressure, Pressure, RecordFilter, UserId};

/// Insert a blood pressure reading.
pub fn insert_pressure(conn: &Connection, p: &NewPressure) -> Result<Uuid, DatabaseError> {
    let id = Uuid::new_v4();
    conn.execute(
        "INSERT INTO pressures (id, owner_id, measured_at, systolic, diastolic, pulse)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            id.to_string(),
            p.owner_id,
            p.measured_at.format(DATETIME_FORMAT).to_string(),
            p.systolic,
            p.diastolic,
            p.pulse,
        ],
    )?;
    Ok(id)
}

/// Readings for an owner within the filter window, ordered by time descending.
pub fn get_pressures_for_owner(
    conn: &Connection,
    owner_id: UserId,
    filter: &RecordFilter,
    today: NaiveDate,
) -> Result<Vec<Pressure>, DatabaseError> {
    let (from, to) = date_bounds(filter, today);
    let mut stmt = conn.prepare(
        "SELECT id, owner_id, measured_at, systolic, diastolic, pulse
         FROM pressures
         WHERE owner_id = ?1
           AND (?2 IS NULL OR date(measured_at) >= ?2)
           AND (?3 IS NULL OR date(measured_at) <= ?3)
         ORDER BY measured_at DESC",
    )?;
    let rows = stmt.query_map(params![owner_id, from, to], row_to_pressure)?;
    rows.collect::<Result<Vec<_>, _>>().map_err(DatabaseError::from)
}

/// Delete a reading by ID.
pub fn delete_pressure(conn: &Connection, id: &Uuid) -> Result<(), DatabaseError> {
    let affected = conn.execute(
        "DELETE FROM pressures WHERE id = ?1",
        params![id.to_string()],
    )?;
    if affected == 0 {
        return Err(DatabaseError::NotFound {
            entity_type: "pressure".into(),
            id: id.to_string(),
        });
    }
    Ok(())
}

fn row_to_pressure(row: &rusqlite::Row) -> Result<Pressure, rusqlite::Error> {
    let id_str: String = row.get(0)?;
    let measured_str: String = row.get(2)?;

    Ok(Pressure {
        id: parse_uuid(0, &id_str)?,
        owner_id: row.get(1)?,
        measured_at: parse_datetime(2, &measured_str)?,
        systolic: row.get(3)?,
        diastolic: row.get(4)?,
        pulse: row.get(5)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::repository::upsert_user;
    use crate::db::sqlite::open_memory_database;
    use crate::models::NewUser;
    use chrono::NaiveDateTime;

    fn test_db() -> Connection {
        let conn = open_memory_database().unwrap();
        upsert_user(
            &conn,
            &NewUser {
                telegram_id: 3,
                first_name: None,
                user_name: None,
                language: "en".into(),
            },
        )
        .unwrap();
        conn
    }

    fn reading(at: &str, pulse: Option<i32>) -> NewPressure {
        NewPressure {
            owner_id: 3,
            measured_at: NaiveDateTime::parse_from_str(at, DATETIME_FORMAT).unwrap(),
            systolic: 120,
            diastolic: 80,
            pulse,
        }
    }

    #[test]
    fn pulse_is_optional() {
        let conn = test_db();
        insert_pressure(&conn, &reading("2024-02-01 08:30:00", None)).unwrap();
        let today = NaiveDate::from_ymd_opt(2024, 2, 1).unwrap();
        let all = get_pressures_for_owner(&conn, 3, &RecordFilter::All, today).unwrap();
        assert_eq!(all[0].pulse, None);
        assert_eq!(all[0].systolic, 120);
    }

    #[test]
    fn single_day_filter_matches_datetime_rows() {
        let conn = test_db();
        insert_pressure(&conn, &reading("2024-02-01 08:30:00", Some(70))).unwrap();
        insert_pressure(&conn, &reading("2024-02-02 21:00:00", Some(64))).unwrap();
        let day = NaiveDate::from_ymd_opt(2024, 2, 2).unwrap();
        let on_day =
            get_pressures_for_owner(&conn, 3, &RecordFilter::On { date: day }, day).unwrap();
        assert_eq!(on_day.len(), 1);
        assert_eq!(on_day[0].pulse, Some(64));
    }
}
