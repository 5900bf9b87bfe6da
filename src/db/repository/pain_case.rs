use chrono::NaiveDate;
use rusqlite::{params, Connection};
use uuid::Uuid;

use super::{date_bounds, parse_date, parse_datetime, parse_string_list, parse_uuid};
use super::{DATETIME_FORMAT, DATE_FORMAT};
use crate::db::DatabaseError;
use crate::models::{PainCase, NewPainCase, RecordFilter, UserId};

/// Insert a pain case together with the medications taken for it.
/// The case and its drug uses land in one transaction.
pub fn insert_pain_case(conn: &Connection, case: &NewPainCase) -> Result<Uuid, DatabaseError> {
    let id = Uuid::new_v4();
    let now = chrono::Local::now().naive_local();
    let tx = conn.unchecked_transaction()?;
    tx.execute(
        "INSERT INTO pain_cases (id, owner_id, date, durability_hours, intensity, aura, provocateurs, symptoms, description, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        params![
            id.to_string(),
            case.owner_id,
            case.date.format(DATE_FORMAT).to_string(),
            case.durability_hours,
            case.intensity,
            case.aura as i32,
            serde_json::to_string(&case.provocateurs)?,
            serde_json::to_string(&case.symptoms)?,
            case.description,
            now.format(DATETIME_FORMAT).to_string(),
        ],
    )?;
    for intake in &case.medications {
        tx.execute(
            "INSERT INTO drug_uses (id, owner_id, date, drug_name, amount, pain_case_id)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                Uuid::new_v4().to_string(),
                case.owner_id,
                case.date.format(DATE_FORMAT).to_string(),
                intake.drug_name,
                intake.amount,
                id.to_string(),
            ],
        )?;
    }
    tx.commit()?;
    Ok(id)
}

/// Pain cases for an owner within the filter window, newest first.
pub fn get_pain_cases_for_owner(
    conn: &Connection,
    owner_id: UserId,
    filter: &RecordFilter,
    today: NaiveDate,
) -> Result<Vec<PainCase>, DatabaseError> {
    let (from, to) = date_bounds(filter, today);
    let mut stmt = conn.prepare(
        "SELECT id, owner_id, date, durability_hours, intensity, aura, provocateurs, symptoms, description, created_at
         FROM pain_cases
         WHERE owner_id = ?1
           AND (?2 IS NULL OR date >= ?2)
           AND (?3 IS NULL OR date <= ?3)
         ORDER BY date DESC, created_at DESC",
    )?;
    let rows = stmt.query_map(params![owner_id, from, to], row_to_pain_case)?;
    rows.collect::<Result<Vec<_>, _>>().map_err(DatabaseError::from)
}

/// Number of drug uses linked to a pain case.
pub fn count_medications_for_pain_case(
    conn: &Connection,
    pain_case_id: &Uuid,
) -> Result<i64, DatabaseError> {
    let count = conn.query_row(
        "SELECT COUNT(*) FROM drug_uses WHERE pain_case_id = ?1",
        params![pain_case_id.to_string()],
        |row| row.get(0),
    )?;
    Ok(count)
}

/// Delete a pain case. Linked drug uses go with it (FK cascade).
pub fn delete_pain_case(conn: &Connection, id: &Uuid) -> Result<(), DatabaseError> {
    let affected = conn.execute(
        "DELETE FROM pain_cases WHERE id = ?1",
        params![id.to_string()],
    )?;
    if affected == 0 {
        return Err(DatabaseError::NotFound {
            entity_type: "pain_case".into(),
            id: id.to_string(),
        });
    }
    Ok(())
}

fn row_to_pain_case(row: &rusqlite::Row) -> Result<PainCase, rusqlite::Error> {
    let id_str: String = row.get(0)?;
    let date_str: String = row.get(2)?;
    let provocateurs: String = row.get(6)?;
    let symptoms: String = row.get(7)?;
    let created_str: String = row.get(9)?;

    Ok(PainCase {
        id: parse_uuid(0, &id_str)?,
        owner_id: row.get(1)?,
        date: parse_date(2, &date_str)?,
        durability_hours: row.get(3)?,
        intensity: row.get(4)?,
        aura: row.get::<_, i32>(5)? != 0,
        provocateurs: parse_string_list(6, &provocateurs)?,
        symptoms: parse_string_list(7, &symptoms)?,
        description: row.get(8)?,
        created_at: parse_datetime(9, &created_str)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::repository::{get_drug_uses_for_owner, upsert_user};
    use crate::db::sqlite::open_memory_database;
    use crate::models::{MedicationIntake, NewUser};

    fn test_db() -> Connection {
        let conn = open_memory_database().unwrap();
        upsert_user(
            &conn,
            &NewUser {
                telegram_id: 11,
                first_name: None,
                user_name: None,
                language: "en".into(),
            },
        )
        .unwrap();
        conn
    }

    fn make_case(medications: Vec<MedicationIntake>) -> NewPainCase {
        NewPainCase {
            owner_id: 11,
            date: NaiveDate::from_ymd_opt(2024, 5, 2).unwrap(),
            durability_hours: 3,
            intensity: 7,
            aura: false,
            provocateurs: vec!["Stress".into(), "Coffee".into()],
            symptoms: vec![],
            description: None,
            medications,
        }
    }

    #[test]
    fn insert_and_read_back() {
        let conn = test_db();
        let id = insert_pain_case(&conn, &make_case(vec![])).unwrap();
        let today = NaiveDate::from_ymd_opt(2024, 5, 2).unwrap();
        let cases = get_pain_cases_for_owner(&conn, 11, &RecordFilter::All, today).unwrap();
        assert_eq!(cases.len(), 1);
        assert_eq!(cases[0].id, id);
        assert_eq!(cases[0].provocateurs, vec!["Stress", "Coffee"]);
        assert_eq!(count_medications_for_pain_case(&conn, &id).unwrap(), 0);
    }

    #[test]
    fn medications_reference_the_case() {
        let conn = test_db();
        let id = insert_pain_case(
            &conn,
            &make_case(vec![
                MedicationIntake { drug_name: "A".into(), amount: "200".into() },
                MedicationIntake { drug_name: "B".into(), amount: "1 pill".into() },
            ]),
        )
        .unwrap();
        assert_eq!(count_medications_for_pain_case(&conn, &id).unwrap(), 2);

        let today = NaiveDate::from_ymd_opt(2024, 5, 2).unwrap();
        let uses = get_drug_uses_for_owner(&conn, 11, &RecordFilter::All, today).unwrap();
        assert!(uses.iter().all(|u| u.pain_case_id == Some(id)));
    }

    #[test]
    fn delete_cascades_to_medications() {
        let conn = test_db();
        let id = insert_pain_case(
            &conn,
            &make_case(vec![MedicationIntake { drug_name: "A".into(), amount: "1".into() }]),
        )
        .unwrap();
        delete_pain_case(&conn, &id).unwrap();
        assert_eq!(count_medications_for_pain_case(&conn, &id).unwrap(), 0);
    }

    #[test]
    fn out_of_window_cases_filtered() {
        let conn = test_db();
        insert_pain_case(&conn, &make_case(vec![])).unwrap();
        let today = NaiveDate::from_ymd_opt(2024, 5, 20).unwrap();
        let recent =
            get_pain_cases_for_owner(&conn, 11, &RecordFilter::LastDays { days: 7 }, today).unwrap();
        assert!(recent.is_empty());
    }
}
