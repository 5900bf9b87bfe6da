use chrono::{NaiveDateTime, Timelike};
use rusqlite::{params, Connection, OptionalExtension};

use super::{parse_date, DATETIME_FORMAT, DATE_FORMAT};
use crate::db::DatabaseError;
use crate::models::{ArchiveReason, NewUser, User, UserId, NOTIFY_DISABLED};

const USER_COLUMNS: &str = "telegram_id, first_name, user_name, language, joined, notify_every_days, notify_hour_utc, last_notified";

/// Register a user, or refresh the names of a known one.
pub fn upsert_user(conn: &Connection, user: &NewUser) -> Result<User, DatabaseError> {
    let today = chrono::Local::now().date_naive();
    conn.execute(
        "INSERT INTO users (telegram_id, first_name, user_name, language, joined, notify_every_days)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)
         ON CONFLICT(telegram_id) DO UPDATE SET
             first_name = excluded.first_name,
             user_name = excluded.user_name",
        params![
            user.telegram_id,
            user.first_name,
            user.user_name,
            user.language,
            today.format(DATE_FORMAT).to_string(),
            NOTIFY_DISABLED,
        ],
    )?;
    get_user(conn, user.telegram_id)?.ok_or_else(|| DatabaseError::NotFound {
        entity_type: "user".into(),
        id: user.telegram_id.to_string(),
    })
}

pub fn get_user(conn: &Connection, telegram_id: UserId) -> Result<Option<User>, DatabaseError> {
    let user = conn
        .query_row(
            &format!("SELECT {USER_COLUMNS} FROM users WHERE telegram_id = ?1"),
            params![telegram_id],
            row_to_user,
        )
        .optional()?;
    Ok(user)
}

/// Change how often (and at which UTC hour) a user is asked to self-report.
pub fn set_notification_schedule(
    conn: &Connection,
    telegram_id: UserId,
    every_days: i32,
    hour_utc: Option<u32>,
) -> Result<(), DatabaseError> {
    if every_days != NOTIFY_DISABLED && every_days <= 0 {
        return Err(DatabaseError::ConstraintViolation(format!(
            "notification period must be positive, got {every_days}"
        )));
    }
    if matches!(hour_utc, Some(h) if h > 23) {
        return Err(DatabaseError::ConstraintViolation(
            "notification hour must be within 0..=23".into(),
        ));
    }
    let affected = conn.execute(
        "UPDATE users SET notify_every_days = ?2, notify_hour_utc = ?3 WHERE telegram_id = ?1",
        params![telegram_id, every_days, hour_utc],
    )?;
    if affected == 0 {
        return Err(DatabaseError::NotFound {
            entity_type: "user".into(),
            id: telegram_id.to_string(),
        });
    }
    Ok(())
}

/// Users with notifications on whose hour matches `now` and whose period elapsed.
pub fn users_due_for_notification(
    conn: &Connection,
    now: NaiveDateTime,
) -> Result<Vec<User>, DatabaseError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {USER_COLUMNS} FROM users
         WHERE notify_every_days != ?1 AND COALESCE(notify_hour_utc, 0) = ?2"
    ))?;
    let rows = stmt.query_map(params![NOTIFY_DISABLED, now.hour()], row_to_user)?;
    let users = rows.collect::<Result<Vec<_>, _>>()?;
    Ok(users.into_iter().filter(|u| u.notification_due(now)).collect())
}

/// Stamp `last_notified` for every listed user in one transaction.
pub fn mark_notified(
    conn: &Connection,
    ids: &[UserId],
    at: NaiveDateTime,
) -> Result<(), DatabaseError> {
    let tx = conn.unchecked_transaction()?;
    {
        let mut stmt = tx.prepare("UPDATE users SET last_notified = ?2 WHERE telegram_id = ?1")?;
        let stamp = at.format(DATETIME_FORMAT).to_string();
        for id in ids {
            stmt.execute(params![id, stamp])?;
        }
    }
    tx.commit()?;
    Ok(())
}

/// Cascading soft delete: copy the user's rows into the archive tables,
/// then remove the live rows. Returns false when the user is unknown.
pub fn delete_user(
    conn: &Connection,
    telegram_id: UserId,
    reason: ArchiveReason,
) -> Result<bool, DatabaseError> {
    let now = chrono::Local::now()
        .naive_local()
        .format(DATETIME_FORMAT)
        .to_string();
    let tx = conn.unchecked_transaction()?;
    let copied = tx.execute(
        "INSERT INTO archived_users (telegram_id, first_name, user_name, language, joined, notify_every_days, notify_hour_utc, archived_at, reason)
         SELECT telegram_id, first_name, user_name, language, joined, notify_every_days, notify_hour_utc, ?2, ?3
         FROM users WHERE telegram_id = ?1",
        params![telegram_id, now, reason.as_str()],
    )?;
    if copied == 0 {
        return Ok(false);
    }
    tx.execute(
        "INSERT INTO archived_pain_cases SELECT id, owner_id, date, durability_hours, intensity, aura, provocateurs, symptoms, description, created_at
         FROM pain_cases WHERE owner_id = ?1",
        params![telegram_id],
    )?;
    tx.execute(
        "INSERT INTO archived_drug_uses SELECT id, owner_id, date, drug_name, amount, pain_case_id
         FROM drug_uses WHERE owner_id = ?1",
        params![telegram_id],
    )?;
    tx.execute(
        "INSERT INTO archived_pressures SELECT id, owner_id, measured_at, systolic, diastolic, pulse
         FROM pressures WHERE owner_id = ?1",
        params![telegram_id],
    )?;
    tx.execute("DELETE FROM drugs WHERE owner_id = ?1", params![telegram_id])?;
    // Pain cases, drug uses and pressures follow through ON DELETE CASCADE.
    tx.execute("DELETE FROM users WHERE telegram_id = ?1", params![telegram_id])?;
    tx.commit()?;
    tracing::info!(user_id = telegram_id, reason = reason.as_str(), "User archived");
    Ok(true)
}

fn row_to_user(row: &rusqlite::Row) -> Result<User, rusqlite::Error> {
    let joined: String = row.get(4)?;
    let last_notified: Option<String> = row.get(7)?;
    Ok(User {
        telegram_id: row.get(0)?,
        first_name: row.get(1)?,
        user_name: row.get(2)?,
        language: row.get(3)?,
        joined: parse_date(4, &joined)?,
        notify_every_days: row.get(5)?,
        notify_hour_utc: row.get(6)?,
        last_notified: last_notified
            .as_deref()
            .map(|s| super::parse_datetime(7, s))
            .transpose()?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::repository::{insert_pain_case, insert_pressure};
    use crate::db::sqlite::open_memory_database;
    use crate::models::{MedicationIntake, NewPainCase, NewPressure};
    use chrono::NaiveDate;

    fn at(s: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(s, DATETIME_FORMAT).unwrap()
    }

    fn register(conn: &Connection, id: UserId) -> User {
        upsert_user(
            conn,
            &NewUser {
                telegram_id: id,
                first_name: Some("Ann".into()),
                user_name: Some("ann".into()),
                language: "en".into(),
            },
        )
        .unwrap()
    }

    fn count(conn: &Connection, table: &str) -> i64 {
        conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |r| r.get(0))
            .unwrap()
    }

    #[test]
    fn new_user_has_notifications_off() {
        let conn = open_memory_database().unwrap();
        let user = register(&conn, 1);
        assert_eq!(user.notify_every_days, NOTIFY_DISABLED);
        assert!(!user.notifications_enabled());
    }

    #[test]
    fn upsert_keeps_schedule() {
        let conn = open_memory_database().unwrap();
        register(&conn, 1);
        set_notification_schedule(&conn, 1, 2, Some(18)).unwrap();
        let again = register(&conn, 1);
        assert_eq!(again.notify_every_days, 2);
        assert_eq!(again.notify_hour_utc, Some(18));
    }

    #[test]
    fn invalid_schedule_rejected() {
        let conn = open_memory_database().unwrap();
        register(&conn, 1);
        assert!(set_notification_schedule(&conn, 1, 0, None).is_err());
        assert!(set_notification_schedule(&conn, 1, 1, Some(24)).is_err());
    }

    #[test]
    fn due_users_selected_and_marked() {
        let conn = open_memory_database().unwrap();
        register(&conn, 1);
        register(&conn, 2);
        set_notification_schedule(&conn, 1, 1, Some(9)).unwrap();
        set_notification_schedule(&conn, 2, 1, Some(10)).unwrap();

        let now = at("2024-04-01 09:00:00");
        let due = users_due_for_notification(&conn, now).unwrap();
        assert_eq!(due.iter().map(|u| u.telegram_id).collect::<Vec<_>>(), vec![1]);

        mark_notified(&conn, &[1], now).unwrap();
        assert!(users_due_for_notification(&conn, now).unwrap().is_empty());
        let later = at("2024-04-02 09:00:00");
        assert_eq!(users_due_for_notification(&conn, later).unwrap().len(), 1);
    }

    #[test]
    fn delete_user_archives_then_removes() {
        let conn = open_memory_database().unwrap();
        register(&conn, 1);
        insert_pain_case(
            &conn,
            &NewPainCase {
                owner_id: 1,
                date: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
                durability_hours: 2,
                intensity: 5,
                aura: true,
                provocateurs: vec![],
                symptoms: vec!["Nausea".into()],
                description: None,
                medications: vec![MedicationIntake {
                    drug_name: "Aspirin".into(),
                    amount: "500".into(),
                }],
            },
        )
        .unwrap();
        insert_pressure(
            &conn,
            &NewPressure {
                owner_id: 1,
                measured_at: at("2024-01-01 10:00:00"),
                systolic: 130,
                diastolic: 85,
                pulse: None,
            },
        )
        .unwrap();

        assert!(delete_user(&conn, 1, ArchiveReason::BotBlocked).unwrap());

        assert!(get_user(&conn, 1).unwrap().is_none());
        assert_eq!(count(&conn, "pain_cases"), 0);
        assert_eq!(count(&conn, "drug_uses"), 0);
        assert_eq!(count(&conn, "pressures"), 0);
        assert_eq!(count(&conn, "archived_users"), 1);
        assert_eq!(count(&conn, "archived_pain_cases"), 1);
        assert_eq!(count(&conn, "archived_drug_uses"), 1);
        assert_eq!(count(&conn, "archived_pressures"), 1);
    }

    #[test]
    fn deleting_unknown_user_is_false() {
        let conn = open_memory_database().unwrap();
        assert!(!delete_user(&conn, 404, ArchiveReason::UserDeleted).unwrap());
        assert_eq!(count(&conn, "archived_users"), 0);
    }
}
