use std::sync::{Arc, Mutex};

use chrono::NaiveDateTime;
use rusqlite::Connection;

use crate::db::{delete_user, healthcheck, mark_notified, users_due_for_notification, DatabaseError};
use crate::models::{ArchiveReason, UserId};
use crate::transport::{ChatTransport, Prompt, TransportError};

pub const REMINDER_TEXT: &str =
    "Did you have a headache since your last report? Tap /pain to record it.";

const HEALTH_ALERT_TEXT: &str = "Database health check failed, see the bot logs.";

/// Result of one reminder sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub reminded: usize,
    /// Users who blocked the bot and were moved to the archive.
    pub archived: usize,
    pub failed: usize,
}

fn lock(conn: &Arc<Mutex<Connection>>) -> Result<std::sync::MutexGuard<'_, Connection>, DatabaseError> {
    conn.lock().map_err(|_| DatabaseError::LockPoisoned)
}

/// Ask every due user whether they had a headache.
///
/// The connection is only held between sends, never across them.
pub async fn reminder_sweep(
    conn: &Arc<Mutex<Connection>>,
    transport: &dyn ChatTransport,
    now: NaiveDateTime,
) -> Result<SweepReport, DatabaseError> {
    let due = {
        let guard = lock(conn)?;
        users_due_for_notification(&guard, now)?
    };
    if due.is_empty() {
        return Ok(SweepReport::default());
    }

    let mut report = SweepReport::default();
    let mut delivered: Vec<UserId> = Vec::with_capacity(due.len());
    let mut blocked: Vec<UserId> = Vec::new();
    for user in &due {
        match transport
            .send_prompt(user.telegram_id, &Prompt::text(REMINDER_TEXT))
            .await
        {
            Ok(_) => delivered.push(user.telegram_id),
            Err(TransportError::Blocked(id)) => blocked.push(id),
            Err(e) => {
                report.failed += 1;
                tracing::warn!(user_id = user.telegram_id, error = %e, "Reminder not delivered");
            }
        }
    }

    let guard = lock(conn)?;
    mark_notified(&guard, &delivered, now)?;
    report.reminded = delivered.len();
    for user_id in blocked {
        match delete_user(&guard, user_id, ArchiveReason::BotBlocked) {
            Ok(true) => report.archived += 1,
            Ok(false) => {}
            Err(e) => tracing::error!(user_id, error = %e, "Failed to archive blocked user"),
        }
    }
    tracing::info!(
        reminded = report.reminded,
        archived = report.archived,
        failed = report.failed,
        "Reminder sweep finished"
    );
    Ok(report)
}

/// Probe the database; tell the admin when it does not answer.
pub async fn database_healthcheck(
    conn: &Arc<Mutex<Connection>>,
    transport: &dyn ChatTransport,
    admin_id: Option<UserId>,
) -> bool {
    let result = lock(conn).and_then(|guard| healthcheck(&guard));
    match result {
        Ok(()) => {
            tracing::debug!("Database healthy");
            true
        }
        Err(e) => {
            tracing::error!(error = %e, "Database health check failed");
            if let Some(admin) = admin_id {
                if let Err(e) = transport
                    .send_prompt(admin, &Prompt::text(HEALTH_ALERT_TEXT))
                    .await
                {
                    tracing::warn!(error = %e, "Failed to alert admin");
                }
            }
            false
        }
    }
}
