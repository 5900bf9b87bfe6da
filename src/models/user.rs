use chrono::{Duration, NaiveDate, NaiveDateTime, Timelike};
use serde::{Deserialize, Serialize};

use super::UserId;

/// Notification period value meaning "never ask".
pub const NOTIFY_DISABLED: i32 = -1;

/// Slack subtracted from the period so an hourly sweep never skips a cycle.
pub const NOTIFY_SAFETY_MARGIN_MINUTES: i64 = 65;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub telegram_id: UserId,
    pub first_name: Option<String>,
    pub user_name: Option<String>,
    pub language: String,
    pub joined: NaiveDate,
    /// Days between self-report reminders, `NOTIFY_DISABLED` when off.
    pub notify_every_days: i32,
    /// UTC hour at which reminders go out.
    pub notify_hour_utc: Option<u32>,
    pub last_notified: Option<NaiveDateTime>,
}

impl User {
    pub fn notifications_enabled(&self) -> bool {
        self.notify_every_days != NOTIFY_DISABLED && self.notify_every_days > 0
    }

    /// Whether the hourly sweep running at `now` (UTC) should ask this user.
    pub fn notification_due(&self, now: NaiveDateTime) -> bool {
        if !self.notifications_enabled() {
            return false;
        }
        if self.notify_hour_utc.unwrap_or(0) != now.hour() {
            return false;
        }
        match self.last_notified {
            None => true,
            Some(last) => {
                let period = Duration::days(self.notify_every_days as i64)
                    - Duration::minutes(NOTIFY_SAFETY_MARGIN_MINUTES);
                now - last >= period
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewUser {
    pub telegram_id: UserId,
    pub first_name: Option<String>,
    pub user_name: Option<String>,
    pub language: String,
}
