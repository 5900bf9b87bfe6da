use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Date window for owner-scoped record queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RecordFilter {
    /// Every record the owner has.
    All,
    /// Records dated exactly on this day.
    On { date: NaiveDate },
    /// Records dated within the last `days` days, today included.
    LastDays { days: u32 },
}

impl Default for RecordFilter {
    fn default() -> Self {
        Self::All
    }
}
