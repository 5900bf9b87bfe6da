use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::UserId;

/// Blood pressure reading in mmHg, pulse in bpm.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pressure {
    pub id: Uuid,
    pub owner_id: UserId,
    pub measured_at: NaiveDateTime,
    pub systolic: i32,
    pub diastolic: i32,
    pub pulse: Option<i32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewPressure {
    pub owner_id: UserId,
    pub measured_at: NaiveDateTime,
    pub systolic: i32,
    pub diastolic: i32,
    pub pulse: Option<i32>,
}
