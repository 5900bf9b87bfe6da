use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::UserId;

/// One reported headache episode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PainCase {
    pub id: Uuid,
    pub owner_id: UserId,
    pub date: NaiveDate,
    pub durability_hours: i32,
    pub intensity: i32,
    pub aura: bool,
    pub provocateurs: Vec<String>,
    pub symptoms: Vec<String>,
    pub description: Option<String>,
    pub created_at: NaiveDateTime,
}

/// Medication taken during a pain episode, stored as a linked drug use.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MedicationIntake {
    pub drug_name: String,
    pub amount: String,
}

/// Fields collected by the pain report form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewPainCase {
    pub owner_id: UserId,
    pub date: NaiveDate,
    pub durability_hours: i32,
    pub intensity: i32,
    pub aura: bool,
    pub provocateurs: Vec<String>,
    pub symptoms: Vec<String>,
    pub description: Option<String>,
    pub medications: Vec<MedicationIntake>,
}
