use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::UserId;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DrugUse {
    pub id: Uuid,
    pub owner_id: UserId,
    pub date: NaiveDate,
    pub drug_name: String,
    /// Free text: "200", "1 pill", "2 x 400mg".
    pub amount: String,
    /// Set when the intake was reported as part of a pain episode.
    pub pain_case_id: Option<Uuid>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewDrugUse {
    pub owner_id: UserId,
    pub date: NaiveDate,
    pub drug_name: String,
    pub amount: String,
}
