use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::UserId;

/// Owner id of catalogue drugs offered to every user.
pub const GLOBAL_DRUG_OWNER: UserId = -1;

/// A medication in a user's catalogue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Drug {
    pub id: Uuid,
    pub owner_id: UserId,
    pub name: String,
    pub daily_max_mg: i64,
    pub is_painkiller: bool,
    pub is_temp_reducer: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewDrug {
    pub owner_id: UserId,
    pub name: String,
    pub daily_max_mg: i64,
    pub is_painkiller: bool,
    pub is_temp_reducer: bool,
}
