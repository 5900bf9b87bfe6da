use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::*;

/// A record to be created through the data-access contract.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NewRecord {
    PainCase(NewPainCase),
    DrugUse(NewDrugUse),
    Drug(NewDrug),
    Pressure(NewPressure),
}

impl NewRecord {
    pub fn kind(&self) -> RecordKind {
        match self {
            Self::PainCase(_) => RecordKind::PainCase,
            Self::DrugUse(_) => RecordKind::DrugUse,
            Self::Drug(_) => RecordKind::Drug,
            Self::Pressure(_) => RecordKind::Pressure,
        }
    }

    pub fn owner_id(&self) -> UserId {
        match self {
            Self::PainCase(r) => r.owner_id,
            Self::DrugUse(r) => r.owner_id,
            Self::Drug(r) => r.owner_id,
            Self::Pressure(r) => r.owner_id,
        }
    }
}

/// A stored record returned by owner queries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Record {
    PainCase(PainCase),
    DrugUse(DrugUse),
    Drug(Drug),
    Pressure(Pressure),
}

impl Record {
    pub fn kind(&self) -> RecordKind {
        match self {
            Self::PainCase(_) => RecordKind::PainCase,
            Self::DrugUse(_) => RecordKind::DrugUse,
            Self::Drug(_) => RecordKind::Drug,
            Self::Pressure(_) => RecordKind::Pressure,
        }
    }

    pub fn id(&self) -> Uuid {
        match self {
            Self::PainCase(r) => r.id,
            Self::DrugUse(r) => r.id,
            Self::Drug(r) => r.id,
            Self::Pressure(r) => r.id,
        }
    }
}
