use crate::db::DatabaseError;
use serde::{Deserialize, Serialize};

/// Enum stored as a lowercase TEXT column: `as_str`, `FromStr` and `Display`.
macro_rules! str_enum {
    ($name:ident { $($variant:ident => $s:literal),+ $(,)? }) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $s),+
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl std::str::FromStr for $name {
            type Err = DatabaseError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($s => Ok(Self::$variant)),+,
                    _ => Err(DatabaseError::InvalidEnum {
                        field: stringify!($name).into(),
                        value: s.into(),
                    }),
                }
            }
        }
    };
}

str_enum!(RecordKind {
    PainCase => "pain_case",
    DrugUse => "drug_use",
    Drug => "drug",
    Pressure => "pressure",
});

str_enum!(ArchiveReason {
    UserDeleted => "user_deleted",
    BotBlocked => "bot_blocked",
});

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn record_kind_round_trips_through_str() {
        for kind in [
            RecordKind::PainCase,
            RecordKind::DrugUse,
            RecordKind::Drug,
            RecordKind::Pressure,
        ] {
            assert_eq!(RecordKind::from_str(kind.as_str()).unwrap(), kind);
        }
    }

    #[test]
    fn display_matches_column_value() {
        assert_eq!(ArchiveReason::BotBlocked.to_string(), "bot_blocked");
        assert_eq!(format!("{}", RecordKind::DrugUse), "drug_use");
    }

    #[test]
    fn unknown_kind_is_invalid_enum() {
        let err = RecordKind::from_str("headache").unwrap_err();
        assert!(matches!(err, DatabaseError::InvalidEnum { .. }));
    }
}
