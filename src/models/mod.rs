pub mod drug;
pub mod drug_use;
pub mod enums;
pub mod filters;
pub mod pain_case;
pub mod pressure;
pub mod record;
pub mod user;

pub use drug::*;
pub use drug_use::*;
pub use enums::*;
pub use filters::*;
pub use pain_case::*;
pub use pressure::*;
pub use record::*;
pub use user::*;

/// Chat platform user id. Telegram ids fit in i64.
pub type UserId = i64;
