pub mod health;
pub mod states;
