pub mod balances;
pub mod dead_letters;
pub mod entries;
pub mod health;
pub mod metrics;
