//! Utility functions shared across the order engine.

pub mod formatting;
pub mod money;

pub use formatting::truncate_id;
pub use money::{round_money, MONEY_TOLERANCE};
