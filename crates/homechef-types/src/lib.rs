//! Common types module for the HomeChef order engine.
//!
//! This module defines the core data types and structures used throughout
//! the order engine. It provides a centralized location for shared types
//! to ensure consistency across the storage, sink, core and service crates.

/// Actor identities that drive order transitions.
pub mod actor;
/// API types for engine operations and their HTTP transport.
pub mod api;
/// Outbox and in-process event types.
pub mod events;
/// Order aggregate types including items, history and money breakdown.
pub mod order;
/// Cancellation policy types.
pub mod policy;
/// Registry trait for self-registering implementations.
pub mod registry;
/// Sink contract types, delivery cursors and dead letters.
pub mod sink;
/// Storage types for managing persistent data.
pub mod storage;
/// Tip types.
pub mod tip;
/// Utility functions for formatting and money arithmetic.
pub mod utils;
/// Configuration validation types for ensuring type-safe configurations.
pub mod validation;

// Re-export all types for convenient access
pub use actor::*;
pub use api::*;
pub use events::*;
pub use order::*;
pub use policy::*;
pub use registry::ImplementationRegistry;
pub use sink::*;
pub use storage::*;
pub use tip::*;
pub use utils::{round_money, truncate_id, MONEY_TOLERANCE};
pub use validation::*;
