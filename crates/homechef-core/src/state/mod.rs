//! Order state management.
//!
//! `transitions` holds the pure transition table, `penalty` the cancellation
//! arithmetic, and `order` the state machine that loads, transitions and
//! commits orders with optimistic concurrency.

pub mod order;
pub mod penalty;
pub mod transitions;

pub use order::{Applied, Mutation, OrderStateMachine, StateError, Updated};
pub use penalty::PenaltyQuote;
pub use transitions::{OrderCommand, TransitionError};
