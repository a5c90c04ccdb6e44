//! Core order lifecycle engine for the HomeChef marketplace.
//!
//! This crate owns the order state machine and everything that keeps it
//! honest: the versioned order store, the cancellation policy store, the
//! free-cancellation countdown scheduler and the outbox dispatcher that fans
//! events out to sinks. [`OrderEngine`] is the facade the service binary and
//! tests call into; [`EngineBuilder`] wires it from configuration.

pub mod builder;
pub mod clock;
pub mod dispatch;
pub mod engine;
pub mod policy;
pub mod recovery;
pub mod scheduler;
pub mod state;
pub mod store;

pub use builder::{BuilderError, EngineBuilder, EngineFactories};
pub use clock::{Clock, ManualClock, SystemClock};
pub use engine::{event_bus::EventBus, EngineError, OrderEngine};
