//! Registry trait for self-registering implementations.
//!
//! Storage backends and sinks implement this trait to register themselves
//! with their configuration name and factory function.

/// Base trait for implementation registries.
///
/// Each implementation module provides a `Registry` struct implementing this
/// trait, declaring the name it is configured under and its factory.
pub trait ImplementationRegistry {
	/// The name used in configuration files to reference this implementation,
	/// e.g. "file" for `storage.implementations.file` or "webhook" for
	/// `sinks.implementations.webhook`.
	const NAME: &'static str;

	/// The factory function type this implementation provides.
	type Factory;

	/// Get the factory function for this implementation.
	fn factory() -> Self::Factory;
}
