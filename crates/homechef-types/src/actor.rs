//! Actor identities for order transitions.
//!
//! Every engine call carries the identity of whoever is driving it. The
//! state machine decides legality from the actor's role and, where the
//! transition is scoped to a party of the order, from the actor's id.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The party initiating an event against an order.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "snake_case")]
pub enum Actor {
	/// The customer who placed the order.
	Customer { id: String },
	/// A home chef.
	Chef { id: String },
	/// A delivery partner.
	Driver { id: String },
	/// A marketplace administrator.
	Admin { id: String },
	/// The countdown scheduler.
	Timer,
}

/// Coarse role used in transition tables and history rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActorRole {
	Customer,
	Chef,
	Driver,
	/// Timer and administrators.
	System,
}

impl Actor {
	pub fn customer(id: impl Into<String>) -> Self {
		Actor::Customer { id: id.into() }
	}

	pub fn chef(id: impl Into<String>) -> Self {
		Actor::Chef { id: id.into() }
	}

	pub fn driver(id: impl Into<String>) -> Self {
		Actor::Driver { id: id.into() }
	}

	pub fn admin(id: impl Into<String>) -> Self {
		Actor::Admin { id: id.into() }
	}

	/// Returns the role this actor plays in the transition table.
	pub fn role(&self) -> ActorRole {
		match self {
			Actor::Customer { .. } => ActorRole::Customer,
			Actor::Chef { .. } => ActorRole::Chef,
			Actor::Driver { .. } => ActorRole::Driver,
			Actor::Admin { .. } | Actor::Timer => ActorRole::System,
		}
	}

	/// Returns the identity, if the actor has one.
	pub fn id(&self) -> Option<&str> {
		match self {
			Actor::Customer { id }
			| Actor::Chef { id }
			| Actor::Driver { id }
			| Actor::Admin { id } => Some(id),
			Actor::Timer => None,
		}
	}
}

impl fmt::Display for Actor {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Actor::Customer { id } => write!(f, "customer:{}", id),
			Actor::Chef { id } => write!(f, "chef:{}", id),
			Actor::Driver { id } => write!(f, "driver:{}", id),
			Actor::Admin { id } => write!(f, "admin:{}", id),
			Actor::Timer => write!(f, "system:timer"),
		}
	}
}

impl fmt::Display for ActorRole {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let s = match self {
			ActorRole::Customer => "customer",
			ActorRole::Chef => "chef",
			ActorRole::Driver => "driver",
			ActorRole::System => "system",
		};
		f.write_str(s)
	}
}
