//! In-process event bus.
//!
//! A thin wrapper over a tokio broadcast channel. Operations publish
//! [`EngineEvent`]s after they commit; background workers subscribe to wake up
//! without polling. Nothing durable travels here: the outbox inside each order
//! record is the source of truth, so a lagging or absent subscriber only
//! delays work until the next poll.

use homechef_types::EngineEvent;
use tokio::sync::broadcast;

#[derive(Clone)]
pub struct EventBus {
	sender: broadcast::Sender<EngineEvent>,
}

impl EventBus {
	/// Creates a bus buffering up to `capacity` events per subscriber.
	pub fn new(capacity: usize) -> Self {
		let (sender, _) = broadcast::channel(capacity);
		Self { sender }
	}

	pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
		self.sender.subscribe()
	}

	/// Publishes an event. Fails only when nobody is listening.
	pub fn publish(
		&self,
		event: EngineEvent,
	) -> Result<usize, broadcast::error::SendError<EngineEvent>> {
		self.sender.send(event)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[tokio::test]
	async fn test_subscribers_receive_published_events() {
		let bus = EventBus::new(8);
		let mut rx = bus.subscribe();
		bus.publish(EngineEvent::PolicyUpdated { version: 2 })
			.unwrap();
		assert_eq!(
			rx.recv().await.unwrap(),
			EngineEvent::PolicyUpdated { version: 2 }
		);
	}

	#[test]
	fn test_publish_without_subscribers_is_an_error() {
		let bus = EventBus::new(8);
		assert!(bus
			.publish(EngineEvent::PolicyUpdated { version: 1 })
			.is_err());
	}
}
