//! Shared preconfirmed state map.
//!
//! Maps message ids to their pipeline state. The dispatch loop writes the
//! forward transitions, the tracker clears entries on terminal outcomes, and
//! the query API reads concurrently.

use std::collections::HashMap;

use tokio::sync::RwLock;

use dispatcher_types::PreconfirmedState;

/// Per-message state visible to external queries.
pub struct PreconfirmedStates {
	states: RwLock<HashMap<String, PreconfirmedState>>,
}

impl PreconfirmedStates {
	pub fn new() -> Self {
		Self {
			states: RwLock::new(HashMap::new()),
		}
	}

	/// Marks the given state for all message ids.
	pub async fn mark(&self, state: PreconfirmedState, msg_ids: &[String]) {
		let mut states = self.states.write().await;
		for msg_id in msg_ids {
			states.insert(msg_id.clone(), state);
		}
	}

	/// Removes tracking for the given message ids, equivalent to marking
	/// them [`PreconfirmedState::Unknown`].
	pub async fn clear(&self, msg_ids: &[String]) {
		let mut states = self.states.write().await;
		for msg_id in msg_ids {
			states.remove(msg_id);
		}
	}

	/// Returns the state of one message.
	pub async fn get(&self, msg_id: &str) -> PreconfirmedState {
		self.states
			.read()
			.await
			.get(msg_id)
			.copied()
			.unwrap_or_default()
	}
}

impl Default for PreconfirmedStates {
	fn default() -> Self {
		Self::new()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[tokio::test]
	async fn unknown_until_marked() {
		let states = PreconfirmedStates::new();
		assert_eq!(states.get("m1").await, PreconfirmedState::Unknown);

		states
			.mark(PreconfirmedState::Queued, &["m1".to_string()])
			.await;
		assert_eq!(states.get("m1").await, PreconfirmedState::Queued);
	}

	#[tokio::test]
	async fn marks_whole_batches() {
		let states = PreconfirmedStates::new();
		let ids = vec!["a".to_string(), "b".to_string()];
		states.mark(PreconfirmedState::Building, &ids).await;

		assert_eq!(states.get("a").await, PreconfirmedState::Building);
		assert_eq!(states.get("b").await, PreconfirmedState::Building);
	}

	#[tokio::test]
	async fn clear_is_idempotent() {
		let states = PreconfirmedStates::new();
		let ids = vec!["a".to_string()];
		states.mark(PreconfirmedState::InFlight, &ids).await;

		states.clear(&ids).await;
		assert_eq!(states.get("a").await, PreconfirmedState::Unknown);

		states.clear(&ids).await;
		assert_eq!(states.get("a").await, PreconfirmedState::Unknown);
	}
}
