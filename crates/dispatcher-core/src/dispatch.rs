//! Response fan-out to subscribers.
//!
//! Each subscriber owns a bounded channel. Dispatching sends to every
//! subscriber with a short per-send grace; a subscriber that has not drained
//! its buffer in time is skipped for that response and the drop is counted.
//! Subscribers whose receiver was dropped are pruned, so a cancelled
//! consumer cannot accumulate undelivered responses.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::mpsc::{self, error::SendTimeoutError};
use tokio::sync::Mutex;

use dispatcher_types::Response;

/// Grace period before a slow subscriber is skipped for a response.
const SEND_TIMEOUT: Duration = Duration::from_millis(250);

/// Default per-subscriber channel capacity.
pub const DEFAULT_SUBSCRIBER_BUFFER: usize = 64;

struct Subscriber {
	id: u64,
	tx: mpsc::Sender<Response>,
}

/// Fans terminal responses out to all subscribers.
pub struct Dispatcher {
	subscribers: Mutex<Vec<Subscriber>>,
	next_id: AtomicU64,
	dropped: AtomicU64,
}

impl Dispatcher {
	pub fn new() -> Self {
		Self {
			subscribers: Mutex::new(Vec::new()),
			next_id: AtomicU64::new(0),
			dropped: AtomicU64::new(0),
		}
	}

	/// Attaches a new subscriber with the given buffer capacity.
	///
	/// Dropping the returned receiver unsubscribes on the next dispatch.
	pub async fn subscribe(&self, buffer: usize) -> mpsc::Receiver<Response> {
		let (tx, rx) = mpsc::channel(buffer.max(1));
		let id = self.next_id.fetch_add(1, Ordering::Relaxed);
		self.subscribers.lock().await.push(Subscriber { id, tx });
		rx
	}

	/// Sends the response to every subscriber, best effort.
	pub async fn dispatch(&self, response: Response) {
		let targets: Vec<(u64, mpsc::Sender<Response>)> = {
			let subscribers = self.subscribers.lock().await;
			subscribers.iter().map(|s| (s.id, s.tx.clone())).collect()
		};

		let mut closed = Vec::new();
		for (id, tx) in targets {
			match tx.send_timeout(response.clone(), SEND_TIMEOUT).await {
				Ok(()) => {}
				Err(SendTimeoutError::Timeout(_)) => {
					self.dropped.fetch_add(1, Ordering::Relaxed);
					tracing::warn!(
						subscriber = id,
						"subscriber did not drain in time, dropping response"
					);
				}
				Err(SendTimeoutError::Closed(_)) => closed.push(id),
			}
		}

		if !closed.is_empty() {
			let mut subscribers = self.subscribers.lock().await;
			subscribers.retain(|s| !closed.contains(&s.id));
		}
	}

	/// Number of currently attached subscribers.
	pub async fn subscriber_count(&self) -> usize {
		self.subscribers.lock().await.len()
	}

	/// Total responses dropped on slow subscribers.
	pub fn dropped(&self) -> u64 {
		self.dropped.load(Ordering::Relaxed)
	}
}

impl Default for Dispatcher {
	fn default() -> Self {
		Self::new()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn response(id: &str) -> Response {
		Response::for_batch(vec![id.to_string()], vec![0])
	}

	#[tokio::test]
	async fn fans_out_to_all_subscribers() {
		let dispatcher = Dispatcher::new();
		let mut rx1 = dispatcher.subscribe(4).await;
		let mut rx2 = dispatcher.subscribe(4).await;

		dispatcher.dispatch(response("m1")).await;

		assert_eq!(rx1.recv().await.unwrap().msg_ids, vec!["m1"]);
		assert_eq!(rx2.recv().await.unwrap().msg_ids, vec!["m1"]);
	}

	#[tokio::test]
	async fn slow_subscriber_is_skipped_not_awaited() {
		let dispatcher = Dispatcher::new();
		// Buffer of one, never drained.
		let _rx = dispatcher.subscribe(1).await;
		dispatcher.dispatch(response("m1")).await;

		// The buffer is full now; this send must give up, not block.
		dispatcher.dispatch(response("m2")).await;
		assert_eq!(dispatcher.dropped(), 1);
	}

	#[tokio::test]
	async fn dropped_receiver_is_pruned() {
		let dispatcher = Dispatcher::new();
		let rx = dispatcher.subscribe(4).await;
		let _rx2 = dispatcher.subscribe(4).await;
		assert_eq!(dispatcher.subscriber_count().await, 2);

		drop(rx);
		dispatcher.dispatch(response("m1")).await;
		assert_eq!(dispatcher.subscriber_count().await, 1);
	}
}
