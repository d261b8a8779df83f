//! In-memory queue backend.
//!
//! Holds the backlog in a VecDeque behind a lock. Fast and dependency-free,
//! with no persistence across restarts.

use std::collections::VecDeque;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::{QueueError, QueueInterface};

/// In-memory FIFO queue.
pub struct MemoryQueue<T> {
	items: Mutex<VecDeque<(String, T)>>,
}

impl<T> MemoryQueue<T> {
	/// Creates a new empty queue.
	pub fn new() -> Self {
		Self {
			items: Mutex::new(VecDeque::new()),
		}
	}
}

impl<T> Default for MemoryQueue<T> {
	fn default() -> Self {
		Self::new()
	}
}

#[async_trait]
impl<T> QueueInterface<T> for MemoryQueue<T>
where
	T: Send + 'static,
{
	async fn push(&self, item: T) -> Result<String, QueueError> {
		let id = uuid::Uuid::new_v4().to_string();
		let mut items = self.items.lock().await;
		items.push_back((id.clone(), item));
		Ok(id)
	}

	async fn receive_many(&self, max: usize) -> Result<Vec<(String, T)>, QueueError> {
		let mut items = self.items.lock().await;
		let take = max.min(items.len());
		Ok(items.drain(..take).collect())
	}

	async fn len(&self) -> Result<usize, QueueError> {
		Ok(self.items.lock().await.len())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[tokio::test]
	async fn delivers_in_fifo_order() {
		let queue = MemoryQueue::new();
		queue.push("a").await.unwrap();
		queue.push("b").await.unwrap();
		queue.push("c").await.unwrap();

		let received = queue.receive_many(2).await.unwrap();
		let values: Vec<_> = received.iter().map(|(_, v)| *v).collect();
		assert_eq!(values, vec!["a", "b"]);
		assert_eq!(queue.len().await.unwrap(), 1);
	}

	#[tokio::test]
	async fn receive_on_empty_returns_nothing() {
		let queue: MemoryQueue<String> = MemoryQueue::new();
		assert!(queue.receive_many(10).await.unwrap().is_empty());
	}

	#[tokio::test]
	async fn assigns_unique_ids() {
		let queue = MemoryQueue::new();
		let id1 = queue.push(1u64).await.unwrap();
		let id2 = queue.push(2u64).await.unwrap();
		assert_ne!(id1, id2);
	}
}
