//! Ingress queue module for the transaction dispatcher.
//!
//! Requests enter the dispatcher through a queue with a minimal contract:
//! push one item, receive up to N items, report the backlog size. The
//! in-memory backend serves single-process deployments; the file backend
//! keeps the backlog across restarts. Remote hosted queues implement the
//! same interface out of tree.

use async_trait::async_trait;
use thiserror::Error;

/// Re-export implementations
pub mod implementations {
	pub mod file;
	pub mod memory;
}

/// Errors that can occur during queue operations.
#[derive(Debug, Error)]
pub enum QueueError {
	/// Error that occurs during serialization or deserialization.
	#[error("serialization error: {0}")]
	Serialization(String),
	/// Error that occurs in the queue backend.
	#[error("backend error: {0}")]
	Backend(String),
}

/// Interface to the ingress queue.
///
/// `receive_many` is non-blocking: it returns whatever is immediately
/// available, up to `max`, possibly nothing. Items are delivered in FIFO
/// order and at most once.
#[async_trait]
pub trait QueueInterface<T>: Send + Sync
where
	T: Send + 'static,
{
	/// Appends an item and returns the queue-assigned message identifier.
	async fn push(&self, item: T) -> Result<String, QueueError>;

	/// Removes and returns up to `max` items from the front of the queue.
	async fn receive_many(&self, max: usize) -> Result<Vec<(String, T)>, QueueError>;

	/// Returns the number of items currently queued.
	async fn len(&self) -> Result<usize, QueueError>;
}
