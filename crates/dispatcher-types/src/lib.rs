//! Common types module for the transaction dispatcher.
//!
//! This module defines the core data types shared by all dispatcher
//! components: transaction requests, in-flight transactions, tracker
//! responses and the preconfirmed state machine. It provides a centralized
//! location for shared types to ensure consistency across the workspace.

/// API types for the HTTP admin surface.
pub mod api;
/// Request types entering the dispatch pipeline.
pub mod request;
/// In-flight transactions, receipts and tracker responses.
pub mod response;
/// Per-message preconfirmed state.
pub mod state;

// Re-export all types for convenient access
pub use api::*;
pub use request::*;
pub use response::*;
pub use state::*;

/// Returns the current Unix time in milliseconds.
///
/// Used to stamp request creation and transaction submission times.
pub fn now_millis() -> u64 {
	std::time::SystemTime::now()
		.duration_since(std::time::UNIX_EPOCH)
		.unwrap_or_default()
		.as_millis() as u64
}

/// Generates a fresh unique message identifier.
pub fn fresh_msg_id() -> String {
	uuid::Uuid::new_v4().to_string()
}
