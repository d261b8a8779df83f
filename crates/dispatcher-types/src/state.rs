//! Per-message preconfirmed state.
//!
//! Tracks where a message stands in the pipeline before the chain has
//! confirmed anything about its containing transaction.

use serde::{Deserialize, Serialize};

/// Status of a message before chain confirmation.
///
/// Terminal tracker events clear a message's entry, after which queries
/// observe [`PreconfirmedState::Unknown`] again.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PreconfirmedState {
	/// Not tracked (never seen, or already resolved).
	#[default]
	Unknown,
	/// Accepted into the ingress queue.
	Queued,
	/// Being folded into a chain transaction.
	Building,
	/// Its transaction is being submitted.
	Sending,
	/// Its transaction is in flight, awaiting confirmation.
	InFlight,
}

impl std::fmt::Display for PreconfirmedState {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		let s = match self {
			Self::Unknown => "unknown",
			Self::Queued => "queued",
			Self::Building => "building",
			Self::Sending => "sending",
			Self::InFlight => "in_flight",
		};
		f.write_str(s)
	}
}
