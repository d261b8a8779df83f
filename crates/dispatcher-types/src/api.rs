//! API types for the HTTP admin surface.
//!
//! Request and response bodies for the dispatcher's admin endpoints.

use alloy_primitives::{Address, Bytes, U256};
use serde::{Deserialize, Serialize};

use crate::{PreconfirmedState, Request};

/// Body of `POST /api/transactions`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitTransactionRequest {
	/// Optional client-supplied message id.
	#[serde(default)]
	pub msg_id: String,
	/// Destination address.
	pub to: Address,
	/// Call data.
	#[serde(default)]
	pub input: Bytes,
	/// Native value to transfer.
	#[serde(default)]
	pub value: U256,
	/// Optional gas tip cap hint in wei.
	#[serde(default)]
	pub gas_tip_cap: Option<u128>,
	/// Optional gas fee cap hint in wei.
	#[serde(default)]
	pub gas_fee_cap: Option<u128>,
	/// Optional gas limit hint.
	#[serde(default)]
	pub gas_limit: Option<u64>,
}

impl From<SubmitTransactionRequest> for Request {
	fn from(body: SubmitTransactionRequest) -> Self {
		Request::new(body.msg_id, body.to, body.input, body.value).with_gas(
			body.gas_tip_cap,
			body.gas_fee_cap,
			body.gas_limit,
		)
	}
}

/// Body returned by `POST /api/transactions`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitTransactionResponse {
	/// The message id the request was accepted under.
	pub msg_id: String,
}

/// Body returned by `GET /api/transactions/{msg_id}/state`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionStateResponse {
	pub msg_id: String,
	pub state: PreconfirmedState,
}

/// Body returned by `GET /api/stats`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatsResponse {
	/// Nonces handed out for building but not yet submitted.
	pub acquired: usize,
	/// Submitted but unconfirmed transactions.
	pub in_flight: usize,
	/// Requests waiting in the ingress queue.
	pub queued: usize,
}
