//! Request types entering the dispatch pipeline.
//!
//! A [`Request`] is one user intent against the signing identity. Requests
//! are pushed onto the ingress queue, pulled in batches by the dispatch loop
//! and folded into a single chain transaction.

use alloy_primitives::{Address, Bytes, U256};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::now_millis;

/// Errors produced when validating a request at ingress.
#[derive(Debug, Error)]
pub enum ValidationError {
	/// The destination address is the zero address.
	#[error("destination address must not be zero")]
	ZeroDestination,
	/// The fee cap is below the tip cap, which no chain will accept.
	#[error("gas fee cap {fee_cap} is below gas tip cap {tip_cap}")]
	FeeCapBelowTipCap { fee_cap: u128, tip_cap: u128 },
}

/// One user-level transaction request.
///
/// Gas hints are optional; missing values are filled from chain-suggested
/// fees when the containing transaction is built.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
	/// Client-supplied message identifier. Assigned a fresh unique id at
	/// ingress when empty.
	pub msg_id: String,
	/// Destination address.
	pub to: Address,
	/// Call data.
	pub input: Bytes,
	/// Native value to transfer.
	pub value: U256,
	/// Optional gas tip cap hint in wei.
	pub gas_tip_cap: Option<u128>,
	/// Optional gas fee cap hint in wei.
	pub gas_fee_cap: Option<u128>,
	/// Optional gas limit hint.
	pub gas_limit: Option<u64>,
	/// Creation time, Unix milliseconds.
	pub created_at: u64,
}

impl Request {
	/// Creates a new request stamped with the current time.
	pub fn new(msg_id: impl Into<String>, to: Address, input: Bytes, value: U256) -> Self {
		Self {
			msg_id: msg_id.into(),
			to,
			input,
			value,
			gas_tip_cap: None,
			gas_fee_cap: None,
			gas_limit: None,
			created_at: now_millis(),
		}
	}

	/// Sets the gas hints on this request.
	pub fn with_gas(
		mut self,
		tip_cap: Option<u128>,
		fee_cap: Option<u128>,
		limit: Option<u64>,
	) -> Self {
		self.gas_tip_cap = tip_cap;
		self.gas_fee_cap = fee_cap;
		self.gas_limit = limit;
		self
	}

	/// Validates the request before it enters the queue.
	pub fn validate(&self) -> Result<(), ValidationError> {
		if self.to == Address::ZERO {
			return Err(ValidationError::ZeroDestination);
		}
		if let (Some(fee_cap), Some(tip_cap)) = (self.gas_fee_cap, self.gas_tip_cap) {
			if fee_cap < tip_cap {
				return Err(ValidationError::FeeCapBelowTipCap { fee_cap, tip_cap });
			}
		}
		Ok(())
	}
}

/// An ordered batch of requests pulled from the queue.
///
/// Order is preserved through multicall packing and into the response's
/// message id list.
#[derive(Debug, Clone, Default)]
pub struct Requests(pub Vec<Request>);

impl Requests {
	/// The message ids of the batch, in batch order.
	pub fn msg_ids(&self) -> Vec<String> {
		self.0.iter().map(|r| r.msg_id.clone()).collect()
	}

	/// The creation times of the batch, in batch order.
	pub fn initial_times(&self) -> Vec<u64> {
		self.0.iter().map(|r| r.created_at).collect()
	}

	pub fn len(&self) -> usize {
		self.0.len()
	}

	pub fn is_empty(&self) -> bool {
		self.0.is_empty()
	}

	pub fn iter(&self) -> std::slice::Iter<'_, Request> {
		self.0.iter()
	}
}

impl From<Vec<Request>> for Requests {
	fn from(reqs: Vec<Request>) -> Self {
		Self(reqs)
	}
}
