//! Chain client module for the transaction dispatcher.
//!
//! This module defines the interface the dispatcher uses to talk to a chain
//! node: nonce queries, transaction submission, receipt retrieval, fee
//! suggestion and mempool inspection. The production implementation speaks
//! JSON-RPC over HTTP using the Alloy library.

use std::collections::HashSet;

use alloy_consensus::TxEnvelope;
use alloy_primitives::{Address, Bytes, B256, U256};
use async_trait::async_trait;
use thiserror::Error;

use dispatcher_types::Receipt;

/// Re-export implementations
pub mod implementations {
	pub mod evm {
		pub mod alloy;
	}
}

/// Errors that can occur when talking to the chain.
///
/// Submission failures the replacement policy acts on are classified into
/// their own variants; everything else is carried as an opaque RPC error.
#[derive(Debug, Error)]
pub enum ChainError {
	/// The submitted nonce is below the account's next nonce.
	#[error("nonce too low: {0}")]
	NonceTooLow(String),
	/// A same-nonce replacement did not out-bid the pooled transaction.
	#[error("replacement transaction underpriced: {0}")]
	ReplaceUnderpriced(String),
	/// Any other RPC or transport failure.
	#[error("rpc error: {0}")]
	Rpc(String),
}

impl ChainError {
	/// Classifies a raw submission error message.
	pub fn from_send_error(message: String) -> Self {
		if message.contains("nonce too low") {
			ChainError::NonceTooLow(message)
		} else if message.contains("replacement transaction underpriced") {
			ChainError::ReplaceUnderpriced(message)
		} else {
			ChainError::Rpc(message)
		}
	}

	/// Whether this error means the nonce slot has already been consumed.
	///
	/// Matches the typed variant and falls back to a substring check so that
	/// errors wrapped by intermediate layers still classify.
	pub fn is_nonce_too_low(&self) -> bool {
		match self {
			ChainError::NonceTooLow(_) => true,
			other => other.to_string().contains("nonce too low"),
		}
	}

	/// Whether this error means a same-nonce replacement must bid higher.
	pub fn is_replace_underpriced(&self) -> bool {
		match self {
			ChainError::ReplaceUnderpriced(_) => true,
			other => other
				.to_string()
				.contains("replacement transaction underpriced"),
		}
	}
}

/// Chain-suggested EIP-1559 fee parameters.
#[derive(Debug, Clone, Copy)]
pub struct FeeEstimate {
	/// Suggested max fee per gas, in wei.
	pub max_fee_per_gas: u128,
	/// Suggested max priority fee per gas, in wei.
	pub max_priority_fee_per_gas: u128,
}

/// Snapshot of the transaction hashes currently held by the node's pool.
#[derive(Debug, Clone, Default)]
pub struct PoolContent {
	hashes: HashSet<B256>,
}

impl PoolContent {
	/// Builds a snapshot from the hashes of pending and queued transactions.
	pub fn new(hashes: HashSet<B256>) -> Self {
		Self { hashes }
	}

	/// Whether the pool holds the given transaction.
	pub fn contains(&self, hash: &B256) -> bool {
		self.hashes.contains(hash)
	}

	pub fn len(&self) -> usize {
		self.hashes.len()
	}

	pub fn is_empty(&self) -> bool {
		self.hashes.is_empty()
	}
}

/// Interface to the chain node consumed by the dispatcher.
///
/// Implementations must be safe to share across tasks; every method is a
/// suspension point that honors caller-side timeouts.
#[async_trait]
pub trait ChainClient: Send + Sync {
	/// Returns the account nonce including pooled transactions.
	async fn pending_nonce_at(&self, address: Address) -> Result<u64, ChainError>;

	/// Returns the account nonce at the latest block.
	async fn nonce_at(&self, address: Address) -> Result<u64, ChainError>;

	/// Submits a signed transaction and returns its hash.
	///
	/// Submission failures are classified via [`ChainError::from_send_error`].
	async fn send_transaction(&self, tx: &TxEnvelope) -> Result<B256, ChainError>;

	/// Returns the receipt for a transaction, or None while unmined.
	async fn transaction_receipt(&self, hash: B256) -> Result<Option<Receipt>, ChainError>;

	/// Returns chain-suggested EIP-1559 fee parameters.
	async fn suggest_fees(&self) -> Result<FeeEstimate, ChainError>;

	/// Estimates the gas required by a call without submitting it.
	async fn estimate_gas(
		&self,
		from: Address,
		to: Address,
		value: U256,
		input: Bytes,
	) -> Result<u64, ChainError>;

	/// Returns the hashes currently held by the node's transaction pool.
	async fn tx_pool_content(&self) -> Result<PoolContent, ChainError>;
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn classifies_send_errors() {
		let err = ChainError::from_send_error("nonce too low: next nonce 12, tx nonce 10".into());
		assert!(err.is_nonce_too_low());
		assert!(!err.is_replace_underpriced());

		let err = ChainError::from_send_error("replacement transaction underpriced".into());
		assert!(err.is_replace_underpriced());
		assert!(!err.is_nonce_too_low());

		let err = ChainError::from_send_error("insufficient funds".into());
		assert!(!err.is_nonce_too_low());
		assert!(!err.is_replace_underpriced());
	}

	#[test]
	fn substring_fallback_matches_wrapped_errors() {
		let err = ChainError::Rpc("server returned: nonce too low".into());
		assert!(err.is_nonce_too_low());
	}
}
