//! Alloy-based chain client implementation.
//!
//! Talks to an EVM node over HTTP JSON-RPC using the Alloy provider stack.
//! Raw signed transactions are submitted as-is; submission errors are
//! classified for the sender's replacement policy.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use alloy_consensus::TxEnvelope;
use alloy_eips::eip2718::Encodable2718;
use alloy_primitives::{Address, Bytes, B256, U256};
use alloy_provider::{Provider, ProviderBuilder};
use alloy_rpc_types::TransactionRequest;
use alloy_transport_http::Http;
use async_trait::async_trait;
use serde::Deserialize;

use crate::{ChainClient, ChainError, FeeEstimate, PoolContent};
use dispatcher_types::Receipt;

/// Chain client backed by an Alloy HTTP provider.
pub struct AlloyChain {
	/// The Alloy provider for node interaction.
	provider: Arc<dyn Provider<Http<reqwest::Client>> + Send + Sync>,
}

impl AlloyChain {
	/// Creates a new client for the given HTTP RPC endpoint.
	pub fn new(rpc_url: &str) -> Result<Self, ChainError> {
		let url = rpc_url
			.parse()
			.map_err(|e| ChainError::Rpc(format!("invalid RPC URL: {}", e)))?;

		let provider = ProviderBuilder::new().on_http(url);

		Ok(Self {
			provider: Arc::new(provider),
		})
	}
}

/// Wire shape of one pooled transaction in a `txpool_content` response.
///
/// Only the hash is read; the rest of the node's payload is ignored.
#[derive(Debug, Deserialize)]
struct PoolTx {
	hash: B256,
}

/// Wire shape of a `txpool_content` response, keyed by account then nonce.
#[derive(Debug, Deserialize)]
struct RawPoolContent {
	#[serde(default)]
	pending: HashMap<String, HashMap<String, PoolTx>>,
	#[serde(default)]
	queued: HashMap<String, HashMap<String, PoolTx>>,
}

impl From<RawPoolContent> for PoolContent {
	fn from(raw: RawPoolContent) -> Self {
		let mut hashes = HashSet::new();
		for by_nonce in raw.pending.into_values().chain(raw.queued.into_values()) {
			hashes.extend(by_nonce.into_values().map(|tx| tx.hash));
		}
		PoolContent::new(hashes)
	}
}

#[async_trait]
impl ChainClient for AlloyChain {
	async fn pending_nonce_at(&self, address: Address) -> Result<u64, ChainError> {
		self.provider
			.get_transaction_count(address)
			.pending()
			.await
			.map_err(|e| ChainError::Rpc(format!("failed to get pending nonce: {}", e)))
	}

	async fn nonce_at(&self, address: Address) -> Result<u64, ChainError> {
		self.provider
			.get_transaction_count(address)
			.await
			.map_err(|e| ChainError::Rpc(format!("failed to get nonce: {}", e)))
	}

	async fn send_transaction(&self, tx: &TxEnvelope) -> Result<B256, ChainError> {
		let encoded = tx.encoded_2718();

		let pending = self
			.provider
			.send_raw_transaction(&encoded)
			.await
			.map_err(|e| ChainError::from_send_error(e.to_string()))?;

		let hash = *pending.tx_hash();
		tracing::debug!(tx_hash = %hash, "submitted raw transaction");
		Ok(hash)
	}

	async fn transaction_receipt(&self, hash: B256) -> Result<Option<Receipt>, ChainError> {
		let receipt = self
			.provider
			.get_transaction_receipt(hash)
			.await
			.map_err(|e| ChainError::Rpc(format!("failed to get receipt: {}", e)))?;

		Ok(receipt.map(|r| Receipt {
			tx_hash: r.transaction_hash,
			block_number: r.block_number.unwrap_or(0),
			success: r.status(),
			gas_used: r.gas_used as u64,
		}))
	}

	async fn suggest_fees(&self) -> Result<FeeEstimate, ChainError> {
		let estimate = self
			.provider
			.estimate_eip1559_fees(None)
			.await
			.map_err(|e| ChainError::Rpc(format!("failed to estimate fees: {}", e)))?;

		Ok(FeeEstimate {
			max_fee_per_gas: estimate.max_fee_per_gas,
			max_priority_fee_per_gas: estimate.max_priority_fee_per_gas,
		})
	}

	async fn estimate_gas(
		&self,
		from: Address,
		to: Address,
		value: U256,
		input: Bytes,
	) -> Result<u64, ChainError> {
		let request = TransactionRequest::default()
			.from(from)
			.to(to)
			.value(value)
			.input(input.into());

		let gas = self
			.provider
			.estimate_gas(&request)
			.await
			.map_err(|e| ChainError::Rpc(format!("failed to estimate gas: {}", e)))?;

		Ok(gas as u64)
	}

	async fn tx_pool_content(&self) -> Result<PoolContent, ChainError> {
		// Typed ext traits are not object-safe over a dyn provider, so this
		// goes through the raw RPC client.
		let raw: RawPoolContent = self
			.provider
			.client()
			.request("txpool_content", ())
			.await
			.map_err(|e| ChainError::Rpc(format!("failed to get txpool content: {}", e)))?;

		Ok(raw.into())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn pool_content_flattens_pending_and_queued() {
		let raw = RawPoolContent {
			pending: HashMap::from([(
				"0xaaaa".to_string(),
				HashMap::from([
					("10".to_string(), PoolTx { hash: B256::repeat_byte(1) }),
					("11".to_string(), PoolTx { hash: B256::repeat_byte(2) }),
				]),
			)]),
			queued: HashMap::from([(
				"0xbbbb".to_string(),
				HashMap::from([("7".to_string(), PoolTx { hash: B256::repeat_byte(3) })]),
			)]),
		};

		let content: PoolContent = raw.into();
		assert_eq!(content.len(), 3);
		assert!(content.contains(&B256::repeat_byte(1)));
		assert!(content.contains(&B256::repeat_byte(3)));
		assert!(!content.contains(&B256::repeat_byte(9)));
	}
}
