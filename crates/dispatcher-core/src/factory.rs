//! Transaction assembly.
//!
//! The factory turns a batch of requests into one signed EIP-1559
//! transaction. A single request is adopted verbatim; larger batches are
//! folded into one call to the Multicall3 contract so the whole batch
//! consumes a single nonce.

use std::sync::Arc;

use alloy_consensus::{TxEip1559, TxEnvelope};
use alloy_primitives::{Address, Bytes, TxKind, U256};
use alloy_sol_types::{sol, SolCall};
use thiserror::Error;

use dispatcher_chain::{ChainClient, ChainError};
use dispatcher_signer::{SignerError, SignerInterface};
use dispatcher_types::Requests;

use crate::noncer::Noncer;

sol! {
	/// One sub-call of a Multicall3 `aggregate3Value` invocation.
	#[derive(Debug, PartialEq, Eq)]
	struct Call3Value {
		address target;
		bool allowFailure;
		uint256 value;
		bytes callData;
	}

	/// Multicall3's value-carrying aggregation entrypoint.
	function aggregate3Value(Call3Value[] calldata calls) external payable;
}

/// Errors that can occur while assembling a transaction.
///
/// None of these are retried by the factory itself; they surface as the
/// response error for the whole batch.
#[derive(Debug, Error)]
pub enum FactoryError {
	/// The batch was empty.
	#[error("cannot build a transaction from an empty batch")]
	EmptyBatch,
	/// A chain query (nonce, fees, gas estimate) failed.
	#[error(transparent)]
	Chain(#[from] ChainError),
	/// Signing the assembled transaction failed.
	#[error(transparent)]
	Signer(#[from] SignerError),
}

/// Packs request batches into Multicall3 `aggregate3Value` calldata.
pub struct Multicall3Batcher {
	address: Address,
}

/// A packed batch: destination, total value and calldata.
pub struct BatchedCall {
	pub to: Address,
	pub value: U256,
	pub input: Bytes,
}

impl Multicall3Batcher {
	pub fn new(address: Address) -> Self {
		Self { address }
	}

	/// Packs the batch into a single aggregated call.
	///
	/// Sub-calls run with `allowFailure = true` so one reverting message
	/// cannot take down its batch mates. The transaction value is the sum
	/// of the per-message values. Packing preserves batch order and is
	/// reversible via ABI decoding.
	pub fn batch(&self, requests: &Requests) -> BatchedCall {
		let calls: Vec<Call3Value> = requests
			.iter()
			.map(|r| Call3Value {
				target: r.to,
				allowFailure: true,
				value: r.value,
				callData: r.input.clone(),
			})
			.collect();

		let value = requests
			.iter()
			.fold(U256::ZERO, |acc, r| acc.saturating_add(r.value));

		BatchedCall {
			to: self.address,
			value,
			input: aggregate3ValueCall { calls }.abi_encode().into(),
		}
	}
}

/// Builds signed transactions from request batches.
pub struct Factory {
	chain: Arc<dyn ChainClient>,
	signer: Arc<dyn SignerInterface>,
	noncer: Arc<Noncer>,
	batcher: Multicall3Batcher,
	chain_id: u64,
}

impl Factory {
	pub fn new(
		chain: Arc<dyn ChainClient>,
		signer: Arc<dyn SignerInterface>,
		noncer: Arc<Noncer>,
		batcher: Multicall3Batcher,
		chain_id: u64,
	) -> Self {
		Self {
			chain,
			signer,
			noncer,
			batcher,
			chain_id,
		}
	}

	/// Assembles and signs one transaction carrying the whole batch.
	///
	/// Gas limit is the sum of the per-message hints, estimated against the
	/// chain when any message omits one. Fee caps take the batch maximum and
	/// fall back to chain-suggested values. The nonce acquired here is
	/// released again if a later step fails.
	pub async fn build_transaction_from_requests(
		&self,
		requests: &Requests,
	) -> Result<TxEnvelope, FactoryError> {
		if requests.is_empty() {
			return Err(FactoryError::EmptyBatch);
		}

		let (to, value, input) = if requests.len() == 1 {
			let request = &requests.0[0];
			(request.to, request.value, request.input.clone())
		} else {
			let call = self.batcher.batch(requests);
			(call.to, call.value, call.input)
		};

		let gas_limit = if requests.iter().all(|r| r.gas_limit.is_some()) {
			requests.iter().filter_map(|r| r.gas_limit).sum()
		} else {
			self.chain
				.estimate_gas(self.signer.address(), to, value, input.clone())
				.await?
		};

		let nonce = self.noncer.acquire().await?;

		let fees = match self.fee_caps(requests).await {
			Ok(fees) => fees,
			Err(e) => {
				self.noncer.release_acquired(nonce).await;
				return Err(e);
			}
		};

		let tx = TxEip1559 {
			chain_id: self.chain_id,
			nonce,
			gas_limit,
			max_fee_per_gas: fees.1,
			max_priority_fee_per_gas: fees.0,
			to: TxKind::Call(to),
			value,
			input,
			..Default::default()
		};

		match self.signer.sign_transaction(tx).await {
			Ok(envelope) => Ok(envelope),
			Err(e) => {
				self.noncer.release_acquired(nonce).await;
				Err(e.into())
			}
		}
	}

	/// Resolves `(tip_cap, fee_cap)` for the batch: per-message maxima,
	/// with chain-suggested values filling whichever cap no message set.
	async fn fee_caps(&self, requests: &Requests) -> Result<(u128, u128), FactoryError> {
		let tip_hint = requests.iter().filter_map(|r| r.gas_tip_cap).max();
		let fee_hint = requests.iter().filter_map(|r| r.gas_fee_cap).max();

		match (tip_hint, fee_hint) {
			(Some(tip), Some(fee)) => Ok((tip, fee)),
			(tip, fee) => {
				let suggested = self.chain.suggest_fees().await?;
				Ok((
					tip.unwrap_or(suggested.max_priority_fee_per_gas),
					fee.unwrap_or(suggested.max_fee_per_gas),
				))
			}
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::testing::{dev_signer, failing_signer, MockChain};
	use alloy_consensus::Transaction;
	use dispatcher_types::Request;
	use std::time::Duration;

	const MULTICALL: Address = Address::repeat_byte(0xca);

	fn factory_with(chain: Arc<MockChain>, signer: Arc<dyn SignerInterface>) -> Factory {
		let noncer = Arc::new(Noncer::new(
			chain.clone() as Arc<dyn ChainClient>,
			signer.address(),
			Duration::from_millis(500),
		));
		Factory::new(
			chain as Arc<dyn ChainClient>,
			signer,
			noncer,
			Multicall3Batcher::new(MULTICALL),
			1,
		)
	}

	fn request(id: &str, byte: u8, value: u64) -> Request {
		Request::new(
			id,
			Address::repeat_byte(byte),
			Bytes::from(vec![byte, byte]),
			U256::from(value),
		)
	}

	#[tokio::test]
	async fn single_request_is_adopted_verbatim() {
		let chain = Arc::new(MockChain::new());
		chain.set_pending_nonce(9);
		let factory = factory_with(chain, dev_signer());

		let req = request("m1", 0x11, 5).with_gas(Some(100), Some(200), Some(30_000));
		let tx = factory
			.build_transaction_from_requests(&vec![req.clone()].into())
			.await
			.unwrap();

		assert_eq!(tx.nonce(), 9);
		assert_eq!(tx.gas_limit(), 30_000);
		assert_eq!(tx.max_priority_fee_per_gas(), Some(100));
		assert_eq!(tx.max_fee_per_gas(), 200);
		assert_eq!(tx.to(), Some(req.to));
		assert_eq!(tx.value(), req.value);
		assert_eq!(tx.input(), &req.input);
	}

	#[tokio::test]
	async fn batch_targets_the_multicall_contract() {
		let chain = Arc::new(MockChain::new());
		let factory = factory_with(chain, dev_signer());

		let reqs: Requests = vec![
			request("m1", 0x11, 5).with_gas(Some(1), Some(2), Some(10_000)),
			request("m2", 0x22, 7).with_gas(Some(3), Some(4), Some(20_000)),
		]
		.into();
		let tx = factory.build_transaction_from_requests(&reqs).await.unwrap();

		assert_eq!(tx.to(), Some(MULTICALL));
		assert_eq!(tx.value(), U256::from(12u64));
		// Sums gas, takes the fee maxima.
		assert_eq!(tx.gas_limit(), 30_000);
		assert_eq!(tx.max_priority_fee_per_gas(), Some(3));
		assert_eq!(tx.max_fee_per_gas(), 4);
	}

	#[tokio::test]
	async fn multicall_packing_is_reversible() {
		let chain = Arc::new(MockChain::new());
		let factory = factory_with(chain, dev_signer());

		let reqs: Requests = vec![
			request("m1", 0x11, 1).with_gas(Some(1), Some(2), Some(1)),
			request("m2", 0x22, 2).with_gas(Some(1), Some(2), Some(1)),
			request("m3", 0x33, 3).with_gas(Some(1), Some(2), Some(1)),
		]
		.into();
		let tx = factory.build_transaction_from_requests(&reqs).await.unwrap();

		let decoded = aggregate3ValueCall::abi_decode(tx.input(), true).unwrap();
		assert_eq!(decoded.calls.len(), 3);
		for (call, req) in decoded.calls.iter().zip(reqs.iter()) {
			assert_eq!(call.target, req.to);
			assert!(call.allowFailure);
			assert_eq!(call.value, req.value);
			assert_eq!(call.callData, req.input);
		}
	}

	#[tokio::test]
	async fn missing_hints_fall_back_to_the_chain() {
		let chain = Arc::new(MockChain::new());
		chain.set_fees(111, 222);
		chain.set_gas_estimate(77_777);
		let factory = factory_with(chain, dev_signer());

		let tx = factory
			.build_transaction_from_requests(&vec![request("m1", 0x11, 0)].into())
			.await
			.unwrap();

		assert_eq!(tx.gas_limit(), 77_777);
		assert_eq!(tx.max_priority_fee_per_gas(), Some(111));
		assert_eq!(tx.max_fee_per_gas(), 222);
	}

	#[tokio::test]
	async fn signing_failure_releases_the_nonce() {
		let chain = Arc::new(MockChain::new());
		chain.set_pending_nonce(4);
		let factory = factory_with(chain, failing_signer());

		let result = factory
			.build_transaction_from_requests(&vec![request("m1", 0x11, 0)].into())
			.await;
		assert!(matches!(result, Err(FactoryError::Signer(_))));

		// The acquired slot must not leak.
		assert_eq!(factory.noncer.stats().await, (0, 0));
	}

	#[tokio::test]
	async fn empty_batch_is_rejected() {
		let chain = Arc::new(MockChain::new());
		let factory = factory_with(chain, dev_signer());
		assert!(matches!(
			factory
				.build_transaction_from_requests(&Requests::default())
				.await,
			Err(FactoryError::EmptyBatch)
		));
	}
}
