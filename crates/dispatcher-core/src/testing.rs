//! Shared test doubles for the core pipeline.
//!
//! A scriptable in-memory chain client plus helpers for building signed
//! envelopes with the well-known development key.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};

use alloy_consensus::{TxEip1559, TxEnvelope};
use alloy_primitives::{Address, Bytes, TxKind, B256, U256};
use async_trait::async_trait;

use dispatcher_chain::{ChainClient, ChainError, FeeEstimate, PoolContent};
use dispatcher_signer::implementations::local::LocalSigner;
use dispatcher_signer::{SignerError, SignerInterface};
use dispatcher_types::{InFlightTx, Receipt};

/// Well-known development key (anvil account 0).
pub const DEV_KEY: &str = "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";

#[derive(Default)]
struct MockChainState {
	pending_nonce: u64,
	confirmed_nonce: u64,
	send_errors: VecDeque<ChainError>,
	sent: Vec<TxEnvelope>,
	send_attempts: usize,
	receipts: HashMap<B256, Receipt>,
	pool: HashSet<B256>,
	auto_pool: bool,
	auto_receipt: Option<bool>,
	fees: (u128, u128),
	gas_estimate: u64,
}

/// Scriptable chain client.
///
/// Submissions succeed unless an error has been scripted; accepted
/// transactions can automatically show up in the pool and gain a receipt.
pub struct MockChain {
	state: Mutex<MockChainState>,
}

impl MockChain {
	pub fn new() -> Self {
		Self {
			state: Mutex::new(MockChainState {
				fees: (1_000_000_000, 2_000_000_000),
				gas_estimate: 21_000,
				..Default::default()
			}),
		}
	}

	pub fn set_pending_nonce(&self, nonce: u64) {
		self.state.lock().unwrap().pending_nonce = nonce;
	}

	pub fn set_confirmed_nonce(&self, nonce: u64) {
		self.state.lock().unwrap().confirmed_nonce = nonce;
	}

	/// Queues an error for the next submission attempt.
	pub fn script_send_error(&self, err: ChainError) {
		self.state.lock().unwrap().send_errors.push_back(err);
	}

	pub fn set_fees(&self, tip: u128, fee: u128) {
		self.state.lock().unwrap().fees = (tip, fee);
	}

	pub fn set_gas_estimate(&self, gas: u64) {
		self.state.lock().unwrap().gas_estimate = gas;
	}

	/// Accepted submissions are immediately visible in the pool.
	pub fn set_auto_pool(&self, enabled: bool) {
		self.state.lock().unwrap().auto_pool = enabled;
	}

	/// Accepted submissions immediately gain a receipt with the given
	/// execution status.
	pub fn set_auto_receipt(&self, success: bool) {
		self.state.lock().unwrap().auto_receipt = Some(success);
	}

	pub fn insert_receipt(&self, hash: B256, success: bool) {
		let mut state = self.state.lock().unwrap();
		state.receipts.insert(
			hash,
			Receipt {
				tx_hash: hash,
				block_number: 1,
				success,
				gas_used: 21_000,
			},
		);
	}

	pub fn insert_pool_hash(&self, hash: B256) {
		self.state.lock().unwrap().pool.insert(hash);
	}

	/// Transactions the node accepted, in submission order.
	pub fn sent(&self) -> Vec<TxEnvelope> {
		self.state.lock().unwrap().sent.clone()
	}

	/// Total submission attempts, including rejected ones.
	pub fn send_attempts(&self) -> usize {
		self.state.lock().unwrap().send_attempts
	}
}

#[async_trait]
impl ChainClient for MockChain {
	async fn pending_nonce_at(&self, _address: Address) -> Result<u64, ChainError> {
		Ok(self.state.lock().unwrap().pending_nonce)
	}

	async fn nonce_at(&self, _address: Address) -> Result<u64, ChainError> {
		Ok(self.state.lock().unwrap().confirmed_nonce)
	}

	async fn send_transaction(&self, tx: &TxEnvelope) -> Result<B256, ChainError> {
		let mut state = self.state.lock().unwrap();
		state.send_attempts += 1;
		if let Some(err) = state.send_errors.pop_front() {
			return Err(err);
		}

		let hash = *tx.tx_hash();
		state.sent.push(tx.clone());
		if state.auto_pool {
			state.pool.insert(hash);
		}
		if let Some(success) = state.auto_receipt {
			state.receipts.insert(
				hash,
				Receipt {
					tx_hash: hash,
					block_number: 1,
					success,
					gas_used: 21_000,
				},
			);
		}
		Ok(hash)
	}

	async fn transaction_receipt(&self, hash: B256) -> Result<Option<Receipt>, ChainError> {
		Ok(self.state.lock().unwrap().receipts.get(&hash).cloned())
	}

	async fn suggest_fees(&self) -> Result<FeeEstimate, ChainError> {
		let (tip, fee) = self.state.lock().unwrap().fees;
		Ok(FeeEstimate {
			max_fee_per_gas: fee,
			max_priority_fee_per_gas: tip,
		})
	}

	async fn estimate_gas(
		&self,
		_from: Address,
		_to: Address,
		_value: U256,
		_input: Bytes,
	) -> Result<u64, ChainError> {
		Ok(self.state.lock().unwrap().gas_estimate)
	}

	async fn tx_pool_content(&self) -> Result<PoolContent, ChainError> {
		Ok(PoolContent::new(self.state.lock().unwrap().pool.clone()))
	}
}

/// A signer over the well-known development key.
pub fn dev_signer() -> Arc<dyn SignerInterface> {
	Arc::new(LocalSigner::from_hex(DEV_KEY, 1).unwrap())
}

struct FailingSigner;

#[async_trait]
impl SignerInterface for FailingSigner {
	fn address(&self) -> Address {
		Address::repeat_byte(0xfa)
	}

	async fn sign_transaction(&self, _tx: TxEip1559) -> Result<TxEnvelope, SignerError> {
		Err(SignerError::SigningFailed("refused by test signer".into()))
	}
}

/// A signer that refuses to sign anything.
pub fn failing_signer() -> Arc<dyn SignerInterface> {
	Arc::new(FailingSigner)
}

/// Builds a signed EIP-1559 envelope with the given nonce and fee caps.
pub async fn make_envelope(nonce: u64, tip: u128, fee: u128) -> TxEnvelope {
	let tx = TxEip1559 {
		chain_id: 1,
		nonce,
		gas_limit: 21_000,
		max_fee_per_gas: fee,
		max_priority_fee_per_gas: tip,
		to: TxKind::Call(Address::repeat_byte(0x11)),
		value: U256::ZERO,
		input: Bytes::new(),
		..Default::default()
	};
	dev_signer().sign_transaction(tx).await.unwrap()
}

/// Builds an in-flight record around a freshly signed envelope.
pub async fn make_in_flight(nonce: u64) -> InFlightTx {
	InFlightTx {
		tx: make_envelope(nonce, 100, 200).await,
		msg_ids: vec![format!("m{}", nonce)],
		initial_times: vec![0],
		sent_at: 0,
	}
}
