//! In-flight transactions, receipts and tracker responses.
//!
//! A [`Response`] is the event emitted for every batch once its transaction
//! reaches a terminal outcome (or fails to build/send). Its status is a pure
//! function of the carried attributes so consumers can re-derive it.

use alloy_consensus::{Transaction, TxEnvelope};
use alloy_primitives::B256;
use serde::{Deserialize, Serialize};

/// A submitted chain transaction together with the messages it carries.
///
/// While it is in flight, the nonce uniquely identifies the transaction
/// within the signer's address space.
#[derive(Debug, Clone)]
pub struct InFlightTx {
	/// The signed chain transaction.
	pub tx: TxEnvelope,
	/// Message ids carried by this transaction, in batch order.
	pub msg_ids: Vec<String>,
	/// Initial enqueue times of the carried messages, Unix milliseconds.
	pub initial_times: Vec<u64>,
	/// Submission time, Unix milliseconds.
	pub sent_at: u64,
}

impl InFlightTx {
	/// The nonce of the submitted transaction.
	pub fn nonce(&self) -> u64 {
		self.tx.nonce()
	}

	/// The hash of the submitted transaction.
	pub fn hash(&self) -> B256 {
		*self.tx.tx_hash()
	}
}

/// Chain record of a transaction's inclusion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Receipt {
	/// Hash of the included transaction.
	pub tx_hash: B256,
	/// Block the transaction was included in.
	pub block_number: u64,
	/// Whether execution succeeded.
	pub success: bool,
	/// Gas consumed by the transaction.
	pub gas_used: u64,
}

/// Which tracker deadline expired for a stale transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stale {
	/// The transaction never appeared in the mempool.
	Mempool,
	/// The transaction never produced a receipt.
	Receipt,
}

/// Terminal (or derived) status of a tracked transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TxStatus {
	/// Not yet resolved.
	Pending,
	/// Included with successful execution.
	Success,
	/// Included but execution reverted.
	Reverted,
	/// Failed before or during submission.
	Error,
	/// Dropped before reaching the mempool.
	StaleMempool,
	/// Admitted to the mempool but never included.
	StaleReceipt,
}

/// The event emitted by the tracker for each dispatched batch.
#[derive(Debug, Clone, Default)]
pub struct Response {
	/// Message ids of the batch, in batch order.
	pub msg_ids: Vec<String>,
	/// Initial enqueue times of the batch, in batch order.
	pub initial_times: Vec<u64>,
	/// The submitted transaction. None when the batch failed to build.
	pub tx: Option<TxEnvelope>,
	/// The inclusion receipt, when one was observed.
	pub receipt: Option<Receipt>,
	/// Build or submission error, when one occurred.
	pub error: Option<String>,
	/// Which tracker deadline expired, when the transaction went stale.
	pub stale: Option<Stale>,
}

impl Response {
	/// Creates a response for a batch about to be built.
	pub fn for_batch(msg_ids: Vec<String>, initial_times: Vec<u64>) -> Self {
		Self {
			msg_ids,
			initial_times,
			..Default::default()
		}
	}

	/// The hash of the submitted transaction, when one exists.
	pub fn tx_hash(&self) -> Option<B256> {
		self.tx.as_ref().map(|tx| *tx.tx_hash())
	}

	/// Derives the status purely from the response attributes.
	pub fn status(&self) -> TxStatus {
		if self.error.is_some() {
			return TxStatus::Error;
		}
		match self.stale {
			Some(Stale::Mempool) => return TxStatus::StaleMempool,
			Some(Stale::Receipt) => return TxStatus::StaleReceipt,
			None => {}
		}
		match &self.receipt {
			Some(receipt) if receipt.success => TxStatus::Success,
			Some(_) => TxStatus::Reverted,
			None => TxStatus::Pending,
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn receipt(success: bool) -> Receipt {
		Receipt {
			tx_hash: B256::ZERO,
			block_number: 1,
			success,
			gas_used: 21_000,
		}
	}

	#[test]
	fn status_is_pending_without_outcome() {
		let resp = Response::for_batch(vec!["a".into()], vec![0]);
		assert_eq!(resp.status(), TxStatus::Pending);
	}

	#[test]
	fn status_follows_receipt() {
		let mut resp = Response::for_batch(vec!["a".into()], vec![0]);
		resp.receipt = Some(receipt(true));
		assert_eq!(resp.status(), TxStatus::Success);

		resp.receipt = Some(receipt(false));
		assert_eq!(resp.status(), TxStatus::Reverted);
	}

	#[test]
	fn status_error_wins_over_everything() {
		let mut resp = Response::for_batch(vec!["a".into()], vec![0]);
		resp.error = Some("signing failed".into());
		resp.receipt = Some(receipt(true));
		assert_eq!(resp.status(), TxStatus::Error);
	}

	#[test]
	fn status_reports_staleness() {
		let mut resp = Response::for_batch(vec!["a".into()], vec![0]);
		resp.stale = Some(Stale::Mempool);
		assert_eq!(resp.status(), TxStatus::StaleMempool);

		resp.stale = Some(Stale::Receipt);
		assert_eq!(resp.status(), TxStatus::StaleReceipt);
	}
}
