//! Transaction submission with a replacement policy.
//!
//! Submission failures the chain can recover from are handled in place: a
//! "nonce too low" rejection swaps in a fresh nonce, and an underpriced
//! replacement (or a re-bid of the same slot) raises both fee caps before
//! re-signing and re-submitting. Anything else is fatal and surfaces as the
//! batch's error.

use std::sync::Arc;

use alloy_consensus::{Transaction, TxEip1559, TxEnvelope};
use thiserror::Error;

use dispatcher_chain::{ChainClient, ChainError};
use dispatcher_signer::{SignerError, SignerInterface};

use crate::noncer::Noncer;

/// Replacement attempts before a retryable error becomes fatal.
const MAX_REPLACEMENTS: usize = 3;

/// Fee bump applied to replacements: the chain requires 10%, the extra 5%
/// is buffer.
const GAS_BUMP_PERCENT: u128 = 115;

/// Errors that can occur while submitting a transaction.
#[derive(Debug, Error)]
pub enum SendError {
	/// The chain rejected the transaction for a reason the replacement
	/// policy does not handle, or retries ran out.
	#[error(transparent)]
	Chain(#[from] ChainError),
	/// Re-signing a replacement failed.
	#[error(transparent)]
	Signer(#[from] SignerError),
	/// The transaction is not a dynamic-fee transaction.
	#[error("only EIP-1559 transactions can be replaced")]
	UnsupportedTxType,
}

/// Submits signed transactions, producing replacements as needed.
pub struct Sender {
	chain: Arc<dyn ChainClient>,
	signer: Arc<dyn SignerInterface>,
	noncer: Arc<Noncer>,
}

impl Sender {
	pub fn new(
		chain: Arc<dyn ChainClient>,
		signer: Arc<dyn SignerInterface>,
		noncer: Arc<Noncer>,
	) -> Self {
		Self {
			chain,
			signer,
			noncer,
		}
	}

	/// Submits the transaction, replacing it on recoverable rejections.
	///
	/// Returns the transaction that was actually accepted by the node; the
	/// caller records it in flight under the submitted nonce. On a fatal
	/// error the acquired nonce is released.
	pub async fn send_transaction(&self, tx: TxEnvelope) -> Result<TxEnvelope, SendError> {
		let mut tx = tx;
		let mut attempts = 0;

		loop {
			match self.chain.send_transaction(&tx).await {
				Ok(hash) => {
					tracing::debug!(tx_hash = %hash, nonce = tx.nonce(), "transaction accepted");
					return Ok(tx);
				}
				Err(err)
					if attempts < MAX_REPLACEMENTS
						&& (err.is_nonce_too_low() || err.is_replace_underpriced()) =>
				{
					attempts += 1;
					tracing::warn!(
						nonce = tx.nonce(),
						attempt = attempts,
						error = %err,
						"submission rejected, producing replacement"
					);
					tx = self.replacement(tx, &err).await?;
				}
				Err(err) => {
					self.noncer.release_acquired(tx.nonce()).await;
					return Err(err.into());
				}
			}
		}
	}

	/// Produces a signed replacement for a rejected transaction.
	async fn replacement(&self, tx: TxEnvelope, err: &ChainError) -> Result<TxEnvelope, SendError> {
		let mut unsigned = eip1559_parts(&tx)?;
		let mut bump = err.is_replace_underpriced();

		if err.is_nonce_too_low() {
			let (next, same_slot) = self.noncer.get_next_nonce(unsigned.nonce).await?;
			if next != unsigned.nonce {
				// The old slot was abandoned, free it.
				self.noncer.release_acquired(unsigned.nonce).await;
			}
			bump = bump || same_slot;
			unsigned.nonce = next;
		}

		if bump {
			bump_gas(&mut unsigned);
		}

		Ok(self.signer.sign_transaction(unsigned).await?)
	}
}

fn eip1559_parts(tx: &TxEnvelope) -> Result<TxEip1559, SendError> {
	match tx {
		TxEnvelope::Eip1559(signed) => Ok(signed.tx().clone()),
		_ => Err(SendError::UnsupportedTxType),
	}
}

/// Raises both fee caps by 15%, rounding up. Every other field is kept.
fn bump_gas(tx: &mut TxEip1559) {
	tx.max_priority_fee_per_gas = bumped(tx.max_priority_fee_per_gas);
	tx.max_fee_per_gas = bumped(tx.max_fee_per_gas);
}

fn bumped(value: u128) -> u128 {
	value.saturating_mul(GAS_BUMP_PERCENT).div_ceil(100)
}
