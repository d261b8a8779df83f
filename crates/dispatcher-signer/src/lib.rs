//! Signing identity module for the transaction dispatcher.
//!
//! The dispatcher operates on behalf of exactly one signing identity. This
//! module defines the interface for retrieving that identity's address and
//! signing the EIP-1559 transactions the factory builds.

use alloy_consensus::{TxEip1559, TxEnvelope};
use alloy_primitives::Address;
use async_trait::async_trait;
use thiserror::Error;

/// Re-export implementations
pub mod implementations {
	pub mod local;
}

/// Errors that can occur during signing operations.
#[derive(Debug, Error)]
pub enum SignerError {
	/// The configured key material is invalid or malformed.
	#[error("invalid key: {0}")]
	InvalidKey(String),
	/// The signing operation itself failed.
	#[error("signing failed: {0}")]
	SigningFailed(String),
}

/// Interface to the dispatcher's signing identity.
///
/// Replacement transactions are re-signed through the same interface, so
/// implementations must tolerate signing the same nonce more than once.
#[async_trait]
pub trait SignerInterface: Send + Sync {
	/// The address transactions are sent from.
	fn address(&self) -> Address;

	/// Signs an unsigned EIP-1559 transaction and returns the envelope.
	async fn sign_transaction(&self, tx: TxEip1559) -> Result<TxEnvelope, SignerError>;
}
