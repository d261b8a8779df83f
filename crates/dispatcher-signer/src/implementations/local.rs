//! Local private-key signer implementation.
//!
//! Signs transactions in-process with a private key loaded from
//! configuration. Suitable for development and for deployments where the key
//! lives on the host; remote KMS-style signers plug in behind the same
//! interface.

use alloy_consensus::{SignableTransaction, TxEip1559, TxEnvelope};
use alloy_network::TxSigner;
use alloy_primitives::Address;
use alloy_signer::Signer;
use alloy_signer_local::PrivateKeySigner;
use async_trait::async_trait;

use crate::{SignerError, SignerInterface};

/// Signer backed by an in-process private key.
pub struct LocalSigner {
	signer: PrivateKeySigner,
	address: Address,
}

impl LocalSigner {
	/// Creates a signer from a hex-encoded private key.
	///
	/// The chain id is fixed at construction so every produced signature
	/// carries EIP-155 replay protection for that chain.
	pub fn from_hex(private_key: &str, chain_id: u64) -> Result<Self, SignerError> {
		let signer: PrivateKeySigner = private_key
			.parse()
			.map_err(|e| SignerError::InvalidKey(format!("{}", e)))?;
		let signer = signer.with_chain_id(Some(chain_id));
		let address = signer.address();

		Ok(Self { signer, address })
	}
}

#[async_trait]
impl SignerInterface for LocalSigner {
	fn address(&self) -> Address {
		self.address
	}

	async fn sign_transaction(&self, mut tx: TxEip1559) -> Result<TxEnvelope, SignerError> {
		let signature = TxSigner::sign_transaction(&self.signer, &mut tx)
			.await
			.map_err(|e| SignerError::SigningFailed(e.to_string()))?;

		Ok(TxEnvelope::Eip1559(tx.into_signed(signature)))
	}
}
