//! Configuration module for the transaction dispatcher.
//!
//! Loads the dispatcher configuration from a TOML file into typed sections
//! and validates it before any component is constructed. Every tunable of
//! the dispatch pipeline (batching, timeouts, the multicall contract, queue
//! selection) lives here.

use std::path::Path;
use std::time::Duration;

use alloy_primitives::Address;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that can occur during configuration operations.
#[derive(Debug, Error)]
pub enum ConfigError {
	/// Error that occurs during file I/O operations.
	#[error("io error: {0}")]
	Io(#[from] std::io::Error),
	/// Error that occurs when parsing TOML configuration.
	#[error("parse error: {0}")]
	Parse(String),
	/// Error that occurs when configuration validation fails.
	#[error("validation error: {0}")]
	Validation(String),
}

impl From<toml::de::Error> for ConfigError {
	fn from(err: toml::de::Error) -> Self {
		// Keep the message, drop the input dump.
		ConfigError::Parse(err.message().to_string())
	}
}

/// Main configuration structure for the dispatcher service.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
	/// Pipeline tuning: batching, timeouts, multicall contract.
	pub dispatcher: DispatcherConfig,
	/// Chain endpoint configuration.
	pub chain: ChainConfig,
	/// Signing identity configuration.
	pub signer: SignerConfig,
	/// Ingress queue selection.
	#[serde(default)]
	pub queue: QueueConfig,
	/// Optional HTTP admin API.
	pub api: Option<ApiConfig>,
}

/// Tuning knobs of the dispatch pipeline.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DispatcherConfig {
	/// Max time the noncer holds its lock while querying the pending nonce.
	#[serde(default = "default_pending_nonce_timeout_ms")]
	pub pending_nonce_timeout_ms: u64,
	/// Max wait for mempool admission before a transaction is declared stale.
	#[serde(default = "default_in_mempool_timeout_ms")]
	pub in_mempool_timeout_ms: u64,
	/// Max wait for a receipt, measured from submission.
	#[serde(default = "default_tx_receipt_timeout_ms")]
	pub tx_receipt_timeout_ms: u64,
	/// Max requests folded into one chain transaction.
	#[serde(default = "default_tx_batch_size")]
	pub tx_batch_size: usize,
	/// Max wait to accumulate a batch.
	#[serde(default = "default_tx_batch_timeout_ms")]
	pub tx_batch_timeout_ms: u64,
	/// Always wait the full batch window, even when the batch fills early.
	#[serde(default)]
	pub wait_full_batch_timeout: bool,
	/// Sleep when the queue is drained.
	#[serde(default = "default_empty_queue_delay_ms")]
	pub empty_queue_delay_ms: u64,
	/// Period of the status log line.
	#[serde(default = "default_status_update_interval_ms")]
	pub status_update_interval_ms: u64,
	/// Address of the multicall batching contract.
	#[serde(default = "default_multicall3_address")]
	pub multicall3_address: String,
	/// Overwrite client message ids with queue-assigned ids.
	#[serde(default)]
	pub use_queue_message_id: bool,
}

fn default_pending_nonce_timeout_ms() -> u64 {
	2_000
}

fn default_in_mempool_timeout_ms() -> u64 {
	30_000
}

fn default_tx_receipt_timeout_ms() -> u64 {
	120_000
}

fn default_tx_batch_size() -> usize {
	10
}

fn default_tx_batch_timeout_ms() -> u64 {
	500
}

fn default_empty_queue_delay_ms() -> u64 {
	1_000
}

fn default_status_update_interval_ms() -> u64 {
	10_000
}

/// The canonical Multicall3 deployment address.
fn default_multicall3_address() -> String {
	"0xcA11bde05977b3631167028862bE2a173976CA11".to_string()
}

impl Default for DispatcherConfig {
	fn default() -> Self {
		Self {
			pending_nonce_timeout_ms: default_pending_nonce_timeout_ms(),
			in_mempool_timeout_ms: default_in_mempool_timeout_ms(),
			tx_receipt_timeout_ms: default_tx_receipt_timeout_ms(),
			tx_batch_size: default_tx_batch_size(),
			tx_batch_timeout_ms: default_tx_batch_timeout_ms(),
			wait_full_batch_timeout: false,
			empty_queue_delay_ms: default_empty_queue_delay_ms(),
			status_update_interval_ms: default_status_update_interval_ms(),
			multicall3_address: default_multicall3_address(),
			use_queue_message_id: false,
		}
	}
}

impl DispatcherConfig {
	pub fn pending_nonce_timeout(&self) -> Duration {
		Duration::from_millis(self.pending_nonce_timeout_ms)
	}

	pub fn in_mempool_timeout(&self) -> Duration {
		Duration::from_millis(self.in_mempool_timeout_ms)
	}

	pub fn tx_receipt_timeout(&self) -> Duration {
		Duration::from_millis(self.tx_receipt_timeout_ms)
	}

	pub fn tx_batch_timeout(&self) -> Duration {
		Duration::from_millis(self.tx_batch_timeout_ms)
	}

	pub fn empty_queue_delay(&self) -> Duration {
		Duration::from_millis(self.empty_queue_delay_ms)
	}

	pub fn status_update_interval(&self) -> Duration {
		Duration::from_millis(self.status_update_interval_ms)
	}

	/// The parsed multicall contract address.
	///
	/// Only valid after [`Config::validate`] has passed.
	pub fn multicall3_address(&self) -> Address {
		self.multicall3_address.parse().unwrap_or(Address::ZERO)
	}
}

/// Chain endpoint configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ChainConfig {
	/// HTTP RPC endpoint URL.
	pub rpc_url: String,
	/// Chain id transactions are signed for.
	pub chain_id: u64,
}

/// Signing identity configuration.
#[derive(Clone, Deserialize, Serialize)]
pub struct SignerConfig {
	/// Hex-encoded 32-byte private key.
	pub private_key: String,
}

// Keep the key out of debug logs.
impl std::fmt::Debug for SignerConfig {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("SignerConfig")
			.field("private_key", &"<redacted>")
			.finish()
	}
}

/// Ingress queue selection.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct QueueConfig {
	/// Queue backend: "memory" or "file" (durable).
	#[serde(default = "default_queue_backend")]
	pub backend: String,
	/// Directory for the file backend.
	pub path: Option<String>,
}

fn default_queue_backend() -> String {
	"memory".to_string()
}

impl Default for QueueConfig {
	fn default() -> Self {
		Self {
			backend: default_queue_backend(),
			path: None,
		}
	}
}

/// HTTP admin API configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ApiConfig {
	/// Whether the API server is enabled.
	#[serde(default)]
	pub enabled: bool,
	/// Host address to bind the server to.
	#[serde(default = "default_api_host")]
	pub host: String,
	/// Port to bind the server to.
	#[serde(default = "default_api_port")]
	pub port: u16,
}

fn default_api_host() -> String {
	"127.0.0.1".to_string()
}

fn default_api_port() -> u16 {
	8080
}

impl Config {
	/// Loads and validates configuration from a TOML file.
	pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
		let contents = std::fs::read_to_string(path)?;
		Self::from_toml_str(&contents)
	}

	/// Parses and validates configuration from a TOML string.
	pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
		let config: Config = toml::from_str(contents)?;
		config.validate()?;
		Ok(config)
	}

	/// Validates the configuration.
	pub fn validate(&self) -> Result<(), ConfigError> {
		if self.dispatcher.tx_batch_size == 0 {
			return Err(ConfigError::Validation(
				"dispatcher.tx_batch_size must be at least 1".into(),
			));
		}

		if self
			.dispatcher
			.multicall3_address
			.parse::<Address>()
			.is_err()
		{
			return Err(ConfigError::Validation(format!(
				"dispatcher.multicall3_address is not a valid address: {}",
				self.dispatcher.multicall3_address
			)));
		}

		if !self.chain.rpc_url.starts_with("http://") && !self.chain.rpc_url.starts_with("https://")
		{
			return Err(ConfigError::Validation(
				"chain.rpc_url must start with http:// or https://".into(),
			));
		}

		if self.chain.chain_id == 0 {
			return Err(ConfigError::Validation(
				"chain.chain_id must be non-zero".into(),
			));
		}

		let key = self
			.signer
			.private_key
			.strip_prefix("0x")
			.unwrap_or(&self.signer.private_key);
		if key.len() != 64 || hex::decode(key).is_err() {
			return Err(ConfigError::Validation(
				"signer.private_key must be 64 hex characters (32 bytes)".into(),
			));
		}

		match self.queue.backend.as_str() {
			"memory" => {}
			"file" => {
				if self.queue.path.as_deref().unwrap_or("").is_empty() {
					return Err(ConfigError::Validation(
						"queue.path is required for the file backend".into(),
					));
				}
			}
			other => {
				return Err(ConfigError::Validation(format!(
					"unknown queue backend: {}",
					other
				)));
			}
		}

		Ok(())
	}
}
