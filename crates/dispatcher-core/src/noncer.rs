//! Nonce allocation and in-flight bookkeeping.
//!
//! The noncer is the only shared mutable store in the dispatcher. It hands
//! out sequence numbers for transactions being built, remembers which ones
//! are in flight, and periodically re-reads the confirmed account nonce to
//! reclaim slots the chain has moved past.
//!
//! Gap filling is mandatory: when an earlier submission was rejected before
//! reaching the mempool its nonce becomes a hole the chain refuses to skip,
//! so new work must plug the hole before advancing.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

use alloy_primitives::Address;
use tokio::sync::{watch, Mutex};

use dispatcher_chain::{ChainClient, ChainError};
use dispatcher_types::InFlightTx;

/// How often the confirmed account nonce is re-read. Roughly once per block.
const REFRESH_INTERVAL: Duration = Duration::from_secs(5);

/// Nonce state guarded by the noncer lock.
#[derive(Default)]
struct NoncerState {
	/// Nonces handed out for building but not yet submitted.
	acquired: BTreeSet<u64>,
	/// Submitted but unconfirmed transactions, keyed by nonce.
	in_flight: BTreeMap<u64, InFlightTx>,
	/// The chain's confirmed account nonce: the first sequence number the
	/// chain has not yet included. Everything below it is final.
	next_confirmed_nonce: u64,
}

/// Allocates and tracks transaction sequence numbers for one signer.
pub struct Noncer {
	chain: Arc<dyn ChainClient>,
	sender: Address,
	/// Bounds how long the lock is held while querying the pending nonce.
	pending_nonce_timeout: Duration,
	inner: Mutex<NoncerState>,
}

impl Noncer {
	pub fn new(
		chain: Arc<dyn ChainClient>,
		sender: Address,
		pending_nonce_timeout: Duration,
	) -> Self {
		Self {
			chain,
			sender,
			pending_nonce_timeout,
			inner: Mutex::new(NoncerState::default()),
		}
	}

	/// Returns the next nonce to build with and records it as acquired.
	///
	/// With nothing in flight the chain's pending nonce is authoritative:
	/// it reflects whatever the mempool already holds, which is how the
	/// dispatcher recovers its position after a restart. The RPC is held
	/// under the lock, bounded by `pending_nonce_timeout`.
	pub async fn acquire(&self) -> Result<u64, ChainError> {
		let mut state = self.inner.lock().await;
		let nonce = self.next_nonce_locked(&state).await?;
		state.acquired.insert(nonce);
		Ok(nonce)
	}

	/// Computes a replacement nonce after a "nonce too low" rejection.
	///
	/// Returns the fresh nonce and whether gas must be bumped: true iff the
	/// replacement lands on the same slot as `current`, meaning the new
	/// transaction has to out-bid the one already pooled there.
	pub async fn get_next_nonce(&self, current: u64) -> Result<(u64, bool), ChainError> {
		let mut state = self.inner.lock().await;
		let nonce = self.next_nonce_locked(&state).await?;
		state.acquired.insert(nonce);
		Ok((nonce, nonce == current))
	}

	async fn next_nonce_locked(&self, state: &NoncerState) -> Result<u64, ChainError> {
		let Some(max) = state.in_flight.keys().next_back().copied() else {
			let pending = tokio::time::timeout(
				self.pending_nonce_timeout,
				self.chain.pending_nonce_at(self.sender),
			)
			.await
			.map_err(|_| ChainError::Rpc("timed out querying pending nonce".into()))??;
			return Ok(pending);
		};

		// Plug the first hole between the confirmed nonce and the highest
		// in-flight nonce before advancing past the end.
		for nonce in state.next_confirmed_nonce..=max {
			if !state.in_flight.contains_key(&nonce) {
				return Ok(nonce);
			}
		}
		Ok((max + 1).max(state.next_confirmed_nonce))
	}

	/// Records a submitted transaction, moving its nonce from acquired to
	/// in flight.
	pub async fn set_in_flight(&self, tx: InFlightTx) {
		let mut state = self.inner.lock().await;
		let nonce = tx.nonce();
		state.acquired.remove(&nonce);
		state.in_flight.insert(nonce, tx);
	}

	/// Releases an in-flight nonce once its transaction reached a terminal
	/// outcome. Safe to call for nonces already reclaimed by the refresh.
	pub async fn remove_in_flight(&self, nonce: u64) {
		let mut state = self.inner.lock().await;
		state.in_flight.remove(&nonce);
	}

	/// Frees an acquired nonce whose transaction never got submitted, or
	/// whose slot was abandoned by a replacement.
	pub async fn release_acquired(&self, nonce: u64) {
		let mut state = self.inner.lock().await;
		state.acquired.remove(&nonce);
	}

	/// Returns `(acquired, in_flight)` counts.
	pub async fn stats(&self) -> (usize, usize) {
		let state = self.inner.lock().await;
		(state.acquired.len(), state.in_flight.len())
	}

	/// Re-reads the confirmed account nonce and reclaims in-flight entries
	/// the chain has moved past.
	pub async fn refresh(&self) -> Result<(), ChainError> {
		let confirmed = self.chain.nonce_at(self.sender).await?;
		let mut state = self.inner.lock().await;
		state.next_confirmed_nonce = confirmed;
		state.in_flight.retain(|nonce, _| *nonce >= confirmed);
		Ok(())
	}

	/// Background refresh driven by a fixed interval, until shutdown.
	pub async fn refresh_loop(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
		let mut interval = tokio::time::interval(REFRESH_INTERVAL);
		interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
		loop {
			tokio::select! {
				_ = interval.tick() => {
					if let Err(e) = self.refresh().await {
						tracing::warn!(error = %e, "failed to refresh confirmed nonce");
					}
				}
				_ = shutdown.changed() => {
					if *shutdown.borrow() {
						return;
					}
				}
			}
		}
	}
}
