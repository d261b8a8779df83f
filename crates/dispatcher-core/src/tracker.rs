//! In-flight transaction tracking.
//!
//! One monitoring task per submitted transaction: wait for the node's pool
//! to admit it, then for a receipt, then classify the outcome. Whatever the
//! outcome, the nonce is released, the preconfirmed state is cleared exactly
//! once, and the response is fanned out to subscribers.
//!
//! A confirmed revert is an observed on-chain outcome, not a tracker error;
//! the tracker's own emissions are only the two staleness statuses.

use std::sync::Arc;
use std::time::Duration;

use alloy_primitives::B256;
use tokio::time::Instant;

use dispatcher_chain::ChainClient;
use dispatcher_types::{Receipt, Response, Stale};

use crate::dispatch::Dispatcher;
use crate::noncer::Noncer;
use crate::state::PreconfirmedStates;

/// Outcome of the mempool-admission phase.
enum Admission {
	/// The pool reports the transaction.
	InPool,
	/// The transaction was already mined while we were watching the pool.
	Mined(Receipt),
	/// The admission deadline passed.
	TimedOut,
}

/// Monitors submitted transactions until a terminal outcome.
pub struct Tracker {
	chain: Arc<dyn ChainClient>,
	noncer: Arc<Noncer>,
	dispatcher: Arc<Dispatcher>,
	states: Arc<PreconfirmedStates>,
	in_mempool_timeout: Duration,
	tx_receipt_timeout: Duration,
}

impl Tracker {
	pub fn new(
		chain: Arc<dyn ChainClient>,
		noncer: Arc<Noncer>,
		dispatcher: Arc<Dispatcher>,
		states: Arc<PreconfirmedStates>,
		in_mempool_timeout: Duration,
		tx_receipt_timeout: Duration,
	) -> Self {
		Self {
			chain,
			noncer,
			dispatcher,
			states,
			in_mempool_timeout,
			tx_receipt_timeout,
		}
	}

	/// Registers a submitted transaction for monitoring.
	///
	/// The response must carry the submitted transaction; build and send
	/// failures are dispatched by the engine without entering the tracker.
	pub fn track(self: &Arc<Self>, response: Response) {
		let tracker = Arc::clone(self);
		tokio::spawn(async move {
			tracker.monitor(response).await;
		});
	}

	async fn monitor(&self, mut response: Response) {
		let Some(hash) = response.tx_hash() else {
			self.finalize(response).await;
			return;
		};

		// Receipt deadline is measured from submission, which is now.
		let receipt_deadline = Instant::now() + self.tx_receipt_timeout;

		match self.await_mempool(hash).await {
			Admission::TimedOut => {
				response.stale = Some(Stale::Mempool);
				self.finalize(response).await;
				return;
			}
			Admission::Mined(receipt) => {
				response.receipt = Some(receipt);
				self.finalize(response).await;
				return;
			}
			Admission::InPool => {}
		}

		match self.await_receipt(hash, receipt_deadline).await {
			Some(receipt) => response.receipt = Some(receipt),
			None => response.stale = Some(Stale::Receipt),
		}
		self.finalize(response).await;
	}

	/// Waits for the pool to report the transaction, bounded by the
	/// admission timeout. A receipt showing up early counts as admission.
	async fn await_mempool(&self, hash: B256) -> Admission {
		let deadline = Instant::now() + self.in_mempool_timeout;
		let poll = (self.in_mempool_timeout / 10)
			.clamp(Duration::from_millis(25), Duration::from_secs(1));

		loop {
			match self.chain.transaction_receipt(hash).await {
				Ok(Some(receipt)) => return Admission::Mined(receipt),
				Ok(None) => {}
				Err(e) => tracing::debug!(error = %e, "receipt probe failed, retrying"),
			}

			match self.chain.tx_pool_content().await {
				Ok(pool) if pool.contains(&hash) => return Admission::InPool,
				Ok(_) => {}
				Err(e) => tracing::debug!(error = %e, "txpool probe failed, retrying"),
			}

			let now = Instant::now();
			if now >= deadline {
				return Admission::TimedOut;
			}
			tokio::time::sleep(poll.min(deadline - now)).await;
		}
	}

	/// Polls for the receipt until the submission-relative deadline.
	async fn await_receipt(&self, hash: B256, deadline: Instant) -> Option<Receipt> {
		let poll = (self.tx_receipt_timeout / 20)
			.clamp(Duration::from_millis(50), Duration::from_secs(3));

		loop {
			match self.chain.transaction_receipt(hash).await {
				Ok(Some(receipt)) => return Some(receipt),
				Ok(None) => {}
				Err(e) => tracing::debug!(error = %e, "receipt probe failed, retrying"),
			}

			let now = Instant::now();
			if now >= deadline {
				return None;
			}
			tokio::time::sleep(poll.min(deadline - now)).await;
		}
	}

	/// Terminal bookkeeping: clear preconfirmed state, release the nonce,
	/// notify subscribers.
	async fn finalize(&self, response: Response) {
		self.states.clear(&response.msg_ids).await;
		if let Some(tx) = &response.tx {
			use alloy_consensus::Transaction;
			self.noncer.remove_in_flight(tx.nonce()).await;
		}

		tracing::info!(
			status = ?response.status(),
			msgs = response.msg_ids.len(),
			tx_hash = ?response.tx_hash(),
			"transaction resolved"
		);
		self.dispatcher.dispatch(response).await;
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::testing::{dev_signer, make_envelope, MockChain};
	use dispatcher_signer::SignerInterface;
	use dispatcher_types::{InFlightTx, PreconfirmedState, TxStatus};

	async fn tracker_with(
		chain: &Arc<MockChain>,
		in_mempool_timeout: Duration,
		tx_receipt_timeout: Duration,
	) -> (Arc<Tracker>, Arc<Noncer>, Arc<Dispatcher>, Arc<PreconfirmedStates>) {
		let noncer = Arc::new(Noncer::new(
			chain.clone() as Arc<dyn ChainClient>,
			dev_signer().address(),
			Duration::from_millis(500),
		));
		let dispatcher = Arc::new(Dispatcher::new());
		let states = Arc::new(PreconfirmedStates::new());
		let tracker = Arc::new(Tracker::new(
			chain.clone() as Arc<dyn ChainClient>,
			noncer.clone(),
			dispatcher.clone(),
			states.clone(),
			in_mempool_timeout,
			tx_receipt_timeout,
		));
		(tracker, noncer, dispatcher, states)
	}

	async fn in_flight_response(
		noncer: &Arc<Noncer>,
		states: &Arc<PreconfirmedStates>,
		nonce: u64,
	) -> Response {
		let tx = make_envelope(nonce, 100, 200).await;
		let mut response = Response::for_batch(vec!["m1".to_string()], vec![0]);
		response.tx = Some(tx.clone());
		noncer
			.set_in_flight(InFlightTx {
				tx,
				msg_ids: response.msg_ids.clone(),
				initial_times: response.initial_times.clone(),
				sent_at: 0,
			})
			.await;
		states
			.mark(PreconfirmedState::InFlight, &response.msg_ids)
			.await;
		response
	}

	#[tokio::test]
	async fn success_receipt_resolves_and_releases() {
		let chain = Arc::new(MockChain::new());
		let (tracker, noncer, dispatcher, states) =
			tracker_with(&chain, Duration::from_secs(2), Duration::from_secs(2)).await;
		let mut rx = dispatcher.subscribe(4).await;

		let response = in_flight_response(&noncer, &states, 3).await;
		chain.insert_receipt(response.tx_hash().unwrap(), true);
		tracker.track(response);

		let resolved = tokio::time::timeout(Duration::from_secs(2), rx.recv())
			.await
			.unwrap()
			.unwrap();
		assert_eq!(resolved.status(), TxStatus::Success);
		assert_eq!(noncer.stats().await, (0, 0));
		assert_eq!(states.get("m1").await, PreconfirmedState::Unknown);
	}

	#[tokio::test]
	async fn reverted_receipt_is_not_an_error() {
		let chain = Arc::new(MockChain::new());
		let (tracker, noncer, dispatcher, states) =
			tracker_with(&chain, Duration::from_secs(2), Duration::from_secs(2)).await;
		let mut rx = dispatcher.subscribe(4).await;

		let response = in_flight_response(&noncer, &states, 3).await;
		chain.insert_receipt(response.tx_hash().unwrap(), false);
		tracker.track(response);

		let resolved = tokio::time::timeout(Duration::from_secs(2), rx.recv())
			.await
			.unwrap()
			.unwrap();
		assert_eq!(resolved.status(), TxStatus::Reverted);
		assert!(resolved.receipt.is_some());
		assert!(resolved.error.is_none());
		assert_eq!(noncer.stats().await, (0, 0));
	}

	#[tokio::test]
	async fn missing_from_mempool_goes_stale() {
		let chain = Arc::new(MockChain::new());
		let (tracker, noncer, dispatcher, states) =
			tracker_with(&chain, Duration::from_millis(200), Duration::from_secs(5)).await;
		let mut rx = dispatcher.subscribe(4).await;

		// The pool never reports the transaction and no receipt appears.
		let response = in_flight_response(&noncer, &states, 3).await;
		tracker.track(response);

		let resolved = tokio::time::timeout(Duration::from_secs(2), rx.recv())
			.await
			.unwrap()
			.unwrap();
		assert_eq!(resolved.status(), TxStatus::StaleMempool);
		assert_eq!(noncer.stats().await, (0, 0));
		assert_eq!(states.get("m1").await, PreconfirmedState::Unknown);
	}

	#[tokio::test]
	async fn pooled_but_never_mined_goes_receipt_stale() {
		let chain = Arc::new(MockChain::new());
		let (tracker, noncer, dispatcher, states) =
			tracker_with(&chain, Duration::from_secs(5), Duration::from_millis(300)).await;
		let mut rx = dispatcher.subscribe(4).await;

		let response = in_flight_response(&noncer, &states, 3).await;
		chain.insert_pool_hash(response.tx_hash().unwrap());
		tracker.track(response);

		let resolved = tokio::time::timeout(Duration::from_secs(2), rx.recv())
			.await
			.unwrap()
			.unwrap();
		assert_eq!(resolved.status(), TxStatus::StaleReceipt);
		assert_eq!(noncer.stats().await, (0, 0));
	}
}
