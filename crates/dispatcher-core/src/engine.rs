//! Dispatch engine.
//!
//! Owns the whole pipeline: pulls request batches off the ingress queue,
//! has the factory fold each batch into one signed transaction, submits it
//! through the sender and hands the in-flight transaction to the tracker.
//! At most one batch is being built and sent at any moment per signer; the
//! noncer only learns about a submitted transaction when it is recorded in
//! flight, so overlapping builds would race to duplicate nonces.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{mpsc, watch, Semaphore};
use tokio::time::Instant;

use dispatcher_chain::ChainClient;
use dispatcher_config::Config;
use dispatcher_queue::{QueueError, QueueInterface};
use dispatcher_signer::SignerInterface;
use dispatcher_types::{
	fresh_msg_id, now_millis, InFlightTx, PreconfirmedState, Request, Requests, Response,
	StatsResponse, ValidationError,
};

use crate::dispatch::{Dispatcher, DEFAULT_SUBSCRIBER_BUFFER};
use crate::factory::{Factory, Multicall3Batcher};
use crate::noncer::Noncer;
use crate::sender::Sender;
use crate::state::PreconfirmedStates;
use crate::tracker::Tracker;

/// Pause between polls of an empty queue while a batch window is open.
const RECEIVE_POLL: Duration = Duration::from_millis(10);

/// Errors returned by the engine's ingress surface.
#[derive(Debug, Error)]
pub enum EngineError {
	/// The request failed validation and was never queued.
	#[error(transparent)]
	Validation(#[from] ValidationError),
	/// The ingress queue rejected the request.
	#[error(transparent)]
	Queue(#[from] QueueError),
}

/// The transaction dispatch engine.
pub struct Engine {
	config: Config,
	queue: Arc<dyn QueueInterface<Request>>,
	noncer: Arc<Noncer>,
	factory: Factory,
	sender: Sender,
	tracker: Arc<Tracker>,
	dispatcher: Arc<Dispatcher>,
	states: Arc<PreconfirmedStates>,
	/// One permit: at most one outstanding build-and-send per signer.
	send_permit: Arc<Semaphore>,
}

impl Engine {
	/// Wires up the pipeline around the given collaborators.
	pub fn new(
		config: Config,
		chain: Arc<dyn ChainClient>,
		signer: Arc<dyn SignerInterface>,
		queue: Arc<dyn QueueInterface<Request>>,
	) -> Self {
		let noncer = Arc::new(Noncer::new(
			chain.clone(),
			signer.address(),
			config.dispatcher.pending_nonce_timeout(),
		));
		let dispatcher = Arc::new(Dispatcher::new());
		let states = Arc::new(PreconfirmedStates::new());
		let tracker = Arc::new(Tracker::new(
			chain.clone(),
			noncer.clone(),
			dispatcher.clone(),
			states.clone(),
			config.dispatcher.in_mempool_timeout(),
			config.dispatcher.tx_receipt_timeout(),
		));
		let factory = Factory::new(
			chain.clone(),
			signer.clone(),
			noncer.clone(),
			Multicall3Batcher::new(config.dispatcher.multicall3_address()),
			config.chain.chain_id,
		);
		let sender = Sender::new(chain, signer, noncer.clone());

		Self {
			config,
			queue,
			noncer,
			factory,
			sender,
			tracker,
			dispatcher,
			states,
			send_permit: Arc::new(Semaphore::new(1)),
		}
	}

	/// Validates and enqueues a request, returning its message id.
	pub async fn send_tx_request(&self, mut request: Request) -> Result<String, EngineError> {
		request.validate()?;
		if request.msg_id.is_empty() {
			request.msg_id = fresh_msg_id();
		}

		let msg_id = request.msg_id.clone();
		let queue_id = self.queue.push(request).await?;
		let msg_id = if self.config.dispatcher.use_queue_message_id {
			queue_id
		} else {
			msg_id
		};

		self.states
			.mark(PreconfirmedState::Queued, &[msg_id.clone()])
			.await;
		Ok(msg_id)
	}

	/// Returns the message's status before chain confirmation.
	pub async fn preconfirmed_state(&self, msg_id: &str) -> PreconfirmedState {
		self.states.get(msg_id).await
	}

	/// Attaches a new consumer of terminal responses.
	pub async fn subscribe(&self) -> mpsc::Receiver<Response> {
		self.dispatcher.subscribe(DEFAULT_SUBSCRIBER_BUFFER).await
	}

	/// Current pipeline counters.
	pub async fn stats(&self) -> StatsResponse {
		let (acquired, in_flight) = self.noncer.stats().await;
		let queued = self.queue.len().await.unwrap_or(0);
		StatsResponse {
			acquired,
			in_flight,
			queued,
		}
	}

	/// Runs the dispatch loop until shutdown is signalled.
	///
	/// Also owns the background noncer refresh and the periodic status log;
	/// both observe the same shutdown flag.
	pub async fn run(self: Arc<Self>, shutdown: watch::Receiver<bool>) {
		let refresh = tokio::spawn(self.noncer.clone().refresh_loop(shutdown.clone()));
		let status = tokio::spawn(Arc::clone(&self).status_loop(shutdown.clone()));

		let mut shutdown_rx = shutdown;
		loop {
			if *shutdown_rx.borrow() {
				break;
			}

			let batch = self.retrieve_batch(&mut shutdown_rx).await;
			if batch.is_empty() {
				if *shutdown_rx.borrow() {
					break;
				}
				tokio::select! {
					_ = tokio::time::sleep(self.config.dispatcher.empty_queue_delay()) => {}
					_ = shutdown_rx.changed() => {}
				}
				continue;
			}

			let permit = match Arc::clone(&self.send_permit).acquire_owned().await {
				Ok(permit) => permit,
				Err(_) => break,
			};
			let engine = Arc::clone(&self);
			tokio::spawn(async move {
				engine.fire(batch).await;
				drop(permit);
			});
		}

		let _ = tokio::join!(refresh, status);
	}

	/// Periodic status line: nonce counters plus queue backlog.
	async fn status_loop(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
		let mut interval = tokio::time::interval(self.config.dispatcher.status_update_interval());
		interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
		loop {
			tokio::select! {
				_ = interval.tick() => {
					let stats = self.stats().await;
					tracing::info!(
						acquired = stats.acquired,
						in_flight = stats.in_flight,
						queued = stats.queued,
						"dispatcher status"
					);
				}
				changed = shutdown.changed() => {
					if changed.is_err() || *shutdown.borrow() {
						return;
					}
				}
			}
		}
	}

	/// Accumulates a batch from the queue.
	///
	/// Returns when the batch window closes, or earlier once the batch is
	/// full and `wait_full_batch_timeout` is off. Empty polls wait a short
	/// interval bounded by the window deadline instead of spinning.
	async fn retrieve_batch(&self, shutdown: &mut watch::Receiver<bool>) -> Requests {
		let deadline = Instant::now() + self.config.dispatcher.tx_batch_timeout();
		let mut requests: Vec<Request> = Vec::new();

		loop {
			if *shutdown.borrow() {
				return Requests::default();
			}

			let remaining = self.config.dispatcher.tx_batch_size - requests.len();
			if remaining == 0 {
				if self.config.dispatcher.wait_full_batch_timeout {
					// Smooth the submission cadence over the full window.
					tokio::select! {
						_ = tokio::time::sleep_until(deadline) => {}
						_ = shutdown.changed() => return Requests::default(),
					}
				}
				return requests.into();
			}

			match self.queue.receive_many(remaining).await {
				Ok(received) if !received.is_empty() => {
					for (queue_id, mut request) in received {
						if self.config.dispatcher.use_queue_message_id {
							request.msg_id = queue_id;
						} else if request.msg_id.is_empty() {
							request.msg_id = fresh_msg_id();
						}
						requests.push(request);
					}
					continue;
				}
				Ok(_) => {}
				Err(e) => {
					tracing::error!(error = %e, "failed to receive tx requests");
				}
			}

			let now = Instant::now();
			if now >= deadline {
				return requests.into();
			}
			let nap = RECEIVE_POLL.min(deadline - now);
			tokio::select! {
				_ = tokio::time::sleep(nap) => {}
				changed = shutdown.changed() => {
					if changed.is_err() || *shutdown.borrow() {
						return Requests::default();
					}
				}
			}
		}
	}

	/// Builds, sends and registers one batch.
	async fn fire(&self, batch: Requests) {
		let mut response = Response::for_batch(batch.msg_ids(), batch.initial_times());

		self.states
			.mark(PreconfirmedState::Building, &response.msg_ids)
			.await;
		let tx = match self.factory.build_transaction_from_requests(&batch).await {
			Ok(tx) => tx,
			Err(e) => {
				response.error = Some(e.to_string());
				self.fail(response).await;
				return;
			}
		};
		response.tx = Some(tx.clone());

		self.states
			.mark(PreconfirmedState::Sending, &response.msg_ids)
			.await;
		let submitted = match self.sender.send_transaction(tx).await {
			Ok(tx) => tx,
			Err(e) => {
				response.error = Some(e.to_string());
				self.fail(response).await;
				return;
			}
		};

		// Record in flight under the submitted nonce before anything can
		// resolve it; only then is the batch observable as InFlight.
		response.tx = Some(submitted.clone());
		self.noncer
			.set_in_flight(InFlightTx {
				tx: submitted,
				msg_ids: response.msg_ids.clone(),
				initial_times: response.initial_times.clone(),
				sent_at: now_millis(),
			})
			.await;
		self.states
			.mark(PreconfirmedState::InFlight, &response.msg_ids)
			.await;

		tracing::debug!(
			tx_hash = ?response.tx_hash(),
			msgs = response.msg_ids.len(),
			"sent transaction"
		);
		self.tracker.track(response);
	}

	/// Terminal handling for batches that never reached the chain.
	async fn fail(&self, response: Response) {
		tracing::warn!(
			error = response.error.as_deref().unwrap_or(""),
			msgs = response.msg_ids.len(),
			"failed to dispatch batch"
		);
		self.states.clear(&response.msg_ids).await;
		self.dispatcher.dispatch(response).await;
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::factory::aggregate3ValueCall;
	use crate::testing::{dev_signer, MockChain, DEV_KEY};
	use alloy_consensus::Transaction;
	use alloy_primitives::{Address, Bytes, U256};
	use alloy_sol_types::SolCall;
	use dispatcher_config::{ChainConfig, DispatcherConfig, QueueConfig, SignerConfig};
	use dispatcher_queue::implementations::memory::MemoryQueue;
	use dispatcher_types::TxStatus;

	fn test_config(tune: impl FnOnce(&mut DispatcherConfig)) -> Config {
		let mut dispatcher = DispatcherConfig {
			tx_batch_timeout_ms: 100,
			empty_queue_delay_ms: 20,
			in_mempool_timeout_ms: 1_000,
			tx_receipt_timeout_ms: 2_000,
			..Default::default()
		};
		tune(&mut dispatcher);
		Config {
			dispatcher,
			chain: ChainConfig {
				rpc_url: "http://localhost:8545".into(),
				chain_id: 1,
			},
			signer: SignerConfig {
				private_key: DEV_KEY.into(),
			},
			queue: QueueConfig::default(),
			api: None,
		}
	}

	fn build_engine(chain: &Arc<MockChain>, config: Config) -> Arc<Engine> {
		Arc::new(Engine::new(
			config,
			chain.clone() as Arc<dyn ChainClient>,
			dev_signer(),
			Arc::new(MemoryQueue::<Request>::new()),
		))
	}

	fn request(id: &str) -> Request {
		Request::new(
			id,
			Address::repeat_byte(0x11),
			Bytes::from(vec![0xab]),
			U256::from(1u64),
		)
		.with_gas(Some(100), Some(200), Some(21_000))
	}

	async fn recv(
		rx: &mut mpsc::Receiver<Response>,
	) -> Response {
		tokio::time::timeout(Duration::from_secs(3), rx.recv())
			.await
			.expect("timed out waiting for response")
			.expect("dispatcher closed")
	}

	#[tokio::test]
	async fn single_request_happy_path() {
		let chain = Arc::new(MockChain::new());
		chain.set_auto_pool(true);
		let engine = build_engine(&chain, test_config(|d| d.tx_batch_size = 1));
		let mut rx = engine.subscribe().await;

		let msg_id = engine.send_tx_request(request("r1")).await.unwrap();
		assert_eq!(
			engine.preconfirmed_state(&msg_id).await,
			PreconfirmedState::Queued
		);

		let (shutdown_tx, shutdown_rx) = watch::channel(false);
		tokio::spawn(Arc::clone(&engine).run(shutdown_rx));

		// Wait for the transaction to be submitted and recorded in flight,
		// then let it confirm.
		let deadline = Instant::now() + Duration::from_secs(2);
		while engine.preconfirmed_state(&msg_id).await != PreconfirmedState::InFlight {
			assert!(Instant::now() < deadline, "never reached InFlight");
			tokio::time::sleep(Duration::from_millis(10)).await;
		}
		let sent = chain.sent();
		assert_eq!(sent.len(), 1);
		chain.insert_receipt(*sent[0].tx_hash(), true);

		let resolved = recv(&mut rx).await;
		assert_eq!(resolved.status(), TxStatus::Success);
		assert_eq!(resolved.msg_ids, vec![msg_id.clone()]);
		assert!(resolved.receipt.as_ref().unwrap().success);

		assert_eq!(
			engine.preconfirmed_state(&msg_id).await,
			PreconfirmedState::Unknown
		);
		let stats = engine.stats().await;
		assert_eq!((stats.acquired, stats.in_flight), (0, 0));

		shutdown_tx.send(true).unwrap();
	}

	#[tokio::test]
	async fn batch_goes_out_as_one_multicall() {
		let chain = Arc::new(MockChain::new());
		chain.set_auto_pool(true);
		chain.set_auto_receipt(true);
		let config = test_config(|d| d.tx_batch_size = 3);
		let multicall = config.dispatcher.multicall3_address();
		let engine = build_engine(&chain, config);
		let mut rx = engine.subscribe().await;

		for id in ["r1", "r2", "r3"] {
			engine.send_tx_request(request(id)).await.unwrap();
		}

		let (shutdown_tx, shutdown_rx) = watch::channel(false);
		tokio::spawn(Arc::clone(&engine).run(shutdown_rx));

		let resolved = recv(&mut rx).await;
		assert_eq!(resolved.status(), TxStatus::Success);
		assert_eq!(resolved.msg_ids, vec!["r1", "r2", "r3"]);

		// Exactly one chain submission, aimed at the multicall contract.
		let sent = chain.sent();
		assert_eq!(sent.len(), 1);
		assert_eq!(sent[0].to(), Some(multicall));

		let decoded = aggregate3ValueCall::abi_decode(sent[0].input(), true).unwrap();
		assert_eq!(decoded.calls.len(), 3);

		shutdown_tx.send(true).unwrap();
	}

	#[tokio::test]
	async fn mempool_timeout_goes_stale_and_releases() {
		let chain = Arc::new(MockChain::new());
		// The pool never reports the transaction.
		let engine = build_engine(
			&chain,
			test_config(|d| {
				d.tx_batch_size = 1;
				d.in_mempool_timeout_ms = 200;
			}),
		);
		let mut rx = engine.subscribe().await;

		let msg_id = engine.send_tx_request(request("r1")).await.unwrap();
		let (shutdown_tx, shutdown_rx) = watch::channel(false);
		tokio::spawn(Arc::clone(&engine).run(shutdown_rx));

		let resolved = recv(&mut rx).await;
		assert_eq!(resolved.status(), TxStatus::StaleMempool);

		assert_eq!(
			engine.preconfirmed_state(&msg_id).await,
			PreconfirmedState::Unknown
		);
		let stats = engine.stats().await;
		assert_eq!((stats.acquired, stats.in_flight), (0, 0));

		shutdown_tx.send(true).unwrap();
	}

	#[tokio::test]
	async fn reverted_execution_reaches_subscribers() {
		let chain = Arc::new(MockChain::new());
		chain.set_auto_pool(true);
		chain.set_auto_receipt(false);
		let engine = build_engine(&chain, test_config(|d| d.tx_batch_size = 1));
		let mut rx = engine.subscribe().await;

		engine.send_tx_request(request("r1")).await.unwrap();
		let (shutdown_tx, shutdown_rx) = watch::channel(false);
		tokio::spawn(Arc::clone(&engine).run(shutdown_rx));

		let resolved = recv(&mut rx).await;
		assert_eq!(resolved.status(), TxStatus::Reverted);
		assert!(resolved.receipt.is_some());

		let stats = engine.stats().await;
		assert_eq!((stats.acquired, stats.in_flight), (0, 0));

		shutdown_tx.send(true).unwrap();
	}

	#[tokio::test]
	async fn wait_full_batch_holds_the_window_open() {
		let chain = Arc::new(MockChain::new());
		chain.set_auto_pool(true);
		chain.set_auto_receipt(true);
		let engine = build_engine(
			&chain,
			test_config(|d| {
				d.tx_batch_size = 8;
				d.tx_batch_timeout_ms = 150;
				d.wait_full_batch_timeout = true;
			}),
		);
		let mut rx = engine.subscribe().await;

		engine.send_tx_request(request("r1")).await.unwrap();
		engine.send_tx_request(request("r2")).await.unwrap();

		let (shutdown_tx, shutdown_rx) = watch::channel(false);
		tokio::spawn(Arc::clone(&engine).run(shutdown_rx));

		// Both requests ride the same partially-filled window.
		let resolved = recv(&mut rx).await;
		assert_eq!(resolved.msg_ids, vec!["r1", "r2"]);
		assert_eq!(chain.sent().len(), 1);

		shutdown_tx.send(true).unwrap();
	}

	#[tokio::test]
	async fn queue_message_ids_can_replace_client_ids() {
		let chain = Arc::new(MockChain::new());
		let engine = build_engine(
			&chain,
			test_config(|d| {
				d.tx_batch_size = 1;
				d.use_queue_message_id = true;
			}),
		);

		let msg_id = engine.send_tx_request(request("custom")).await.unwrap();
		assert_ne!(msg_id, "custom");
		assert_eq!(
			engine.preconfirmed_state(&msg_id).await,
			PreconfirmedState::Queued
		);
	}

	#[tokio::test]
	async fn invalid_request_never_enters_the_queue() {
		let chain = Arc::new(MockChain::new());
		let engine = build_engine(&chain, test_config(|d| d.tx_batch_size = 1));

		let bad = Request::new("m1", Address::ZERO, Bytes::new(), U256::ZERO);
		assert!(matches!(
			engine.send_tx_request(bad).await,
			Err(EngineError::Validation(_))
		));
		assert_eq!(engine.stats().await.queued, 0);
	}
}
