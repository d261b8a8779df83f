//! Main entry point for the transaction dispatcher service.
//!
//! Wires the concrete implementations together: the Alloy chain client, the
//! local signer, the configured queue backend and the dispatch engine, plus
//! the optional HTTP admin API.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::sync::watch;

use dispatcher_chain::implementations::evm::alloy::AlloyChain;
use dispatcher_config::Config;
use dispatcher_core::Engine;
use dispatcher_queue::implementations::file::FileQueue;
use dispatcher_queue::implementations::memory::MemoryQueue;
use dispatcher_queue::QueueInterface;
use dispatcher_signer::implementations::local::LocalSigner;
use dispatcher_signer::SignerInterface;
use dispatcher_types::Request;

mod server;

/// Command-line arguments for the dispatcher service.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
	/// Path to configuration file
	#[arg(short, long, default_value = "config.toml")]
	config: PathBuf,

	/// Log level (trace, debug, info, warn, error)
	#[arg(short, long, default_value = "info")]
	log_level: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
	let args = Args::parse();

	// Initialize tracing with env filter
	use tracing_subscriber::{fmt, EnvFilter};
	let env_filter = EnvFilter::try_from_default_env()
		.unwrap_or_else(|_| EnvFilter::new(args.log_level.clone()));
	fmt()
		.with_env_filter(env_filter)
		.with_target(true)
		.init();

	let config = Config::from_file(&args.config)?;
	tracing::info!(chain_id = config.chain.chain_id, "loaded configuration");

	let chain = Arc::new(AlloyChain::new(&config.chain.rpc_url)?);
	let signer = Arc::new(LocalSigner::from_hex(
		&config.signer.private_key,
		config.chain.chain_id,
	)?);
	tracing::info!(sender = %signer.address(), "loaded signer");

	let queue = build_queue(&config).await?;
	let engine = Arc::new(Engine::new(config.clone(), chain, signer, queue));

	// Ctrl-c flips the shutdown flag every background task watches.
	let (shutdown_tx, shutdown_rx) = watch::channel(false);
	tokio::spawn(async move {
		let _ = tokio::signal::ctrl_c().await;
		tracing::info!("shutdown requested");
		let _ = shutdown_tx.send(true);
	});

	let api_config = config.api.clone().filter(|api| api.enabled);
	if let Some(api_config) = api_config {
		let api_engine = Arc::clone(&engine);
		tracing::info!("starting dispatcher and admin API");
		tokio::select! {
			_ = engine.run(shutdown_rx) => {
				tracing::info!("dispatcher stopped");
			}
			result = server::start_server(api_config, api_engine) => {
				tracing::info!("admin API stopped");
				result?;
			}
		}
	} else {
		tracing::info!("starting dispatcher");
		engine.run(shutdown_rx).await;
		tracing::info!("dispatcher stopped");
	}

	Ok(())
}

/// Selects the queue backend from configuration.
async fn build_queue(
	config: &Config,
) -> Result<Arc<dyn QueueInterface<Request>>, Box<dyn std::error::Error>> {
	match config.queue.backend.as_str() {
		"file" => {
			let path = config.queue.path.clone().unwrap_or_default();
			tracing::info!(path = %path, "using durable file queue");
			let queue: FileQueue<Request> = FileQueue::open(path).await?;
			Ok(Arc::new(queue))
		}
		_ => Ok(Arc::new(MemoryQueue::<Request>::new())),
	}
}
