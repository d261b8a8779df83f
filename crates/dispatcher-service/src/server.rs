//! HTTP admin API for the dispatcher.
//!
//! Minimal surface: submit a transaction request, query a message's
//! preconfirmed state, and read the pipeline counters.

use std::sync::Arc;

use axum::{
	extract::{Path, State},
	http::StatusCode,
	response::{IntoResponse, Json, Response},
	routing::{get, post},
	Router,
};
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;

use dispatcher_config::ApiConfig;
use dispatcher_core::{Engine, EngineError};
use dispatcher_types::{
	Request, StatsResponse, SubmitTransactionRequest, SubmitTransactionResponse,
	TransactionStateResponse,
};

/// Shared application state for the admin API.
#[derive(Clone)]
pub struct AppState {
	/// Reference to the dispatch engine for processing requests.
	pub engine: Arc<Engine>,
}

/// Error body returned by admin API handlers.
pub struct ApiError {
	status: StatusCode,
	message: String,
}

impl ApiError {
	fn bad_request(message: String) -> Self {
		Self {
			status: StatusCode::BAD_REQUEST,
			message,
		}
	}

	fn internal(message: String) -> Self {
		Self {
			status: StatusCode::INTERNAL_SERVER_ERROR,
			message,
		}
	}
}

impl IntoResponse for ApiError {
	fn into_response(self) -> Response {
		let body = Json(serde_json::json!({ "error": self.message }));
		(self.status, body).into_response()
	}
}

/// Starts the HTTP server for the admin API.
pub async fn start_server(
	config: ApiConfig,
	engine: Arc<Engine>,
) -> Result<(), Box<dyn std::error::Error>> {
	let app_state = AppState { engine };

	let app = Router::new()
		.nest(
			"/api",
			Router::new()
				.route("/transactions", post(submit_transaction))
				.route("/transactions/:msg_id/state", get(transaction_state))
				.route("/stats", get(stats)),
		)
		.layer(ServiceBuilder::new().layer(CorsLayer::permissive()))
		.with_state(app_state);

	let bind_address = format!("{}:{}", config.host, config.port);
	let listener = TcpListener::bind(&bind_address).await?;
	tracing::info!(address = %bind_address, "admin API listening");

	axum::serve(listener, app).await?;
	Ok(())
}

/// Handles `POST /api/transactions`.
async fn submit_transaction(
	State(state): State<AppState>,
	Json(body): Json<SubmitTransactionRequest>,
) -> Result<Json<SubmitTransactionResponse>, ApiError> {
	let request: Request = body.into();
	match state.engine.send_tx_request(request).await {
		Ok(msg_id) => Ok(Json(SubmitTransactionResponse { msg_id })),
		Err(err @ EngineError::Validation(_)) => {
			tracing::warn!(error = %err, "rejected transaction request");
			Err(ApiError::bad_request(err.to_string()))
		}
		Err(err) => Err(ApiError::internal(err.to_string())),
	}
}

/// Handles `GET /api/transactions/{msg_id}/state`.
async fn transaction_state(
	State(state): State<AppState>,
	Path(msg_id): Path<String>,
) -> Json<TransactionStateResponse> {
	let preconfirmed = state.engine.preconfirmed_state(&msg_id).await;
	Json(TransactionStateResponse {
		msg_id,
		state: preconfirmed,
	})
}

/// Handles `GET /api/stats`.
async fn stats(State(state): State<AppState>) -> Json<StatsResponse> {
	Json(state.engine.stats().await)
}
