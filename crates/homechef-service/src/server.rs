//! HTTP server for the order engine API.
//!
//! Every route lives under `/api`. The transport performs no authentication;
//! actor identities are read from request bodies.

use crate::apis::{order, policy};
use axum::{
	extract::{DefaultBodyLimit, Request, State},
	middleware::{self, Next},
	response::{IntoResponse, Json, Response},
	routing::{get, post},
	Router,
};
use homechef_config::ApiConfig;
use homechef_core::OrderEngine;
use homechef_types::APIError;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

/// Shared application state for the API server.
#[derive(Clone)]
pub struct AppState {
	pub engine: Arc<OrderEngine>,
}

/// Builds the API router for `engine`.
pub fn router(api_config: &ApiConfig, engine: Arc<OrderEngine>) -> Router {
	let deadline = Duration::from_secs(api_config.timeout_seconds);

	let api = Router::new()
		.route("/health", get(health))
		.route("/orders", post(order::place_order))
		.route("/orders/by-number/{number}", get(order::get_order_by_number))
		.route("/orders/{id}", get(order::get_order))
		.route("/orders/{id}/cancel", post(order::cancel))
		.route("/orders/{id}/cancellation", get(order::cancellation_info))
		.route("/orders/{id}/countdown", get(order::countdown))
		.route("/orders/{id}/confirm", post(order::confirm))
		.route("/orders/{id}/chef/accept", post(order::chef_accept))
		.route("/orders/{id}/chef/decline", post(order::chef_decline))
		.route("/orders/{id}/advance", post(order::advance))
		.route("/orders/{id}/driver/accept", post(order::driver_accept))
		.route("/orders/{id}/tips", post(order::add_tip))
		.route("/orders/{id}/journey", get(order::journey))
		.route("/policy", get(policy::get_active).put(policy::update_active))
		.route("/policy/history", get(policy::history))
		.route("/dead-letters", get(policy::dead_letters));

	Router::new()
		.nest("/api", api)
		.layer(
			ServiceBuilder::new()
				.layer(TraceLayer::new_for_http())
				.layer(CorsLayer::permissive())
				.layer(DefaultBodyLimit::max(api_config.max_request_size))
				.layer(middleware::from_fn_with_state(deadline, request_deadline)),
		)
		.with_state(AppState { engine })
}

/// Starts the HTTP server and serves until the listener fails.
pub async fn start_server(
	api_config: ApiConfig,
	engine: Arc<OrderEngine>,
) -> Result<(), Box<dyn std::error::Error>> {
	let app = router(&api_config, engine);

	let bind_address = format!("{}:{}", api_config.host, api_config.port);
	let listener = TcpListener::bind(&bind_address).await?;

	tracing::info!("HomeChef order API listening on {}", bind_address);

	axum::serve(listener, app).await?;

	Ok(())
}

/// GET /api/health
async fn health(State(state): State<AppState>) -> Json<Value> {
	Json(json!({
		"status": "ok",
		"engine_id": state.engine.config().engine.id,
	}))
}

async fn request_deadline(State(limit): State<Duration>, request: Request, next: Next) -> Response {
	match tokio::time::timeout(limit, next.run(request)).await {
		Ok(response) => response,
		Err(_) => {
			tracing::warn!(timeout_seconds = limit.as_secs(), "Request deadline exceeded");
			APIError::GatewayTimeout {
				error_type: "TIMEOUT".into(),
				message: format!("Request exceeded {}s", limit.as_secs()),
				retry_after: Some(1),
			}
			.into_response()
		},
	}
}
