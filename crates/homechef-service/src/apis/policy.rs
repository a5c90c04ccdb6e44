//! Cancellation policy and operations endpoints.

use super::ApiFailure;
use crate::server::AppState;
use axum::{extract::State, response::Json};
use homechef_types::{CancellationPolicy, DeadLetter, PolicyHistoryResponse, UpdatePolicyRequest};

/// GET /api/policy
pub async fn get_active(
	State(state): State<AppState>,
) -> Result<Json<CancellationPolicy>, ApiFailure> {
	Ok(Json(state.engine.get_active_policy().await?))
}

/// PUT /api/policy
pub async fn update_active(
	State(state): State<AppState>,
	Json(request): Json<UpdatePolicyRequest>,
) -> Result<Json<CancellationPolicy>, ApiFailure> {
	let policy = state
		.engine
		.update_active_policy(request.patch, &request.admin_id)
		.await?;
	Ok(Json(policy))
}

/// GET /api/policy/history
pub async fn history(
	State(state): State<AppState>,
) -> Result<Json<PolicyHistoryResponse>, ApiFailure> {
	let policies = state.engine.policy_history().await?;
	Ok(Json(PolicyHistoryResponse { policies }))
}

/// GET /api/dead-letters
pub async fn dead_letters(
	State(state): State<AppState>,
) -> Result<Json<Vec<DeadLetter>>, ApiFailure> {
	Ok(Json(state.engine.dead_letters().await?))
}
