//! Order endpoints.

use super::ApiFailure;
use crate::server::AppState;
use axum::{
	extract::{Path, State},
	http::StatusCode,
	response::Json,
};
use homechef_types::{
	AcceptByChefRequest, AcceptDeliveryRequest, AddTipRequest, AdvanceRequest, CancelRequest,
	CancellationInfo, CancellationOutcome, CountdownStatus, DeclineByChefRequest, Order,
	OrderJourney, PlaceOrderRequest, Tip,
};

type ApiResult<T> = Result<Json<T>, ApiFailure>;

/// POST /api/orders
pub async fn place_order(
	State(state): State<AppState>,
	Json(request): Json<PlaceOrderRequest>,
) -> Result<(StatusCode, Json<Order>), ApiFailure> {
	let order = state.engine.place_order(request).await?;
	Ok((StatusCode::CREATED, Json(order)))
}

/// GET /api/orders/{id}
pub async fn get_order(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<Order> {
	Ok(Json(state.engine.get_order(&id).await?))
}

/// GET /api/orders/by-number/{number}
pub async fn get_order_by_number(
	State(state): State<AppState>,
	Path(number): Path<String>,
) -> ApiResult<Order> {
	Ok(Json(state.engine.get_order_by_number(&number).await?))
}

/// POST /api/orders/{id}/cancel
pub async fn cancel(
	State(state): State<AppState>,
	Path(id): Path<String>,
	Json(request): Json<CancelRequest>,
) -> ApiResult<CancellationOutcome> {
	Ok(Json(state.engine.cancel(&id, request).await?))
}

/// GET /api/orders/{id}/cancellation
pub async fn cancellation_info(
	State(state): State<AppState>,
	Path(id): Path<String>,
) -> ApiResult<CancellationInfo> {
	Ok(Json(state.engine.get_cancellation_info(&id).await?))
}

/// GET /api/orders/{id}/countdown
pub async fn countdown(
	State(state): State<AppState>,
	Path(id): Path<String>,
) -> ApiResult<CountdownStatus> {
	Ok(Json(state.engine.get_countdown_status(&id).await?))
}

/// POST /api/orders/{id}/confirm
pub async fn confirm(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<Order> {
	Ok(Json(state.engine.confirm_after_timer(&id).await?))
}

/// POST /api/orders/{id}/chef/accept
pub async fn chef_accept(
	State(state): State<AppState>,
	Path(id): Path<String>,
	Json(request): Json<AcceptByChefRequest>,
) -> ApiResult<Order> {
	Ok(Json(state.engine.accept_by_chef(&id, request).await?))
}

/// POST /api/orders/{id}/chef/decline
pub async fn chef_decline(
	State(state): State<AppState>,
	Path(id): Path<String>,
	Json(request): Json<DeclineByChefRequest>,
) -> ApiResult<Order> {
	Ok(Json(state.engine.decline_by_chef(&id, request).await?))
}

/// POST /api/orders/{id}/advance
pub async fn advance(
	State(state): State<AppState>,
	Path(id): Path<String>,
	Json(request): Json<AdvanceRequest>,
) -> ApiResult<Order> {
	Ok(Json(state.engine.advance(&id, request).await?))
}

/// POST /api/orders/{id}/driver/accept
pub async fn driver_accept(
	State(state): State<AppState>,
	Path(id): Path<String>,
	Json(request): Json<AcceptDeliveryRequest>,
) -> ApiResult<Order> {
	Ok(Json(state.engine.accept_delivery(&id, request).await?))
}

/// POST /api/orders/{id}/tips
pub async fn add_tip(
	State(state): State<AppState>,
	Path(id): Path<String>,
	Json(request): Json<AddTipRequest>,
) -> Result<(StatusCode, Json<Tip>), ApiFailure> {
	let tip = state.engine.add_tip(&id, request).await?;
	Ok((StatusCode::CREATED, Json(tip)))
}

/// GET /api/orders/{id}/journey
pub async fn journey(
	State(state): State<AppState>,
	Path(id): Path<String>,
) -> ApiResult<OrderJourney> {
	Ok(Json(state.engine.get_order_journey(&id).await?))
}
