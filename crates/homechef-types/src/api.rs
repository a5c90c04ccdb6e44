//! Request and response types for engine operations.
//!
//! These types are shared by the engine facade and the HTTP transport. The
//! transport performs no authentication: actor identities travel in request
//! bodies and are trusted as given.

use crate::{
	Actor, ActorRole, CancellationPolicy, MoneyBreakdown, OrderStatus, PolicyPatch, RecipientType,
	RefundStatus, Tip,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use validator::Validate;

/// Item line of a new order.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct PlaceOrderItem {
	#[validate(length(min = 1))]
	pub menu_item_id: String,
	#[validate(length(min = 1, max = 200))]
	pub name: String,
	pub unit_price: Decimal,
	#[validate(range(min = 1, max = 999))]
	pub quantity: u32,
	#[validate(length(max = 500))]
	pub notes: Option<String>,
}

/// Input of `place_order`.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct PlaceOrderRequest {
	#[validate(length(min = 1))]
	pub customer_id: String,
	#[validate(length(min = 1))]
	pub chef_id: String,
	#[validate(length(min = 1), nested)]
	pub items: Vec<PlaceOrderItem>,
	pub money: MoneyBreakdown,
	#[validate(length(min = 1, max = 500))]
	pub delivery_address: String,
	#[validate(length(max = 1000))]
	pub special_instructions: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CancelRequest {
	pub actor: Actor,
	pub reason: String,
	pub notes: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CancellationType {
	Free,
	Penalty,
}

/// Result of a successful cancellation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancellationOutcome {
	#[serde(rename = "type")]
	pub kind: CancellationType,
	pub penalty_amount: Decimal,
	pub refund_amount: Decimal,
	pub refund_timeline_days: u32,
}

/// What a customer cancellation would cost right now.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancellationInfo {
	pub can_cancel: bool,
	pub is_free: bool,
	pub elapsed_seconds: i64,
	pub free_window_seconds: u64,
	pub projected_penalty: Decimal,
	pub projected_refund: Decimal,
}

/// State of the free-cancellation countdown.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CountdownStatus {
	pub active: bool,
	pub time_remaining_seconds: u64,
	pub total_window_seconds: u64,
	/// Elapsed share of the window, 0 to 100.
	pub progress_pct: f64,
	pub can_cancel_free: bool,
	/// Penalty a customer cancellation would incur once the window closes.
	pub penalty_after_expiry: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AcceptByChefRequest {
	pub chef_id: String,
	pub estimated_prep_minutes: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeclineByChefRequest {
	pub chef_id: String,
	pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdvanceRequest {
	pub actor: Actor,
	pub target_status: OrderStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AcceptDeliveryRequest {
	pub driver_id: String,
}

/// Input of `add_tip`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddTipRequest {
	pub customer_id: String,
	pub recipient_type: RecipientType,
	pub amount: Decimal,
	pub message: Option<String>,
	/// Repeating a call with the same token returns the original tip.
	pub client_token: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdatePolicyRequest {
	pub admin_id: String,
	#[serde(flatten)]
	pub patch: PolicyPatch,
}

/// One step of the order timeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JourneyStep {
	pub sequence: u64,
	pub status: OrderStatus,
	pub message: String,
	pub actor_role: ActorRole,
	pub actor_id: Option<String>,
	pub at: DateTime<Utc>,
	/// Time spent in the previous status; `None` for the first step.
	pub seconds_since_previous: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participants {
	pub customer_id: String,
	pub chef_id: String,
	pub delivery_partner_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancellationSummary {
	pub reason: String,
	pub cancelled_by: String,
	pub cancelled_at: Option<DateTime<Utc>>,
	pub penalty_amount: Decimal,
	pub refund_amount: Decimal,
	pub refund_status: RefundStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TippingInfo {
	pub can_tip: bool,
	/// Recipient types that can still receive a tip.
	pub open_recipients: Vec<RecipientType>,
	pub tip_total: Decimal,
	pub tips: Vec<Tip>,
}

/// Derived view of an order's life so far.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderJourney {
	pub order_id: String,
	pub order_number: String,
	pub current_status: OrderStatus,
	pub timeline: Vec<JourneyStep>,
	pub participants: Participants,
	pub estimated_delivery_at: Option<DateTime<Utc>>,
	pub cancellation_info: Option<CancellationSummary>,
	pub tipping_info: TippingInfo,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyHistoryResponse {
	pub policies: Vec<CancellationPolicy>,
}

/// Error body returned by the HTTP transport.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
	/// Error type/code
	pub error: String,
	/// Human-readable description
	pub message: String,
	/// Additional error context
	pub details: Option<serde_json::Value>,
	/// Suggested retry delay in seconds
	#[serde(rename = "retryAfter")]
	pub retry_after: Option<u64>,
}

/// API error with its HTTP status.
#[derive(Debug)]
pub enum APIError {
	/// 400
	BadRequest {
		error_type: String,
		message: String,
		details: Option<serde_json::Value>,
	},
	/// 404
	NotFound { error_type: String, message: String },
	/// 409
	Conflict {
		error_type: String,
		message: String,
		details: Option<serde_json::Value>,
	},
	/// 422
	UnprocessableEntity {
		error_type: String,
		message: String,
		details: Option<serde_json::Value>,
	},
	/// 504
	GatewayTimeout {
		error_type: String,
		message: String,
		retry_after: Option<u64>,
	},
	/// 500
	InternalServerError { error_type: String, message: String },
}

impl APIError {
	/// Get the HTTP status code for this error.
	pub fn status_code(&self) -> u16 {
		match self {
			APIError::BadRequest { .. } => 400,
			APIError::NotFound { .. } => 404,
			APIError::Conflict { .. } => 409,
			APIError::UnprocessableEntity { .. } => 422,
			APIError::GatewayTimeout { .. } => 504,
			APIError::InternalServerError { .. } => 500,
		}
	}

	/// Convert to ErrorResponse for JSON serialization.
	pub fn to_error_response(&self) -> ErrorResponse {
		let (error, message, details, retry_after) = match self {
			APIError::BadRequest {
				error_type,
				message,
				details,
			}
			| APIError::Conflict {
				error_type,
				message,
				details,
			}
			| APIError::UnprocessableEntity {
				error_type,
				message,
				details,
			} => (error_type, message, details.clone(), None),
			APIError::NotFound {
				error_type,
				message,
			}
			| APIError::InternalServerError {
				error_type,
				message,
			} => (error_type, message, None, None),
			APIError::GatewayTimeout {
				error_type,
				message,
				retry_after,
			} => (error_type, message, None, *retry_after),
		};
		ErrorResponse {
			error: error.clone(),
			message: message.clone(),
			details,
			retry_after,
		}
	}
}

impl fmt::Display for APIError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			APIError::BadRequest { message, .. } => write!(f, "Bad Request: {}", message),
			APIError::NotFound { message, .. } => write!(f, "Not Found: {}", message),
			APIError::Conflict { message, .. } => write!(f, "Conflict: {}", message),
			APIError::UnprocessableEntity { message, .. } => {
				write!(f, "Unprocessable Entity: {}", message)
			},
			APIError::GatewayTimeout { message, .. } => write!(f, "Gateway Timeout: {}", message),
			APIError::InternalServerError { message, .. } => {
				write!(f, "Internal Server Error: {}", message)
			},
		}
	}
}

impl std::error::Error for APIError {}

impl axum::response::IntoResponse for APIError {
	fn into_response(self) -> axum::response::Response {
		use axum::{http::StatusCode, response::Json};

		let status = StatusCode::from_u16(self.status_code())
			.unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
		(status, Json(self.to_error_response())).into_response()
	}
}
