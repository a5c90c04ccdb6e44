//! API handlers for the order engine.
//!
//! Each handler calls exactly one engine operation and maps its error onto an
//! HTTP status through [`ApiFailure`].

pub mod order;
pub mod policy;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use homechef_core::EngineError;
use homechef_types::APIError;

/// An engine error on its way to the client.
#[derive(Debug)]
pub struct ApiFailure(pub EngineError);

impl From<EngineError> for ApiFailure {
	fn from(err: EngineError) -> Self {
		Self(err)
	}
}

impl IntoResponse for ApiFailure {
	fn into_response(self) -> Response {
		match self.0 {
			// Repeating a completed operation is a success; the body is the
			// order as it stands.
			EngineError::AlreadyDone(order) => (StatusCode::OK, Json(*order)).into_response(),
			other => {
				tracing::warn!(error = %other, "Request failed");
				to_api_error(other).into_response()
			},
		}
	}
}

/// Maps an engine error onto the wire error type.
pub fn to_api_error(err: EngineError) -> APIError {
	let message = err.to_string();
	match err {
		EngineError::NotFound(_) => APIError::NotFound {
			error_type: "NOT_FOUND".into(),
			message,
		},
		EngineError::IllegalTransition {
			state,
			event,
			actor,
		} => APIError::Conflict {
			error_type: "ILLEGAL_TRANSITION".into(),
			message,
			details: Some(serde_json::json!({
				"state": state,
				"event": event,
				"actor": actor,
			})),
		},
		EngineError::Conflict(_) => APIError::Conflict {
			error_type: "CONFLICT".into(),
			message,
			details: None,
		},
		EngineError::InvalidInput(_) => APIError::BadRequest {
			error_type: "INVALID_INPUT".into(),
			message,
			details: None,
		},
		EngineError::PolicyViolation(_) => APIError::UnprocessableEntity {
			error_type: "POLICY_VIOLATION".into(),
			message,
			details: None,
		},
		EngineError::Timeout(_) => APIError::GatewayTimeout {
			error_type: "TIMEOUT".into(),
			message,
			retry_after: Some(1),
		},
		EngineError::AlreadyDone(_) | EngineError::Storage(_) | EngineError::Config(_) => {
			APIError::InternalServerError {
				error_type: "INTERNAL_ERROR".into(),
				message,
			}
		},
	}
}
