//! Error types shared by the core crate and the adapters.

use axum::{http::StatusCode, response::IntoResponse, Json};

pub type ClResult<T> = std::result::Result<T, Error>;

#[derive(Debug)]
pub enum Error {
	/// The requested entry does not exist (or has expired).
	NotFound,
	/// A one-time code was tried too many times and has been destroyed.
	TooManyAttempts,
	/// A sliding-window limit rejected the request.
	RateLimited,
	/// A refresh token was presented from a device it is not bound to.
	DeviceMismatch,
	/// The backing store did not answer within the operation timeout,
	/// or both cache tiers are down.
	StoreUnavailable,
	/// Database level failure (already logged at the call site).
	DbError,
	/// Stored payload could not be parsed.
	Parse,
	ValidationError(String),
	Internal(Box<str>),
}

impl std::fmt::Display for Error {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			Error::NotFound => write!(f, "Not found"),
			Error::TooManyAttempts => write!(f, "Too many attempts"),
			Error::RateLimited => write!(f, "Rate limited"),
			Error::DeviceMismatch => write!(f, "Device mismatch"),
			Error::StoreUnavailable => write!(f, "Store unavailable"),
			Error::DbError => write!(f, "Database error"),
			Error::Parse => write!(f, "Parse error"),
			Error::ValidationError(msg) => write!(f, "Validation error: {}", msg),
			Error::Internal(msg) => write!(f, "Internal error: {}", msg),
		}
	}
}

impl std::error::Error for Error {}

impl From<serde_json::Error> for Error {
	fn from(_: serde_json::Error) -> Self {
		Error::Parse
	}
}

fn error_body(code: &str, message: &str) -> Json<serde_json::Value> {
	Json(serde_json::json!({
		"error": {
			"code": code,
			"message": message
		}
	}))
}

impl IntoResponse for Error {
	fn into_response(self) -> axum::response::Response {
		match self {
			Error::NotFound => {
				(StatusCode::NOT_FOUND, error_body("E-NOT-FOUND", "Not found")).into_response()
			}
			Error::TooManyAttempts => (
				StatusCode::TOO_MANY_REQUESTS,
				error_body("E-TOO-MANY-ATTEMPTS", "Too many attempts, request a new code"),
			)
				.into_response(),
			Error::RateLimited => {
				let mut response = (
					StatusCode::TOO_MANY_REQUESTS,
					error_body("E-RATE-LIMITED", "Too many requests. Please slow down."),
				)
					.into_response();
				if let Ok(val) = "1".parse() {
					response.headers_mut().insert("Retry-After", val);
				}
				response
			}
			Error::DeviceMismatch => (
				StatusCode::UNAUTHORIZED,
				error_body("E-DEVICE-MISMATCH", "Token is bound to a different device"),
			)
				.into_response(),
			Error::StoreUnavailable => (
				StatusCode::SERVICE_UNAVAILABLE,
				error_body("E-STORE-UNAVAILABLE", "Service temporarily unavailable"),
			)
				.into_response(),
			Error::ValidationError(msg) => {
				(StatusCode::BAD_REQUEST, error_body("E-VALIDATION", &msg)).into_response()
			}
			Error::Parse => {
				(StatusCode::BAD_REQUEST, error_body("E-PARSE", "Malformed payload"))
					.into_response()
			}
			Error::DbError | Error::Internal(_) => (
				StatusCode::INTERNAL_SERVER_ERROR,
				error_body("E-INTERNAL", "Internal server error"),
			)
				.into_response(),
		}
	}
}


// vim: ts=4
