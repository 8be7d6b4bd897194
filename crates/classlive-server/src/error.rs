//! API error taxonomy and response mapping
//!
//! Every failure a handler can produce is one of these variants. Storage
//! integrity violations from races (duplicate active code, duplicate
//! enrollment name, duplicate activity turn) are converted to their domain
//! variant at the insertion site and never escape as a bare 500.

use axum::{
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use thiserror::Error;
use tokio_postgres::error::SqlState;
use tracing::error;

#[derive(Debug, Error)]
pub enum ApiError {
    /// Malformed input, caller-fixable, nothing was touched in storage
    #[error("{0}")]
    Validation(String),

    /// No active join code matches
    #[error("invalid join code")]
    CodeInvalid,

    #[error("{0} not found")]
    NotFound(&'static str),

    /// Run exists but has not been started yet
    #[error("run has not started")]
    RunNotStarted,

    /// Run is over; clients should stop polling
    #[error("run has ended")]
    RunEnded,

    /// start() on a run that is already LIVE
    #[error("run is already live")]
    AlreadyLive,

    /// start() on a run that already reached its terminal state
    #[error("run has already ended and cannot be restarted")]
    AlreadyEnded,

    /// end() on a run that was never started
    #[error("run was never started")]
    NeverStarted,

    /// The name is already enrolled; the caller must supply the rejoin PIN
    #[error("rejoin PIN required")]
    RequiresPin { pin_length: usize },

    /// PIN present but not in the expected format (distinct from wrong PIN)
    #[error("malformed rejoin PIN")]
    PinFormat { pin_length: usize },

    /// Wrong PIN, or bad login credentials
    #[error("authentication failed")]
    AuthenticationFailed,

    /// Missing/invalid/expired bearer credential
    #[error("{0}")]
    Unauthorized(&'static str),

    /// Credential is valid but does not match the resource
    #[error("{0}")]
    Forbidden(&'static str),

    #[error("run is at capacity")]
    CapacityExceeded,

    /// Same (run, student, activity_key, turn_index) already recorded
    #[error("activity turn already recorded")]
    DuplicateTurn,

    #[error("too many requests")]
    RateLimited { retry_after_secs: u64 },

    /// Could not mint a collision-free join code within the retry budget;
    /// retryable server-side condition, not caller-fixable
    #[error("join code generation exhausted")]
    CodeGenerationExhausted,

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::Validation(_)
            | ApiError::RunNotStarted
            | ApiError::NeverStarted
            | ApiError::PinFormat { .. } => StatusCode::BAD_REQUEST,
            ApiError::CodeInvalid | ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::RunEnded => StatusCode::GONE,
            ApiError::AlreadyLive | ApiError::AlreadyEnded | ApiError::DuplicateTurn => {
                StatusCode::CONFLICT
            }
            ApiError::RequiresPin { .. } => StatusCode::CONFLICT,
            ApiError::AuthenticationFailed | ApiError::Unauthorized(_) => {
                StatusCode::UNAUTHORIZED
            }
            ApiError::Forbidden(_) | ApiError::CapacityExceeded => StatusCode::FORBIDDEN,
            ApiError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            ApiError::CodeGenerationExhausted | ApiError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    fn error_code(&self) -> &'static str {
        match self {
            ApiError::Validation(_) => "validation_error",
            ApiError::CodeInvalid => "code_invalid",
            ApiError::NotFound(_) => "not_found",
            ApiError::RunNotStarted => "run_not_started",
            ApiError::RunEnded => "run_ended",
            ApiError::AlreadyLive => "already_live",
            ApiError::AlreadyEnded => "already_ended",
            ApiError::NeverStarted => "never_started",
            ApiError::RequiresPin { .. } => "requires_pin",
            ApiError::PinFormat { .. } => "pin_format",
            ApiError::AuthenticationFailed => "authentication_failed",
            ApiError::Unauthorized(_) => "unauthorized",
            ApiError::Forbidden(_) => "forbidden",
            ApiError::CapacityExceeded => "capacity_exceeded",
            ApiError::DuplicateTurn => "duplicate_turn",
            ApiError::RateLimited { .. } => "rate_limit_exceeded",
            ApiError::CodeGenerationExhausted => "code_generation_exhausted",
            ApiError::Internal(_) => "internal_error",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();

        let mut body = serde_json::json!({
            "error": self.error_code(),
            "message": self.to_string(),
        });

        // Context the caller needs to take its next action
        match &self {
            ApiError::RequiresPin { pin_length } | ApiError::PinFormat { pin_length } => {
                body["pin_format"] = serde_json::json!(format!("{pin_length} digits"));
            }
            ApiError::RateLimited { retry_after_secs } => {
                body["retry_after"] = serde_json::json!(retry_after_secs);
            }
            ApiError::Internal(err) => {
                // Full context in the log, opaque message to the caller
                error!(error = ?err, "unhandled internal error");
                body["message"] = serde_json::json!("internal server error");
            }
            _ => {}
        }

        let mut headers = HeaderMap::new();
        match &self {
            ApiError::RunEnded => {
                // Instruct clients to drop caches and stop polling
                headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
                headers.insert(header::PRAGMA, HeaderValue::from_static("no-cache"));
            }
            ApiError::RateLimited { retry_after_secs } => {
                headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
                if let Ok(v) = HeaderValue::from_str(&retry_after_secs.to_string()) {
                    headers.insert(header::RETRY_AFTER, v);
                }
            }
            _ => {}
        }

        (status, headers, Json(body)).into_response()
    }
}

/// True when the error chain bottoms out in a PostgreSQL unique violation
/// (SQLSTATE 23505). Race losers on the constrained inserts hit this.
pub fn is_unique_violation(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| {
        cause
            .downcast_ref::<tokio_postgres::Error>()
            .and_then(|e| e.code())
            .map(|code| *code == SqlState::UNIQUE_VIOLATION)
            .unwrap_or(false)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            ApiError::Validation("bad".into()).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(ApiError::CodeInvalid.status(), StatusCode::NOT_FOUND);
        assert_eq!(ApiError::RunEnded.status(), StatusCode::GONE);
        assert_eq!(
            ApiError::RequiresPin { pin_length: 4 }.status(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            ApiError::PinFormat { pin_length: 4 }.status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::AuthenticationFailed.status(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(ApiError::CapacityExceeded.status(), StatusCode::FORBIDDEN);
        assert_eq!(ApiError::DuplicateTurn.status(), StatusCode::CONFLICT);
        assert_eq!(
            ApiError::RateLimited {
                retry_after_secs: 60
            }
            .status(),
            StatusCode::TOO_MANY_REQUESTS
        );
        assert_eq!(
            ApiError::CodeGenerationExhausted.status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_wrong_pin_distinct_from_bad_format() {
        // Callers must be able to tell "re-enter the PIN" from "fix the format"
        assert_ne!(
            ApiError::AuthenticationFailed.error_code(),
            ApiError::PinFormat { pin_length: 4 }.error_code()
        );
        assert_ne!(
            ApiError::AuthenticationFailed.status(),
            ApiError::PinFormat { pin_length: 4 }.status()
        );
    }

    #[test]
    fn test_run_ended_response_is_no_store() {
        let response = ApiError::RunEnded.into_response();
        assert_eq!(response.status(), StatusCode::GONE);
        assert_eq!(
            response.headers().get(header::CACHE_CONTROL).unwrap(),
            "no-store"
        );
    }

    #[test]
    fn test_rate_limited_carries_retry_after() {
        let response = ApiError::RateLimited {
            retry_after_secs: 42,
        }
        .into_response();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers().get(header::RETRY_AFTER).unwrap(), "42");
    }
}
