//! API handlers

pub mod activity;
pub mod auth;
pub mod join;
pub mod live;
pub mod runs;
pub mod templates;

use crate::error::ApiError;
use crate::models::{Enrollment, SessionRun, Teacher};
use crate::state::AppState;
use crate::tokens::{extract_bearer, ActivityClaims};
use axum::http::{header, HeaderMap, HeaderValue};
use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;

/// The full API surface. Layers (trace, CORS) are applied by the caller.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        // Health check
        .route("/health", get(health_check))
        // === TEACHER: AUTH ===
        .route("/api/auth/register", post(auth::register))
        .route("/api/auth/login", post(auth::login))
        .route("/api/auth/me", get(auth::me))
        // === TEACHER: TEMPLATES ===
        .route("/api/templates", post(templates::create_template))
        .route("/api/templates", get(templates::list_templates))
        // === TEACHER: RUNS ===
        .route("/api/runs", post(runs::create_run))
        .route("/api/runs", get(runs::list_runs))
        .route("/api/runs/:run_id/start", post(runs::start_run))
        .route("/api/runs/:run_id/code", get(runs::get_run_code))
        .route("/api/runs/:run_id/end", post(runs::end_run))
        // === TEACHER: LIVE MONITORING ===
        .route("/api/runs/:run_id/live-snapshot", get(live::live_snapshot))
        .route("/api/runs/:run_id/recent-logs", get(live::recent_logs))
        // === TEACHER: POST-SESSION REVIEW ===
        .route("/api/runs/:run_id/statistics", get(runs::run_statistics))
        .route(
            "/api/runs/:run_id/activity-logs",
            get(runs::run_activity_logs),
        )
        // === STUDENT ===
        .route("/api/join", post(join::join))
        .route("/api/activity-log", post(activity::record_activity))
        .route("/api/session/status", get(activity::session_status))
        .route("/api/session/info", get(activity::session_info))
        .with_state(state)
}

async fn health_check() -> &'static str {
    "OK"
}

/// Real client identity, preferring the trusted proxy header chain
pub fn client_ip(headers: &HeaderMap) -> String {
    for name in ["CF-Connecting-IP", "X-Forwarded-For", "X-Real-IP"] {
        if let Some(value) = headers.get(name).and_then(|v| v.to_str().ok()) {
            if let Some(first) = value.split(',').next() {
                let ip = first.trim();
                if !ip.is_empty() {
                    return ip.to_string();
                }
            }
        }
    }
    "unknown".to_string()
}

/// Responses that must never be cached by clients or intermediaries
pub fn no_store_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(
        header::CACHE_CONTROL,
        HeaderValue::from_static("no-store, no-cache, must-revalidate"),
    );
    headers.insert(header::PRAGMA, HeaderValue::from_static("no-cache"));
    headers.insert(header::EXPIRES, HeaderValue::from_static("0"));
    headers
}

fn bearer_token(headers: &HeaderMap) -> Result<&str, ApiError> {
    let authorization = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok());
    extract_bearer(authorization).ok_or(ApiError::Unauthorized("bearer token required"))
}

/// Authenticate a teacher from the session credential and confirm the
/// account still exists.
pub async fn require_teacher(
    state: &AppState,
    headers: &HeaderMap,
) -> Result<(Teacher, crate::tokens::SessionClaims), ApiError> {
    let token = bearer_token(headers)?;
    let claims = state
        .tokens
        .verify_session(token)
        .ok_or(ApiError::Unauthorized("invalid or expired session token"))?;
    let teacher = crate::db::queries::get_teacher(&state.db, claims.teacher_id)
        .await?
        .ok_or(ApiError::Unauthorized("unknown teacher account"))?;
    Ok((teacher, claims))
}

/// Authenticate a student from the activity credential: signature and type
/// tag, run liveness, then the enrollment cross-check (the enrollment must
/// still exist and match every field of the credential).
pub async fn require_student(
    state: &AppState,
    headers: &HeaderMap,
) -> Result<(ActivityClaims, SessionRun, Enrollment), ApiError> {
    let token = bearer_token(headers)?;
    let claims = state
        .tokens
        .verify_activity(token)
        .ok_or(ApiError::Unauthorized("invalid activity token"))?;

    let run = crate::guards::assert_run_live(&state.db, claims.run_id).await?;

    let enrollment = crate::db::queries::find_enrollment_for_credential(
        &state.db,
        claims.enrollment_id,
        claims.run_id,
        &claims.student_name,
    )
    .await?
    .ok_or(ApiError::Forbidden("enrollment does not match credential"))?;

    Ok((claims, run, enrollment))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_ip_prefers_cloudflare_header() {
        let mut headers = HeaderMap::new();
        headers.insert("CF-Connecting-IP", HeaderValue::from_static("1.2.3.4"));
        headers.insert("X-Forwarded-For", HeaderValue::from_static("5.6.7.8"));
        assert_eq!(client_ip(&headers), "1.2.3.4");
    }

    #[test]
    fn test_client_ip_takes_first_forwarded_hop() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "X-Forwarded-For",
            HeaderValue::from_static("9.9.9.9, 10.0.0.1"),
        );
        assert_eq!(client_ip(&headers), "9.9.9.9");
    }

    #[test]
    fn test_client_ip_falls_back() {
        assert_eq!(client_ip(&HeaderMap::new()), "unknown");
    }

    #[test]
    fn test_no_store_headers() {
        let headers = no_store_headers();
        assert_eq!(
            headers.get(header::CACHE_CONTROL).unwrap(),
            "no-store, no-cache, must-revalidate"
        );
        assert_eq!(headers.get(header::PRAGMA).unwrap(), "no-cache");
    }
}
