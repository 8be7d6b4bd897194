//! Teacher authentication handlers

use crate::api::{client_ip, require_teacher};
use crate::db::queries;
use crate::error::{is_unique_violation, ApiError};
use crate::models::{LoginRequest, LoginResponse, MeResponse, RegisterRequest, TeacherInfo};
use crate::pins;
use crate::state::AppState;
use axum::{extract::State, http::HeaderMap, Json};
use std::sync::Arc;
use tracing::{info, warn};

pub async fn register(
    State(state): State<Arc<AppState>>,
    Json(req): Json<RegisterRequest>,
) -> Result<Json<TeacherInfo>, ApiError> {
    let email = req.email.trim().to_lowercase();
    if email.is_empty() || !email.contains('@') {
        return Err(ApiError::Validation("a valid email is required".into()));
    }
    if req.password.len() < state.settings.min_teacher_password_len {
        return Err(ApiError::Validation(format!(
            "password must be at least {} characters",
            state.settings.min_teacher_password_len
        )));
    }

    let password_hash = pins::hash_secret(&req.password)?;
    let teacher = match queries::create_teacher(&state.db, &email, &password_hash).await {
        Ok(t) => t,
        Err(e) if is_unique_violation(&e) => {
            return Err(ApiError::Validation("email is already registered".into()));
        }
        Err(e) => return Err(ApiError::Internal(e)),
    };

    info!(teacher_id = teacher.id, "Teacher registered");
    Ok(Json(TeacherInfo::from(&teacher)))
}

pub async fn login(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<LoginRequest>,
) -> Result<Json<LoginResponse>, ApiError> {
    let ip = client_ip(&headers);
    state.limits.login.check(&ip)?;

    let email = req.email.trim().to_lowercase();
    let teacher = queries::get_teacher_by_email(&state.db, &email).await?;

    // One failure path for unknown email and wrong password
    let Some(teacher) = teacher.filter(|t| pins::verify_secret(&req.password, &t.password_hash))
    else {
        warn!(ip = %ip, "Login failed");
        return Err(ApiError::AuthenticationFailed);
    };

    let session_token = state.tokens.issue_session(teacher.id)?;
    info!(teacher_id = teacher.id, ip = %ip, "Teacher logged in");

    Ok(Json(LoginResponse {
        ok: true,
        session_token,
        teacher: TeacherInfo::from(&teacher),
    }))
}

/// Current teacher info. Also performs the sliding refresh: when the
/// presented token is close to expiry, a fresh one rides along.
pub async fn me(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<MeResponse>, ApiError> {
    let (teacher, claims) = require_teacher(&state, &headers).await?;

    let refreshed_session_token = if state.tokens.should_refresh(&claims) {
        info!(teacher_id = teacher.id, "Session token refreshed");
        Some(state.tokens.issue_session(teacher.id)?)
    } else {
        None
    };

    Ok(Json(MeResponse {
        teacher: TeacherInfo::from(&teacher),
        refreshed_session_token,
    }))
}
