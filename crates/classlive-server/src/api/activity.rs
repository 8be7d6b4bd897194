//! Student activity-log handlers

use crate::api::{client_ip, no_store_headers, require_student};
use crate::db::queries;
use crate::error::{is_unique_violation, ApiError};
use crate::models::{ActivityLogRequest, ActivityLogResponse, SavedActivity};
use crate::state::AppState;
use axum::{extract::State, http::HeaderMap, Json};
use std::sync::Arc;
use tracing::{info, warn};

/// Append one interaction turn. The (run, student, activity, turn) key is
/// unique; a client retry that resubmits an already-stored turn gets a 409
/// meaning "already recorded", not data loss.
pub async fn record_activity(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<ActivityLogRequest>,
) -> Result<(HeaderMap, Json<ActivityLogResponse>), ApiError> {
    let ip = client_ip(&headers);
    state.limits.activity.check(&ip)?;

    let (claims, run, _enrollment) = require_student(&state, &headers).await?;

    let activity_key = req.activity_key.trim();
    if activity_key.is_empty() {
        return Err(ApiError::Validation("activity key is required".into()));
    }
    if req.turn_index < 0 {
        return Err(ApiError::Validation(
            "turn index must be zero or greater".into(),
        ));
    }

    // Lengths only; content never reaches the log
    info!(
        run_id = run.id,
        student = %claims.student_name,
        activity = %activity_key,
        turn = req.turn_index,
        input_len = req.student_input.as_deref().map(str::len).unwrap_or(0),
        output_len = req.ai_output.as_deref().map(str::len).unwrap_or(0),
        "Recording activity turn"
    );

    let log = match queries::insert_activity_log(
        &state.db,
        run.id,
        &claims.student_name,
        activity_key,
        req.turn_index,
        req.student_input.as_deref(),
        req.ai_output.as_deref(),
        req.third_eval_json.as_ref(),
    )
    .await
    {
        Ok(log) => log,
        Err(e) if is_unique_violation(&e) => {
            warn!(
                run_id = run.id,
                student = %claims.student_name,
                activity = %activity_key,
                turn = req.turn_index,
                "Duplicate activity turn"
            );
            return Err(ApiError::DuplicateTurn);
        }
        Err(e) => return Err(ApiError::Internal(e)),
    };

    Ok((
        no_store_headers(),
        Json(ActivityLogResponse {
            ok: true,
            saved: SavedActivity {
                log_id: log.id,
                activity_key: log.activity_key,
                turn_index: log.turn_index,
            },
        }),
    ))
}

/// Session and template details for the student client, so it can render
/// the activity the run was launched with. Same credential chain as the
/// other student endpoints; the settings come from the run's frozen
/// snapshot source template.
pub async fn session_info(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<(HeaderMap, Json<serde_json::Value>), ApiError> {
    let (claims, run, _) = require_student(&state, &headers).await?;

    let template = queries::get_template(&state.db, run.template_id)
        .await?
        .ok_or(ApiError::NotFound("template"))?;

    Ok((
        no_store_headers(),
        Json(serde_json::json!({
            "ok": true,
            "run_id": run.id,
            "student_name": claims.student_name,
            "session": {
                "id": run.id,
                "status": run.status,
                "started_at": run.started_at,
            },
            "template": {
                "id": template.id,
                "title": template.title,
                "settings": template.settings_json,
            },
        })),
    ))
}

/// Light polling endpoint for the student client: proves the credential
/// still works and the run is still LIVE.
pub async fn session_status(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<(HeaderMap, Json<serde_json::Value>), ApiError> {
    let (claims, run, _) = require_student(&state, &headers).await?;

    Ok((
        no_store_headers(),
        Json(serde_json::json!({
            "ok": true,
            "run_id": run.id,
            "student_name": claims.student_name,
            "status": run.status,
        })),
    ))
}
