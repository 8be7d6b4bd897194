//! Student join handler
//!
//! One endpoint covers first join and rejoin. A first join discloses the
//! rejoin PIN exactly once; a rejoin verifies it and never echoes it back.
//! The losing side of a concurrent first-join race gets the same
//! requires_pin answer a legitimate second joiner would see.

use crate::api::{client_ip, no_store_headers};
use crate::db::queries::{self, FirstJoinOutcome};
use crate::error::{is_unique_violation, ApiError};
use crate::guards::assert_run_live;
use crate::models::{JoinRequest, JoinResponse};
use crate::pins;
use crate::state::AppState;
use axum::{extract::State, http::HeaderMap, Json};
use std::sync::Arc;
use tracing::{info, warn};

pub async fn join(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<JoinRequest>,
) -> Result<(HeaderMap, Json<JoinResponse>), ApiError> {
    let ip = client_ip(&headers);
    state.limits.join.check(&ip)?;

    let settings = &state.settings;

    // Format checks fail fast, before any storage access
    if req.code.len() != settings.code_length {
        warn!(ip = %ip, code_len = req.code.len(), "Join with malformed code");
        return Err(ApiError::Validation("enter a valid join code".into()));
    }
    let normalized_name =
        pins::validate_student_name(&req.student_name).map_err(ApiError::Validation)?;

    let run = queries::find_run_by_active_code(&state.db, &req.code)
        .await?
        .ok_or_else(|| {
            warn!(ip = %ip, "Join with unknown or inactive code");
            ApiError::CodeInvalid
        })?;

    // An active code normally implies LIVE; the guard still decides
    let run = assert_run_live(&state.db, run.id).await?;

    let existing = queries::find_enrollment(&state.db, run.id, &normalized_name).await?;

    if let Some(enrollment) = existing {
        return rejoin(&state, &headers, run.id, enrollment, &req).await;
    }

    // First join: capacity is enforced inside the insert transaction
    let rejoin_pin = pins::generate_rejoin_pin(settings.rejoin_pin_length);
    let pin_hash = pins::hash_secret(&rejoin_pin)?;

    let enrollment = match queries::insert_enrollment(
        &state.db,
        run.id,
        &normalized_name,
        &pin_hash,
        settings.max_students_per_run,
    )
    .await
    {
        Ok(FirstJoinOutcome::Created(enrollment)) => enrollment,
        Ok(FirstJoinOutcome::CapacityExceeded) => {
            warn!(run_id = run.id, ip = %ip, "Join rejected, run at capacity");
            return Err(ApiError::CapacityExceeded);
        }
        // Lost the first-join race for this name: same answer as any
        // returning student, never a 500
        Err(e) if is_unique_violation(&e) => {
            return Err(ApiError::RequiresPin {
                pin_length: settings.rejoin_pin_length,
            });
        }
        Err(e) => return Err(ApiError::Internal(e)),
    };

    let activity_token =
        state
            .tokens
            .issue_activity(run.id, enrollment.id, &normalized_name)?;

    info!(run_id = run.id, student = %normalized_name, ip = %ip, "Student joined");

    Ok((
        no_store_headers(),
        Json(JoinResponse {
            ok: true,
            run_id: run.id,
            student_name: req.student_name,
            // Disclosed this once; only the hash survives
            rejoin_pin: Some(rejoin_pin),
            activity_token,
        }),
    ))
}

async fn rejoin(
    state: &AppState,
    headers: &HeaderMap,
    run_id: i64,
    enrollment: crate::models::Enrollment,
    req: &JoinRequest,
) -> Result<(HeaderMap, Json<JoinResponse>), ApiError> {
    let settings = &state.settings;
    let ip = client_ip(headers);

    let Some(pin) = req.rejoin_pin.as_deref() else {
        return Err(ApiError::RequiresPin {
            pin_length: settings.rejoin_pin_length,
        });
    };

    // Format mismatch is distinguishable from a wrong PIN
    if pin.len() != settings.rejoin_pin_length {
        warn!(run_id, ip = %ip, pin_len = pin.len(), "Rejoin with malformed PIN");
        return Err(ApiError::PinFormat {
            pin_length: settings.rejoin_pin_length,
        });
    }

    if !pins::verify_secret(pin, &enrollment.rejoin_pin_hash) {
        warn!(run_id, student = %enrollment.normalized_student_name, ip = %ip, "Rejoin PIN verification failed");
        return Err(ApiError::AuthenticationFailed);
    }

    queries::touch_enrollment(&state.db, enrollment.id).await?;

    let activity_token = state.tokens.issue_activity(
        run_id,
        enrollment.id,
        &enrollment.normalized_student_name,
    )?;

    info!(run_id, student = %enrollment.normalized_student_name, ip = %ip, "Student rejoined");

    Ok((
        no_store_headers(),
        Json(JoinResponse {
            ok: true,
            run_id,
            student_name: req.student_name.clone(),
            rejoin_pin: None,
            activity_token,
        }),
    ))
}
