//! Teacher live-monitoring handlers
//!
//! Both endpoints are read-only and refuse ENDED runs with a 410 that tells
//! clients to stop polling. The snapshot window and the log limit are
//! per-request parameters with hard bounds.

use crate::api::{client_ip, no_store_headers, require_teacher};
use crate::db::queries;
use crate::error::ApiError;
use crate::guards::find_owned_run;
use crate::models::{ActivityLogMeta, RunStatus};
use crate::snapshot;
use crate::state::AppState;
use axum::{
    extract::{Path, Query, State},
    http::HeaderMap,
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

const WINDOW_SEC_MIN: i64 = 60;
const WINDOW_SEC_MAX: i64 = 3600;
const WINDOW_SEC_DEFAULT: i64 = 300;

const LOGS_LIMIT_MAX: i64 = 200;
const LOGS_LIMIT_DEFAULT: i64 = 50;

#[derive(Debug, Deserialize)]
pub struct SnapshotQuery {
    pub window_sec: Option<i64>,
}

pub async fn live_snapshot(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(run_id): Path<i64>,
    Query(query): Query<SnapshotQuery>,
) -> Result<(HeaderMap, Json<snapshot::LiveSnapshot>), ApiError> {
    let ip = client_ip(&headers);
    state.limits.snapshot.check(&format!("snapshot:{ip}"))?;

    let (teacher, _) = require_teacher(&state, &headers).await?;
    let run = find_owned_run(&state.db, run_id, teacher.id).await?;

    if run.status == RunStatus::Ended {
        return Err(ApiError::RunEnded);
    }

    let window_sec = query.window_sec.unwrap_or(WINDOW_SEC_DEFAULT);
    if !(WINDOW_SEC_MIN..=WINDOW_SEC_MAX).contains(&window_sec) {
        return Err(ApiError::Validation(format!(
            "window_sec must be between {WINDOW_SEC_MIN} and {WINDOW_SEC_MAX}"
        )));
    }

    let snap = snapshot::get_live_snapshot(&state.db, &run, window_sec).await?;
    Ok((no_store_headers(), Json(snap)))
}

#[derive(Debug, Deserialize)]
pub struct RecentLogsQuery {
    pub limit: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct RecentLogsResponse {
    pub run_id: i64,
    pub logs: Vec<ActivityLogMeta>,
}

/// Newest log metadata for a run; zero logs is an empty success
pub async fn recent_logs(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(run_id): Path<i64>,
    Query(query): Query<RecentLogsQuery>,
) -> Result<(HeaderMap, Json<RecentLogsResponse>), ApiError> {
    let ip = client_ip(&headers);
    state.limits.snapshot.check(&format!("recent-logs:{ip}"))?;

    let (teacher, _) = require_teacher(&state, &headers).await?;
    let run = find_owned_run(&state.db, run_id, teacher.id).await?;

    if run.status == RunStatus::Ended {
        return Err(ApiError::RunEnded);
    }

    let limit = query.limit.unwrap_or(LOGS_LIMIT_DEFAULT);
    if !(1..=LOGS_LIMIT_MAX).contains(&limit) {
        return Err(ApiError::Validation(format!(
            "limit must be between 1 and {LOGS_LIMIT_MAX}"
        )));
    }

    let logs = queries::get_recent_logs(&state.db, run_id, limit).await?;
    Ok((no_store_headers(), Json(RecentLogsResponse { run_id, logs })))
}
