//! Run lifecycle handlers: READY → LIVE → ENDED
//!
//! Transitions are conditional UPDATEs; when one matches zero rows the
//! current status decides which conflict the caller hears about. Ending is
//! idempotent: a second end returns the stored terminal state unchanged.

use crate::api::{no_store_headers, require_teacher};
use crate::codes;
use crate::db::queries;
use crate::error::ApiError;
use crate::guards::find_owned_run;
use crate::models::{
    ActivityLog, CodeResponse, RunCreateRequest, RunEndResponse, RunListResponse, RunResponse,
    RunStatus, SessionRun, StartRunResponse,
};
use crate::state::AppState;
use axum::{
    extract::{Path, Query, State},
    http::HeaderMap,
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

pub async fn create_run(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<RunCreateRequest>,
) -> Result<Json<RunResponse>, ApiError> {
    let (teacher, _) = require_teacher(&state, &headers).await?;

    let name = req.name.trim();
    if name.is_empty() {
        return Err(ApiError::Validation("run name is required".into()));
    }
    if name.chars().count() > 200 {
        return Err(ApiError::Validation(
            "run name must be 200 characters or fewer".into(),
        ));
    }

    let template = queries::get_owned_template(&state.db, req.template_id, teacher.id)
        .await?
        .ok_or(ApiError::NotFound("template"))?;

    // Freeze the template settings; later edits never touch this run
    let run =
        queries::create_run(&state.db, template.id, name, &template.settings_json).await?;

    info!(
        run_id = run.id,
        template_id = template.id,
        "Run created (READY)"
    );
    Ok(Json(RunResponse::from(&run)))
}

pub async fn start_run(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(run_id): Path<i64>,
) -> Result<Json<StartRunResponse>, ApiError> {
    let (teacher, _) = require_teacher(&state, &headers).await?;
    let run = find_owned_run(&state.db, run_id, teacher.id).await?;

    if !run.status.can_transition_to(RunStatus::Live) {
        return Err(match run.status {
            RunStatus::Live => ApiError::AlreadyLive,
            _ => ApiError::AlreadyEnded,
        });
    }

    // Conditional UPDATE decides races with a concurrent start
    let Some(run) = queries::try_start_run(&state.db, run_id).await? else {
        // Zero rows matched: answer by what the run is now
        let current = queries::get_run(&state.db, run_id)
            .await?
            .ok_or(ApiError::NotFound("run"))?;
        return Err(match current.status {
            RunStatus::Live => ApiError::AlreadyLive,
            RunStatus::Ended => ApiError::AlreadyEnded,
            RunStatus::Ready => {
                ApiError::Internal(anyhow::anyhow!("start transition matched no rows"))
            }
        });
    };

    let code = codes::mint_join_code(&state.db, run.id, &state.settings).await?;
    info!(run_id = run.id, code = %code, "Run started (LIVE)");

    Ok(Json(StartRunResponse { ok: true, code }))
}

pub async fn get_run_code(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(run_id): Path<i64>,
) -> Result<Json<CodeResponse>, ApiError> {
    let (teacher, _) = require_teacher(&state, &headers).await?;
    let run = find_owned_run(&state.db, run_id, teacher.id).await?;

    match run.status {
        RunStatus::Ready => return Err(ApiError::RunNotStarted),
        RunStatus::Ended => return Err(ApiError::RunEnded),
        RunStatus::Live => {}
    }

    let join_code = queries::get_active_code(&state.db, run_id)
        .await?
        .ok_or(ApiError::NotFound("active code"))?;

    Ok(Json(CodeResponse {
        code: join_code.code,
    }))
}

/// What end() should do given the run's current state. Separated out so the
/// idempotence contract is checkable on its own: a second end must return
/// the stored terminal state unchanged.
#[derive(Debug, PartialEq)]
enum EndDecision {
    /// Already ENDED; answer with the stored end time, change nothing
    AlreadyEnded(DateTime<Utc>),
    Proceed,
}

fn decide_end(run: &SessionRun) -> Result<EndDecision, ApiError> {
    match run.status {
        RunStatus::Ended => {
            let ended_at = run
                .ended_at
                .ok_or_else(|| anyhow::anyhow!("ended run missing ended_at"))?;
            Ok(EndDecision::AlreadyEnded(ended_at))
        }
        RunStatus::Ready => Err(ApiError::NeverStarted),
        RunStatus::Live => Ok(EndDecision::Proceed),
    }
}

pub async fn end_run(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(run_id): Path<i64>,
) -> Result<(HeaderMap, Json<RunEndResponse>), ApiError> {
    let (teacher, _) = require_teacher(&state, &headers).await?;
    let run = find_owned_run(&state.db, run_id, teacher.id).await?;

    if let EndDecision::AlreadyEnded(ended_at) = decide_end(&run)? {
        info!(run_id, "End requested on ended run, idempotent success");
        return Ok((
            no_store_headers(),
            Json(RunEndResponse {
                run_id,
                status: run.status,
                ended_at,
            }),
        ));
    }

    let ended = match queries::try_end_run(&state.db, run_id).await? {
        Some(run) => run,
        // Lost a race with a concurrent end; the terminal state already holds
        None => queries::get_run(&state.db, run_id)
            .await?
            .filter(|r| r.status == RunStatus::Ended)
            .ok_or_else(|| anyhow::anyhow!("end transition matched no rows"))?,
    };

    info!(
        run_id,
        teacher_id = teacher.id,
        ended_at = ?ended.ended_at,
        "Run ended, codes deactivated"
    );

    Ok((
        no_store_headers(),
        Json(RunEndResponse {
            run_id,
            status: ended.status,
            ended_at: ended
                .ended_at
                .ok_or_else(|| anyhow::anyhow!("ended run missing ended_at"))?,
        }),
    ))
}

#[derive(Debug, Deserialize)]
pub struct ListRunsQuery {
    pub template_id: Option<i64>,
    pub status: Option<String>,
    pub page: Option<i64>,
    pub size: Option<i64>,
}

pub async fn list_runs(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<ListRunsQuery>,
) -> Result<Json<RunListResponse>, ApiError> {
    let (teacher, _) = require_teacher(&state, &headers).await?;

    let status = match query.status.as_deref() {
        None => None,
        Some(s) => Some(
            RunStatus::parse(&s.to_uppercase())
                .ok_or_else(|| ApiError::Validation("invalid status filter".into()))?,
        ),
    };

    let page = query.page.unwrap_or(1).max(1);
    let size = query.size.unwrap_or(20).clamp(1, 100);

    let (runs, total) =
        queries::list_runs(&state.db, teacher.id, query.template_id, status, page, size).await?;

    Ok(Json(RunListResponse {
        runs: runs.iter().map(RunResponse::from).collect(),
        total,
        page,
        size,
    }))
}

#[derive(Debug, Serialize)]
pub struct StudentTurnCount {
    pub student_name: String,
    pub turn_count: i64,
}

#[derive(Debug, Serialize)]
pub struct RunStatisticsResponse {
    pub run_id: i64,
    pub student_count: i64,
    pub total_turns: i64,
    pub student_turns: Vec<StudentTurnCount>,
    pub latest_activity: Option<DateTime<Utc>>,
}

/// Post-session review totals. Works for any run state; a teacher looks at
/// these after ending the run, so no liveness guard here.
pub async fn run_statistics(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(run_id): Path<i64>,
) -> Result<Json<RunStatisticsResponse>, ApiError> {
    let (teacher, _) = require_teacher(&state, &headers).await?;
    find_owned_run(&state.db, run_id, teacher.id).await?;

    let stats = queries::get_run_statistics(&state.db, run_id).await?;

    Ok(Json(RunStatisticsResponse {
        run_id,
        student_count: stats.student_count,
        total_turns: stats.total_turns,
        student_turns: stats
            .student_turns
            .into_iter()
            .map(|(student_name, turn_count)| StudentTurnCount {
                student_name,
                turn_count,
            })
            .collect(),
        latest_activity: stats.latest_activity,
    }))
}

#[derive(Debug, Deserialize)]
pub struct RunActivityLogsQuery {
    pub student_name: Option<String>,
    pub page: Option<i64>,
    pub size: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct RunActivityLogsResponse {
    pub logs: Vec<ActivityLog>,
    pub total: i64,
    pub page: i64,
    pub size: i64,
    pub has_next: bool,
}

/// Full-content log pages for review, newest first, optionally one student.
/// Content is teacher-visible here, unlike the live metadata feed.
pub async fn run_activity_logs(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(run_id): Path<i64>,
    Query(query): Query<RunActivityLogsQuery>,
) -> Result<Json<RunActivityLogsResponse>, ApiError> {
    let (teacher, _) = require_teacher(&state, &headers).await?;
    find_owned_run(&state.db, run_id, teacher.id).await?;

    let page = query.page.unwrap_or(1).max(1);
    let size = query.size.unwrap_or(50).clamp(1, 100);

    let (logs, total) = queries::list_activity_logs(
        &state.db,
        run_id,
        query.student_name.as_deref(),
        page,
        size,
    )
    .await?;

    Ok(Json(RunActivityLogsResponse {
        logs,
        total,
        page,
        size,
        has_next: total > page * size,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(status: RunStatus, ended_at: Option<DateTime<Utc>>) -> SessionRun {
        SessionRun {
            id: 1,
            template_id: 1,
            name: "quiz".into(),
            status,
            started_at: Some(Utc::now()),
            ended_at,
            settings_snapshot_json: serde_json::json!({}),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_end_is_idempotent_on_ended_run() {
        let at = Utc::now();
        let ended = run(RunStatus::Ended, Some(at));
        // Every repeated end sees the same stored terminal state
        assert_eq!(decide_end(&ended).unwrap(), EndDecision::AlreadyEnded(at));
        assert_eq!(decide_end(&ended).unwrap(), EndDecision::AlreadyEnded(at));
    }

    #[test]
    fn test_end_on_ready_run_is_never_started() {
        let err = decide_end(&run(RunStatus::Ready, None)).unwrap_err();
        assert!(matches!(err, ApiError::NeverStarted));
    }

    #[test]
    fn test_end_on_live_run_proceeds() {
        assert_eq!(
            decide_end(&run(RunStatus::Live, None)).unwrap(),
            EndDecision::Proceed
        );
    }
}
