//! Shared request guards
//!
//! Every student-facing and teacher-monitoring operation that requires an
//! active session goes through `assert_run_live`. Ownership checks are an
//! explicit (actor, resource) lookup rather than object-graph traversal.

use crate::db::{queries, DbPool};
use crate::error::ApiError;
use crate::models::{RunStatus, SessionRun};

/// Fails with 404 when the run is missing, 410 (`run_ended`, no-store) when
/// it is ENDED, 400 when it has not started. Returns the run when LIVE.
pub async fn assert_run_live(pool: &DbPool, run_id: i64) -> Result<SessionRun, ApiError> {
    let run = queries::get_run(pool, run_id)
        .await?
        .ok_or(ApiError::NotFound("run"))?;
    match run.status {
        RunStatus::Ended => Err(ApiError::RunEnded),
        RunStatus::Ready => Err(ApiError::RunNotStarted),
        RunStatus::Live => Ok(run),
    }
}

/// Resolve a run only if `teacher_id` owns its template
pub async fn find_owned_run(
    pool: &DbPool,
    run_id: i64,
    teacher_id: i64,
) -> Result<SessionRun, ApiError> {
    queries::get_owned_run(pool, run_id, teacher_id)
        .await?
        .ok_or(ApiError::NotFound("run"))
}
