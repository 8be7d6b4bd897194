//! Database queries (PostgreSQL)
//!
//! Everything here is raw SQL through the pool. Inserts that back a
//! multi-row invariant (active join codes, enrollment names, activity
//! turns) are issued optimistically; the unique constraint decides the
//! race and the caller translates SQLSTATE 23505 into a domain error.

use crate::models::{
    ActivityLog, ActivityLogMeta, Enrollment, JoinCode, RunStatus, SessionRun, SessionTemplate,
    Teacher,
};
use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use deadpool_postgres::Pool;
use tokio_postgres::types::ToSql;
use tokio_postgres::Row;

// ============================================================================
// ROW MAPPING
// ============================================================================

fn teacher_from_row(row: &Row) -> Teacher {
    Teacher {
        id: row.get(0),
        email: row.get(1),
        password_hash: row.get(2),
        created_at: row.get(3),
    }
}

fn template_from_row(row: &Row) -> SessionTemplate {
    SessionTemplate {
        id: row.get(0),
        teacher_id: row.get(1),
        title: row.get(2),
        settings_json: row.get(3),
        created_at: row.get(4),
    }
}

fn run_from_row(row: &Row) -> Result<SessionRun> {
    let status: String = row.get(3);
    Ok(SessionRun {
        id: row.get(0),
        template_id: row.get(1),
        name: row.get(2),
        status: RunStatus::parse(&status)
            .ok_or_else(|| anyhow!("unknown run status in storage: {status}"))?,
        started_at: row.get(4),
        ended_at: row.get(5),
        settings_snapshot_json: row.get(6),
        created_at: row.get(7),
    })
}

fn activity_log_from_row(row: &Row) -> ActivityLog {
    ActivityLog {
        id: row.get(0),
        run_id: row.get(1),
        student_name: row.get(2),
        activity_key: row.get(3),
        turn_index: row.get(4),
        student_input: row.get(5),
        ai_output: row.get(6),
        third_eval_json: row.get(7),
        created_at: row.get(8),
    }
}

fn enrollment_from_row(row: &Row) -> Enrollment {
    Enrollment {
        id: row.get(0),
        run_id: row.get(1),
        normalized_student_name: row.get(2),
        rejoin_pin_hash: row.get(3),
        joined_at: row.get(4),
        last_seen_at: row.get(5),
    }
}

const RUN_COLS: &str =
    "id, template_id, name, status, started_at, ended_at, settings_snapshot_json, created_at";
const ENROLLMENT_COLS: &str =
    "id, run_id, normalized_student_name, rejoin_pin_hash, joined_at, last_seen_at";
const LOG_COLS: &str = "id, run_id, student_name, activity_key, turn_index, \
                        student_input, ai_output, third_eval_json, created_at";

// ============================================================================
// TEACHERS
// ============================================================================

pub async fn create_teacher(pool: &Pool, email: &str, password_hash: &str) -> Result<Teacher> {
    let client = pool.get().await?;
    let row = client
        .query_one(
            "INSERT INTO teachers (email, password_hash) VALUES ($1, $2)
             RETURNING id, email, password_hash, created_at",
            &[&email, &password_hash],
        )
        .await?;
    Ok(teacher_from_row(&row))
}

pub async fn get_teacher_by_email(pool: &Pool, email: &str) -> Result<Option<Teacher>> {
    let client = pool.get().await?;
    let row = client
        .query_opt(
            "SELECT id, email, password_hash, created_at FROM teachers WHERE email = $1",
            &[&email],
        )
        .await?;
    Ok(row.map(|r| teacher_from_row(&r)))
}

pub async fn get_teacher(pool: &Pool, teacher_id: i64) -> Result<Option<Teacher>> {
    let client = pool.get().await?;
    let row = client
        .query_opt(
            "SELECT id, email, password_hash, created_at FROM teachers WHERE id = $1",
            &[&teacher_id],
        )
        .await?;
    Ok(row.map(|r| teacher_from_row(&r)))
}

// ============================================================================
// TEMPLATES
// ============================================================================

pub async fn create_template(
    pool: &Pool,
    teacher_id: i64,
    title: &str,
    settings: &serde_json::Value,
) -> Result<SessionTemplate> {
    let client = pool.get().await?;
    let row = client
        .query_one(
            "INSERT INTO session_templates (teacher_id, title, settings_json)
             VALUES ($1, $2, $3)
             RETURNING id, teacher_id, title, settings_json, created_at",
            &[&teacher_id, &title, settings],
        )
        .await?;
    Ok(template_from_row(&row))
}

/// Unfiltered lookup; student session info needs the template of a run the
/// student is enrolled in, which no teacher credential covers.
pub async fn get_template(pool: &Pool, template_id: i64) -> Result<Option<SessionTemplate>> {
    let client = pool.get().await?;
    let row = client
        .query_opt(
            "SELECT id, teacher_id, title, settings_json, created_at
             FROM session_templates WHERE id = $1",
            &[&template_id],
        )
        .await?;
    Ok(row.map(|r| template_from_row(&r)))
}

/// Ownership is an explicit predicate here, not object-graph traversal
pub async fn get_owned_template(
    pool: &Pool,
    template_id: i64,
    teacher_id: i64,
) -> Result<Option<SessionTemplate>> {
    let client = pool.get().await?;
    let row = client
        .query_opt(
            "SELECT id, teacher_id, title, settings_json, created_at
             FROM session_templates WHERE id = $1 AND teacher_id = $2",
            &[&template_id, &teacher_id],
        )
        .await?;
    Ok(row.map(|r| template_from_row(&r)))
}

pub async fn list_templates(pool: &Pool, teacher_id: i64) -> Result<Vec<SessionTemplate>> {
    let client = pool.get().await?;
    let rows = client
        .query(
            "SELECT id, teacher_id, title, settings_json, created_at
             FROM session_templates WHERE teacher_id = $1 ORDER BY created_at DESC",
            &[&teacher_id],
        )
        .await?;
    Ok(rows.iter().map(template_from_row).collect())
}

// ============================================================================
// RUNS
// ============================================================================

pub async fn create_run(
    pool: &Pool,
    template_id: i64,
    name: &str,
    settings_snapshot: &serde_json::Value,
) -> Result<SessionRun> {
    let client = pool.get().await?;
    let row = client
        .query_one(
            &format!(
                "INSERT INTO session_runs (template_id, name, status, settings_snapshot_json)
                 VALUES ($1, $2, 'READY', $3) RETURNING {RUN_COLS}"
            ),
            &[&template_id, &name, settings_snapshot],
        )
        .await?;
    run_from_row(&row)
}

pub async fn get_run(pool: &Pool, run_id: i64) -> Result<Option<SessionRun>> {
    let client = pool.get().await?;
    let row = client
        .query_opt(
            &format!("SELECT {RUN_COLS} FROM session_runs WHERE id = $1"),
            &[&run_id],
        )
        .await?;
    row.map(|r| run_from_row(&r)).transpose()
}

/// Run visible only to the teacher owning its template (explicit join)
pub async fn get_owned_run(
    pool: &Pool,
    run_id: i64,
    teacher_id: i64,
) -> Result<Option<SessionRun>> {
    let client = pool.get().await?;
    let row = client
        .query_opt(
            "SELECT r.id, r.template_id, r.name, r.status, r.started_at, r.ended_at,
                    r.settings_snapshot_json, r.created_at
             FROM session_runs r
             JOIN session_templates t ON t.id = r.template_id
             WHERE r.id = $1 AND t.teacher_id = $2",
            &[&run_id, &teacher_id],
        )
        .await?;
    row.map(|r| run_from_row(&r)).transpose()
}

/// Conditional READY→LIVE transition. Returns the updated run, or None when
/// the run was not in READY (caller reads the current status to answer).
pub async fn try_start_run(pool: &Pool, run_id: i64) -> Result<Option<SessionRun>> {
    let client = pool.get().await?;
    let row = client
        .query_opt(
            &format!(
                "UPDATE session_runs SET status = 'LIVE', started_at = NOW()
                 WHERE id = $1 AND status = 'READY' RETURNING {RUN_COLS}"
            ),
            &[&run_id],
        )
        .await?;
    row.map(|r| run_from_row(&r)).transpose()
}

/// LIVE→ENDED plus code deactivation in one transaction. Returns None when
/// the run was not LIVE (idempotent callers re-read the row instead).
pub async fn try_end_run(pool: &Pool, run_id: i64) -> Result<Option<SessionRun>> {
    let mut client = pool.get().await?;
    let tx = client.transaction().await?;

    let row = tx
        .query_opt(
            &format!(
                "UPDATE session_runs SET status = 'ENDED', ended_at = NOW()
                 WHERE id = $1 AND status = 'LIVE' RETURNING {RUN_COLS}"
            ),
            &[&run_id],
        )
        .await?;

    let Some(row) = row else {
        return Ok(None);
    };

    tx.execute(
        "UPDATE join_codes SET is_active = FALSE WHERE run_id = $1 AND is_active",
        &[&run_id],
    )
    .await?;

    tx.commit().await?;
    run_from_row(&row).map(Some)
}

pub async fn list_runs(
    pool: &Pool,
    teacher_id: i64,
    template_id: Option<i64>,
    status: Option<RunStatus>,
    page: i64,
    size: i64,
) -> Result<(Vec<SessionRun>, i64)> {
    let client = pool.get().await?;

    let status_str = status.map(|s| s.as_str().to_string());
    let mut conditions = vec!["t.teacher_id = $1".to_string()];
    let mut params: Vec<&(dyn ToSql + Sync)> = vec![&teacher_id];

    if let Some(tid) = template_id.as_ref() {
        params.push(tid);
        conditions.push(format!("r.template_id = ${}", params.len()));
    }
    if let Some(s) = status_str.as_ref() {
        params.push(s);
        conditions.push(format!("r.status = ${}", params.len()));
    }
    let where_clause = conditions.join(" AND ");

    let total: i64 = client
        .query_one(
            &format!(
                "SELECT COUNT(*) FROM session_runs r
                 JOIN session_templates t ON t.id = r.template_id
                 WHERE {where_clause}"
            ),
            &params,
        )
        .await?
        .get(0);

    let offset = (page - 1) * size;
    params.push(&size);
    let limit_pos = params.len();
    params.push(&offset);
    let offset_pos = params.len();

    let rows = client
        .query(
            &format!(
                "SELECT r.id, r.template_id, r.name, r.status, r.started_at, r.ended_at,
                        r.settings_snapshot_json, r.created_at
                 FROM session_runs r
                 JOIN session_templates t ON t.id = r.template_id
                 WHERE {where_clause}
                 ORDER BY r.created_at DESC LIMIT ${limit_pos} OFFSET ${offset_pos}"
            ),
            &params,
        )
        .await?;

    let runs = rows
        .iter()
        .map(run_from_row)
        .collect::<Result<Vec<_>>>()?;
    Ok((runs, total))
}

// ============================================================================
// JOIN CODES
// ============================================================================

/// Optimistic insert; a 23505 from the partial unique index on active codes
/// means the candidate collided and the caller should retry.
pub async fn insert_join_code(pool: &Pool, run_id: i64, code: &str) -> Result<()> {
    let client = pool.get().await?;
    client
        .execute(
            "INSERT INTO join_codes (run_id, code, is_active) VALUES ($1, $2, TRUE)",
            &[&run_id, &code],
        )
        .await?;
    Ok(())
}

pub async fn get_active_code(pool: &Pool, run_id: i64) -> Result<Option<JoinCode>> {
    let client = pool.get().await?;
    let row = client
        .query_opt(
            "SELECT id, run_id, code, is_active, issued_at
             FROM join_codes WHERE run_id = $1 AND is_active",
            &[&run_id],
        )
        .await?;
    Ok(row.map(|r| JoinCode {
        id: r.get(0),
        run_id: r.get(1),
        code: r.get(2),
        is_active: r.get(3),
        issued_at: r.get(4),
    }))
}

/// Resolve an active code to its run, if any
pub async fn find_run_by_active_code(pool: &Pool, code: &str) -> Result<Option<SessionRun>> {
    let client = pool.get().await?;
    let row = client
        .query_opt(
            "SELECT r.id, r.template_id, r.name, r.status, r.started_at, r.ended_at,
                    r.settings_snapshot_json, r.created_at
             FROM join_codes c
             JOIN session_runs r ON r.id = c.run_id
             WHERE c.code = $1 AND c.is_active",
            &[&code],
        )
        .await?;
    row.map(|r| run_from_row(&r)).transpose()
}

// ============================================================================
// ENROLLMENTS
// ============================================================================

pub async fn find_enrollment(
    pool: &Pool,
    run_id: i64,
    normalized_name: &str,
) -> Result<Option<Enrollment>> {
    let client = pool.get().await?;
    let row = client
        .query_opt(
            &format!(
                "SELECT {ENROLLMENT_COLS} FROM enrollments
                 WHERE run_id = $1 AND normalized_student_name = $2"
            ),
            &[&run_id, &normalized_name],
        )
        .await?;
    Ok(row.map(|r| enrollment_from_row(&r)))
}

/// Enrollment matched against every field of an activity credential; a
/// mismatch on any of them means the credential no longer applies.
pub async fn find_enrollment_for_credential(
    pool: &Pool,
    enrollment_id: i64,
    run_id: i64,
    normalized_name: &str,
) -> Result<Option<Enrollment>> {
    let client = pool.get().await?;
    let row = client
        .query_opt(
            &format!(
                "SELECT {ENROLLMENT_COLS} FROM enrollments
                 WHERE id = $1 AND run_id = $2 AND normalized_student_name = $3"
            ),
            &[&enrollment_id, &run_id, &normalized_name],
        )
        .await?;
    Ok(row.map(|r| enrollment_from_row(&r)))
}

pub async fn touch_enrollment(pool: &Pool, enrollment_id: i64) -> Result<()> {
    let client = pool.get().await?;
    client
        .execute(
            "UPDATE enrollments SET last_seen_at = NOW() WHERE id = $1",
            &[&enrollment_id],
        )
        .await?;
    Ok(())
}

pub enum FirstJoinOutcome {
    Created(Enrollment),
    CapacityExceeded,
}

/// First-join insert with capacity enforced atomically: the transaction
/// locks the run row, so concurrent first-joins for one run serialize and
/// the count cannot be overtaken between check and insert. The unique name
/// index remains the backstop; its 23505 propagates to the caller.
pub async fn insert_enrollment(
    pool: &Pool,
    run_id: i64,
    normalized_name: &str,
    pin_hash: &str,
    capacity: i64,
) -> Result<FirstJoinOutcome> {
    let mut client = pool.get().await?;
    let tx = client.transaction().await?;

    tx.query_opt(
        "SELECT id FROM session_runs WHERE id = $1 FOR UPDATE",
        &[&run_id],
    )
    .await?;

    let count: i64 = tx
        .query_one(
            "SELECT COUNT(*) FROM enrollments WHERE run_id = $1",
            &[&run_id],
        )
        .await?
        .get(0);

    if count >= capacity {
        return Ok(FirstJoinOutcome::CapacityExceeded);
    }

    let row = tx
        .query_one(
            &format!(
                "INSERT INTO enrollments (run_id, normalized_student_name, rejoin_pin_hash)
                 VALUES ($1, $2, $3) RETURNING {ENROLLMENT_COLS}"
            ),
            &[&run_id, &normalized_name, &pin_hash],
        )
        .await?;

    tx.commit().await?;
    Ok(FirstJoinOutcome::Created(enrollment_from_row(&row)))
}

// ============================================================================
// ACTIVITY LOGS
// ============================================================================

/// Append-only insert; duplicate (run, student, activity, turn) propagates
/// as 23505 for the caller to turn into a 409.
pub async fn insert_activity_log(
    pool: &Pool,
    run_id: i64,
    student_name: &str,
    activity_key: &str,
    turn_index: i32,
    student_input: Option<&str>,
    ai_output: Option<&str>,
    third_eval_json: Option<&serde_json::Value>,
) -> Result<ActivityLog> {
    let client = pool.get().await?;
    let row = client
        .query_one(
            &format!(
                "INSERT INTO activity_logs
                     (run_id, student_name, activity_key, turn_index,
                      student_input, ai_output, third_eval_json)
                 VALUES ($1, $2, $3, $4, $5, $6, $7)
                 RETURNING {LOG_COLS}"
            ),
            &[
                &run_id,
                &student_name,
                &activity_key,
                &turn_index,
                &student_input,
                &ai_output,
                &third_eval_json,
            ],
        )
        .await?;
    Ok(activity_log_from_row(&row))
}

/// Full-content log page for a run, newest first, optionally filtered to one
/// student. This is the teacher's post-session review view; content fields
/// are included, unlike the live metadata projection.
pub async fn list_activity_logs(
    pool: &Pool,
    run_id: i64,
    student_name: Option<&str>,
    page: i64,
    size: i64,
) -> Result<(Vec<ActivityLog>, i64)> {
    let client = pool.get().await?;

    let mut conditions = vec!["run_id = $1".to_string()];
    let mut params: Vec<&(dyn ToSql + Sync)> = vec![&run_id];

    if let Some(name) = student_name.as_ref() {
        params.push(name);
        conditions.push(format!("student_name = ${}", params.len()));
    }
    let where_clause = conditions.join(" AND ");

    let total: i64 = client
        .query_one(
            &format!("SELECT COUNT(*) FROM activity_logs WHERE {where_clause}"),
            &params,
        )
        .await?
        .get(0);

    let offset = (page - 1) * size;
    params.push(&size);
    let limit_pos = params.len();
    params.push(&offset);
    let offset_pos = params.len();

    let rows = client
        .query(
            &format!(
                "SELECT {LOG_COLS} FROM activity_logs WHERE {where_clause}
                 ORDER BY created_at DESC, id DESC LIMIT ${limit_pos} OFFSET ${offset_pos}"
            ),
            &params,
        )
        .await?;

    Ok((rows.iter().map(activity_log_from_row).collect(), total))
}

/// Whole-run totals for the post-session statistics view. A "turn" here is
/// a log row carrying actual student input; assistant-only rows don't count.
#[derive(Debug, Clone)]
pub struct RunStatistics {
    pub student_count: i64,
    pub total_turns: i64,
    pub student_turns: Vec<(String, i64)>,
    pub latest_activity: Option<DateTime<Utc>>,
}

pub async fn get_run_statistics(pool: &Pool, run_id: i64) -> Result<RunStatistics> {
    let client = pool.get().await?;

    let student_count: i64 = client
        .query_one(
            "SELECT COUNT(*) FROM enrollments WHERE run_id = $1",
            &[&run_id],
        )
        .await?
        .get(0);

    let total_turns: i64 = client
        .query_one(
            "SELECT COUNT(*) FROM activity_logs
             WHERE run_id = $1 AND student_input IS NOT NULL AND student_input <> ''",
            &[&run_id],
        )
        .await?
        .get(0);

    let student_turns = client
        .query(
            "SELECT student_name, COUNT(*) FROM activity_logs
             WHERE run_id = $1 AND student_input IS NOT NULL AND student_input <> ''
             GROUP BY student_name ORDER BY student_name",
            &[&run_id],
        )
        .await?
        .iter()
        .map(|r| (r.get(0), r.get(1)))
        .collect();

    let latest_activity = client
        .query_opt(
            "SELECT created_at FROM activity_logs WHERE run_id = $1
             ORDER BY created_at DESC LIMIT 1",
            &[&run_id],
        )
        .await?
        .map(|r| r.get(0));

    Ok(RunStatistics {
        student_count,
        total_turns,
        student_turns,
        latest_activity,
    })
}

// ============================================================================
// LIVE SNAPSHOT PROJECTIONS
// ============================================================================

/// Per-student activity totals plus the most recent log, newest decided by
/// created_at, ties by highest turn_index, then insertion order.
#[derive(Debug, Clone)]
pub struct StudentActivityStat {
    pub student_name: String,
    pub turns_total: i64,
    pub last_activity_key: String,
    pub last_turn_index: i32,
    pub last_activity_at: DateTime<Utc>,
}

pub async fn get_student_activity_stats(
    pool: &Pool,
    run_id: i64,
) -> Result<Vec<StudentActivityStat>> {
    let client = pool.get().await?;
    let rows = client
        .query(
            "SELECT t.student_name, t.turns_total, l.activity_key, l.turn_index, l.created_at
             FROM (
                 SELECT student_name, COUNT(*) AS turns_total
                 FROM activity_logs WHERE run_id = $1
                 GROUP BY student_name
             ) t
             JOIN LATERAL (
                 SELECT activity_key, turn_index, created_at
                 FROM activity_logs
                 WHERE run_id = $1 AND student_name = t.student_name
                 ORDER BY created_at DESC, turn_index DESC, id DESC
                 LIMIT 1
             ) l ON TRUE",
            &[&run_id],
        )
        .await?;
    Ok(rows
        .iter()
        .map(|r| StudentActivityStat {
            student_name: r.get(0),
            turns_total: r.get(1),
            last_activity_key: r.get(2),
            last_turn_index: r.get(3),
            last_activity_at: r.get(4),
        })
        .collect())
}

/// Enrollments for a run, most recently seen first
pub async fn get_enrollments_by_recency(pool: &Pool, run_id: i64) -> Result<Vec<Enrollment>> {
    let client = pool.get().await?;
    let rows = client
        .query(
            &format!(
                "SELECT {ENROLLMENT_COLS} FROM enrollments
                 WHERE run_id = $1 ORDER BY last_seen_at DESC, id ASC"
            ),
            &[&run_id],
        )
        .await?;
    Ok(rows.iter().map(enrollment_from_row).collect())
}

/// Metadata-only view of the newest logs; content fields deliberately
/// never leave this projection.
pub async fn get_recent_logs(
    pool: &Pool,
    run_id: i64,
    limit: i64,
) -> Result<Vec<ActivityLogMeta>> {
    let client = pool.get().await?;
    let rows = client
        .query(
            "SELECT student_name, activity_key, turn_index, created_at
             FROM activity_logs WHERE run_id = $1
             ORDER BY created_at DESC, id DESC LIMIT $2",
            &[&run_id, &limit],
        )
        .await?;
    Ok(rows
        .iter()
        .map(|r| ActivityLogMeta {
            student_name: r.get(0),
            activity_key: r.get(1),
            turn_index: r.get(2),
            created_at: r.get(3),
        })
        .collect())
}
