//! Database schema and migrations

use anyhow::Result;
use deadpool_postgres::Object;
use tracing::info;

pub async fn run_migrations(client: &Object) -> Result<()> {
    client.batch_execute(SCHEMA_SQL).await?;
    info!("Database migrations applied");
    Ok(())
}

const SCHEMA_SQL: &str = r#"
-- Classlive Database Schema

-- Teacher accounts
CREATE TABLE IF NOT EXISTS teachers (
    id BIGSERIAL PRIMARY KEY,
    email VARCHAR(255) NOT NULL UNIQUE,
    password_hash VARCHAR(255) NOT NULL,
    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
);

-- Session templates authored by teachers
CREATE TABLE IF NOT EXISTS session_templates (
    id BIGSERIAL PRIMARY KEY,
    teacher_id BIGINT NOT NULL REFERENCES teachers(id) ON DELETE CASCADE,
    title VARCHAR(200) NOT NULL,
    settings_json JSONB NOT NULL DEFAULT '{}',
    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
);

CREATE INDEX IF NOT EXISTS idx_templates_teacher ON session_templates(teacher_id);

-- Session runs: one timed execution of a template
-- settings_snapshot_json freezes the template settings at creation time
CREATE TABLE IF NOT EXISTS session_runs (
    id BIGSERIAL PRIMARY KEY,
    template_id BIGINT NOT NULL REFERENCES session_templates(id) ON DELETE CASCADE,
    name VARCHAR(200) NOT NULL,
    status VARCHAR(16) NOT NULL DEFAULT 'READY',
    started_at TIMESTAMPTZ,
    ended_at TIMESTAMPTZ,
    settings_snapshot_json JSONB NOT NULL DEFAULT '{}',
    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
);

CREATE INDEX IF NOT EXISTS idx_session_runs_template ON session_runs(template_id);
CREATE INDEX IF NOT EXISTS idx_session_runs_status ON session_runs(status);
CREATE INDEX IF NOT EXISTS idx_session_runs_created ON session_runs(created_at DESC);

-- Join codes granting entry to a LIVE run
CREATE TABLE IF NOT EXISTS join_codes (
    id BIGSERIAL PRIMARY KEY,
    run_id BIGINT NOT NULL REFERENCES session_runs(id) ON DELETE CASCADE,
    code VARCHAR(16) NOT NULL,
    is_active BOOLEAN NOT NULL DEFAULT TRUE,
    issued_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
);

CREATE INDEX IF NOT EXISTS idx_join_codes_run ON join_codes(run_id);
CREATE INDEX IF NOT EXISTS idx_join_codes_code ON join_codes(code);

-- A code value may be reused over time, but among ACTIVE codes it is
-- globally unique. Concurrent mints race on this index and retry.
CREATE UNIQUE INDEX IF NOT EXISTS idx_join_codes_unique_active
    ON join_codes(code) WHERE is_active;

-- Student enrollments; identity is (run, normalized name, PIN hash)
CREATE TABLE IF NOT EXISTS enrollments (
    id BIGSERIAL PRIMARY KEY,
    run_id BIGINT NOT NULL REFERENCES session_runs(id) ON DELETE CASCADE,
    normalized_student_name VARCHAR(20) NOT NULL,
    rejoin_pin_hash VARCHAR(255) NOT NULL,
    joined_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    last_seen_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
);

CREATE INDEX IF NOT EXISTS idx_enrollments_run ON enrollments(run_id);

-- Concurrent first-joins with the same name race on this; the loser is
-- answered with requires_pin
CREATE UNIQUE INDEX IF NOT EXISTS idx_enrollments_unique_name_per_run
    ON enrollments(run_id, normalized_student_name);

-- Append-only student interaction logs
CREATE TABLE IF NOT EXISTS activity_logs (
    id BIGSERIAL PRIMARY KEY,
    run_id BIGINT NOT NULL REFERENCES session_runs(id) ON DELETE CASCADE,
    student_name VARCHAR(20) NOT NULL,
    activity_key VARCHAR(100) NOT NULL,
    turn_index INTEGER NOT NULL,
    student_input TEXT,
    ai_output TEXT,
    third_eval_json JSONB,
    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
);

CREATE INDEX IF NOT EXISTS idx_activity_logs_run ON activity_logs(run_id);
CREATE INDEX IF NOT EXISTS idx_activity_logs_student ON activity_logs(run_id, student_name);
CREATE INDEX IF NOT EXISTS idx_activity_logs_created ON activity_logs(run_id, created_at DESC);

-- One row per logical step; duplicate submissions become 409s
CREATE UNIQUE INDEX IF NOT EXISTS uq_activity_logs_run_student_activity_turn
    ON activity_logs(run_id, student_name, activity_key, turn_index);
"#;
