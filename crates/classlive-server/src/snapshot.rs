//! Live snapshot aggregation
//!
//! Presence and activity statistics are derived on demand from current
//! stored state. The window is a per-request parameter, so nothing
//! window-dependent is ever cached: two concurrent snapshots with different
//! windows are each computed from scratch.

use crate::db::{queries, DbPool};
use crate::error::ApiError;
use crate::models::{Enrollment, RunStatus, SessionRun};
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::collections::HashMap;

#[derive(Debug, Clone, Serialize)]
pub struct StudentDetail {
    pub student_name: String,
    pub last_seen_at: DateTime<Utc>,
    pub turns_total: i64,
    pub last_activity_key: Option<String>,
    pub last_turn_index: Option<i32>,
    pub last_activity_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct LiveSnapshot {
    pub run_id: i64,
    pub status: RunStatus,
    pub window_sec: i64,
    pub joined_total: i64,
    pub active_recent: i64,
    pub idle_recent: i64,
    pub students: Vec<StudentDetail>,
}

/// Pure aggregation over already-fetched rows. `enrollments` arrive ordered
/// most-recently-seen first and that order is preserved in the output.
pub fn build_snapshot(
    run: &SessionRun,
    enrollments: &[Enrollment],
    stats: Vec<queries::StudentActivityStat>,
    window_sec: i64,
    now: DateTime<Utc>,
) -> LiveSnapshot {
    let threshold = now - Duration::seconds(window_sec);

    let joined_total = enrollments.len() as i64;
    let active_recent = enrollments
        .iter()
        .filter(|e| e.last_seen_at >= threshold)
        .count() as i64;

    let mut by_student: HashMap<String, queries::StudentActivityStat> = stats
        .into_iter()
        .map(|s| (s.student_name.clone(), s))
        .collect();

    let students = enrollments
        .iter()
        .map(|e| match by_student.remove(&e.normalized_student_name) {
            Some(stat) => StudentDetail {
                student_name: e.normalized_student_name.clone(),
                last_seen_at: e.last_seen_at,
                turns_total: stat.turns_total,
                last_activity_key: Some(stat.last_activity_key),
                last_turn_index: Some(stat.last_turn_index),
                last_activity_at: Some(stat.last_activity_at),
            },
            None => StudentDetail {
                student_name: e.normalized_student_name.clone(),
                last_seen_at: e.last_seen_at,
                turns_total: 0,
                last_activity_key: None,
                last_turn_index: None,
                last_activity_at: None,
            },
        })
        .collect();

    LiveSnapshot {
        run_id: run.id,
        status: run.status,
        window_sec,
        joined_total,
        active_recent,
        // Never negative: active_recent counts a subset of enrollments
        idle_recent: joined_total - active_recent,
        students,
    }
}

/// Fetch-and-aggregate entry point used by the API layer
pub async fn get_live_snapshot(
    pool: &DbPool,
    run: &SessionRun,
    window_sec: i64,
) -> Result<LiveSnapshot, ApiError> {
    let enrollments = queries::get_enrollments_by_recency(pool, run.id).await?;
    let stats = queries::get_student_activity_stats(pool, run.id).await?;
    Ok(build_snapshot(run, &enrollments, stats, window_sec, Utc::now()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::queries::StudentActivityStat;

    fn run(status: RunStatus) -> SessionRun {
        SessionRun {
            id: 1,
            template_id: 1,
            name: "quiz".into(),
            status,
            started_at: Some(Utc::now()),
            ended_at: None,
            settings_snapshot_json: serde_json::json!({}),
            created_at: Utc::now(),
        }
    }

    fn enrollment(id: i64, name: &str, last_seen: DateTime<Utc>) -> Enrollment {
        Enrollment {
            id,
            run_id: 1,
            normalized_student_name: name.into(),
            rejoin_pin_hash: "hash".into(),
            joined_at: last_seen,
            last_seen_at: last_seen,
        }
    }

    #[test]
    fn test_window_splits_active_and_idle() {
        let now = Utc::now();
        let enrollments = vec![
            enrollment(1, "kim", now - Duration::seconds(60)),
            enrollment(2, "lee", now - Duration::seconds(600)),
        ];

        let snap = build_snapshot(&run(RunStatus::Live), &enrollments, vec![], 300, now);
        assert_eq!(snap.joined_total, 2);
        assert_eq!(snap.active_recent, 1);
        assert_eq!(snap.idle_recent, 1);

        // Same rows, tighter window: nobody is recent
        let snap = build_snapshot(&run(RunStatus::Live), &enrollments, vec![], 120, now);
        assert_eq!(snap.active_recent, 0);
        assert_eq!(snap.idle_recent, 2);
    }

    #[test]
    fn test_boundary_last_seen_counts_as_active() {
        let now = Utc::now();
        let enrollments = vec![enrollment(1, "kim", now - Duration::seconds(300))];
        let snap = build_snapshot(&run(RunStatus::Live), &enrollments, vec![], 300, now);
        assert_eq!(snap.active_recent, 1);
    }

    #[test]
    fn test_silent_student_reports_nulls() {
        let now = Utc::now();
        let enrollments = vec![enrollment(1, "kim", now)];
        let snap = build_snapshot(&run(RunStatus::Live), &enrollments, vec![], 300, now);
        let kim = &snap.students[0];
        assert_eq!(kim.turns_total, 0);
        assert!(kim.last_activity_key.is_none());
        assert!(kim.last_turn_index.is_none());
        assert!(kim.last_activity_at.is_none());
    }

    #[test]
    fn test_stats_attach_to_the_right_student() {
        let now = Utc::now();
        let enrollments = vec![
            enrollment(1, "kim", now),
            enrollment(2, "lee", now - Duration::seconds(10)),
        ];
        let stats = vec![StudentActivityStat {
            student_name: "lee".into(),
            turns_total: 3,
            last_activity_key: "writing.step2".into(),
            last_turn_index: 2,
            last_activity_at: now - Duration::seconds(15),
        }];

        let snap = build_snapshot(&run(RunStatus::Live), &enrollments, stats, 300, now);
        assert_eq!(snap.students[0].student_name, "kim");
        assert_eq!(snap.students[0].turns_total, 0);
        assert_eq!(snap.students[1].student_name, "lee");
        assert_eq!(snap.students[1].turns_total, 3);
        assert_eq!(
            snap.students[1].last_activity_key.as_deref(),
            Some("writing.step2")
        );
        assert_eq!(snap.students[1].last_turn_index, Some(2));
    }

    #[test]
    fn test_student_order_follows_recency() {
        let now = Utc::now();
        // Input order is the query's last_seen DESC order; output preserves it
        let enrollments = vec![
            enrollment(2, "lee", now),
            enrollment(1, "kim", now - Duration::seconds(120)),
        ];
        let snap = build_snapshot(&run(RunStatus::Live), &enrollments, vec![], 300, now);
        let names: Vec<&str> = snap
            .students
            .iter()
            .map(|s| s.student_name.as_str())
            .collect();
        assert_eq!(names, vec!["lee", "kim"]);
    }

    #[test]
    fn test_empty_run_snapshot() {
        let snap = build_snapshot(&run(RunStatus::Live), &[], vec![], 300, Utc::now());
        assert_eq!(snap.joined_total, 0);
        assert_eq!(snap.active_recent, 0);
        assert_eq!(snap.idle_recent, 0);
        assert!(snap.students.is_empty());
    }
}
