//! Data models for the Classlive server

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// TEACHER
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Teacher {
    pub id: i64,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TeacherInfo {
    pub id: i64,
    pub email: String,
}

impl From<&Teacher> for TeacherInfo {
    fn from(t: &Teacher) -> Self {
        Self {
            id: t.id,
            email: t.email.clone(),
        }
    }
}

// ============================================================================
// TEMPLATE
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionTemplate {
    pub id: i64,
    pub teacher_id: i64,
    pub title: String,
    pub settings_json: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

// ============================================================================
// RUN
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
    Ready,
    Live,
    Ended,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Ready => "READY",
            RunStatus::Live => "LIVE",
            RunStatus::Ended => "ENDED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "READY" => Some(RunStatus::Ready),
            "LIVE" => Some(RunStatus::Live),
            "ENDED" => Some(RunStatus::Ended),
            _ => None,
        }
    }

    /// Legal transitions: READY → LIVE → ENDED. ENDED is terminal and a run
    /// never regresses.
    pub fn can_transition_to(&self, next: RunStatus) -> bool {
        matches!(
            (self, next),
            (RunStatus::Ready, RunStatus::Live) | (RunStatus::Live, RunStatus::Ended)
        )
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One execution instance of a template. `settings_snapshot_json` is frozen
/// at creation time so later template edits never touch a run in flight.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRun {
    pub id: i64,
    pub template_id: i64,
    pub name: String,
    pub status: RunStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub settings_snapshot_json: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

// ============================================================================
// JOIN CODE
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JoinCode {
    pub id: i64,
    pub run_id: i64,
    pub code: String,
    pub is_active: bool,
    pub issued_at: DateTime<Utc>,
}

// ============================================================================
// ENROLLMENT
// ============================================================================

/// A student's identity inside one run. There are no student accounts:
/// identity is (run, normalized name, PIN hash).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Enrollment {
    pub id: i64,
    pub run_id: i64,
    pub normalized_student_name: String,
    #[serde(skip_serializing)]
    pub rejoin_pin_hash: String,
    pub joined_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
}

// ============================================================================
// ACTIVITY LOG
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivityLog {
    pub id: i64,
    pub run_id: i64,
    pub student_name: String,
    pub activity_key: String,
    pub turn_index: i32,
    pub student_input: Option<String>,
    pub ai_output: Option<String>,
    pub third_eval_json: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

/// Metadata-only projection used by teacher monitoring. Content fields stay
/// out of this view on purpose.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivityLogMeta {
    pub student_name: String,
    pub activity_key: String,
    pub turn_index: i32,
    pub created_at: DateTime<Utc>,
}

// ============================================================================
// REQUEST / RESPONSE TYPES
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct RegisterRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct LoginResponse {
    pub ok: bool,
    pub session_token: String,
    pub teacher: TeacherInfo,
}

#[derive(Debug, Clone, Serialize)]
pub struct MeResponse {
    pub teacher: TeacherInfo,
    /// Present when the current token is close to expiry (sliding refresh)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refreshed_session_token: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TemplateCreateRequest {
    pub title: String,
    #[serde(default)]
    pub settings: serde_json::Value,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RunCreateRequest {
    pub template_id: i64,
    pub name: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunResponse {
    pub id: i64,
    pub template_id: i64,
    pub name: String,
    pub status: RunStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl From<&SessionRun> for RunResponse {
    fn from(run: &SessionRun) -> Self {
        Self {
            id: run.id,
            template_id: run.template_id,
            name: run.name.clone(),
            status: run.status,
            started_at: run.started_at,
            ended_at: run.ended_at,
            created_at: run.created_at,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StartRunResponse {
    pub ok: bool,
    pub code: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct CodeResponse {
    pub code: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunEndResponse {
    pub run_id: i64,
    pub status: RunStatus,
    pub ended_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunListResponse {
    pub runs: Vec<RunResponse>,
    pub total: i64,
    pub page: i64,
    pub size: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct JoinRequest {
    pub code: String,
    pub student_name: String,
    /// Only supplied on rejoin
    pub rejoin_pin: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct JoinResponse {
    pub ok: bool,
    pub run_id: i64,
    /// Original display name, echoed back unnormalized
    pub student_name: String,
    /// Disclosed exactly once, on first join
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rejoin_pin: Option<String>,
    pub activity_token: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ActivityLogRequest {
    pub activity_key: String,
    pub turn_index: i32,
    pub student_input: Option<String>,
    pub ai_output: Option<String>,
    pub third_eval_json: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ActivityLogResponse {
    pub ok: bool,
    pub saved: SavedActivity,
}

#[derive(Debug, Clone, Serialize)]
pub struct SavedActivity {
    pub log_id: i64,
    pub activity_key: String,
    pub turn_index: i32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trip() {
        for s in [RunStatus::Ready, RunStatus::Live, RunStatus::Ended] {
            assert_eq!(RunStatus::parse(s.as_str()), Some(s));
        }
        assert_eq!(RunStatus::parse("PAUSED"), None);
    }

    #[test]
    fn test_legal_transitions() {
        assert!(RunStatus::Ready.can_transition_to(RunStatus::Live));
        assert!(RunStatus::Live.can_transition_to(RunStatus::Ended));
    }

    #[test]
    fn test_illegal_transitions() {
        // ENDED is terminal, and a run never regresses
        assert!(!RunStatus::Ended.can_transition_to(RunStatus::Live));
        assert!(!RunStatus::Ended.can_transition_to(RunStatus::Ready));
        assert!(!RunStatus::Live.can_transition_to(RunStatus::Ready));
        assert!(!RunStatus::Ready.can_transition_to(RunStatus::Ended));
        assert!(!RunStatus::Ready.can_transition_to(RunStatus::Ready));
    }

    #[test]
    fn test_pin_hash_never_serialized() {
        let enrollment = Enrollment {
            id: 1,
            run_id: 7,
            normalized_student_name: "kim".to_string(),
            rejoin_pin_hash: "$argon2id$...".to_string(),
            joined_at: Utc::now(),
            last_seen_at: Utc::now(),
        };
        let json = serde_json::to_string(&enrollment).unwrap();
        assert!(!json.contains("argon2id"));
        assert!(!json.contains("rejoin_pin_hash"));
    }
}
