//! Runtime settings shared across handlers

/// Tunables for the session core. Defaults match the values the classroom
/// frontend expects; everything is overridable from the CLI/env in `main`.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Join code length in characters
    pub code_length: usize,
    /// Alphabet the join codes are drawn from
    pub join_code_alphabet: String,
    /// Bounded retries when minting a join code collides
    pub code_mint_max_retries: u32,
    /// Maximum enrollments per run
    pub max_students_per_run: i64,
    /// Rejoin PIN length in digits
    pub rejoin_pin_length: usize,
    /// Teacher session token lifetime in hours
    pub session_exp_hours: i64,
    /// Refresh the session token when less than this many hours remain
    pub session_refresh_threshold_hours: i64,
    /// Minimum teacher password length
    pub min_teacher_password_len: usize,
    /// HS256 secret for teacher session tokens
    pub session_secret: String,
    /// HS256 secret for student activity tokens
    pub activity_token_secret: String,
    /// Rate limits, requests per minute
    pub join_rate_per_min: u32,
    pub login_rate_per_min: u32,
    pub activity_rate_per_min: u32,
    pub snapshot_rate_per_min: u32,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            code_length: 6,
            join_code_alphabet: "0123456789".to_string(),
            code_mint_max_retries: 10,
            max_students_per_run: 60,
            rejoin_pin_length: 4,
            session_exp_hours: 12,
            session_refresh_threshold_hours: 3,
            min_teacher_password_len: 6,
            session_secret: "change-me-session-secret".to_string(),
            activity_token_secret: "change-me-activity-secret".to_string(),
            join_rate_per_min: 30,
            login_rate_per_min: 5,
            activity_rate_per_min: 120,
            snapshot_rate_per_min: 12,
        }
    }
}
