//! Bearer credentials for teachers and students
//!
//! Two independent HS256 credentials:
//! - teacher session token: carries an expiry and supports sliding refresh
//!   when it gets close to expiring;
//! - student activity token: carries no expiry claim at all; it is valid
//!   exactly as long as its run is not ENDED, which the run-liveness guard
//!   enforces on every authenticated request.

use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use tracing::warn;

const SESSION_TYPE: &str = "session";
const ACTIVITY_TYPE: &str = "activity_token";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionClaims {
    pub teacher_id: i64,
    pub iat: i64,
    pub exp: i64,
    #[serde(rename = "type")]
    pub token_type: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivityClaims {
    pub run_id: i64,
    pub enrollment_id: i64,
    /// Normalized student name the enrollment was created under
    pub student_name: String,
    pub iat: i64,
    #[serde(rename = "type")]
    pub token_type: String,
}

pub struct TokenSigner {
    session_encoding: EncodingKey,
    session_decoding: DecodingKey,
    activity_encoding: EncodingKey,
    activity_decoding: DecodingKey,
    session_exp_hours: i64,
    refresh_threshold_hours: i64,
}

impl TokenSigner {
    pub fn new(settings: &crate::config::Settings) -> Self {
        Self {
            session_encoding: EncodingKey::from_secret(settings.session_secret.as_bytes()),
            session_decoding: DecodingKey::from_secret(settings.session_secret.as_bytes()),
            activity_encoding: EncodingKey::from_secret(
                settings.activity_token_secret.as_bytes(),
            ),
            activity_decoding: DecodingKey::from_secret(
                settings.activity_token_secret.as_bytes(),
            ),
            session_exp_hours: settings.session_exp_hours,
            refresh_threshold_hours: settings.session_refresh_threshold_hours,
        }
    }

    pub fn issue_session(&self, teacher_id: i64) -> anyhow::Result<String> {
        let now = Utc::now();
        let claims = SessionClaims {
            teacher_id,
            iat: now.timestamp(),
            exp: (now + Duration::hours(self.session_exp_hours)).timestamp(),
            token_type: SESSION_TYPE.to_string(),
        };
        Ok(encode(&Header::default(), &claims, &self.session_encoding)?)
    }

    /// Signature, expiry and type tag must all hold
    pub fn verify_session(&self, token: &str) -> Option<SessionClaims> {
        let validation = Validation::new(Algorithm::HS256);
        let data = decode::<SessionClaims>(token, &self.session_decoding, &validation)
            .map_err(|e| warn!(error = %e, "session token rejected"))
            .ok()?;
        if data.claims.token_type != SESSION_TYPE {
            warn!(token_type = %data.claims.token_type, "wrong token type for session");
            return None;
        }
        Some(data.claims)
    }

    /// Sliding refresh: true when less than the configured threshold remains
    pub fn should_refresh(&self, claims: &SessionClaims) -> bool {
        let remaining = claims.exp - Utc::now().timestamp();
        remaining < self.refresh_threshold_hours * 3600
    }

    pub fn issue_activity(
        &self,
        run_id: i64,
        enrollment_id: i64,
        student_name: &str,
    ) -> anyhow::Result<String> {
        let claims = ActivityClaims {
            run_id,
            enrollment_id,
            student_name: student_name.to_string(),
            iat: Utc::now().timestamp(),
            token_type: ACTIVITY_TYPE.to_string(),
        };
        Ok(encode(&Header::default(), &claims, &self.activity_encoding)?)
    }

    pub fn verify_activity(&self, token: &str) -> Option<ActivityClaims> {
        // No exp claim on activity tokens; run liveness is checked per request
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = false;
        validation.required_spec_claims.clear();
        let data = decode::<ActivityClaims>(token, &self.activity_decoding, &validation)
            .map_err(|e| warn!(error = %e, "activity token rejected"))
            .ok()?;
        if data.claims.token_type != ACTIVITY_TYPE {
            warn!(token_type = %data.claims.token_type, "wrong token type for activity");
            return None;
        }
        if data.claims.student_name.is_empty() {
            return None;
        }
        Some(data.claims)
    }
}

/// Pull the token out of an `Authorization: Bearer <token>` header value
pub fn extract_bearer(authorization: Option<&str>) -> Option<&str> {
    let value = authorization?;
    let (scheme, token) = value.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") || token.is_empty() {
        return None;
    }
    Some(token.trim())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;

    fn signer() -> TokenSigner {
        TokenSigner::new(&Settings::default())
    }

    #[test]
    fn test_session_round_trip() {
        let signer = signer();
        let token = signer.issue_session(42).unwrap();
        let claims = signer.verify_session(&token).unwrap();
        assert_eq!(claims.teacher_id, 42);
        assert_eq!(claims.token_type, "session");
        assert!(claims.exp > claims.iat);
    }

    #[test]
    fn test_activity_round_trip() {
        let signer = signer();
        let token = signer.issue_activity(7, 13, "kim").unwrap();
        let claims = signer.verify_activity(&token).unwrap();
        assert_eq!(claims.run_id, 7);
        assert_eq!(claims.enrollment_id, 13);
        assert_eq!(claims.student_name, "kim");
    }

    #[test]
    fn test_type_tags_are_not_interchangeable() {
        let signer = signer();
        let session = signer.issue_session(1).unwrap();
        let activity = signer.issue_activity(1, 1, "kim").unwrap();
        // Different secrets and different type tags; neither crosses over
        assert!(signer.verify_activity(&session).is_none());
        assert!(signer.verify_session(&activity).is_none());
    }

    #[test]
    fn test_tampered_token_rejected() {
        let signer = signer();
        let mut token = signer.issue_session(1).unwrap();
        token.pop();
        token.push('x');
        assert!(signer.verify_session(&token).is_none());
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let signer = signer();
        let other = TokenSigner::new(&Settings {
            session_secret: "different".into(),
            activity_token_secret: "also-different".into(),
            ..Settings::default()
        });
        let token = signer.issue_session(1).unwrap();
        assert!(other.verify_session(&token).is_none());
    }

    #[test]
    fn test_fresh_session_does_not_refresh() {
        let signer = signer();
        let token = signer.issue_session(1).unwrap();
        let claims = signer.verify_session(&token).unwrap();
        // 12h lifetime, 3h threshold: a brand new token is nowhere near it
        assert!(!signer.should_refresh(&claims));
    }

    #[test]
    fn test_near_expiry_session_refreshes() {
        let signer = signer();
        let claims = SessionClaims {
            teacher_id: 1,
            iat: Utc::now().timestamp() - 3600,
            exp: Utc::now().timestamp() + 600,
            token_type: "session".into(),
        };
        assert!(signer.should_refresh(&claims));
    }

    #[test]
    fn test_extract_bearer() {
        assert_eq!(extract_bearer(Some("Bearer abc")), Some("abc"));
        assert_eq!(extract_bearer(Some("bearer abc")), Some("abc"));
        assert_eq!(extract_bearer(Some("Basic abc")), None);
        assert_eq!(extract_bearer(Some("Bearer")), None);
        assert_eq!(extract_bearer(None), None);
    }
}
