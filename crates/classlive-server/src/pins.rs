//! Rejoin PINs, password hashing, and student name handling
//!
//! PINs and teacher passwords go through argon2 (salted, memory-hard); only
//! hashes are ever persisted, and two hashes of the same PIN never compare
//! equal as strings.

use anyhow::anyhow;
use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use rand::Rng;

/// Numeric rejoin PIN of the configured length
pub fn generate_rejoin_pin(length: usize) -> String {
    let mut rng = rand::thread_rng();
    (0..length)
        .map(|_| char::from(b'0' + rng.gen_range(0..10u8)))
        .collect()
}

pub fn hash_secret(secret: &str) -> anyhow::Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
        .hash_password(secret.as_bytes(), &salt)
        .map_err(|e| anyhow!("hashing failed: {e}"))?;
    Ok(hash.to_string())
}

pub fn verify_secret(secret: &str, stored_hash: &str) -> bool {
    let Ok(parsed) = PasswordHash::new(stored_hash) else {
        return false;
    };
    Argon2::default()
        .verify_password(secret.as_bytes(), &parsed)
        .is_ok()
}

/// Lookup key for enrollments: trimmed, lowercased
pub fn normalize_student_name(name: &str) -> String {
    name.trim().to_lowercase()
}

/// Validates a display name and returns its normalized form
pub fn validate_student_name(name: &str) -> Result<String, String> {
    if name.trim().is_empty() {
        return Err("student name is required".to_string());
    }

    let normalized = normalize_student_name(name);

    if normalized.chars().count() > 20 {
        return Err("student name must be 20 characters or fewer".to_string());
    }

    if !normalized.chars().any(|c| c.is_alphanumeric()) {
        return Err("student name must contain letters or digits".to_string());
    }

    Ok(normalized)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pin_is_numeric_and_sized() {
        for len in [4, 6] {
            let pin = generate_rejoin_pin(len);
            assert_eq!(pin.len(), len);
            assert!(pin.chars().all(|c| c.is_ascii_digit()));
        }
    }

    #[test]
    fn test_hash_verifies_and_rejects() {
        let hash = hash_secret("7312").unwrap();
        assert!(verify_secret("7312", &hash));
        assert!(!verify_secret("7313", &hash));
    }

    #[test]
    fn test_hashes_are_salted() {
        // Same PIN, different salt: stored hashes must not be comparable
        let a = hash_secret("7312").unwrap();
        let b = hash_secret("7312").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_garbage_stored_hash_never_verifies() {
        assert!(!verify_secret("7312", "not-a-phc-string"));
    }

    #[test]
    fn test_normalization() {
        assert_eq!(normalize_student_name("  Kim Min "), "kim min");
        assert_eq!(normalize_student_name("KIM"), "kim");
    }

    #[test]
    fn test_name_validation() {
        assert_eq!(validate_student_name(" Kim "), Ok("kim".to_string()));
        assert!(validate_student_name("").is_err());
        assert!(validate_student_name("    ").is_err());
        assert!(validate_student_name("!!! ---").is_err());
        assert!(validate_student_name(&"a".repeat(21)).is_err());
        assert!(validate_student_name(&"a".repeat(20)).is_ok());
        // Non-ASCII names are fine
        assert!(validate_student_name("김민준").is_ok());
    }
}
