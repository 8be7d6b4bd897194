//! Join-code generation and minting
//!
//! A candidate code is random; global uniqueness among *active* codes is
//! enforced by a partial unique index at commit time, not by a pre-check.
//! Collisions are expected and retried with a fresh candidate up to the
//! configured budget.

use crate::config::Settings;
use crate::db::{queries, DbPool};
use crate::error::{is_unique_violation, ApiError};
use rand::Rng;
use tracing::{error, info, warn};

/// Fixed-length code drawn uniformly from the configured alphabet
pub fn generate_join_code(settings: &Settings) -> String {
    let alphabet: Vec<char> = settings.join_code_alphabet.chars().collect();
    let mut rng = rand::thread_rng();
    (0..settings.code_length)
        .map(|_| alphabet[rng.gen_range(0..alphabet.len())])
        .collect()
}

/// Insert a new active join code for `run_id`, retrying on collision with
/// another active code. Exhausting the retry budget is a retryable server
/// fault, not something the caller can fix.
pub async fn mint_join_code(
    pool: &DbPool,
    run_id: i64,
    settings: &Settings,
) -> Result<String, ApiError> {
    for attempt in 1..=settings.code_mint_max_retries {
        let code = generate_join_code(settings);
        match queries::insert_join_code(pool, run_id, &code).await {
            Ok(()) => {
                info!(run_id, code = %code, "Minted join code");
                return Ok(code);
            }
            Err(e) if is_unique_violation(&e) => {
                warn!(
                    run_id,
                    attempt,
                    max = settings.code_mint_max_retries,
                    "Join code collision, retrying"
                );
            }
            Err(e) => return Err(ApiError::Internal(e)),
        }
    }

    error!(
        run_id,
        retries = settings.code_mint_max_retries,
        "Join code space exhausted after max retries"
    );
    Err(ApiError::CodeGenerationExhausted)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_code_length_and_alphabet() {
        let settings = Settings::default();
        for _ in 0..100 {
            let code = generate_join_code(&settings);
            assert_eq!(code.len(), settings.code_length);
            assert!(code.chars().all(|c| c.is_ascii_digit()));
        }
    }

    #[test]
    fn test_custom_alphabet() {
        let settings = Settings {
            join_code_alphabet: "AB".to_string(),
            code_length: 8,
            ..Settings::default()
        };
        let code = generate_join_code(&settings);
        assert_eq!(code.len(), 8);
        assert!(code.chars().all(|c| c == 'A' || c == 'B'));
    }
}
