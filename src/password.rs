use chrono::{Datelike, Utc};
use rand::{Rng, seq::SliceRandom};

use crate::{error::ApiError, models::Role};

/// bcrypt work factor for stored password hashes.
pub const PASSWORD_HASH_COST: u32 = 12;

const GENERATED_PASSWORD_LEN: usize = 8;
const LOWERCASE: &[u8] = b"abcdefghijklmnopqrstuvwxyz";
const UPPERCASE: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ";
const DIGITS: &[u8] = b"0123456789";
const SYMBOLS: &[u8] = b"!@#$%^&*";

/// hash_password
///
/// Runs on the blocking pool; bcrypt is CPU-bound.
pub async fn hash_password(password: String, cost: u32) -> Result<String, ApiError> {
    tokio::task::spawn_blocking(move || bcrypt::hash(password, cost))
        .await
        .map_err(|e| ApiError::Internal(format!("password hashing task failed: {e}")))?
        .map_err(|e| ApiError::Internal(format!("password hashing failed: {e}")))
}

/// verify_password
///
/// A hash that cannot be parsed counts as a mismatch, so a corrupt record reads as
/// invalid credentials rather than a server error.
pub async fn verify_password(password: String, hash: String) -> Result<bool, ApiError> {
    let verified = tokio::task::spawn_blocking(move || bcrypt::verify(password, &hash))
        .await
        .map_err(|e| ApiError::Internal(format!("password verification task failed: {e}")))?;

    match verified {
        Ok(matches) => Ok(matches),
        Err(e) => {
            tracing::warn!(error = %e, "stored password hash could not be verified");
            Ok(false)
        }
    }
}

/// Eight characters with at least one lowercase letter, uppercase letter, digit and symbol.
pub fn generate_password() -> String {
    let mut rng = rand::thread_rng();
    let all: Vec<u8> = [LOWERCASE, UPPERCASE, DIGITS, SYMBOLS].concat();

    let mut chars: Vec<u8> = [LOWERCASE, UPPERCASE, DIGITS, SYMBOLS]
        .iter()
        .map(|set| set[rng.gen_range(0..set.len())])
        .collect();
    while chars.len() < GENERATED_PASSWORD_LEN {
        chars.push(all[rng.gen_range(0..all.len())]);
    }
    chars.shuffle(&mut rng);

    chars.into_iter().map(char::from).collect()
}

/// Role prefix, current year and four random digits, e.g. `STU20261234`.
pub fn generate_reg_no(role: Role) -> String {
    let digits: u16 = rand::thread_rng().gen_range(1000..10000);
    format!("{}{}{}", role.reg_no_prefix(), Utc::now().year(), digits)
}
