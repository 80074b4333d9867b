use argon2::{
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use rand::rngs::OsRng;
use tracing::error;

use crate::error::AppError;

pub const MIN_PASSWORD_LEN: usize = 8;

pub fn hash_password(plain: &str) -> anyhow::Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    let argon2 = Argon2::default();
    let hash = argon2
        .hash_password(plain.as_bytes(), &salt)
        .map_err(|e| {
            error!(error = %e, "argon2 hash_password error");
            anyhow::anyhow!(e.to_string())
        })?
        .to_string();
    Ok(hash)
}

pub fn verify_password(plain: &str, hash: &str) -> anyhow::Result<bool> {
    let parsed = PasswordHash::new(hash).map_err(|e| {
        error!(error = %e, "argon2 parse hash error");
        anyhow::anyhow!(e.to_string())
    })?;
    Ok(Argon2::default()
        .verify_password(plain.as_bytes(), &parsed)
        .is_ok())
}

/// Checks a new password and its confirmation before hashing.
pub fn check_new_password(password: &str, confirm: &str) -> Result<(), AppError> {
    let mut errors = Vec::new();
    if password.is_empty() {
        errors.push("Please, specify your password.".to_string());
    } else if password.chars().count() < MIN_PASSWORD_LEN {
        errors.push(format!(
            "A password has to be at least {MIN_PASSWORD_LEN} characters long."
        ));
    }
    if confirm.is_empty() {
        errors.push("Please, confirm you password.".into());
    } else if confirm != password {
        errors.push("Passwords do not match.".into());
    }
    if errors.is_empty() {
        Ok(())
    } else {
        Err(AppError::bad_request(format!(
            "Invalid input data. {}",
            errors.join(". ")
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_and_verify_roundtrip() {
        let password = "Secur3P@ssw0rd!";
        let hash = hash_password(password).expect("hashing should succeed");
        assert_ne!(hash, password);
        assert!(verify_password(password, &hash).expect("verify should succeed"));
    }

    #[test]
    fn verify_rejects_wrong_password() {
        let hash = hash_password("correct-horse-battery-staple").expect("hashing should succeed");
        assert!(!verify_password("wrong-password", &hash).expect("verify should not error"));
    }

    #[test]
    fn verify_errors_on_malformed_hash() {
        assert!(verify_password("anything", "not-a-valid-hash").is_err());
    }

    #[test]
    fn new_password_rules() {
        assert!(check_new_password("longenough", "longenough").is_ok());
        let short = check_new_password("short", "short").unwrap_err();
        assert!(short.to_string().contains("at least 8"));
        let mismatch = check_new_password("longenough", "different1").unwrap_err();
        assert!(mismatch.to_string().contains("Passwords do not match."));
    }
}
