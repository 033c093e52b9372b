use anyhow::{anyhow, Result};
use argon2::{
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use once_cell::sync::Lazy;
use rand::rngs::OsRng;

/// Hash checked against when a login has no stored hash to compare with, so
/// that path costs roughly as much as a wrong password.
static DUMMY_HASH: Lazy<Option<String>> =
    Lazy::new(|| hash_password("friendtime-placeholder-password").ok());

pub fn hash_password(password: &str) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    Ok(Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|err| anyhow!("failed to hash password: {err}"))?
        .to_string())
}

pub fn verify_password(password: &str, password_hash: &str) -> Result<bool> {
    let parsed_hash = PasswordHash::new(password_hash).map_err(|err| anyhow!(err))?;
    Ok(Argon2::default()
        .verify_password(password.as_bytes(), &parsed_hash)
        .is_ok())
}

pub fn verify_dummy(password: &str) {
    if let Some(hash) = DUMMY_HASH.as_deref() {
        let _ = verify_password(password, hash);
    }
}

/// Checks a login attempt against an account's stored hash. Unknown accounts
/// and accounts without a password pass `None` and still pay for one
/// verification before being refused.
pub fn verify_login(password: &str, password_hash: Option<&str>) -> Result<bool> {
    match password_hash {
        Some(hash) => verify_password(password, hash),
        None => {
            verify_dummy(password);
            Ok(false)
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Instant;

    use super::*;

    #[test]
    fn hash_then_verify() {
        let hash = hash_password("correct horse battery").unwrap();
        assert!(hash.starts_with("$argon2"));
        assert!(verify_password("correct horse battery", &hash).unwrap());
        assert!(!verify_password("wrong horse battery", &hash).unwrap());
    }

    #[test]
    fn hashes_are_salted() {
        let first = hash_password("same password").unwrap();
        let second = hash_password("same password").unwrap();
        assert_ne!(first, second);
    }

    #[test]
    fn malformed_hash_is_an_error() {
        assert!(verify_password("anything", "not-a-phc-string").is_err());
    }

    #[test]
    fn dummy_verification_is_available() {
        assert!(DUMMY_HASH.is_some());
        verify_dummy("whatever");
    }

    #[test]
    fn login_without_a_hash_is_refused() {
        let hash = hash_password("correct horse battery").unwrap();
        assert!(verify_login("correct horse battery", Some(&hash)).unwrap());
        assert!(!verify_login("wrong horse battery", Some(&hash)).unwrap());
        assert!(!verify_login("correct horse battery", None).unwrap());
    }

    #[test]
    fn login_without_a_hash_costs_a_verification() {
        let hash = hash_password("correct horse battery").unwrap();
        // Warm the dummy hash so its one-off hashing cost is not measured.
        Lazy::force(&DUMMY_HASH);

        let started = Instant::now();
        verify_login("wrong horse battery", Some(&hash)).unwrap();
        let with_hash = started.elapsed();

        let started = Instant::now();
        verify_login("wrong horse battery", None).unwrap();
        let without_hash = started.elapsed();

        assert!(
            without_hash * 4 >= with_hash,
            "{without_hash:?} vs {with_hash:?}"
        );
    }
}
