//! One-way hashing for passwords and refresh tokens.
//!
//! Passwords use Argon2id (slow, salted). Refresh tokens are already
//! high-entropy signed strings, so a plain SHA-256 digest is enough to avoid
//! storing them in the clear; comparison is constant time.

use std::sync::LazyLock;

use argon2::{
    Argon2,
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString, rand_core::OsRng},
};

/// Stand-in hash for logins that have no stored password, built with the
/// same parameters as real hashes so verifying against it costs the same.
static DUMMY_HASH: LazyLock<Option<String>> =
    LazyLock::new(|| hash_password("tokenkeeper-no-such-password").ok());

/// Hash a password into a PHC string for storage.
pub fn hash_password(password: &str) -> Result<String, argon2::password_hash::Error> {
    let salt = SaltString::generate(&mut OsRng);
    Ok(Argon2::default()
        .hash_password(password.as_bytes(), &salt)?
        .to_string())
}

/// Check a password against a stored PHC string.
/// A malformed stored hash counts as a mismatch.
pub fn verify_password(password: &str, stored: &str) -> bool {
    let Ok(parsed) = PasswordHash::new(stored) else {
        tracing::warn!("Stored password hash is not a valid PHC string");
        return false;
    };
    Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok()
}

/// Check a password against a stored hash that may not exist.
///
/// Without a stored hash the password is still run through Argon2 against a
/// dummy hash and the result is always a mismatch, so an unknown account
/// takes as long to reject as a wrong password.
pub fn verify_password_or_dummy(password: &str, stored: Option<&str>) -> bool {
    match stored {
        Some(stored) => verify_password(password, stored),
        None => {
            if let Some(dummy) = DUMMY_HASH.as_deref() {
                let _ = verify_password(password, dummy);
            }
            false
        }
    }
}

/// Hex-encoded SHA-256 of a refresh token.
pub fn hash_refresh_token(token: &str) -> String {
    let digest = openssl::sha::sha256(token.as_bytes());
    digest.iter().map(|b| format!("{:02x}", b)).collect()
}

/// Compare a candidate refresh token against a stored digest without
/// leaking the position of the first differing byte.
pub fn refresh_token_matches(candidate: &str, stored_hash: &str) -> bool {
    let candidate_hash = hash_refresh_token(candidate);
    candidate_hash.len() == stored_hash.len()
        && openssl::memcmp::eq(candidate_hash.as_bytes(), stored_hash.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_password_round_trip() {
        let hash = hash_password("secret1").unwrap();
        assert!(hash.starts_with("$argon2"));
        assert!(verify_password("secret1", &hash));
        assert!(!verify_password("secret2", &hash));
    }

    #[test]
    fn test_password_hashes_are_salted() {
        let a = hash_password("secret1").unwrap();
        let b = hash_password("secret1").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_malformed_stored_hash_rejects() {
        assert!(!verify_password("secret1", "not-a-phc-string"));
    }

    #[test]
    fn test_missing_hash_never_matches() {
        assert!(!verify_password_or_dummy("secret1", None));
        assert!(!verify_password_or_dummy("tokenkeeper-no-such-password", None));

        let hash = hash_password("secret1").unwrap();
        assert!(verify_password_or_dummy("secret1", Some(&hash)));
        assert!(!verify_password_or_dummy("secret2", Some(&hash)));
    }

    #[test]
    fn test_missing_hash_costs_as_much_as_wrong_password() {
        let hash = hash_password("secret1").unwrap();
        // Build the dummy outside the measured runs
        verify_password_or_dummy("warm-up", None);

        let time = |stored: Option<&str>| {
            (0..2)
                .map(|_| {
                    let start = std::time::Instant::now();
                    verify_password_or_dummy("wrong-password", stored);
                    start.elapsed()
                })
                .min()
                .unwrap()
        };
        let missing = time(None);
        let wrong = time(Some(&hash));

        assert!(
            missing * 4 >= wrong,
            "missing hash took {:?}, wrong password {:?}",
            missing,
            wrong
        );
    }

    #[test]
    fn test_refresh_hash_is_stable_hex() {
        let a = hash_refresh_token("token-a");
        assert_eq!(a.len(), 64);
        assert_eq!(a, hash_refresh_token("token-a"));
        assert_ne!(a, hash_refresh_token("token-b"));
    }

    #[test]
    fn test_refresh_token_matches() {
        let stored = hash_refresh_token("token-a");
        assert!(refresh_token_matches("token-a", &stored));
        assert!(!refresh_token_matches("token-b", &stored));
        assert!(!refresh_token_matches("token-a", ""));
    }
}
