//! Password hashing and the minimal password policy for shopper accounts.

use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum PasswordPolicyError {
    #[error("Password too short: minimum {min_length} characters required")]
    TooShort { min_length: usize },

    #[error("Password too long: maximum {max_length} characters allowed")]
    TooLong { max_length: usize },

    #[error("Password is in the list of commonly used passwords")]
    CommonPassword,

    #[error("Password contains repeated characters")]
    RepeatedChars,
}

const COMMON_PASSWORDS: &[&str] = &[
    "password",
    "password1",
    "12345678",
    "123456789",
    "qwertyuiop",
    "iloveyou",
    "letmein1",
    "welcome1",
];

#[derive(Debug, Clone)]
pub struct PasswordPolicy {
    pub min_length: usize,
    pub max_length: usize,
}

impl Default for PasswordPolicy {
    fn default() -> Self {
        Self {
            min_length: 8,
            max_length: 128,
        }
    }
}

impl PasswordPolicy {
    pub fn validate(&self, password: &str) -> Result<(), PasswordPolicyError> {
        let length = password.chars().count();
        if length < self.min_length {
            return Err(PasswordPolicyError::TooShort {
                min_length: self.min_length,
            });
        }
        if length > self.max_length {
            return Err(PasswordPolicyError::TooLong {
                max_length: self.max_length,
            });
        }

        let lower = password.to_lowercase();
        if COMMON_PASSWORDS.contains(&lower.as_str()) {
            return Err(PasswordPolicyError::CommonPassword);
        }

        let mut chars = password.chars();
        if let Some(first) = chars.next() {
            if chars.all(|c| c == first) {
                return Err(PasswordPolicyError::RepeatedChars);
            }
        }

        Ok(())
    }
}

/// Argon2id PHC string for `password` with a fresh random salt.
pub fn hash_password(password: &str) -> Result<String, argon2::password_hash::Error> {
    let salt = SaltString::generate(&mut OsRng);
    Ok(Argon2::default()
        .hash_password(password.as_bytes(), &salt)?
        .to_string())
}

/// False for a wrong password and for an unparseable stored hash.
pub fn verify_password(password: &str, stored_hash: &str) -> bool {
    match PasswordHash::new(stored_hash) {
        Ok(parsed) => Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok(),
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn hash_round_trips_and_salts() {
        let a = hash_password("emerald-cut-42").unwrap();
        let b = hash_password("emerald-cut-42").unwrap();
        assert_ne!(a, b);
        assert!(a.starts_with("$argon2id$"));
        assert!(verify_password("emerald-cut-42", &a));
        assert!(!verify_password("emerald-cut-43", &a));
    }

    #[test]
    fn garbage_hash_never_verifies() {
        assert!(!verify_password("anything", "not-a-phc-string"));
    }

    #[rstest]
    #[case("short", Err(PasswordPolicyError::TooShort { min_length: 8 }))]
    #[case("Password", Err(PasswordPolicyError::CommonPassword))]
    #[case("aaaaaaaaaa", Err(PasswordPolicyError::RepeatedChars))]
    #[case("sapphire-ring", Ok(()))]
    fn policy_cases(#[case] password: &str, #[case] expected: Result<(), PasswordPolicyError>) {
        assert_eq!(PasswordPolicy::default().validate(password), expected);
    }

    #[test]
    fn overly_long_password_is_rejected() {
        let long = "x1".repeat(100);
        assert_eq!(
            PasswordPolicy::default().validate(&long),
            Err(PasswordPolicyError::TooLong { max_length: 128 })
        );
    }
}
