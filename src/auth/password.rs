//! Password hashing.
//!
//! Current scheme is Argon2id. A legacy `sha256$<salt>$<hex>` scheme from the
//! pre-migration system still verifies; callers rehash on successful legacy
//! verification so the old hashes age out.

use argon2::{
    password_hash::{
        PasswordHash, PasswordHasher as Argon2PasswordHasher, PasswordVerifier, SaltString,
    },
    Argon2, Params,
};
use rand::rngs::OsRng;
use sha2::{Digest, Sha256};

pub struct PasswordService;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerifyOutcome {
    /// Matched under the current scheme.
    Valid,
    /// Matched under the legacy scheme; the stored hash should be replaced.
    ValidNeedsRehash,
    Invalid,
}

impl VerifyOutcome {
    pub fn is_valid(&self) -> bool {
        !matches!(self, VerifyOutcome::Invalid)
    }
}

impl PasswordService {
    pub fn hash_password(password: &str) -> Result<String, argon2::password_hash::Error> {
        Self::hash_password_with_cost(password, 12)
    }

    /// The cost parameter controls Argon2 memory usage (KiB = 2^cost),
    /// capped at 4 GiB.
    pub fn hash_password_with_cost(
        password: &str,
        memory_cost_log2: u32,
    ) -> Result<String, argon2::password_hash::Error> {
        let salt = SaltString::generate(&mut OsRng);

        let m_cost = 1u32 << memory_cost_log2.min(22);
        let params =
            Params::new(m_cost, 3, 1, None).map_err(|_| argon2::password_hash::Error::Algorithm)?;

        let argon2 = Argon2::new(argon2::Algorithm::Argon2id, argon2::Version::V0x13, params);
        let password_hash = argon2.hash_password(password.as_bytes(), &salt)?;
        Ok(password_hash.to_string())
    }

    pub fn verify_password(
        password: &str,
        stored_hash: &str,
    ) -> Result<VerifyOutcome, argon2::password_hash::Error> {
        if let Some(rest) = stored_hash.strip_prefix("sha256$") {
            return Ok(Self::verify_legacy(password, rest));
        }

        let parsed_hash = PasswordHash::new(stored_hash)?;
        let argon2 = Argon2::default();
        match argon2.verify_password(password.as_bytes(), &parsed_hash) {
            Ok(_) => Ok(VerifyOutcome::Valid),
            Err(argon2::password_hash::Error::Password) => Ok(VerifyOutcome::Invalid),
            Err(e) => Err(e),
        }
    }

    fn verify_legacy(password: &str, rest: &str) -> VerifyOutcome {
        let Some((salt, expected_hex)) = rest.split_once('$') else {
            return VerifyOutcome::Invalid;
        };

        let mut hasher = Sha256::new();
        hasher.update(salt.as_bytes());
        hasher.update(password.as_bytes());
        let computed = hex::encode(hasher.finalize());

        // Constant-time comparison; both sides are fixed-length hex.
        let expected = expected_hex.as_bytes();
        let computed = computed.as_bytes();
        if expected.len() != computed.len() {
            return VerifyOutcome::Invalid;
        }
        let mut diff = 0u8;
        for (a, b) in expected.iter().zip(computed.iter()) {
            diff |= a ^ b;
        }
        if diff == 0 {
            VerifyOutcome::ValidNeedsRehash
        } else {
            VerifyOutcome::Invalid
        }
    }

    /// Builds a legacy-format hash. Only used by fixtures and tests.
    pub fn legacy_hash(password: &str, salt: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(salt.as_bytes());
        hasher.update(password.as_bytes());
        format!("sha256${}${}", salt, hex::encode(hasher.finalize()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_and_verify_password() {
        let hash = PasswordService::hash_password_with_cost("secure_password_123", 4)
            .expect("hashing should succeed");
        assert!(hash.starts_with("$argon2id$"));

        let outcome = PasswordService::verify_password("secure_password_123", &hash)
            .expect("verification should succeed");
        assert_eq!(outcome, VerifyOutcome::Valid);
    }

    #[test]
    fn test_wrong_password_fails() {
        let hash = PasswordService::hash_password_with_cost("correct_password", 4).unwrap();
        let outcome = PasswordService::verify_password("wrong_password", &hash).unwrap();
        assert_eq!(outcome, VerifyOutcome::Invalid);
    }

    #[test]
    fn test_unique_salts() {
        let hash1 = PasswordService::hash_password_with_cost("same_password", 4).unwrap();
        let hash2 = PasswordService::hash_password_with_cost("same_password", 4).unwrap();
        assert_ne!(hash1, hash2);
    }

    #[test]
    fn test_legacy_hash_verifies_and_flags_rehash() {
        let legacy = PasswordService::legacy_hash("old_password", "pepper42");
        let outcome = PasswordService::verify_password("old_password", &legacy).unwrap();
        assert_eq!(outcome, VerifyOutcome::ValidNeedsRehash);
        assert!(outcome.is_valid());
    }

    #[test]
    fn test_legacy_hash_rejects_wrong_password() {
        let legacy = PasswordService::legacy_hash("old_password", "pepper42");
        let outcome = PasswordService::verify_password("not_it", &legacy).unwrap();
        assert_eq!(outcome, VerifyOutcome::Invalid);
    }

    #[test]
    fn test_malformed_legacy_hash_is_invalid() {
        let outcome = PasswordService::verify_password("anything", "sha256$missing-parts").unwrap();
        assert_eq!(outcome, VerifyOutcome::Invalid);
    }
}
