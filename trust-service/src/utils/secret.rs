use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use rand::RngCore;
use std::fmt;

/// Length in bytes of refresh tokens and exchange codes before hex encoding
const OPAQUE_TOKEN_BYTES: usize = 32;

/// Caller-supplied secret (password, client secret). Debug output is
/// redacted so it never lands in logs.
#[derive(Clone)]
pub struct PlainSecret(String);

impl PlainSecret {
    pub fn new(secret: impl Into<String>) -> Self {
        Self(secret.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for PlainSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("PlainSecret(***)")
    }
}

/// Argon2id hash in PHC string form, salt included.
pub fn hash_secret(secret: &PlainSecret) -> Result<String, anyhow::Error> {
    let salt = SaltString::generate(&mut OsRng);

    let hash = Argon2::default()
        .hash_password(secret.as_str().as_bytes(), &salt)
        .map_err(|e| anyhow::anyhow!("Failed to hash secret: {}", e))?
        .to_string();

    Ok(hash)
}

/// Constant-time check of `secret` against a PHC hash. A malformed hash is
/// an error, a mismatch is `Ok(false)`.
pub fn verify_secret(secret: &PlainSecret, hash: &str) -> Result<bool, anyhow::Error> {
    let parsed = PasswordHash::new(hash)
        .map_err(|e| anyhow::anyhow!("Invalid secret hash format: {}", e))?;

    Ok(Argon2::default()
        .verify_password(secret.as_str().as_bytes(), &parsed)
        .is_ok())
}

/// Random single-use artifact, hex encoded.
pub fn generate_opaque_token() -> String {
    let mut bytes = [0u8; OPAQUE_TOKEN_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_and_verify() {
        let secret = PlainSecret::new("correct horse battery staple");
        let hash = hash_secret(&secret).expect("Failed to hash secret");

        assert!(hash.starts_with("$argon2"));
        assert!(verify_secret(&secret, &hash).unwrap());
        assert!(!verify_secret(&PlainSecret::new("wrong"), &hash).unwrap());
    }

    #[test]
    fn test_salted_hashes_differ() {
        let secret = PlainSecret::new("s3cret");
        let first = hash_secret(&secret).unwrap();
        let second = hash_secret(&secret).unwrap();

        assert_ne!(first, second);
        assert!(verify_secret(&secret, &second).unwrap());
    }

    #[test]
    fn test_malformed_hash_is_error() {
        assert!(verify_secret(&PlainSecret::new("x"), "not-a-phc-string").is_err());
    }

    #[test]
    fn test_debug_is_redacted() {
        let secret = PlainSecret::new("hunter2");
        assert!(!format!("{:?}", secret).contains("hunter2"));
    }

    #[test]
    fn test_opaque_tokens() {
        let a = generate_opaque_token();
        let b = generate_opaque_token();
        assert_eq!(a.len(), OPAQUE_TOKEN_BYTES * 2);
        assert_ne!(a, b);
    }
}
