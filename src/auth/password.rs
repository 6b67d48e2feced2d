use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};

use anyhow::Context;
use argon2::{
    password_hash::{PasswordHash, PasswordHasher as _, PasswordVerifier, SaltString},
    Argon2,
};
use rand::rngs::OsRng;
use tracing::error;

/// Salt of the stand-in hash checked when no account matches a login.
const DUMMY_SALT: &str = "dW5rbm93bi1hY2NvdW50";

/// Salted Argon2id hashing. Plaintext never leaves the call.
#[derive(Clone)]
pub struct PasswordHasher {
    argon2: Argon2<'static>,
    dummy_hash: Arc<str>,
    verifications: Arc<AtomicUsize>,
}

impl Default for PasswordHasher {
    fn default() -> Self {
        Self::new()
    }
}

impl PasswordHasher {
    pub fn new() -> Self {
        let argon2 = Argon2::default();
        let dummy_hash = SaltString::from_b64(DUMMY_SALT)
            .and_then(|salt| {
                argon2
                    .hash_password(b"no-such-account", &salt)
                    .map(|h| h.to_string())
            })
            .unwrap_or_else(|e| {
                error!(error = %e, "argon2 dummy hash error");
                String::new()
            });
        Self {
            argon2,
            dummy_hash: dummy_hash.into(),
            verifications: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn hash(&self, plain: &str) -> anyhow::Result<String> {
        let salt = SaltString::generate(&mut OsRng);
        let hash = self
            .argon2
            .hash_password(plain.as_bytes(), &salt)
            .map_err(|e| {
                error!(error = %e, "argon2 hash_password error");
                anyhow::anyhow!(e.to_string())
            })?
            .to_string();
        Ok(hash)
    }

    /// Constant-time check of `plain` against a stored PHC string.
    pub fn verify(&self, plain: &str, hash: &str) -> anyhow::Result<bool> {
        self.verifications.fetch_add(1, Ordering::Relaxed);
        let parsed = PasswordHash::new(hash).map_err(|e| {
            error!(error = %e, "argon2 parse hash error");
            anyhow::anyhow!(e.to_string())
        })?;
        Ok(self
            .argon2
            .verify_password(plain.as_bytes(), &parsed)
            .is_ok())
    }

    /// `verify` on the blocking pool so the KDF never stalls a runtime worker.
    pub async fn verify_blocking(&self, plain: &str, hash: &str) -> anyhow::Result<bool> {
        let hasher = self.clone();
        let (plain, hash) = (plain.to_owned(), hash.to_owned());
        tokio::task::spawn_blocking(move || hasher.verify(&plain, &hash))
            .await
            .context("password verification task")?
    }

    /// Spends the same work as a real check for a login with no matching
    /// account. The outcome is always a rejection.
    pub async fn verify_dummy(&self, plain: &str) {
        let dummy = self.dummy_hash.clone();
        if let Err(e) = self.verify_blocking(plain, &dummy).await {
            error!(error = %e, "dummy password verification failed");
        }
    }

    #[cfg(test)]
    pub fn verifications(&self) -> usize {
        self.verifications.load(Ordering::Relaxed)
    }
}
