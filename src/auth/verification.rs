//! Single-use verification tokens for email verification and password reset.
//!
//! Tokens live in an expiring in-memory store keyed by `(email, purpose)`.
//! Issuing overwrites the previous token for the same key, and a successful
//! verification deletes the record under the same lock that compared it, so
//! a token can be redeemed at most once.
//!
//! Only SHA-256 digests are kept; the raw token exists only in the issued
//! link.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;
use tracing::debug;

use crate::auth::error::{AuthError, AuthResult};
use crate::config::TokenTtlConfig;

/// What a verification token may be redeemed for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenPurpose {
    EmailVerification,
    PasswordReset,
}

impl TokenPurpose {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::EmailVerification => "email_verification",
            Self::PasswordReset => "password_reset",
        }
    }
}

impl fmt::Display for TokenPurpose {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug)]
struct TokenEntry {
    digest: String,
    created_at: Instant,
    expires_at: Instant,
}

impl TokenEntry {
    fn is_live(&self, now: Instant) -> bool {
        now < self.expires_at
    }
}

type TokenKey = (String, TokenPurpose);

/// Expiring key-value store for verification token digests.
#[derive(Clone, Default)]
pub struct ExpiringTokenStore {
    entries: Arc<Mutex<HashMap<TokenKey, TokenEntry>>>,
}

impl ExpiringTokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a digest for `(email, purpose)`, replacing any previous one.
    pub async fn put(&self, email: &str, purpose: TokenPurpose, digest: String, ttl: Duration) {
        let now = Instant::now();
        let expires_at = now.checked_add(ttl).unwrap_or(now);
        let entry = TokenEntry {
            digest,
            created_at: now,
            expires_at,
        };

        let mut entries = self.entries.lock().await;
        entries.insert((email.to_string(), purpose), entry);
    }

    /// Live digest for `(email, purpose)`. Expired entries are dropped.
    pub async fn get(&self, email: &str, purpose: TokenPurpose) -> Option<String> {
        let mut entries = self.entries.lock().await;
        let key = (email.to_string(), purpose);

        match entries.get(&key) {
            Some(entry) if entry.is_live(Instant::now()) => Some(entry.digest.clone()),
            Some(_) => {
                entries.remove(&key);
                None
            }
            None => None,
        }
    }

    /// Remove the entry for `(email, purpose)` if it is live and its digest
    /// equals `digest`. Returns the age of the removed entry.
    pub async fn take_if_matches(
        &self,
        email: &str,
        purpose: TokenPurpose,
        digest: &str,
    ) -> Option<Duration> {
        let mut entries = self.entries.lock().await;
        let key = (email.to_string(), purpose);
        let now = Instant::now();

        let entry = entries.get(&key)?;

        if !entry.is_live(now) {
            entries.remove(&key);
            return None;
        }

        if entry.digest != digest {
            return None;
        }

        entries
            .remove(&key)
            .map(|entry| now.saturating_duration_since(entry.created_at))
    }

    /// Delete the entry for `(email, purpose)`.
    pub async fn delete(&self, email: &str, purpose: TokenPurpose) {
        let mut entries = self.entries.lock().await;
        entries.remove(&(email.to_string(), purpose));
    }

    /// Drop all expired entries. Returns how many were removed.
    pub async fn purge_expired(&self) -> usize {
        let mut entries = self.entries.lock().await;
        let now = Instant::now();
        let initial_len = entries.len();

        entries.retain(|_, entry| entry.is_live(now));

        initial_len - entries.len()
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }
}

/// Issues and redeems verification tokens.
pub struct VerificationTokenManager {
    store: ExpiringTokenStore,
    email_verification_ttl: Duration,
    password_reset_ttl: Duration,
}

impl VerificationTokenManager {
    pub fn new(
        store: ExpiringTokenStore,
        email_verification_ttl: Duration,
        password_reset_ttl: Duration,
    ) -> Self {
        Self {
            store,
            email_verification_ttl,
            password_reset_ttl,
        }
    }

    pub fn from_config(store: ExpiringTokenStore, config: &TokenTtlConfig) -> Self {
        Self::new(
            store,
            Duration::from_secs(config.email_verification_ttl_seconds),
            Duration::from_secs(config.password_reset_ttl_seconds),
        )
    }

    pub fn store(&self) -> &ExpiringTokenStore {
        &self.store
    }

    pub fn ttl(&self, purpose: TokenPurpose) -> Duration {
        match purpose {
            TokenPurpose::EmailVerification => self.email_verification_ttl,
            TokenPurpose::PasswordReset => self.password_reset_ttl,
        }
    }

    /// Issue a fresh token for `(email, purpose)`, superseding any earlier one.
    pub async fn issue(&self, email: &str, purpose: TokenPurpose) -> AuthResult<String> {
        let token = generate_token()?;
        self.store
            .put(email, purpose, digest_token(&token), self.ttl(purpose))
            .await;

        debug!(email = %email, purpose = %purpose, "issued verification token");
        Ok(token)
    }

    /// Redeem a token. Succeeds at most once per issued token.
    ///
    /// Never-issued, expired, already-used and mismatched tokens all fail
    /// with the same `InvalidToken`.
    pub async fn verify(&self, email: &str, purpose: TokenPurpose, presented: &str) -> AuthResult<()> {
        match self
            .store
            .take_if_matches(email, purpose, &digest_token(presented))
            .await
        {
            Some(age) => {
                debug!(
                    email = %email,
                    purpose = %purpose,
                    age_secs = age.as_secs(),
                    "verification token redeemed"
                );
                Ok(())
            }
            None => {
                debug!(email = %email, purpose = %purpose, "verification token rejected");
                Err(AuthError::InvalidToken)
            }
        }
    }

    /// Check a token without consuming it.
    pub async fn check(&self, email: &str, purpose: TokenPurpose, presented: &str) -> AuthResult<()> {
        match self.store.get(email, purpose).await {
            Some(digest) if digest == digest_token(presented) => Ok(()),
            _ => Err(AuthError::InvalidToken),
        }
    }
}

/// 256 bits from the OS CSPRNG, URL-safe base64.
fn generate_token() -> AuthResult<String> {
    let mut bytes = [0u8; 32];
    getrandom::getrandom(&mut bytes).map_err(AuthError::internal)?;
    Ok(URL_SAFE_NO_PAD.encode(bytes))
}

fn digest_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> VerificationTokenManager {
        VerificationTokenManager::new(
            ExpiringTokenStore::new(),
            Duration::from_secs(600),
            Duration::from_secs(600),
        )
    }

    #[tokio::test]
    async fn test_issue_then_verify_once() {
        let tokens = manager();
        let t1 = tokens
            .issue("a@x.com", TokenPurpose::EmailVerification)
            .await
            .unwrap();

        assert!(
            tokens
                .verify("a@x.com", TokenPurpose::EmailVerification, &t1)
                .await
                .is_ok()
        );
        assert_eq!(
            tokens
                .verify("a@x.com", TokenPurpose::EmailVerification, &t1)
                .await,
            Err(AuthError::InvalidToken)
        );
    }

    #[tokio::test]
    async fn test_reissue_supersedes() {
        let tokens = manager();
        let first = tokens
            .issue("a@x.com", TokenPurpose::PasswordReset)
            .await
            .unwrap();
        let second = tokens
            .issue("a@x.com", TokenPurpose::PasswordReset)
            .await
            .unwrap();
        assert_ne!(first, second);

        assert_eq!(
            tokens
                .verify("a@x.com", TokenPurpose::PasswordReset, &first)
                .await,
            Err(AuthError::InvalidToken)
        );
        assert!(
            tokens
                .verify("a@x.com", TokenPurpose::PasswordReset, &second)
                .await
                .is_ok()
        );
        assert_eq!(tokens.store().len().await, 0);
    }

    #[tokio::test]
    async fn test_mismatch_keeps_token_alive() {
        let tokens = manager();
        let token = tokens
            .issue("a@x.com", TokenPurpose::EmailVerification)
            .await
            .unwrap();

        assert_eq!(
            tokens
                .verify("a@x.com", TokenPurpose::EmailVerification, "guess")
                .await,
            Err(AuthError::InvalidToken)
        );
        assert!(
            tokens
                .verify("a@x.com", TokenPurpose::EmailVerification, &token)
                .await
                .is_ok()
        );
    }

    #[tokio::test]
    async fn test_purposes_and_emails_are_separate() {
        let tokens = manager();
        let token = tokens
            .issue("a@x.com", TokenPurpose::EmailVerification)
            .await
            .unwrap();

        assert_eq!(
            tokens
                .verify("a@x.com", TokenPurpose::PasswordReset, &token)
                .await,
            Err(AuthError::InvalidToken)
        );
        assert_eq!(
            tokens
                .verify("b@x.com", TokenPurpose::EmailVerification, &token)
                .await,
            Err(AuthError::InvalidToken)
        );
    }

    #[tokio::test]
    async fn test_never_issued() {
        let tokens = manager();
        assert_eq!(
            tokens
                .verify("nobody@x.com", TokenPurpose::EmailVerification, "x")
                .await,
            Err(AuthError::InvalidToken)
        );
    }

    #[tokio::test]
    async fn test_expired_token_rejected_and_dropped() {
        let tokens = VerificationTokenManager::new(
            ExpiringTokenStore::new(),
            Duration::from_millis(20),
            Duration::from_millis(20),
        );
        let token = tokens
            .issue("a@x.com", TokenPurpose::EmailVerification)
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(60)).await;

        assert_eq!(
            tokens
                .check("a@x.com", TokenPurpose::EmailVerification, &token)
                .await,
            Err(AuthError::InvalidToken)
        );
        assert_eq!(
            tokens
                .verify("a@x.com", TokenPurpose::EmailVerification, &token)
                .await,
            Err(AuthError::InvalidToken)
        );
        assert!(tokens.store().is_empty().await);
    }

    #[tokio::test]
    async fn test_check_does_not_consume() {
        let tokens = manager();
        let token = tokens
            .issue("a@x.com", TokenPurpose::EmailVerification)
            .await
            .unwrap();

        for _ in 0..2 {
            assert!(
                tokens
                    .check("a@x.com", TokenPurpose::EmailVerification, &token)
                    .await
                    .is_ok()
            );
        }
        assert!(
            tokens
                .verify("a@x.com", TokenPurpose::EmailVerification, &token)
                .await
                .is_ok()
        );
    }

    #[tokio::test]
    async fn test_concurrent_presenters_single_winner() {
        let tokens = Arc::new(manager());
        let token = tokens
            .issue("a@x.com", TokenPurpose::PasswordReset)
            .await
            .unwrap();

        let mut handles = Vec::new();
        for _ in 0..8 {
            let tokens = tokens.clone();
            let token = token.clone();
            handles.push(tokio::spawn(async move {
                tokens
                    .verify("a@x.com", TokenPurpose::PasswordReset, &token)
                    .await
                    .is_ok()
            }));
        }

        let mut successes = 0;
        for handle in handles {
            if handle.await.unwrap() {
                successes += 1;
            }
        }
        assert_eq!(successes, 1);
    }

    #[tokio::test]
    async fn test_take_if_matches_reports_age() {
        let store = ExpiringTokenStore::new();
        store
            .put(
                "a@x.com",
                TokenPurpose::PasswordReset,
                "d1".to_string(),
                Duration::from_secs(600),
            )
            .await;

        tokio::time::sleep(Duration::from_millis(30)).await;

        assert!(
            store
                .take_if_matches("a@x.com", TokenPurpose::PasswordReset, "other")
                .await
                .is_none()
        );
        let age = store
            .take_if_matches("a@x.com", TokenPurpose::PasswordReset, "d1")
            .await
            .unwrap();
        assert!(age >= Duration::from_millis(30));
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_purge_expired() {
        let store = ExpiringTokenStore::new();
        store
            .put(
                "old@x.com",
                TokenPurpose::EmailVerification,
                "d1".to_string(),
                Duration::from_millis(10),
            )
            .await;
        store
            .put(
                "new@x.com",
                TokenPurpose::EmailVerification,
                "d2".to_string(),
                Duration::from_secs(600),
            )
            .await;

        tokio::time::sleep(Duration::from_millis(40)).await;

        assert_eq!(store.purge_expired().await, 1);
        assert_eq!(store.len().await, 1);
        store
            .delete("new@x.com", TokenPurpose::EmailVerification)
            .await;
        assert!(store.is_empty().await);
    }

    #[test]
    fn test_generated_tokens_are_url_safe() {
        let token = generate_token().unwrap();
        assert_eq!(token.len(), 43);
        assert!(
            token
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        );
    }
}
