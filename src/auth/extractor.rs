//! Context Extractor: recovers the caller's identity from a bearer token.

use std::sync::Arc;

use tracing::debug;

use crate::auth::codec::TokenCodec;
use crate::auth::context::SessionContext;
use crate::auth::error::AuthError;

/// Authentication extractor for HTTP requests.
#[derive(Clone)]
pub struct AuthExtractor {
    codec: Arc<TokenCodec>,
}

impl AuthExtractor {
    pub fn new(codec: Arc<TokenCodec>) -> Self {
        Self { codec }
    }

    /// Extract the session context from an `Authorization` header value.
    ///
    /// Every codec failure collapses into `Unauthenticated`; the specific
    /// reason is only logged.
    pub fn extract(
        &self,
        authorization: Option<&str>,
        ip_address: Option<String>,
        user_agent: Option<String>,
    ) -> Result<SessionContext, AuthError> {
        let token = authorization
            .and_then(|value| value.strip_prefix("Bearer "))
            .map(str::trim)
            .filter(|token| !token.is_empty())
            .ok_or(AuthError::Unauthenticated)?;

        let claims = self.codec.decode(token).map_err(|e| {
            debug!(reason = %e, "rejected session token");
            AuthError::Unauthenticated
        })?;

        debug!(user_id = %claims.subject(), "session token verified");

        Ok(SessionContext::new(claims).with_client_info(ip_address, user_agent))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::claims::{ClaimSet, SchoolScope};
    use crate::auth::codec::now_seconds;
    use crate::types::{SchoolId, SchoolRole, UserId};
    use std::time::Duration;

    fn codec() -> Arc<TokenCodec> {
        Arc::new(TokenCodec::new(b"extractor-secret", "iss", "aud"))
    }

    fn token(codec: &TokenCodec, issued_at: u64, validity: Duration) -> String {
        let claims = ClaimSet::new(
            UserId::new("u1"),
            "a@x.com",
            Some(SchoolScope::new(SchoolId::new("s1"), SchoolRole::Student)),
            "iss",
            "aud",
            issued_at,
            validity,
        );
        codec.encode(&claims).unwrap()
    }

    #[test]
    fn test_extract_valid_bearer() {
        let codec = codec();
        let extractor = AuthExtractor::new(codec.clone());
        let header = format!("Bearer {}", token(&codec, now_seconds(), Duration::from_secs(60)));

        let ctx = extractor
            .extract(Some(&header), Some("10.0.0.1".to_string()), None)
            .unwrap();
        assert_eq!(ctx.user_id().as_str(), "u1");
        assert_eq!(ctx.role(), Some(SchoolRole::Student));
        assert_eq!(ctx.ip_address(), Some("10.0.0.1"));
    }

    #[test]
    fn test_missing_or_wrong_scheme() {
        let extractor = AuthExtractor::new(codec());
        assert_eq!(
            extractor.extract(None, None, None).unwrap_err(),
            AuthError::Unauthenticated
        );
        assert_eq!(
            extractor
                .extract(Some("Basic dXNlcjpwdw=="), None, None)
                .unwrap_err(),
            AuthError::Unauthenticated
        );
        assert_eq!(
            extractor.extract(Some("Bearer "), None, None).unwrap_err(),
            AuthError::Unauthenticated
        );
    }

    #[test]
    fn test_codec_failures_collapse() {
        let codec = codec();
        let extractor = AuthExtractor::new(codec.clone());

        let expired = format!(
            "Bearer {}",
            token(&codec, now_seconds() - 600, Duration::from_secs(60))
        );
        let foreign_codec = TokenCodec::new(b"other", "iss", "aud");
        let foreign = format!(
            "Bearer {}",
            token(&foreign_codec, now_seconds(), Duration::from_secs(60))
        );

        for header in [expired.as_str(), foreign.as_str(), "Bearer garbage"] {
            assert_eq!(
                extractor.extract(Some(header), None, None).unwrap_err(),
                AuthError::Unauthenticated
            );
        }
    }
}
