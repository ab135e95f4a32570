//! Session Issuer: the only place new session tokens are minted.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::auth::claims::{ClaimSet, SchoolScope};
use crate::auth::codec::{TokenCodec, now_seconds};
use crate::auth::error::{AuthError, AuthResult};
use crate::config::JwtConfig;
use crate::db::{CredentialStore, UserRecord};
use crate::types::SchoolId;

/// Mints session tokens, resolving the role for the target school from the
/// credential store at call time.
pub struct SessionIssuer {
    codec: Arc<TokenCodec>,
    store: CredentialStore,
    validity: Duration,
    issuer: String,
    audience: String,
}

impl SessionIssuer {
    pub fn new(
        codec: Arc<TokenCodec>,
        store: CredentialStore,
        validity: Duration,
        issuer: impl Into<String>,
        audience: impl Into<String>,
    ) -> Self {
        Self {
            codec,
            store,
            validity,
            issuer: issuer.into(),
            audience: audience.into(),
        }
    }

    pub fn from_config(codec: Arc<TokenCodec>, store: CredentialStore, config: &JwtConfig) -> Self {
        Self::new(
            codec,
            store,
            config.validity(),
            config.issuer.clone(),
            config.audience.clone(),
        )
    }

    pub fn validity(&self) -> Duration {
        self.validity
    }

    /// Mint the login token for `user`.
    ///
    /// Scoped to the user's earliest role binding, or unscoped when the user
    /// belongs to no school yet.
    pub async fn start_session(&self, user: &UserRecord) -> AuthResult<String> {
        let scope = self
            .store
            .first_role_binding(&user.user_id)
            .await?
            .map(|binding| SchoolScope::new(binding.school_id, binding.role));

        self.mint(user, scope)
    }

    /// Mint a token for `current`'s subject scoped to `target`.
    ///
    /// `current` must already have been validated by the extractor. The
    /// role is re-read from the store; no binding means `NotFound`.
    pub async fn switch_context(
        &self,
        current: &ClaimSet,
        target: &SchoolId,
    ) -> AuthResult<String> {
        let user = match self.store.get_user_by_id(current.subject()).await? {
            Some(user) if user.is_verified => user,
            Some(_) => {
                warn!(user_id = %current.subject(), "context switch by unverified user");
                return Err(AuthError::Unauthorized);
            }
            None => {
                warn!(user_id = %current.subject(), "context switch for unknown subject");
                return Err(AuthError::Unauthorized);
            }
        };

        let binding = self
            .store
            .get_role_binding(&user.user_id, target)
            .await?
            .ok_or_else(|| AuthError::NotFound(format!("school {}", target)))?;

        debug!(
            user_id = %user.user_id,
            school_id = %target,
            role = %binding.role,
            "switching session context"
        );

        self.mint(&user, Some(SchoolScope::new(binding.school_id, binding.role)))
    }

    fn mint(&self, user: &UserRecord, scope: Option<SchoolScope>) -> AuthResult<String> {
        let claims = ClaimSet::new(
            user.user_id.clone(),
            user.email.clone(),
            scope,
            self.issuer.clone(),
            self.audience.clone(),
            now_seconds(),
            self.validity,
        );

        self.codec.encode(&claims).map_err(AuthError::internal)
    }
}
