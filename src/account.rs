//! Account flows built on the identity core.
//!
//! Every operation that acts on behalf of a caller takes the caller's
//! [`SessionContext`] as an explicit argument.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::auth::{
    Argon2Hasher, AuthError, AuthExtractor, AuthResult, ExpiringTokenStore, SessionContext,
    SessionIssuer, TokenCodec, TokenPurpose, VerificationTokenManager,
};
use crate::config::AppConfig;
use crate::db::{
    AuditAction, AuditLogCreate, CredentialStore, ProfileUpdate, SchoolMembership, SchoolRecord,
    UserCreate, UserRecord,
};
use crate::notify::{Notification, NotificationQueue, Notifier};
use crate::types::{SchoolId, SchoolRole, UserId};

const MIN_PASSWORD_LEN: usize = 8;

/// User data safe to hand back to clients.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UserProfile {
    pub user_id: UserId,
    pub email: String,
    pub name: String,
    pub is_verified: bool,
    pub phone: Option<String>,
    pub date_of_birth: Option<String>,
    pub gender: Option<String>,
    pub address: Option<String>,
    pub city: Option<String>,
    pub country: Option<String>,
    pub avatar: Option<String>,
    pub bio: Option<String>,
}

impl From<UserRecord> for UserProfile {
    fn from(user: UserRecord) -> Self {
        Self {
            user_id: user.user_id,
            email: user.email,
            name: user.name,
            is_verified: user.is_verified,
            phone: user.phone,
            date_of_birth: user.date_of_birth,
            gender: user.gender,
            address: user.address,
            city: user.city,
            country: user.country,
            avatar: user.avatar,
            bio: user.bio,
        }
    }
}

/// Result of a bulk invitation.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct InviteOutcome {
    /// Addresses newly bound to the school.
    pub invited: Vec<String>,
    /// Addresses that already belonged to the school.
    pub already_members: Vec<String>,
}

/// The identity service: account, session and school-membership flows.
pub struct IdentityService {
    store: CredentialStore,
    issuer: SessionIssuer,
    extractor: AuthExtractor,
    tokens: Arc<VerificationTokenManager>,
    hasher: Argon2Hasher,
    notifications: NotificationQueue,
}

impl IdentityService {
    /// Wire the service and start its notification worker.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(store: CredentialStore, config: &AppConfig, notifier: Arc<dyn Notifier>) -> Self {
        let codec = Arc::new(TokenCodec::from_config(&config.jwt));
        let tokens = Arc::new(VerificationTokenManager::from_config(
            ExpiringTokenStore::new(),
            &config.tokens,
        ));
        let notifications =
            NotificationQueue::spawn(tokens.clone(), notifier, config.http.frontend_host.clone());

        Self {
            issuer: SessionIssuer::from_config(codec.clone(), store.clone(), &config.jwt),
            extractor: AuthExtractor::new(codec),
            hasher: Argon2Hasher::new(&config.password),
            store,
            tokens,
            notifications,
        }
    }

    pub fn store(&self) -> &CredentialStore {
        &self.store
    }

    pub fn extractor(&self) -> &AuthExtractor {
        &self.extractor
    }

    pub fn tokens(&self) -> &Arc<VerificationTokenManager> {
        &self.tokens
    }

    /// Validity window of minted session tokens.
    pub fn session_validity(&self) -> Duration {
        self.issuer.validity()
    }

    /// Stop the notification worker after it has delivered everything
    /// already queued. Later notifications are dropped.
    pub async fn shutdown(&self) {
        self.notifications.shutdown().await;
    }

    /// Periodically drop expired verification tokens.
    pub fn spawn_sweeper(&self, period: Duration) -> JoinHandle<()> {
        let tokens = self.tokens.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                let purged = tokens.store().purge_expired().await;
                if purged > 0 {
                    debug!(purged, "purged expired verification tokens");
                }
            }
        })
    }

    /// Self-registration: creates a verified account.
    pub async fn register(&self, email: &str, name: &str, password: &str) -> AuthResult<UserProfile> {
        let email = normalize_email(email)?;
        let name = name.trim();
        if name.is_empty() {
            return Err(AuthError::InvalidInput("name is required".to_string()));
        }
        validate_password(password)?;

        if self.store.get_user_by_email(&email).await?.is_some() {
            return Err(AuthError::EmailTaken);
        }

        let hash = self.hasher.hash_blocking(password.to_string()).await?;
        let user = self
            .store
            .create_user(&UserCreate::registered(email.clone(), name, hash))
            .await?;

        info!(user_id = %user.user_id, email = %email, "user registered");
        self.audit(&user.user_id, AuditAction::Registered, None).await;

        Ok(user.into())
    }

    /// Password login. Returns a session token.
    pub async fn login(&self, email: &str, password: &str) -> AuthResult<String> {
        let email = normalize_email(email).map_err(|_| AuthError::InvalidCredentials)?;

        let user = self
            .store
            .get_user_by_email(&email)
            .await?
            .ok_or(AuthError::InvalidCredentials)?;

        // Invited accounts have no password yet, so they fail here like an
        // unknown email.
        let stored = user
            .password_hash
            .clone()
            .ok_or(AuthError::InvalidCredentials)?;
        if !self
            .hasher
            .verify_blocking(stored, password.to_string())
            .await?
        {
            debug!(email = %email, "login with wrong password");
            return Err(AuthError::InvalidCredentials);
        }

        if !user.is_verified {
            debug!(email = %email, "login attempt by unverified user");
            return Err(AuthError::Unauthorized);
        }

        let token = self.issuer.start_session(&user).await?;

        info!(user_id = %user.user_id, "user logged in");
        self.audit(&user.user_id, AuditAction::Login, None).await;

        Ok(token)
    }

    /// Mint a token scoped to `school_id` with the caller's role there.
    pub async fn switch_school(
        &self,
        ctx: &SessionContext,
        school_id: &SchoolId,
    ) -> AuthResult<String> {
        let token = self.issuer.switch_context(ctx.claims(), school_id).await?;

        info!(user_id = %ctx.user_id(), school_id = %school_id, "switched school");
        self.audit(
            ctx.user_id(),
            AuditAction::SchoolSwitched,
            Some(json!({
                "from": ctx.school_id().map(|s| s.to_string()),
                "to": school_id.to_string(),
                "ip_address": ctx.ip_address(),
            })),
        )
        .await;

        Ok(token)
    }

    /// Create a school with the caller as its admin.
    pub async fn create_school(
        &self,
        ctx: &SessionContext,
        name: &str,
        level: Option<&str>,
    ) -> AuthResult<SchoolRecord> {
        let name = name.trim();
        if name.is_empty() {
            return Err(AuthError::InvalidInput("school name is required".to_string()));
        }

        let owner = self.current_user(ctx).await?;
        let school = self.store.create_school(&owner.user_id, name, level).await?;

        info!(school_id = %school.school_id, user_id = %owner.user_id, "school created");
        self.audit(
            &owner.user_id,
            AuditAction::SchoolCreated,
            Some(json!({ "school_id": school.school_id.to_string() })),
        )
        .await;

        Ok(school)
    }

    /// Schools the caller belongs to, with the role held in each.
    pub async fn list_schools(&self, ctx: &SessionContext) -> AuthResult<Vec<SchoolMembership>> {
        Ok(self.store.list_memberships(ctx.user_id()).await?)
    }

    /// Invite `emails` into `school_id` with `role`.
    ///
    /// The caller's session must be scoped to `school_id` with a role that
    /// may invite. Unknown addresses get an unverified account, and
    /// unverified accounts get a verification email from the background
    /// queue.
    pub async fn invite(
        &self,
        ctx: &SessionContext,
        school_id: &SchoolId,
        emails: &[String],
        role: SchoolRole,
    ) -> AuthResult<InviteOutcome> {
        match ctx.role_in(school_id) {
            Some(caller_role) if caller_role.can_invite() => {}
            _ => return Err(AuthError::Unauthorized),
        }

        if emails.is_empty() {
            return Err(AuthError::InvalidInput("no email addresses given".to_string()));
        }
        let emails = emails
            .iter()
            .map(|e| normalize_email(e))
            .collect::<AuthResult<Vec<_>>>()?;

        let mut outcome = InviteOutcome::default();
        for email in emails {
            let user = match self.store.get_user_by_email(&email).await? {
                Some(user) => user,
                None => self.store.create_user(&UserCreate::invited(email.clone())).await?,
            };

            if self
                .store
                .add_role_binding(&user.user_id, school_id, role)
                .await?
            {
                outcome.invited.push(email.clone());
            } else {
                outcome.already_members.push(email.clone());
            }

            if !user.is_verified {
                self.notifications
                    .enqueue(Notification::VerifyEmail { email });
            }
        }

        info!(
            school_id = %school_id,
            invited = outcome.invited.len(),
            "members invited"
        );
        self.audit(
            ctx.user_id(),
            AuditAction::MembersInvited,
            Some(json!({
                "school_id": school_id.to_string(),
                "role": role.as_str(),
                "invited": outcome.invited,
            })),
        )
        .await;

        Ok(outcome)
    }

    /// Check an email-verification token without consuming it.
    pub async fn check_email_token(&self, email: &str, token: &str) -> AuthResult<()> {
        let email = normalize_email(email).map_err(|_| AuthError::InvalidToken)?;
        self.tokens
            .check(&email, TokenPurpose::EmailVerification, token)
            .await
    }

    /// Redeem an email-verification token, marking the account verified and
    /// setting its name and password in one update.
    pub async fn complete_email_verification(
        &self,
        email: &str,
        token: &str,
        name: Option<&str>,
        password: &str,
    ) -> AuthResult<UserProfile> {
        let email = normalize_email(email).map_err(|_| AuthError::InvalidToken)?;
        let name = name.map(str::trim).filter(|n| !n.is_empty());
        validate_password(password)?;

        self.tokens
            .verify(&email, TokenPurpose::EmailVerification, token)
            .await?;

        let user = self
            .store
            .get_user_by_email(&email)
            .await?
            .ok_or(AuthError::UserNotFound)?;
        if user.is_verified {
            return Err(AuthError::InvalidToken);
        }

        let hash = self.hasher.hash_blocking(password.to_string()).await?;
        let user = self
            .store
            .complete_verification(&email, name, Some(&hash))
            .await?
            .ok_or(AuthError::UserNotFound)?;

        info!(user_id = %user.user_id, "email verified");
        self.audit(&user.user_id, AuditAction::EmailVerified, None)
            .await;

        Ok(user.into())
    }

    /// Start the forgot-password flow.
    ///
    /// Succeeds whether or not the email belongs to an account.
    pub async fn request_password_reset(&self, email: &str) -> AuthResult<()> {
        let Ok(email) = normalize_email(email) else {
            return Ok(());
        };

        match self.store.get_user_by_email(&email).await? {
            Some(_) => {
                self.notifications
                    .enqueue(Notification::PasswordReset { email });
            }
            None => debug!(email = %email, "password reset requested for unknown email"),
        }

        Ok(())
    }

    /// Redeem a password-reset token and replace the stored password hash.
    pub async fn complete_password_reset(
        &self,
        email: &str,
        token: &str,
        new_password: &str,
    ) -> AuthResult<()> {
        let email = normalize_email(email).map_err(|_| AuthError::InvalidToken)?;
        validate_password(new_password)?;

        self.tokens
            .verify(&email, TokenPurpose::PasswordReset, token)
            .await?;

        let user = self
            .store
            .get_user_by_email(&email)
            .await?
            .ok_or(AuthError::UserNotFound)?;

        let hash = self.hasher.hash_blocking(new_password.to_string()).await?;
        if !self.store.update_password(&email, &hash).await? {
            return Err(AuthError::UserNotFound);
        }

        info!(user_id = %user.user_id, "password reset");
        self.audit(&user.user_id, AuditAction::PasswordReset, None)
            .await;

        Ok(())
    }

    /// The caller's profile.
    pub async fn profile(&self, ctx: &SessionContext) -> AuthResult<UserProfile> {
        Ok(self.current_user(ctx).await?.into())
    }

    /// Update the caller's profile fields.
    pub async fn update_profile(
        &self,
        ctx: &SessionContext,
        update: &ProfileUpdate,
    ) -> AuthResult<UserProfile> {
        if update.name.as_deref().is_some_and(|n| n.trim().is_empty()) {
            return Err(AuthError::InvalidInput("name must not be empty".to_string()));
        }

        let user = self
            .store
            .update_user(ctx.user_id(), update)
            .await?
            .ok_or(AuthError::UserNotFound)?;

        if !update.is_empty() {
            let fields: Vec<&str> = update.set_fields().iter().map(|(name, _)| *name).collect();
            self.audit(
                ctx.user_id(),
                AuditAction::ProfileUpdated,
                Some(json!({ "fields": fields })),
            )
            .await;
        }

        Ok(user.into())
    }

    async fn current_user(&self, ctx: &SessionContext) -> AuthResult<UserRecord> {
        self.store
            .get_user_by_id(ctx.user_id())
            .await?
            .ok_or(AuthError::UserNotFound)
    }

    /// Best-effort audit write; failures are logged only.
    async fn audit(&self, user_id: &UserId, action: AuditAction, details: Option<serde_json::Value>) {
        if let Err(e) = self
            .store
            .audit_log(AuditLogCreate::new(user_id, action.clone(), details))
            .await
        {
            warn!(user_id = %user_id, action = action.as_str(), error = %e, "failed to write audit log");
        }
    }
}

/// Trim and lowercase an email address, rejecting obviously invalid input.
pub fn normalize_email(email: &str) -> AuthResult<String> {
    let email = email.trim().to_lowercase();
    match email.split_once('@') {
        Some((local, domain)) if !local.is_empty() && !domain.is_empty() => Ok(email),
        _ => Err(AuthError::InvalidInput(format!("invalid email address: {}", email))),
    }
}

/// Minimum password policy shared by every flow that sets a password.
pub fn validate_password(password: &str) -> AuthResult<()> {
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(AuthError::InvalidInput(format!(
            "password must be at least {} characters",
            MIN_PASSWORD_LEN
        )));
    }
    Ok(())
}
