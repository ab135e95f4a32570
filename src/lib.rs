// Core modules
pub mod config;
pub mod db;
pub mod auth;
pub mod types;

// Account flows and their surfaces
pub mod account;
pub mod notify;
pub mod api;

// Re-export key types and functions
pub use account::{IdentityService, InviteOutcome, UserProfile};
pub use auth::{AuthError, AuthResult, ClaimSet, SessionContext, TokenError};
pub use config::{AppConfig, resolve_config_path};
pub use db::{CredentialStore, DatabaseConfig, create_connection, ensure_schema};
pub use notify::{LogNotifier, Notifier};
pub use types::{SchoolId, SchoolRole, UserId};

use anyhow::Result;
use std::sync::Arc;

/// Convenience function to create a fully wired identity service.
///
/// Connects to the configured database, ensures the schema exists and
/// starts the notification worker.
pub async fn create_identity_service(
    config: &AppConfig,
    notifier: Arc<dyn Notifier>,
) -> Result<Arc<IdentityService>> {
    config.validate()?;

    let db = create_connection(config.database.clone()).await?;
    ensure_schema(&db).await?;

    let store = CredentialStore::new(db);
    Ok(Arc::new(IdentityService::new(store, config, notifier)))
}
