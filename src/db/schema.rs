use serde::{Deserialize, Serialize};
use serde_json::Value;
use surrealdb::sql::Datetime;

use crate::types::{SchoolId, SchoolRole, UserId};

/// Persisted user account.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserRecord {
    /// Stable identifier, carried as the `sub` claim.
    pub user_id: UserId,
    /// Unique login email.
    pub email: String,
    /// Display name (empty until an invited user completes verification).
    #[serde(default)]
    pub name: String,
    /// Argon2 PHC string; absent for invited users that have not verified yet.
    pub password_hash: Option<String>,
    /// Flips false -> true exactly once.
    pub is_verified: bool,
    pub phone: Option<String>,
    pub date_of_birth: Option<String>,
    pub gender: Option<String>,
    pub address: Option<String>,
    pub city: Option<String>,
    pub country: Option<String>,
    pub avatar: Option<String>,
    pub bio: Option<String>,
    pub created_at: Option<Datetime>,
    pub updated_at: Option<Datetime>,
}

/// Payload for creating a new user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserCreate {
    pub email: String,
    pub name: String,
    pub password_hash: Option<String>,
    pub is_verified: bool,
}

impl UserCreate {
    /// An account created by invitation: unverified, no password yet.
    pub fn invited(email: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            name: String::new(),
            password_hash: None,
            is_verified: false,
        }
    }

    /// A self-registered account: verified, with a password.
    pub fn registered(
        email: impl Into<String>,
        name: impl Into<String>,
        password_hash: String,
    ) -> Self {
        Self {
            email: email.into(),
            name: name.into(),
            password_hash: Some(password_hash),
            is_verified: true,
        }
    }
}

/// Profile fields a user may change about themselves.
///
/// `None` leaves the stored value untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProfileUpdate {
    pub name: Option<String>,
    pub phone: Option<String>,
    pub date_of_birth: Option<String>,
    pub gender: Option<String>,
    pub address: Option<String>,
    pub city: Option<String>,
    pub country: Option<String>,
    pub avatar: Option<String>,
    pub bio: Option<String>,
}

impl ProfileUpdate {
    /// Field name / value pairs that are actually set.
    pub fn set_fields(&self) -> Vec<(&'static str, String)> {
        let fields = [
            ("name", &self.name),
            ("phone", &self.phone),
            ("date_of_birth", &self.date_of_birth),
            ("gender", &self.gender),
            ("address", &self.address),
            ("city", &self.city),
            ("country", &self.country),
            ("avatar", &self.avatar),
            ("bio", &self.bio),
        ];
        fields
            .into_iter()
            .filter_map(|(name, value)| value.as_ref().map(|v| (name, v.clone())))
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.set_fields().is_empty()
    }
}

/// Persisted school (organizational context).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchoolRecord {
    pub school_id: SchoolId,
    pub name: String,
    pub level: Option<String>,
    pub created_by: UserId,
    pub created_at: Option<Datetime>,
    pub updated_at: Option<Datetime>,
}

/// One (user, school, role) binding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoleBindingRecord {
    pub user_id: UserId,
    pub school_id: SchoolId,
    pub role: SchoolRole,
    pub created_at: Option<Datetime>,
}

/// A school together with the role the listing user holds in it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchoolMembership {
    pub school_id: SchoolId,
    pub name: String,
    pub level: Option<String>,
    pub role: SchoolRole,
}

/// Audit log action types.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    Login,
    Registered,
    SchoolSwitched,
    SchoolCreated,
    MembersInvited,
    EmailVerified,
    PasswordReset,
    ProfileUpdated,
}

impl AuditAction {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Login => "login",
            Self::Registered => "registered",
            Self::SchoolSwitched => "school_switched",
            Self::SchoolCreated => "school_created",
            Self::MembersInvited => "members_invited",
            Self::EmailVerified => "email_verified",
            Self::PasswordReset => "password_reset",
            Self::ProfileUpdated => "profile_updated",
        }
    }
}

/// Persisted audit log entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditLogRecord {
    pub user_id: Option<String>,
    pub action: String,
    pub details: Option<Value>,
    pub created_at: Option<Datetime>,
}

/// Payload for creating an audit log entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditLogCreate {
    pub user_id: Option<String>,
    pub action: String,
    pub details: Option<Value>,
}

impl AuditLogCreate {
    pub fn new(user_id: &UserId, action: AuditAction, details: Option<Value>) -> Self {
        Self {
            user_id: Some(user_id.to_string()),
            action: action.as_str().to_string(),
            details,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_profile_update_set_fields() {
        let update = ProfileUpdate {
            name: Some("Ada".to_string()),
            city: Some("London".to_string()),
            ..Default::default()
        };

        let fields = update.set_fields();
        assert_eq!(
            fields,
            vec![("name", "Ada".to_string()), ("city", "London".to_string())]
        );
        assert!(!update.is_empty());
        assert!(ProfileUpdate::default().is_empty());
    }

    #[test]
    fn test_user_create_constructors() {
        let invited = UserCreate::invited("a@x.com");
        assert!(!invited.is_verified);
        assert!(invited.password_hash.is_none());

        let registered = UserCreate::registered("b@x.com", "Bea", "$argon2id$...".to_string());
        assert!(registered.is_verified);
        assert!(registered.password_hash.is_some());
    }

    #[test]
    fn test_audit_action_names() {
        assert_eq!(AuditAction::SchoolSwitched.as_str(), "school_switched");
        let json = serde_json::to_string(&AuditAction::PasswordReset).unwrap();
        assert_eq!(json, "\"password_reset\"");
    }
}
