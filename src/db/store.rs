//! Credential storage: users, schools, role bindings and the audit log.
//!
//! Every read goes to the database; nothing is cached between calls.

use anyhow::Result;
use serde::Deserialize;
use tracing::debug;

use crate::db::Db;
use crate::db::schema::{
    AuditLogCreate, AuditLogRecord, ProfileUpdate, RoleBindingRecord, SchoolMembership,
    SchoolRecord, UserCreate, UserRecord,
};
use crate::types::{SchoolId, SchoolRole, UserId};

/// Projection returned by write statements to tell whether a row matched.
#[derive(Deserialize)]
struct Touched {
    user_id: UserId,
}

/// Store for the persisted identity state.
#[derive(Clone)]
pub struct CredentialStore {
    db: Db,
}

impl CredentialStore {
    /// Create a new credential store.
    pub fn new(db: Db) -> Self {
        Self { db }
    }

    /// Get reference to the database.
    pub fn db(&self) -> &Db {
        &self.db
    }

    /// Get a user by identifier.
    pub async fn get_user_by_id(&self, user_id: &UserId) -> Result<Option<UserRecord>> {
        let query = "SELECT * OMIT id FROM user WHERE user_id = $user_id LIMIT 1";

        let mut res = self
            .db
            .query(query)
            .bind(("user_id", user_id.to_string()))
            .await?;

        let users: Vec<UserRecord> = res.take(0)?;
        Ok(users.into_iter().next())
    }

    /// Get a user by email.
    pub async fn get_user_by_email(&self, email: &str) -> Result<Option<UserRecord>> {
        let query = "SELECT * OMIT id FROM user WHERE email = $email LIMIT 1";

        let mut res = self
            .db
            .query(query)
            .bind(("email", email.to_string()))
            .await?;

        let users: Vec<UserRecord> = res.take(0)?;
        Ok(users.into_iter().next())
    }

    /// Create a new user. Fails if the email is already registered.
    pub async fn create_user(&self, create: &UserCreate) -> Result<UserRecord> {
        let user_id = UserId::generate();

        let query = r#"
            CREATE user CONTENT {
                user_id: $user_id,
                email: $email,
                name: $name,
                password_hash: $password_hash,
                is_verified: $is_verified
            } RETURN NONE
        "#;

        self.db
            .query(query)
            .bind(("user_id", user_id.to_string()))
            .bind(("email", create.email.clone()))
            .bind(("name", create.name.clone()))
            .bind(("password_hash", create.password_hash.clone()))
            .bind(("is_verified", create.is_verified))
            .await?
            .check()?;

        self.get_user_by_id(&user_id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("Failed to create user"))
    }

    /// Replace the password hash of the user with this email.
    ///
    /// Returns `false` when no user matched.
    pub async fn update_password(&self, email: &str, password_hash: &str) -> Result<bool> {
        let query = r#"
            UPDATE user SET password_hash = $password_hash
            WHERE email = $email
            RETURN user_id
        "#;

        let mut res = self
            .db
            .query(query)
            .bind(("email", email.to_string()))
            .bind(("password_hash", password_hash.to_string()))
            .await?;

        let touched: Vec<Touched> = res.take(0)?;
        match touched.into_iter().next() {
            Some(row) => {
                debug!(user_id = %row.user_id, "password hash replaced");
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Mark the user verified, optionally setting the display name and the
    /// initial password hash, in a single statement.
    ///
    /// Returns the updated user, or `None` when no user has this email.
    pub async fn complete_verification(
        &self,
        email: &str,
        name: Option<&str>,
        password_hash: Option<&str>,
    ) -> Result<Option<UserRecord>> {
        let mut assignments = vec!["is_verified = true"];
        if name.is_some() {
            assignments.push("name = $name");
        }
        if password_hash.is_some() {
            assignments.push("password_hash = $password_hash");
        }

        let query = format!(
            "UPDATE user SET {} WHERE email = $email RETURN user_id",
            assignments.join(", ")
        );

        let mut builder = self.db.query(query).bind(("email", email.to_string()));
        if let Some(name) = name {
            builder = builder.bind(("name", name.to_string()));
        }
        if let Some(hash) = password_hash {
            builder = builder.bind(("password_hash", hash.to_string()));
        }

        let mut res = builder.await?;
        let touched: Vec<Touched> = res.take(0)?;
        match touched.into_iter().next() {
            Some(row) => self.get_user_by_id(&row.user_id).await,
            None => Ok(None),
        }
    }

    /// Apply a profile update. Returns the updated user, or `None` when the
    /// user does not exist.
    pub async fn update_user(
        &self,
        user_id: &UserId,
        update: &ProfileUpdate,
    ) -> Result<Option<UserRecord>> {
        let fields = update.set_fields();
        if fields.is_empty() {
            return self.get_user_by_id(user_id).await;
        }

        let assignments: Vec<String> = fields
            .iter()
            .map(|(name, _)| format!("{name} = ${name}"))
            .collect();

        let query = format!(
            "UPDATE user SET {} WHERE user_id = $user_id RETURN user_id",
            assignments.join(", ")
        );

        let mut builder = self
            .db
            .query(query)
            .bind(("user_id", user_id.to_string()));
        for (name, value) in fields {
            builder = builder.bind((name, value));
        }

        let mut res = builder.await?;
        let touched: Vec<Touched> = res.take(0)?;
        match touched.into_iter().next() {
            Some(row) => self.get_user_by_id(&row.user_id).await,
            None => Ok(None),
        }
    }

    /// Create a school and bind its creator as admin, atomically.
    pub async fn create_school(
        &self,
        owner: &UserId,
        name: &str,
        level: Option<&str>,
    ) -> Result<SchoolRecord> {
        let school_id = SchoolId::generate();

        let query = r#"
            BEGIN TRANSACTION;
            CREATE school CONTENT {
                school_id: $school_id,
                name: $name,
                level: $level,
                created_by: $owner
            } RETURN NONE;
            CREATE user_school_role CONTENT {
                user_id: $owner,
                school_id: $school_id,
                role: $role
            } RETURN NONE;
            COMMIT TRANSACTION;
        "#;

        self.db
            .query(query)
            .bind(("school_id", school_id.to_string()))
            .bind(("name", name.to_string()))
            .bind(("level", level.map(|s| s.to_string())))
            .bind(("owner", owner.to_string()))
            .bind(("role", SchoolRole::Admin.as_str()))
            .await?
            .check()?;

        self.get_school(&school_id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("Failed to create school"))
    }

    /// Get a school by identifier.
    pub async fn get_school(&self, school_id: &SchoolId) -> Result<Option<SchoolRecord>> {
        let query = "SELECT * OMIT id FROM school WHERE school_id = $school_id LIMIT 1";

        let mut res = self
            .db
            .query(query)
            .bind(("school_id", school_id.to_string()))
            .await?;

        let schools: Vec<SchoolRecord> = res.take(0)?;
        Ok(schools.into_iter().next())
    }

    /// Bind a user to a school with a role.
    ///
    /// An existing binding for the same pair is left untouched and `false`
    /// is returned.
    pub async fn add_role_binding(
        &self,
        user_id: &UserId,
        school_id: &SchoolId,
        role: SchoolRole,
    ) -> Result<bool> {
        if self.get_role_binding(user_id, school_id).await?.is_some() {
            return Ok(false);
        }

        let query = r#"
            CREATE user_school_role CONTENT {
                user_id: $user_id,
                school_id: $school_id,
                role: $role
            } RETURN NONE
        "#;

        self.db
            .query(query)
            .bind(("user_id", user_id.to_string()))
            .bind(("school_id", school_id.to_string()))
            .bind(("role", role.as_str()))
            .await?
            .check()?;

        Ok(true)
    }

    /// Resolve the role a user holds in a school.
    pub async fn get_role_binding(
        &self,
        user_id: &UserId,
        school_id: &SchoolId,
    ) -> Result<Option<RoleBindingRecord>> {
        let query = r#"
            SELECT * OMIT id FROM user_school_role
            WHERE user_id = $user_id
              AND school_id = $school_id
            LIMIT 1
        "#;

        let mut res = self
            .db
            .query(query)
            .bind(("user_id", user_id.to_string()))
            .bind(("school_id", school_id.to_string()))
            .await?;

        let bindings: Vec<RoleBindingRecord> = res.take(0)?;
        Ok(bindings.into_iter().next())
    }

    /// The oldest role binding of a user, if any.
    pub async fn first_role_binding(&self, user_id: &UserId) -> Result<Option<RoleBindingRecord>> {
        let query = r#"
            SELECT * OMIT id FROM user_school_role
            WHERE user_id = $user_id
            ORDER BY created_at ASC
            LIMIT 1
        "#;

        let mut res = self
            .db
            .query(query)
            .bind(("user_id", user_id.to_string()))
            .await?;

        let bindings: Vec<RoleBindingRecord> = res.take(0)?;
        Ok(bindings.into_iter().next())
    }

    /// Schools a user belongs to, with the role held in each.
    pub async fn list_memberships(&self, user_id: &UserId) -> Result<Vec<SchoolMembership>> {
        let query = r#"
            SELECT * OMIT id FROM user_school_role
            WHERE user_id = $user_id
            ORDER BY created_at ASC
        "#;

        let mut res = self
            .db
            .query(query)
            .bind(("user_id", user_id.to_string()))
            .await?;

        let bindings: Vec<RoleBindingRecord> = res.take(0)?;

        let mut memberships = Vec::with_capacity(bindings.len());
        for binding in bindings {
            if let Some(school) = self.get_school(&binding.school_id).await? {
                memberships.push(SchoolMembership {
                    school_id: school.school_id,
                    name: school.name,
                    level: school.level,
                    role: binding.role,
                });
            }
        }

        Ok(memberships)
    }

    /// Write an audit log entry.
    pub async fn audit_log(&self, entry: AuditLogCreate) -> Result<()> {
        let query = r#"
            CREATE audit_log CONTENT {
                user_id: $user_id,
                action: $action,
                details: $details
            } RETURN NONE
        "#;

        self.db
            .query(query)
            .bind(("user_id", entry.user_id))
            .bind(("action", entry.action))
            .bind(("details", entry.details))
            .await?
            .check()?;

        Ok(())
    }

    /// Get recent audit log entries for a user, newest first.
    pub async fn get_user_audit_log(
        &self,
        user_id: &UserId,
        limit: u32,
    ) -> Result<Vec<AuditLogRecord>> {
        let query = r#"
            SELECT * OMIT id FROM audit_log
            WHERE user_id = $user_id
            ORDER BY created_at DESC
            LIMIT $limit
        "#;

        let mut res = self
            .db
            .query(query)
            .bind(("user_id", user_id.to_string()))
            .bind(("limit", limit))
            .await?;

        let logs: Vec<AuditLogRecord> = res.take(0)?;
        Ok(logs)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::db::schema::AuditAction;
    use crate::db::{DatabaseConfig, create_connection, ensure_schema};

    pub(crate) async fn setup_test_db() -> Db {
        let config = DatabaseConfig {
            url: "memory".to_string(),
            namespace: "test".to_string(),
            database: "test".to_string(),
            username: None,
            password: None,
        };
        let db = create_connection(config).await.unwrap();
        ensure_schema(&db).await.unwrap();
        db
    }

    #[tokio::test]
    async fn test_create_and_get_user() {
        let store = CredentialStore::new(setup_test_db().await);

        let user = store
            .create_user(&UserCreate::invited("a@x.com"))
            .await
            .unwrap();
        assert_eq!(user.email, "a@x.com");
        assert!(!user.is_verified);
        assert!(user.password_hash.is_none());

        let by_id = store.get_user_by_id(&user.user_id).await.unwrap().unwrap();
        assert_eq!(by_id.email, "a@x.com");

        let by_email = store.get_user_by_email("a@x.com").await.unwrap().unwrap();
        assert_eq!(by_email.user_id, user.user_id);

        assert!(store.get_user_by_email("nobody@x.com").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_duplicate_email_rejected() {
        let store = CredentialStore::new(setup_test_db().await);

        store
            .create_user(&UserCreate::invited("dup@x.com"))
            .await
            .unwrap();
        let second = store.create_user(&UserCreate::invited("dup@x.com")).await;
        assert!(second.is_err());
    }

    #[tokio::test]
    async fn test_update_password() {
        let store = CredentialStore::new(setup_test_db().await);
        store
            .create_user(&UserCreate::registered("b@x.com", "Bea", "old".to_string()))
            .await
            .unwrap();

        assert!(store.update_password("b@x.com", "new").await.unwrap());
        let user = store.get_user_by_email("b@x.com").await.unwrap().unwrap();
        assert_eq!(user.password_hash.as_deref(), Some("new"));

        assert!(!store.update_password("missing@x.com", "new").await.unwrap());
    }

    #[tokio::test]
    async fn test_complete_verification_sets_all_fields() {
        let store = CredentialStore::new(setup_test_db().await);
        store
            .create_user(&UserCreate::invited("t@x.com"))
            .await
            .unwrap();

        let user = store
            .complete_verification("t@x.com", Some("Teacher"), Some("hash"))
            .await
            .unwrap()
            .unwrap();
        assert!(user.is_verified);
        assert_eq!(user.name, "Teacher");
        assert_eq!(user.password_hash.as_deref(), Some("hash"));

        let missing = store
            .complete_verification("ghost@x.com", None, None)
            .await
            .unwrap();
        assert!(missing.is_none());
    }

    #[tokio::test]
    async fn test_update_user_profile() {
        let store = CredentialStore::new(setup_test_db().await);
        let user = store
            .create_user(&UserCreate::registered("p@x.com", "Pat", "h".to_string()))
            .await
            .unwrap();

        let update = ProfileUpdate {
            city: Some("Lagos".to_string()),
            bio: Some("Maths teacher".to_string()),
            ..Default::default()
        };
        let updated = store
            .update_user(&user.user_id, &update)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(updated.city.as_deref(), Some("Lagos"));
        assert_eq!(updated.bio.as_deref(), Some("Maths teacher"));
        assert_eq!(updated.name, "Pat");

        let missing = store
            .update_user(&UserId::new("nope"), &update)
            .await
            .unwrap();
        assert!(missing.is_none());
    }

    #[tokio::test]
    async fn test_school_creation_binds_owner_as_admin() {
        let store = CredentialStore::new(setup_test_db().await);
        let owner = store
            .create_user(&UserCreate::registered("o@x.com", "Owner", "h".to_string()))
            .await
            .unwrap();

        let school = store
            .create_school(&owner.user_id, "North High", Some("secondary"))
            .await
            .unwrap();
        assert_eq!(school.name, "North High");
        assert_eq!(school.created_by, owner.user_id);

        let binding = store
            .get_role_binding(&owner.user_id, &school.school_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(binding.role, SchoolRole::Admin);
    }

    #[tokio::test]
    async fn test_role_bindings_are_per_school() {
        let store = CredentialStore::new(setup_test_db().await);
        let owner = store
            .create_user(&UserCreate::registered("o@x.com", "Owner", "h".to_string()))
            .await
            .unwrap();
        let member = store
            .create_user(&UserCreate::registered("m@x.com", "Member", "h".to_string()))
            .await
            .unwrap();

        let a = store.create_school(&owner.user_id, "A", None).await.unwrap();
        let b = store.create_school(&owner.user_id, "B", None).await.unwrap();

        assert!(
            store
                .add_role_binding(&member.user_id, &a.school_id, SchoolRole::Teacher)
                .await
                .unwrap()
        );
        assert!(
            store
                .add_role_binding(&member.user_id, &b.school_id, SchoolRole::Student)
                .await
                .unwrap()
        );
        // Existing binding is kept
        assert!(
            !store
                .add_role_binding(&member.user_id, &a.school_id, SchoolRole::Admin)
                .await
                .unwrap()
        );

        let in_a = store
            .get_role_binding(&member.user_id, &a.school_id)
            .await
            .unwrap()
            .unwrap();
        let in_b = store
            .get_role_binding(&member.user_id, &b.school_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(in_a.role, SchoolRole::Teacher);
        assert_eq!(in_b.role, SchoolRole::Student);

        let memberships = store.list_memberships(&member.user_id).await.unwrap();
        assert_eq!(memberships.len(), 2);

        let first = store
            .first_role_binding(&member.user_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(first.school_id, a.school_id);
    }

    #[tokio::test]
    async fn test_audit_log() {
        let store = CredentialStore::new(setup_test_db().await);
        let user = store
            .create_user(&UserCreate::registered("l@x.com", "Log", "h".to_string()))
            .await
            .unwrap();

        store
            .audit_log(AuditLogCreate::new(
                &user.user_id,
                AuditAction::Login,
                Some(serde_json::json!({ "scoped": false })),
            ))
            .await
            .unwrap();

        let logs = store.get_user_audit_log(&user.user_id, 10).await.unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].action, "login");
    }
}
