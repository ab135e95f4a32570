use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::env;
use surrealdb::Surreal;
use surrealdb::engine::any::Any;
use surrealdb::opt::auth::Root;

pub type Db = Surreal<Any>;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: String,
    pub namespace: String,
    pub database: String,
    pub username: Option<String>,
    pub password: Option<String>,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: env::var("SURREALDB_URL").unwrap_or_else(|_| "memory".to_string()),
            namespace: env::var("SURREALDB_NAMESPACE").unwrap_or_else(|_| "campus".to_string()),
            database: env::var("SURREALDB_DATABASE").unwrap_or_else(|_| "identity".to_string()),
            username: env::var("SURREALDB_USERNAME").ok(),
            password: env::var("SURREALDB_PASSWORD").ok(),
        }
    }
}

pub async fn create_connection(config: DatabaseConfig) -> Result<Db> {
    let db = surrealdb::engine::any::connect(config.url).await?;

    // Sign in if credentials are provided
    if let (Some(username), Some(password)) = (config.username, config.password) {
        db.signin(Root {
            username: &username,
            password: &password,
        })
        .await?;
    }

    db.use_ns(config.namespace).use_db(config.database).await?;

    Ok(db)
}

pub async fn ensure_schema(db: &Db) -> Result<()> {
    let schema_queries = vec![
        // Accounts
        "DEFINE TABLE IF NOT EXISTS user SCHEMALESS;
         DEFINE FIELD IF NOT EXISTS user_id ON TABLE user TYPE string;
         DEFINE FIELD IF NOT EXISTS email ON TABLE user TYPE string;
         DEFINE FIELD IF NOT EXISTS name ON TABLE user TYPE string DEFAULT '';
         DEFINE FIELD IF NOT EXISTS password_hash ON TABLE user TYPE option<string>;
         DEFINE FIELD IF NOT EXISTS is_verified ON TABLE user TYPE bool DEFAULT false;
         DEFINE FIELD IF NOT EXISTS created_at ON TABLE user TYPE datetime DEFAULT time::now();
         DEFINE FIELD IF NOT EXISTS updated_at ON TABLE user VALUE time::now();",

        // Organizational contexts
        "DEFINE TABLE IF NOT EXISTS school SCHEMALESS;
         DEFINE FIELD IF NOT EXISTS school_id ON TABLE school TYPE string;
         DEFINE FIELD IF NOT EXISTS name ON TABLE school TYPE string;
         DEFINE FIELD IF NOT EXISTS level ON TABLE school TYPE option<string>;
         DEFINE FIELD IF NOT EXISTS created_by ON TABLE school TYPE string;
         DEFINE FIELD IF NOT EXISTS created_at ON TABLE school TYPE datetime DEFAULT time::now();
         DEFINE FIELD IF NOT EXISTS updated_at ON TABLE school VALUE time::now();",

        // (user, school, role) bindings
        "DEFINE TABLE IF NOT EXISTS user_school_role SCHEMAFULL;
         DEFINE FIELD IF NOT EXISTS user_id ON TABLE user_school_role TYPE string;
         DEFINE FIELD IF NOT EXISTS school_id ON TABLE user_school_role TYPE string;
         DEFINE FIELD IF NOT EXISTS role ON TABLE user_school_role TYPE string;
         DEFINE FIELD IF NOT EXISTS created_at ON TABLE user_school_role TYPE datetime DEFAULT time::now();",

        "DEFINE TABLE IF NOT EXISTS audit_log SCHEMALESS;
         DEFINE FIELD IF NOT EXISTS created_at ON TABLE audit_log TYPE datetime DEFAULT time::now();",

        "DEFINE INDEX IF NOT EXISTS user_user_id ON TABLE user COLUMNS user_id UNIQUE;
         DEFINE INDEX IF NOT EXISTS user_email ON TABLE user COLUMNS email UNIQUE;
         DEFINE INDEX IF NOT EXISTS school_school_id ON TABLE school COLUMNS school_id UNIQUE;
         DEFINE INDEX IF NOT EXISTS user_school_role_pair ON TABLE user_school_role COLUMNS user_id, school_id UNIQUE;
         DEFINE INDEX IF NOT EXISTS audit_log_user ON TABLE audit_log COLUMNS user_id;",
    ];

    for query in schema_queries {
        db.query(query).await?.check()?;
    }

    Ok(())
}
