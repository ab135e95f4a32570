use serde::{Deserialize, Serialize};
use std::{env, fs, path::Path, path::PathBuf, time::Duration};

use crate::db::DatabaseConfig;

/// Top-level configuration file (`campus.json`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub app: AppSection,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub jwt: JwtConfig,
    #[serde(default)]
    pub tokens: TokenTtlConfig,
    #[serde(default)]
    pub password: PasswordConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppSection {
    #[serde(default = "default_app_name")]
    pub name: String,
    #[serde(default = "default_app_env")]
    pub env: String,
}

impl Default for AppSection {
    fn default() -> Self {
        Self {
            name: default_app_name(),
            env: default_app_env(),
        }
    }
}

fn default_app_name() -> String {
    "campus-identity".to_string()
}

fn default_app_env() -> String {
    "development".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    /// Listen address for the API server.
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Base URL of the front-end, used to build links in outgoing emails.
    #[serde(default = "default_frontend_host")]
    pub frontend_host: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            frontend_host: default_frontend_host(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:8080".to_string()
}

fn default_frontend_host() -> String {
    "http://localhost:3000".to_string()
}

/// Longest accepted session token validity (one year).
const MAX_DURATION_HOURS: u64 = 24 * 366;

/// Session token signing settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JwtConfig {
    /// HMAC signing secret. Must be non-empty.
    #[serde(default)]
    pub secret: String,
    /// Validity window of minted session tokens, in hours.
    #[serde(default = "default_duration_hours")]
    pub duration_hours: u64,
    #[serde(default = "default_issuer")]
    pub issuer: String,
    #[serde(default = "default_audience")]
    pub audience: String,
}

impl Default for JwtConfig {
    fn default() -> Self {
        Self {
            secret: String::new(),
            duration_hours: default_duration_hours(),
            issuer: default_issuer(),
            audience: default_audience(),
        }
    }
}

fn default_duration_hours() -> u64 {
    2
}

fn default_issuer() -> String {
    "campus-identity".to_string()
}

fn default_audience() -> String {
    "campus-app".to_string()
}

impl JwtConfig {
    pub fn validity(&self) -> Duration {
        Duration::from_secs(self.duration_hours.saturating_mul(3600))
    }
}

/// Lifetimes of single-use verification tokens.
///
/// Email verification and password reset are configured separately but
/// default to the same value.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenTtlConfig {
    #[serde(default = "default_token_ttl_seconds")]
    pub email_verification_ttl_seconds: u64,
    #[serde(default = "default_token_ttl_seconds")]
    pub password_reset_ttl_seconds: u64,
}

impl Default for TokenTtlConfig {
    fn default() -> Self {
        Self {
            email_verification_ttl_seconds: default_token_ttl_seconds(),
            password_reset_ttl_seconds: default_token_ttl_seconds(),
        }
    }
}

fn default_token_ttl_seconds() -> u64 {
    30 * 60
}

/// Argon2id work factor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PasswordConfig {
    #[serde(default = "default_memory_kib")]
    pub memory_kib: u32,
    #[serde(default = "default_iterations")]
    pub iterations: u32,
    #[serde(default = "default_parallelism")]
    pub parallelism: u32,
}

impl Default for PasswordConfig {
    fn default() -> Self {
        Self {
            memory_kib: default_memory_kib(),
            iterations: default_iterations(),
            parallelism: default_parallelism(),
        }
    }
}

fn default_memory_kib() -> u32 {
    19456
}

fn default_iterations() -> u32 {
    2
}

fn default_parallelism() -> u32 {
    1
}

impl AppConfig {
    /// Read and parse a config file, expanding `${VAR}` references.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = fs::read_to_string(path)?;
        let cfg: AppConfig = serde_json::from_str(&raw)?;
        let cfg = expand_config(cfg);
        cfg.validate()?;
        Ok(cfg)
    }

    /// Load from the resolved default location.
    pub fn load_default() -> anyhow::Result<Self> {
        let path = resolve_config_path()?;
        Self::load(&path)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.jwt.secret.trim().is_empty() {
            anyhow::bail!("jwt.secret must not be empty");
        }
        if self.jwt.duration_hours == 0 || self.jwt.duration_hours > MAX_DURATION_HOURS {
            anyhow::bail!(
                "jwt.duration_hours must be between 1 and {}",
                MAX_DURATION_HOURS
            );
        }
        if self.tokens.email_verification_ttl_seconds == 0
            || self.tokens.password_reset_ttl_seconds == 0
        {
            anyhow::bail!("verification token TTLs must be greater than zero");
        }
        Ok(())
    }
}

/// Expand `${VAR}` references in the string fields of a parsed config.
fn expand_config(cfg: AppConfig) -> AppConfig {
    let mut cfg = cfg;

    cfg.http.bind = expand_env_vars(&cfg.http.bind);
    cfg.http.frontend_host = expand_env_vars(&cfg.http.frontend_host);
    cfg.jwt.secret = expand_env_vars(&cfg.jwt.secret);
    cfg.jwt.issuer = expand_env_vars(&cfg.jwt.issuer);
    cfg.jwt.audience = expand_env_vars(&cfg.jwt.audience);
    cfg.database.url = expand_env_vars(&cfg.database.url);
    cfg.database.namespace = expand_env_vars(&cfg.database.namespace);
    cfg.database.database = expand_env_vars(&cfg.database.database);
    if let Some(username) = cfg.database.username.as_mut() {
        *username = expand_env_vars(username);
    }
    if let Some(password) = cfg.database.password.as_mut() {
        *password = expand_env_vars(password);
    }

    cfg
}

pub fn resolve_config_path() -> anyhow::Result<PathBuf> {
    if let Ok(p) = env::var("CAMPUS_CONFIG") {
        return Ok(PathBuf::from(p));
    }

    if let Ok(xdg) = env::var("XDG_CONFIG_HOME") {
        let candidate = PathBuf::from(xdg).join("campus").join("config.json");
        if candidate.exists() {
            return Ok(candidate);
        }
    }

    let candidate = PathBuf::from("campus.json");
    if candidate.exists() {
        return Ok(candidate);
    }

    Err(anyhow::anyhow!(
        "Could not find campus.json (set CAMPUS_CONFIG or create ./campus.json)"
    ))
}

/// Replace `${NAME}` with the value of the environment variable `NAME`.
/// Unknown variables are left in place.
fn expand_env_vars(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && matches!(chars.peek(), Some('{')) {
            chars.next(); // consume '{'
            let mut name = String::new();
            for c in chars.by_ref() {
                if c == '}' {
                    break;
                }
                name.push(c);
            }
            if let Ok(val) = env::var(&name) {
                out.push_str(&val);
            } else {
                out.push_str("${");
                out.push_str(&name);
                out.push('}');
            }
        } else {
            out.push(ch);
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.jwt.duration_hours, 2);
        assert_eq!(cfg.jwt.validity(), Duration::from_secs(7200));
        assert_eq!(
            cfg.tokens.email_verification_ttl_seconds,
            cfg.tokens.password_reset_ttl_seconds
        );
        // No secret configured by default
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_load_partial_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{
                "jwt": {{ "secret": "s3cret", "duration_hours": 4 }},
                "http": {{ "frontend_host": "https://school.example.com" }}
            }}"#
        )
        .unwrap();

        let cfg = AppConfig::load(file.path()).unwrap();
        assert_eq!(cfg.jwt.secret, "s3cret");
        assert_eq!(cfg.jwt.duration_hours, 4);
        assert_eq!(cfg.jwt.issuer, "campus-identity");
        assert_eq!(cfg.http.frontend_host, "https://school.example.com");
        assert_eq!(cfg.http.bind, "127.0.0.1:8080");
        assert_eq!(cfg.tokens.password_reset_ttl_seconds, 1800);
    }

    #[test]
    fn test_load_rejects_missing_secret() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{ "jwt": {{ "duration_hours": 1 }} }}"#).unwrap();

        let err = AppConfig::load(file.path()).unwrap_err();
        assert!(err.to_string().contains("jwt.secret"));
    }

    #[test]
    fn test_validate_rejects_zero_ttl() {
        let mut cfg = AppConfig::default();
        cfg.jwt.secret = "x".to_string();
        assert!(cfg.validate().is_ok());

        cfg.tokens.password_reset_ttl_seconds = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_load_expands_secret_with_json_metacharacters() {
        // SAFETY: the variable name is unique to this test.
        unsafe { env::set_var("CAMPUS_TEST_QUOTED_SECRET", r#"ab"cd\e"#) };

        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{ "jwt": {{ "secret": "${{CAMPUS_TEST_QUOTED_SECRET}}" }} }}"#
        )
        .unwrap();

        let cfg = AppConfig::load(file.path()).unwrap();
        assert_eq!(cfg.jwt.secret, r#"ab"cd\e"#);
        assert_eq!(cfg.jwt.issuer, "campus-identity");
    }

    #[test]
    fn test_validity_saturates_and_validate_bounds_duration() {
        let mut cfg = AppConfig::default();
        cfg.jwt.secret = "x".to_string();
        cfg.jwt.duration_hours = u64::MAX;

        assert_eq!(cfg.jwt.validity(), Duration::from_secs(u64::MAX));
        assert!(cfg.validate().is_err());

        cfg.jwt.duration_hours = MAX_DURATION_HOURS;
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_expand_env_vars_unknown_left_in_place() {
        let out = expand_env_vars("secret=${CAMPUS_TEST_SURELY_UNSET_VAR}");
        assert_eq!(out, "secret=${CAMPUS_TEST_SURELY_UNSET_VAR}");
    }

    #[test]
    fn test_expand_env_vars_known() {
        let path = env::var("PATH").unwrap_or_default();
        let out = expand_env_vars("p=${PATH};");
        assert_eq!(out, format!("p={};", path));
    }
}
