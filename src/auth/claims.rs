//! Session token claims.
//!
//! Wire shape: `{sub, email, school_id?, role_id?, iss, aud, iat, nbf, exp}`.
//! `school_id` and `role_id` are either both present or both absent; a
//! payload carrying only one of them is rejected at deserialization.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::types::{SchoolId, SchoolRole, UserId};

/// The school a session is scoped to and the role resolved for it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchoolScope {
    pub school_id: SchoolId,
    pub role: SchoolRole,
}

impl SchoolScope {
    pub fn new(school_id: SchoolId, role: SchoolRole) -> Self {
        Self { school_id, role }
    }
}

/// Authenticated identity bound into a session token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "WireClaims", into = "WireClaims")]
pub struct ClaimSet {
    subject: UserId,
    email: String,
    scope: Option<SchoolScope>,
    issuer: String,
    audience: String,
    issued_at: u64,
    not_before: u64,
    expires_at: u64,
}

/// Flat JSON form of [`ClaimSet`].
#[derive(Debug, Clone, Serialize, Deserialize)]
struct WireClaims {
    sub: UserId,
    email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    school_id: Option<SchoolId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    role_id: Option<SchoolRole>,
    iss: String,
    aud: String,
    iat: u64,
    nbf: u64,
    exp: u64,
}

impl TryFrom<WireClaims> for ClaimSet {
    type Error = String;

    fn try_from(wire: WireClaims) -> Result<Self, Self::Error> {
        let scope = match (wire.school_id, wire.role_id) {
            (Some(school_id), Some(role)) => Some(SchoolScope { school_id, role }),
            (None, None) => None,
            _ => return Err("school_id and role_id must be set together".to_string()),
        };

        Ok(Self {
            subject: wire.sub,
            email: wire.email,
            scope,
            issuer: wire.iss,
            audience: wire.aud,
            issued_at: wire.iat,
            not_before: wire.nbf,
            expires_at: wire.exp,
        })
    }
}

impl From<ClaimSet> for WireClaims {
    fn from(claims: ClaimSet) -> Self {
        let (school_id, role_id) = match claims.scope {
            Some(scope) => (Some(scope.school_id), Some(scope.role)),
            None => (None, None),
        };

        Self {
            sub: claims.subject,
            email: claims.email,
            school_id,
            role_id,
            iss: claims.issuer,
            aud: claims.audience,
            iat: claims.issued_at,
            nbf: claims.not_before,
            exp: claims.expires_at,
        }
    }
}

impl ClaimSet {
    /// Build a claim set valid from `issued_at` (Unix seconds) for `validity`.
    pub fn new(
        subject: UserId,
        email: impl Into<String>,
        scope: Option<SchoolScope>,
        issuer: impl Into<String>,
        audience: impl Into<String>,
        issued_at: u64,
        validity: Duration,
    ) -> Self {
        Self {
            subject,
            email: email.into(),
            scope,
            issuer: issuer.into(),
            audience: audience.into(),
            issued_at,
            not_before: issued_at,
            expires_at: issued_at.saturating_add(validity.as_secs()),
        }
    }

    /// Move the not-before instant, e.g. for tokens that activate later.
    pub fn with_not_before(mut self, not_before: u64) -> Self {
        self.not_before = not_before;
        self
    }

    pub fn subject(&self) -> &UserId {
        &self.subject
    }

    pub fn email(&self) -> &str {
        &self.email
    }

    pub fn scope(&self) -> Option<&SchoolScope> {
        self.scope.as_ref()
    }

    pub fn school_id(&self) -> Option<&SchoolId> {
        self.scope.as_ref().map(|s| &s.school_id)
    }

    pub fn role(&self) -> Option<SchoolRole> {
        self.scope.as_ref().map(|s| s.role)
    }

    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    pub fn audience(&self) -> &str {
        &self.audience
    }

    pub fn issued_at(&self) -> u64 {
        self.issued_at
    }

    pub fn not_before(&self) -> u64 {
        self.not_before
    }

    pub fn expires_at(&self) -> u64 {
        self.expires_at
    }

    /// Whether the session is scoped to `school_id`.
    pub fn is_scoped_to(&self, school_id: &SchoolId) -> bool {
        self.school_id() == Some(school_id)
    }

    /// Seconds left until expiry, relative to `now`.
    pub fn remaining_ttl(&self, now: u64) -> u64 {
        self.expires_at.saturating_sub(now)
    }
}
