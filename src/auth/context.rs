//! Request-scoped identity, passed explicitly to every operation that needs it.

use crate::auth::claims::ClaimSet;
use crate::types::{SchoolId, SchoolRole, UserId};

/// Verified identity of the caller of one request.
///
/// Built by the extractor from a decoded session token. Immutable once
/// created.
#[derive(Debug, Clone)]
pub struct SessionContext {
    claims: ClaimSet,
    /// Client IP address (for audit logging)
    ip_address: Option<String>,
    /// Client user agent (for audit logging)
    user_agent: Option<String>,
}

impl SessionContext {
    pub fn new(claims: ClaimSet) -> Self {
        Self {
            claims,
            ip_address: None,
            user_agent: None,
        }
    }

    /// Set client metadata for audit logging.
    pub fn with_client_info(
        mut self,
        ip_address: Option<String>,
        user_agent: Option<String>,
    ) -> Self {
        self.ip_address = ip_address;
        self.user_agent = user_agent;
        self
    }

    pub fn claims(&self) -> &ClaimSet {
        &self.claims
    }

    pub fn user_id(&self) -> &UserId {
        self.claims.subject()
    }

    pub fn email(&self) -> &str {
        self.claims.email()
    }

    /// The active school, if the session has been scoped to one.
    pub fn school_id(&self) -> Option<&SchoolId> {
        self.claims.school_id()
    }

    /// The role held in the active school.
    pub fn role(&self) -> Option<SchoolRole> {
        self.claims.role()
    }

    /// Role held in `school_id` according to the token, if it is the
    /// active school.
    pub fn role_in(&self, school_id: &SchoolId) -> Option<SchoolRole> {
        if self.claims.is_scoped_to(school_id) {
            self.claims.role()
        } else {
            None
        }
    }

    pub fn ip_address(&self) -> Option<&str> {
        self.ip_address.as_deref()
    }

    pub fn user_agent(&self) -> Option<&str> {
        self.user_agent.as_deref()
    }
}
