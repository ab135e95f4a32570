//! Token-based identity and context switching.
//!
//! - **Token Codec** (`codec`): signs and verifies claim sets.
//! - **Session Issuer** (`issuer`): the only place session tokens are minted.
//! - **Context Extractor** (`extractor`): turns a bearer token into a
//!   [`SessionContext`] that is passed explicitly to operations.
//! - **Verification Token Manager** (`verification`): single-use tokens for
//!   email verification and password reset.
//!
//! ## Security Model
//!
//! - Session tokens are never revoked; logout is a client-side discard
//! - Every role decision re-reads the credential store
//! - Verification tokens are stored as digests and redeemed at most once

mod claims;
mod codec;
mod context;
mod error;
mod extractor;
mod issuer;
mod password;
mod verification;

pub use claims::{ClaimSet, SchoolScope};
pub use codec::{TokenCodec, now_seconds};
pub use context::SessionContext;
pub use error::{AuthError, AuthResult, TokenError};
pub use extractor::AuthExtractor;
pub use issuer::SessionIssuer;
pub use password::Argon2Hasher;
pub use verification::{ExpiringTokenStore, TokenPurpose, VerificationTokenManager};
