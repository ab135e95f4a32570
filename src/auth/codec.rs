//! Signed session token encoding (HS256 JWT).
//!
//! Decoding only checks signature, structure and the validity window. It
//! never consults storage; there is no revocation list.

use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};

use crate::auth::claims::ClaimSet;
use crate::auth::error::TokenError;
use crate::config::JwtConfig;

/// Current Unix time in seconds, the clock used by encode and decode.
pub fn now_seconds() -> u64 {
    jsonwebtoken::get_current_timestamp()
}

/// Encodes and decodes claim sets with one signing secret.
pub struct TokenCodec {
    header: Header,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
}

impl TokenCodec {
    /// Create a codec for tokens issued by `issuer` for `audience`.
    pub fn new(secret: &[u8], issuer: &str, audience: &str) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        validation.validate_exp = true;
        validation.validate_nbf = true;
        validation.set_issuer(&[issuer]);
        validation.set_audience(&[audience]);
        validation.set_required_spec_claims(&["exp", "nbf", "sub", "iss", "aud"]);

        Self {
            header: Header::new(Algorithm::HS256),
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
            validation,
        }
    }

    pub fn from_config(config: &JwtConfig) -> Self {
        Self::new(config.secret.as_bytes(), &config.issuer, &config.audience)
    }

    /// Sign `claims` into a compact token string.
    pub fn encode(&self, claims: &ClaimSet) -> Result<String, TokenError> {
        encode(&self.header, claims, &self.encoding_key)
            .map_err(|e| TokenError::Encoding(e.to_string()))
    }

    /// Verify and decode a token string.
    pub fn decode(&self, token: &str) -> Result<ClaimSet, TokenError> {
        let data = decode::<ClaimSet>(token, &self.decoding_key, &self.validation).map_err(
            |e| match e.kind() {
                ErrorKind::InvalidSignature => TokenError::InvalidSignature,
                ErrorKind::ExpiredSignature => TokenError::Expired,
                ErrorKind::ImmatureSignature => TokenError::NotYetValid,
                ErrorKind::InvalidIssuer => TokenError::Malformed("unexpected issuer".to_string()),
                ErrorKind::InvalidAudience => {
                    TokenError::Malformed("unexpected audience".to_string())
                }
                _ => TokenError::Malformed(e.to_string()),
            },
        )?;

        // jsonwebtoken accepts exp == now; the token is valid only while now < exp.
        if data.claims.expires_at() <= now_seconds() {
            return Err(TokenError::Expired);
        }

        Ok(data.claims)
    }
}
