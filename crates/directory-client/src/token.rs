//! Identity tokens
//!
//! The authentication service issues an HS256 JWT whose claims carry
//! `{ "user": { "id", "shareId" } }`. The client only needs to read the
//! claims; the directory verifies the signature on every request, so nothing
//! here does.

use crate::error::{DirectoryError, DirectoryResult};
use chrono::{DateTime, TimeZone, Utc};
use jsonwebtoken::{decode, DecodingKey, Validation};
use peercall_core::{Identity, UserId};
use serde::Deserialize;
use std::collections::HashSet;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TokenUser {
    id: UserId,
    share_id: String,
}

/// The parts of the token payload the client reads
#[derive(Debug, Clone, Deserialize)]
pub struct TokenClaims {
    user: TokenUser,
    #[serde(default)]
    exp: Option<i64>,
}

impl TokenClaims {
    /// Decode the claims of `token` without verifying its signature.
    /// Expiry is reported through [`is_expired_at`](Self::is_expired_at), not enforced.
    pub fn decode(token: &str) -> DirectoryResult<Self> {
        let mut validation = Validation::default();
        validation.insecure_disable_signature_validation();
        validation.validate_exp = false;
        validation.validate_aud = false;
        validation.required_spec_claims = HashSet::new();

        decode::<TokenClaims>(token.trim(), &DecodingKey::from_secret(&[]), &validation)
            .map(|data| data.claims)
            .map_err(|e| DirectoryError::invalid_token(e.to_string()))
    }

    pub fn identity(&self) -> Identity {
        Identity::new(self.user.id.clone(), self.user.share_id.clone())
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.exp.and_then(|exp| Utc.timestamp_opt(exp, 0).single())
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at().is_some_and(|expires| expires <= now)
    }
}

/// Read the local identity out of an issued token
pub fn identity_from_token(token: &str) -> DirectoryResult<Identity> {
    TokenClaims::decode(token).map(|claims| claims.identity())
}
