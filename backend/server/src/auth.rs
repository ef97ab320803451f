//! # Authentication Gate
//!
//! Resolves the calling voter from an `Authorization: Bearer <jwt>` header.
//! Tokens are HS256 with `{sub, iat, exp}` claims, `sub` being the voter id.
//!
//! The gate only proves identity. Whether the voter still exists, or is an admin, is decided by
//! the handler that receives the id.
use std::{sync::Arc, time::Duration};

use axum::{
    extract::FromRequestParts,
    http::{HeaderMap, header::AUTHORIZATION, request::Parts},
};
use jsonwebtoken::{
    Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode,
    errors::ErrorKind,
};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{
    error::{AppError, AuthError},
    models::VoterId,
    state::State,
    utils::now,
};

const BEARER: &str = "Bearer ";

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: VoterId,
    pub iat: i64,
    pub exp: i64,
}

pub struct AuthGate {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
    /// Token lifetime in seconds, saturated to what an `exp` claim can hold.
    ttl_secs: i64,
}

impl AuthGate {
    pub fn new(secret: &[u8], ttl: Duration) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_required_spec_claims(&["exp", "sub"]);

        Self {
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
            validation,
            ttl_secs: i64::try_from(ttl.as_secs()).unwrap_or(i64::MAX),
        }
    }

    pub fn issue_token(&self, voter_id: VoterId) -> Result<String, AuthError> {
        let iat = now().timestamp();
        let claims = Claims {
            sub: voter_id,
            iat,
            exp: iat.saturating_add(self.ttl_secs),
        };

        self.sign(&claims)
    }

    fn sign(&self, claims: &Claims) -> Result<String, AuthError> {
        encode(&Header::new(Algorithm::HS256), claims, &self.encoding).map_err(AuthError::Signing)
    }

    pub fn resolve_caller(&self, headers: &HeaderMap) -> Result<VoterId, AuthError> {
        let header = headers
            .get(AUTHORIZATION)
            .ok_or(AuthError::MissingToken)?
            .to_str()
            .map_err(|_| AuthError::Invalid)?;

        let token = header
            .strip_prefix(BEARER)
            .map(str::trim)
            .filter(|token| !token.is_empty())
            .ok_or(AuthError::MissingToken)?;

        let data = decode::<Claims>(token, &self.decoding, &self.validation).map_err(|e| {
            debug!(error = %e, "Rejected bearer token");

            match e.kind() {
                ErrorKind::ExpiredSignature => AuthError::Expired,
                _ => AuthError::Invalid,
            }
        })?;

        Ok(data.claims.sub)
    }
}

/// The authenticated caller of a request.
pub struct CurrentVoter(pub VoterId);

impl FromRequestParts<Arc<State>> for CurrentVoter {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<State>,
    ) -> Result<Self, Self::Rejection> {
        let voter_id = state.auth.resolve_caller(&parts.headers)?;

        Ok(Self(voter_id))
    }
}

#[cfg(test)]
mod tests {
    use axum::http::HeaderValue;

    use super::*;

    fn gate() -> AuthGate {
        AuthGate::new(b"test-secret", Duration::from_secs(60 * 60))
    }

    fn bearer(token: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {token}")).unwrap(),
        );
        headers
    }

    #[test]
    fn test_issued_token_resolves_to_voter() {
        let gate = gate();
        let voter_id = VoterId::new();

        let token = gate.issue_token(voter_id).unwrap();

        assert_eq!(gate.resolve_caller(&bearer(&token)).unwrap(), voter_id);
    }

    #[test]
    fn test_missing_header() {
        assert!(matches!(
            gate().resolve_caller(&HeaderMap::new()),
            Err(AuthError::MissingToken)
        ));

        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_static("Basic dXNlcg=="));
        assert!(matches!(
            gate().resolve_caller(&headers),
            Err(AuthError::MissingToken)
        ));
    }

    #[test]
    fn test_expired_token() {
        let gate = gate();
        let issued = now().timestamp() - 2 * 60 * 60;
        let token = gate
            .sign(&Claims {
                sub: VoterId::new(),
                iat: issued,
                exp: issued + 60 * 60,
            })
            .unwrap();

        assert!(matches!(
            gate.resolve_caller(&bearer(&token)),
            Err(AuthError::Expired)
        ));
    }

    #[test]
    fn test_oversized_ttl_saturates_expiry() {
        let gate = AuthGate::new(b"test-secret", Duration::from_secs(u64::MAX));
        let voter_id = VoterId::new();

        let token = gate.issue_token(voter_id).unwrap();

        assert_eq!(gate.resolve_caller(&bearer(&token)).unwrap(), voter_id);
    }

    #[test]
    fn test_foreign_or_garbled_token() {
        let other = AuthGate::new(b"other-secret", Duration::from_secs(60));
        let token = other.issue_token(VoterId::new()).unwrap();

        assert!(matches!(
            gate().resolve_caller(&bearer(&token)),
            Err(AuthError::Invalid)
        ));
        assert!(matches!(
            gate().resolve_caller(&bearer("not-a-jwt")),
            Err(AuthError::Invalid)
        ));
    }
}
