//! Bearer-token extraction and JWT verification.

use axum::http::{HeaderMap, header};
use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

/// Issuer expected on every access token.
pub const TOKEN_ISSUER: &str = "video-ingest-access";

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("missing authorization header")]
    MissingHeader,
    #[error("authorization header is not a bearer token")]
    MalformedHeader,
    #[error("invalid token: {0}")]
    InvalidToken(#[from] jsonwebtoken::errors::Error),
    #[error("token subject `{0}` is not a user id")]
    InvalidSubject(String),
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub iss: String,
    pub sub: String,
    pub iat: u64,
    pub exp: u64,
}

/// Pull the token out of `Authorization: Bearer <token>`.
pub fn bearer_token(headers: &HeaderMap) -> Result<&str, AuthError> {
    let value = headers
        .get(header::AUTHORIZATION)
        .ok_or(AuthError::MissingHeader)?
        .to_str()
        .map_err(|_| AuthError::MalformedHeader)?;

    let token = value
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or(AuthError::MalformedHeader)?;
    Ok(token)
}

/// Verifies HS256 access tokens signed with the shared secret.
#[derive(Clone)]
pub struct TokenVerifier {
    key: Arc<DecodingKey>,
    validation: Validation,
}

impl TokenVerifier {
    pub fn new(secret: &str) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[TOKEN_ISSUER]);
        validation.set_required_spec_claims(&["exp", "iss", "sub"]);
        Self {
            key: Arc::new(DecodingKey::from_secret(secret.as_bytes())),
            validation,
        }
    }

    /// Validate `token` and return the user id it was issued to.
    pub fn verify(&self, token: &str) -> Result<Uuid, AuthError> {
        let data = decode::<Claims>(token, &self.key, &self.validation)?;
        Uuid::parse_str(&data.claims.sub).map_err(|_| AuthError::InvalidSubject(data.claims.sub))
    }
}
