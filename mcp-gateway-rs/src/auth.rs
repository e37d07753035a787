//! Bearer-credential validation.
//!
//! The gateway treats the identity provider as an external collaborator:
//! this module defines the validation seam and ships two implementations,
//! an HS256 JWT validator and a static token table for development and
//! tests. Key distribution and JWKS retrieval stay outside the gateway.

use std::collections::HashMap;

use async_trait::async_trait;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Claims extracted from a validated credential.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Subject (user or service id)
    pub sub: String,
    /// Expiration time (unix timestamp)
    pub exp: u64,
    /// Roles granted to the subject
    #[serde(default)]
    pub roles: Vec<String>,
    /// Permission scopes granted to the token
    #[serde(default)]
    pub scopes: Vec<String>,
}

impl Claims {
    pub fn has_scope(&self, scope: &str) -> bool {
        self.scopes.iter().any(|s| s == scope)
    }
}

/// Authentication and authorization failures.
///
/// Everything except `InsufficientScope` is an authentication failure
/// (UNAUTHORIZED); a valid token lacking a required scope is FORBIDDEN.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("missing bearer token")]
    MissingToken,

    #[error("invalid token: {0}")]
    InvalidToken(String),

    #[error("token expired")]
    Expired,

    #[error("missing required scope `{0}`")]
    InsufficientScope(String),
}

impl AuthError {
    /// True for authorization (vs authentication) failures.
    pub fn is_forbidden(&self) -> bool {
        matches!(self, AuthError::InsufficientScope(_))
    }
}

/// Validation seam for bearer credentials.
#[async_trait]
pub trait AuthValidator: Send + Sync {
    async fn validate(&self, token: &str) -> Result<Claims, AuthError>;
}

/// JWT validator over a shared HS256 secret.
pub struct JwtValidator {
    decoding_key: DecodingKey,
    validation: Validation,
}

impl JwtValidator {
    pub fn new(secret: &[u8]) -> Self {
        Self {
            decoding_key: DecodingKey::from_secret(secret),
            validation: Validation::new(Algorithm::HS256),
        }
    }
}

#[async_trait]
impl AuthValidator for JwtValidator {
    async fn validate(&self, token: &str) -> Result<Claims, AuthError> {
        decode::<Claims>(token, &self.decoding_key, &self.validation)
            .map(|data| data.claims)
            .map_err(|err| match err.kind() {
                jsonwebtoken::errors::ErrorKind::ExpiredSignature => AuthError::Expired,
                _ => AuthError::InvalidToken(err.to_string()),
            })
    }
}

/// Fixed token table for development and tests.
#[derive(Default)]
pub struct StaticTokenValidator {
    tokens: HashMap<String, Claims>,
}

impl StaticTokenValidator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_token(mut self, token: impl Into<String>, claims: Claims) -> Self {
        self.tokens.insert(token.into(), claims);
        self
    }
}

#[async_trait]
impl AuthValidator for StaticTokenValidator {
    async fn validate(&self, token: &str) -> Result<Claims, AuthError> {
        self.tokens
            .get(token)
            .cloned()
            .ok_or_else(|| AuthError::InvalidToken("unknown token".to_string()))
    }
}
