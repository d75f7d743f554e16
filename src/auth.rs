// src/auth.rs
use async_trait::async_trait;
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use crate::error::ApiError;

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub username: String,
    pub email: String,
    pub exp: usize,
}

/// Identity attached to a request once its bearer credential resolves.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub id: String,
    pub username: String,
    pub email: String,
}

/// Seam for the external identity service. The production deployment resolves
/// credentials it did not issue itself; locally we verify HS256 tokens.
#[async_trait]
pub trait IdentityResolver: Send + Sync {
    async fn resolve(&self, credential: &str) -> Result<AuthUser, ApiError>;
}

pub struct JwtResolver {
    secret: String,
}

impl JwtResolver {
    pub fn new(secret: &str) -> Self {
        Self {
            secret: secret.to_string(),
        }
    }

    /// Issue a token for a user. Used by local tooling and tests; the real
    /// identity collaborator issues tokens in production.
    pub fn create_token(&self, user_id: &str, username: &str, email: &str) -> String {
        let claims = Claims {
            sub: user_id.to_string(),
            username: username.to_string(),
            email: email.to_string(),
            exp: 10000000000,
        };
        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(self.secret.as_ref()),
        )
        .unwrap_or_default()
    }
}

#[async_trait]
impl IdentityResolver for JwtResolver {
    async fn resolve(&self, credential: &str) -> Result<AuthUser, ApiError> {
        let data = decode::<Claims>(
            credential,
            &DecodingKey::from_secret(self.secret.as_ref()),
            &Validation::default(),
        )
        .map_err(|e| {
            log::warn!("token verification failed: {}", e);
            ApiError::Unauthorized
        })?;

        Ok(AuthUser {
            id: data.claims.sub,
            username: data.claims.username,
            email: data.claims.email,
        })
    }
}

/// Strips the `Bearer ` prefix from an Authorization header value.
pub fn bearer_credential(header: &str) -> Option<&str> {
    header
        .strip_prefix("Bearer ")
        .or_else(|| header.strip_prefix("bearer "))
        .map(str::trim)
        .filter(|c| !c.is_empty())
}
