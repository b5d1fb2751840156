//! Bearer-JWT (HS256) and hashed-API-key authentication.
//!
//! A request authenticates with `Authorization: Bearer <jwt>` or an
//! `X-API-Key` header; either suffices. API keys are generated server-side
//! and stored only as SHA-256 hashes.

use axum::http::HeaderMap;
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use pactnet_core::types::EntityId;
use pactnet_core::PactError;
use pactnet_crypto::sha256_hex;

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    pub exp: i64,
    pub iat: i64,
}

/// The authenticated caller.
#[derive(Clone, Debug)]
pub struct AuthContext {
    pub entity: EntityId,
    pub role: Option<String>,
}

impl AuthContext {
    pub fn is_admin(&self) -> bool {
        self.role.as_deref() == Some("admin")
    }
}

pub struct AuthService {
    jwt_secret: String,
    /// SHA-256 hashes of issued API keys. Keys map to no particular entity;
    /// they authorize service-to-service calls.
    api_key_hashes: Mutex<std::collections::HashSet<String>>,
}

impl AuthService {
    pub fn new(jwt_secret: impl Into<String>) -> Self {
        Self {
            jwt_secret: jwt_secret.into(),
            api_key_hashes: Mutex::new(std::collections::HashSet::new()),
        }
    }

    /// Issue a token for `entity` valid for `ttl_secs`.
    pub fn issue_token(
        &self,
        entity: &EntityId,
        role: Option<&str>,
        ttl_secs: i64,
        now: i64,
    ) -> Result<String, PactError> {
        let claims = Claims {
            sub: entity.to_string(),
            role: role.map(str::to_string),
            iat: now,
            exp: now + ttl_secs,
        };
        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(self.jwt_secret.as_bytes()),
        )
        .map_err(|e| PactError::Internal(e.to_string()))
    }

    fn decode_token(&self, token: &str) -> Result<AuthContext, PactError> {
        let data = decode::<Claims>(
            token,
            &DecodingKey::from_secret(self.jwt_secret.as_bytes()),
            &Validation::default(),
        )
        .map_err(|e| match e.kind() {
            jsonwebtoken::errors::ErrorKind::ExpiredSignature => PactError::TokenExpired,
            _ => PactError::Unauthenticated,
        })?;
        Ok(AuthContext {
            entity: EntityId::new(data.claims.sub),
            role: data.claims.role,
        })
    }

    /// Generate an API key: the plaintext is returned once, only the hash
    /// is retained.
    pub async fn generate_api_key(&self) -> String {
        let mut bytes = [0u8; 32];
        rand::RngCore::fill_bytes(&mut rand::thread_rng(), &mut bytes);
        let key = hex::encode(bytes);
        self.api_key_hashes
            .lock()
            .await
            .insert(sha256_hex(key.as_bytes()));
        key
    }

    pub async fn revoke_api_key(&self, key: &str) -> bool {
        self.api_key_hashes
            .lock()
            .await
            .remove(&sha256_hex(key.as_bytes()))
    }

    async fn check_api_key(&self, key: &str) -> bool {
        self.api_key_hashes
            .lock()
            .await
            .contains(&sha256_hex(key.as_bytes()))
    }

    /// Authenticate a request from its headers. Bearer JWT and API key are
    /// both accepted; the JWT wins when both are present (it names a
    /// subject).
    pub async fn authenticate(&self, headers: &HeaderMap) -> Result<AuthContext, PactError> {
        if let Some(value) = headers.get(axum::http::header::AUTHORIZATION) {
            let value = value.to_str().map_err(|_| PactError::Unauthenticated)?;
            let token = value
                .strip_prefix("Bearer ")
                .ok_or(PactError::Unauthenticated)?;
            return self.decode_token(token);
        }
        if let Some(value) = headers.get("x-api-key") {
            let key = value.to_str().map_err(|_| PactError::Unauthenticated)?;
            if self.check_api_key(key).await {
                return Ok(AuthContext {
                    entity: EntityId::new("api-key"),
                    role: Some("service".into()),
                });
            }
            return Err(PactError::Unauthenticated);
        }
        Err(PactError::Unauthenticated)
    }
}
