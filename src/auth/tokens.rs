use anyhow::{anyhow, Result};
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::shared::models::Role;

/// Bearer-token claims: the user, the tenant it is bound to, and the role
/// at issue time. Role is re-checked against the store on every request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub tenant_id: String,
    pub role: String,
    pub exp: i64,
    pub iat: i64,
}

impl Claims {
    pub fn user_id(&self) -> Result<Uuid> {
        Uuid::parse_str(&self.sub).map_err(|e| anyhow!("invalid user id in claims: {e}"))
    }

    pub fn tenant(&self) -> Result<Uuid> {
        Uuid::parse_str(&self.tenant_id).map_err(|e| anyhow!("invalid tenant id in claims: {e}"))
    }
}

pub struct TokenManager {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    lifetime_hours: i64,
}

impl TokenManager {
    pub fn new(signing_key: &str, lifetime_hours: i64) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(signing_key.as_bytes()),
            decoding_key: DecodingKey::from_secret(signing_key.as_bytes()),
            lifetime_hours,
        }
    }

    pub fn issue(&self, user_id: Uuid, tenant_id: Uuid, role: Role) -> Result<String> {
        let now = Utc::now();
        let claims = Claims {
            sub: user_id.to_string(),
            tenant_id: tenant_id.to_string(),
            role: role.as_str().to_string(),
            exp: (now + Duration::hours(self.lifetime_hours)).timestamp(),
            iat: now.timestamp(),
        };

        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|e| anyhow!("failed to encode token: {e}"))
    }

    pub fn verify(&self, token: &str) -> Result<Claims> {
        let validation = Validation::new(Algorithm::HS256);
        decode::<Claims>(token, &self.decoding_key, &validation)
            .map(|data| data.claims)
            .map_err(|e| anyhow!("token validation failed: {e}"))
    }
}

pub fn extract_bearer_token(auth_header: &str) -> Option<&str> {
    auth_header
        .strip_prefix("Bearer ")
        .or_else(|| auth_header.strip_prefix("bearer "))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> TokenManager {
        TokenManager::new("a-test-signing-key-that-is-long-enough", 24)
    }

    #[test]
    fn test_issue_and_verify() {
        let m = manager();
        let user_id = Uuid::new_v4();
        let tenant_id = Uuid::new_v4();

        let token = m.issue(user_id, tenant_id, Role::Admin).expect("issue failed");
        let claims = m.verify(&token).expect("verify failed");

        assert_eq!(claims.user_id().expect("bad user id"), user_id);
        assert_eq!(claims.tenant().expect("bad tenant id"), tenant_id);
        assert_eq!(claims.role, "admin");
    }

    #[test]
    fn test_garbage_token_rejected() {
        assert!(manager().verify("not.a.token").is_err());
    }

    #[test]
    fn test_wrong_key_rejected() {
        let token = manager()
            .issue(Uuid::new_v4(), Uuid::new_v4(), Role::Viewer)
            .expect("issue failed");
        let other = TokenManager::new("an-entirely-different-signing-key", 24);
        assert!(other.verify(&token).is_err());
    }

    #[test]
    fn test_expired_token_rejected() {
        let m = TokenManager::new("a-test-signing-key-that-is-long-enough", -1);
        let token = m
            .issue(Uuid::new_v4(), Uuid::new_v4(), Role::Viewer)
            .expect("issue failed");
        assert!(m.verify(&token).is_err());
    }

    #[test]
    fn test_extract_bearer_token() {
        assert_eq!(extract_bearer_token("Bearer abc123"), Some("abc123"));
        assert_eq!(extract_bearer_token("bearer abc123"), Some("abc123"));
        assert_eq!(extract_bearer_token("Basic abc123"), None);
    }
}
