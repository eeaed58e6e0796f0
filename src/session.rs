//! Signed session tokens carried in the `admin-token` cookie.

use chrono::{Duration, Utc};
use jsonwebtoken::{errors::ErrorKind, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use rand::Rng;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{config, entities::User};

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("session has expired")]
    Expired,
    #[error("invalid session token: {0}")]
    Invalid(String),
    #[error("could not sign session token: {0}")]
    Signing(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Claims {
    pub user_id: i64,
    pub email: String,
    #[serde(default)]
    pub name: String,
    pub role: String,
    /// Missing in a token means no permissions.
    #[serde(default)]
    pub permissions: Vec<String>,
    pub iat: i64,
    pub exp: i64,
    pub jti: String,
}

impl Claims {
    pub fn into_user(self) -> User {
        User {
            id: self.user_id,
            email: self.email,
            name: self.name,
            role: self.role,
            permissions: self.permissions,
        }
    }
}

/// HMAC-SHA256 keys derived from `JWT_SECRET`.
#[derive(Clone)]
pub struct SessionKeys {
    encoding: EncodingKey,
    decoding: DecodingKey,
    ttl: Duration,
}

impl SessionKeys {
    pub fn new(secret: &[u8]) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
            ttl: Duration::days(config::SESSION_TTL_DAYS),
        }
    }

    #[cfg(test)]
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn issue(&self, user: &User) -> Result<(String, Claims), SessionError> {
        let now = Utc::now();
        let claims = Claims {
            user_id: user.id,
            email: user.email.clone(),
            name: user.name.clone(),
            role: user.role.clone(),
            permissions: user.permissions.clone(),
            iat: now.timestamp(),
            exp: (now + self.ttl).timestamp(),
            jti: hex::encode(rand::thread_rng().gen::<[u8; 16]>()),
        };
        let token = jsonwebtoken::encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|err| SessionError::Signing(err.to_string()))?;
        Ok((token, claims))
    }

    /// Checks signature and expiry; nothing in the token is trusted before this.
    pub fn verify(&self, token: &str) -> Result<Claims, SessionError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        validation.set_required_spec_claims(&["exp", "iat"]);

        jsonwebtoken::decode::<Claims>(token, &self.decoding, &validation)
            .map(|data| data.claims)
            .map_err(|err| match err.kind() {
                ErrorKind::ExpiredSignature => SessionError::Expired,
                _ => SessionError::Invalid(err.to_string()),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn editor() -> User {
        User {
            id: 2,
            email: "editor@example.com".into(),
            name: "Editor".into(),
            role: "editor".into(),
            permissions: vec!["articles.read".into()],
        }
    }

    #[test]
    fn issued_token_verifies_back_to_user() {
        let keys = SessionKeys::new(b"test-secret");
        let (token, claims) = keys.issue(&editor()).unwrap();
        assert_eq!(claims.exp - claims.iat, Duration::days(7).num_seconds());
        assert_eq!(claims.jti.len(), 32);

        let verified = keys.verify(&token).unwrap();
        assert_eq!(verified, claims);
        assert_eq!(verified.into_user(), editor());
    }

    #[test]
    fn other_secret_is_rejected() {
        let (token, _) = SessionKeys::new(b"one").issue(&editor()).unwrap();
        assert!(matches!(
            SessionKeys::new(b"two").verify(&token),
            Err(SessionError::Invalid(_))
        ));
    }

    #[test]
    fn tampered_payload_is_rejected() {
        let keys = SessionKeys::new(b"test-secret");
        let (token, _) = keys.issue(&editor()).unwrap();
        let mut parts: Vec<String> = token.split('.').map(str::to_string).collect();
        parts[1] = parts[1].chars().rev().collect();
        assert!(keys.verify(&parts.join(".")).is_err());
    }

    #[test]
    fn expired_token_is_rejected() {
        let keys = SessionKeys::new(b"test-secret").with_ttl(Duration::seconds(-10));
        let (token, _) = keys.issue(&editor()).unwrap();
        assert!(matches!(keys.verify(&token), Err(SessionError::Expired)));
    }

    #[test]
    fn garbage_is_rejected() {
        let keys = SessionKeys::new(b"test-secret");
        assert!(keys.verify("not.a.token").is_err());
        assert!(keys.verify("").is_err());
    }

    #[test]
    fn claims_without_permissions_grant_nothing() {
        let raw = serde_json::json!({
            "userId": 1,
            "email": "a@b.co",
            "role": "admin",
            "iat": 0,
            "exp": 1,
            "jti": "x"
        });
        let claims: Claims = serde_json::from_value(raw).unwrap();
        assert!(claims.into_user().permissions.is_empty());
    }
}
