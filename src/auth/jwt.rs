//! JWT access token generation and verification.
//!
//! Access tokens are short-lived Ed25519-signed JWTs carrying the org and
//! session context. Refresh tokens are opaque (see [`crate::auth::sessions`]);
//! only access tokens go through here.

use jwt_simple::prelude::*;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessTokenClaims {
    pub org_id: String,
    pub role: String,
    pub sid: String,
    pub jti: String,
}

/// Flattened, verified view handed to the tenant middleware.
#[derive(Debug, Clone)]
pub struct Claims {
    pub sub: Uuid,
    pub org_id: Uuid,
    pub role: String,
    pub session_id: Uuid,
    pub jti: Uuid,
    pub exp: i64,
    pub iat: i64,
}

#[derive(Clone)]
pub struct JwtConfig {
    key_pair: Arc<Ed25519KeyPair>,
    public_key: Arc<Ed25519PublicKey>,
    pub access_token_expiry: i64,
    pub issuer: Option<String>,
}

impl JwtConfig {
    /// Expects JWT_PRIVATE_KEY env var (base64-encoded Ed25519 key).
    pub fn from_env(access_token_expiry: i64, issuer: Option<String>) -> Self {
        use base64::Engine;

        let private_key_b64 =
            std::env::var("JWT_PRIVATE_KEY").expect("JWT_PRIVATE_KEY must be set");

        let key_bytes = base64::engine::general_purpose::STANDARD
            .decode(&private_key_b64)
            .expect("JWT_PRIVATE_KEY must be valid base64");

        let key_pair = Ed25519KeyPair::from_bytes(&key_bytes)
            .expect("JWT_PRIVATE_KEY must be a valid Ed25519 key");

        Self::from_key_pair(key_pair, access_token_expiry, issuer)
    }

    pub fn from_key_pair(
        key_pair: Ed25519KeyPair,
        access_token_expiry: i64,
        issuer: Option<String>,
    ) -> Self {
        let public_key = key_pair.public_key();
        Self {
            key_pair: Arc::new(key_pair),
            public_key: Arc::new(public_key),
            access_token_expiry,
            issuer,
        }
    }

    pub fn generate_key_pair() -> (String, String) {
        use base64::Engine;

        let key_pair = Ed25519KeyPair::generate();
        let private_b64 = base64::engine::general_purpose::STANDARD.encode(key_pair.to_bytes());
        let public_b64 =
            base64::engine::general_purpose::STANDARD.encode(key_pair.public_key().to_bytes());
        (private_b64, public_b64)
    }

    pub fn generate_access_token(
        &self,
        user_id: Uuid,
        org_id: Uuid,
        role: &str,
        session_id: Uuid,
        jti: Uuid,
    ) -> Result<String, jwt_simple::Error> {
        let custom_claims = AccessTokenClaims {
            org_id: org_id.to_string(),
            role: role.to_string(),
            sid: session_id.to_string(),
            jti: jti.to_string(),
        };

        let mut claims = jwt_simple::claims::Claims::with_custom_claims(
            custom_claims,
            Duration::from_secs(self.access_token_expiry as u64),
        )
        .with_subject(user_id.to_string());

        if let Some(issuer) = &self.issuer {
            claims = claims.with_issuer(issuer);
        }

        self.key_pair.sign(claims)
    }

    pub fn verify_access_token(&self, token: &str) -> Result<Claims, jwt_simple::Error> {
        let mut options = VerificationOptions::default();
        if let Some(issuer) = &self.issuer {
            options.allowed_issuers = Some(std::collections::HashSet::from([issuer.clone()]));
        }

        let token_data = self
            .public_key
            .verify_token::<AccessTokenClaims>(token, Some(options))?;

        let parse = |s: &str| Uuid::parse_str(s).map_err(|e| jwt_simple::Error::msg(e.to_string()));

        Ok(Claims {
            sub: parse(&token_data.subject.unwrap_or_default())?,
            org_id: parse(&token_data.custom.org_id)?,
            role: token_data.custom.role,
            session_id: parse(&token_data.custom.sid)?,
            jti: parse(&token_data.custom.jti)?,
            exp: token_data
                .expires_at
                .map(|t| t.as_secs() as i64)
                .unwrap_or(0),
            iat: token_data
                .issued_at
                .map(|t| t.as_secs() as i64)
                .unwrap_or(0),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> JwtConfig {
        JwtConfig::from_key_pair(Ed25519KeyPair::generate(), 900, Some("test".to_string()))
    }

    #[test]
    fn test_generate_and_verify_access_token() {
        let config = test_config();
        let user_id = Uuid::new_v4();
        let org_id = Uuid::new_v4();
        let session_id = Uuid::new_v4();
        let jti = Uuid::new_v4();

        let token = config
            .generate_access_token(user_id, org_id, "DISPATCHER", session_id, jti)
            .expect("token generation");

        let claims = config.verify_access_token(&token).expect("verification");
        assert_eq!(claims.sub, user_id);
        assert_eq!(claims.org_id, org_id);
        assert_eq!(claims.role, "DISPATCHER");
        assert_eq!(claims.session_id, session_id);
        assert_eq!(claims.jti, jti);
    }

    #[test]
    fn test_wrong_key_fails_verification() {
        let config1 = test_config();
        let config2 = test_config();

        let token = config1
            .generate_access_token(
                Uuid::new_v4(),
                Uuid::new_v4(),
                "VIEWER",
                Uuid::new_v4(),
                Uuid::new_v4(),
            )
            .expect("token generation");

        assert!(config2.verify_access_token(&token).is_err());
    }

    #[test]
    fn test_garbage_token_fails() {
        let config = test_config();
        assert!(config.verify_access_token("not.a.token").is_err());
    }

    #[test]
    fn test_key_generation_round_trip() {
        use base64::Engine;

        let (private_b64, _) = JwtConfig::generate_key_pair();
        let key_bytes = base64::engine::general_purpose::STANDARD
            .decode(&private_b64)
            .unwrap();
        let key_pair = Ed25519KeyPair::from_bytes(&key_bytes).unwrap();
        let config = JwtConfig::from_key_pair(key_pair, 900, None);

        let token = config
            .generate_access_token(
                Uuid::new_v4(),
                Uuid::new_v4(),
                "OWNER",
                Uuid::new_v4(),
                Uuid::new_v4(),
            )
            .unwrap();
        assert!(config.verify_access_token(&token).is_ok());
    }
}
