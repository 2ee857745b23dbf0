//! JWT token generation and validation

use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use supportchat_shared::{ChatError, Identity, Role};
use time::{Duration, OffsetDateTime};
use uuid::Uuid;

use super::TokenVerifier;

/// JWT claims carried by chat credentials
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Subject (user ID)
    pub sub: Uuid,
    /// Chat role
    pub role: Role,
    /// Issued at
    pub iat: i64,
    /// Expiration
    pub exp: i64,
    /// JWT ID (jti)
    pub jti: String,
}

/// JWT manager for token operations
#[derive(Clone)]
pub struct JwtManager {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    expiry_hours: i64,
}

impl JwtManager {
    /// Create a new JWT manager
    pub fn new(secret: &str, expiry_hours: i64) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            expiry_hours,
        }
    }

    /// Generate a token with a unique JTI
    pub fn generate_token(&self, user_id: Uuid, role: Role) -> Result<(String, String), JwtError> {
        let now = OffsetDateTime::now_utc();
        let exp = now + Duration::hours(self.expiry_hours);
        self.encode_claims(Claims {
            sub: user_id,
            role,
            iat: now.unix_timestamp(),
            exp: exp.unix_timestamp(),
            jti: Uuid::new_v4().to_string(),
        })
    }

    fn encode_claims(&self, claims: Claims) -> Result<(String, String), JwtError> {
        let jti = claims.jti.clone();
        // Explicit algorithm prevents algorithm confusion attacks
        let token = encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|e| JwtError::Encoding(e.to_string()))?;
        Ok((token, jti))
    }

    /// Validate and decode a token
    pub fn validate_token(&self, token: &str) -> Result<Claims, JwtError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 60; // 60 second clock skew tolerance

        decode::<Claims>(token, &self.decoding_key, &validation)
            .map(|data| data.claims)
            .map_err(|e| match e.kind() {
                jsonwebtoken::errors::ErrorKind::ExpiredSignature => JwtError::Expired,
                jsonwebtoken::errors::ErrorKind::InvalidToken => JwtError::Invalid,
                jsonwebtoken::errors::ErrorKind::InvalidAlgorithm => JwtError::Invalid,
                _ => JwtError::Validation(e.to_string()),
            })
    }
}

impl TokenVerifier for JwtManager {
    fn verify(&self, token: &str) -> Result<Identity, ChatError> {
        match self.validate_token(token) {
            Ok(claims) => Ok(Identity {
                user_id: claims.sub,
                role: claims.role,
            }),
            Err(e) => {
                tracing::debug!(error = %e, "Credential rejected");
                Err(ChatError::Authentication)
            }
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum JwtError {
    #[error("Token has expired")]
    Expired,
    #[error("Invalid token")]
    Invalid,
    #[error("Token encoding failed: {0}")]
    Encoding(String),
    #[error("Token validation failed: {0}")]
    Validation(String),
}
