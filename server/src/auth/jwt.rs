use std::path::Path;

use chrono::Utc;
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use rand::Rng;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::UserId;

/// Token type claim carried by access tokens. Refresh tokens share the
/// signing key but must not open a real-time session.
pub const ACCESS_TOKEN_TYPE: &str = "access";

/// Default access token lifetime (1 day), matching the REST API.
pub const ACCESS_TOKEN_TTL_SECS: i64 = 86_400;

/// Claims of an access token issued by the REST API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessClaims {
    pub token_type: String,
    pub user_id: UserId,
    /// Expiration (Unix timestamp)
    pub exp: i64,
    /// Issued at (Unix timestamp)
    pub iat: i64,
    pub jti: String,
}

/// Load or generate the JWT signing key (256-bit random secret).
/// Key is stored hex-encoded in data_dir/jwt_secret so the REST service can share it.
pub fn load_or_generate_jwt_secret(data_dir: &str) -> Result<Vec<u8>, Box<dyn std::error::Error>> {
    std::fs::create_dir_all(data_dir)?;
    let key_path = Path::new(data_dir).join("jwt_secret");

    if key_path.exists() {
        let stored = std::fs::read_to_string(&key_path)?;
        let secret = stored.trim();
        if !secret.is_empty() {
            tracing::info!("JWT signing key loaded from {}", key_path.display());
            return Ok(secret.as_bytes().to_vec());
        }
        tracing::warn!("JWT key file {} is empty, regenerating", key_path.display());
    }

    let key: [u8; 32] = rand::rng().random();
    let secret = hex::encode(key);
    std::fs::write(&key_path, &secret)?;
    tracing::info!("JWT signing key generated at {}", key_path.display());
    Ok(secret.into_bytes())
}

/// Issue an access token for `user_id` valid for `ttl_secs`.
pub fn issue_access_token(
    secret: &[u8],
    user_id: UserId,
    ttl_secs: i64,
) -> Result<String, jsonwebtoken::errors::Error> {
    let now = Utc::now().timestamp();
    let claims = AccessClaims {
        token_type: ACCESS_TOKEN_TYPE.to_string(),
        user_id,
        exp: now + ttl_secs,
        iat: now,
        jti: Uuid::new_v4().simple().to_string(),
    };

    encode(&Header::default(), &claims, &EncodingKey::from_secret(secret))
}

/// Verify signature and expiry, returning the claims.
pub fn validate_access_token(
    secret: &[u8],
    token: &str,
) -> Result<AccessClaims, jsonwebtoken::errors::Error> {
    let validation = Validation::new(jsonwebtoken::Algorithm::HS256);
    let token_data = decode::<AccessClaims>(token, &DecodingKey::from_secret(secret), &validation)?;
    Ok(token_data.claims)
}
