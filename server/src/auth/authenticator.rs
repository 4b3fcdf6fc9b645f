//! Resolves the bearer credential of a WebSocket upgrade to a user.
//!
//! Resolution never fails. Whatever goes wrong (no header, other scheme,
//! garbage, bad signature, expired, refresh token, unknown or inactive user,
//! store error) the caller gets [`Identity::Anonymous`]; the session layer
//! decides what anonymous means.

use jsonwebtoken::errors::ErrorKind;

use super::jwt::{self, ACCESS_TOKEN_TYPE};
use super::{bearer_token, UserId};
use crate::db::{models, DbPool};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Identity {
    User(UserId),
    Anonymous,
}

impl Identity {
    pub fn user_id(&self) -> Option<UserId> {
        match self {
            Self::User(id) => Some(*id),
            Self::Anonymous => None,
        }
    }

    pub fn is_anonymous(&self) -> bool {
        matches!(self, Self::Anonymous)
    }
}

/// Why a credential resolved to anonymous. Logged, never returned.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("no authorization header")]
    MissingHeader,
    #[error("authorization scheme is not Bearer")]
    NotBearer,
    #[error("token expired")]
    Expired,
    #[error("token invalid: {0}")]
    Invalid(#[source] jsonwebtoken::errors::Error),
    #[error("unexpected token type {0:?}")]
    WrongTokenType(String),
    #[error("user {0} does not exist or is inactive")]
    UnknownUser(UserId),
    #[error("identity lookup failed: {0}")]
    Lookup(String),
}

pub struct TokenAuthenticator {
    secret: Vec<u8>,
    db: DbPool,
}

impl TokenAuthenticator {
    pub fn new(secret: Vec<u8>, db: DbPool) -> Self {
        Self { secret, db }
    }

    /// Resolve an `Authorization` header value.
    pub async fn authenticate(&self, authorization: Option<&str>) -> Identity {
        match self.try_authenticate(authorization).await {
            Ok(user_id) => Identity::User(user_id),
            Err(reason) => {
                tracing::debug!(reason = %reason, "Credential resolved to anonymous");
                Identity::Anonymous
            }
        }
    }

    async fn try_authenticate(&self, authorization: Option<&str>) -> Result<UserId, AuthError> {
        let header = authorization.ok_or(AuthError::MissingHeader)?;
        let token = bearer_token(header).ok_or(AuthError::NotBearer)?;

        let claims = jwt::validate_access_token(&self.secret, token).map_err(|e| match e.kind() {
            ErrorKind::ExpiredSignature => AuthError::Expired,
            _ => AuthError::Invalid(e),
        })?;
        if claims.token_type != ACCESS_TOKEN_TYPE {
            return Err(AuthError::WrongTokenType(claims.token_type));
        }

        // Blocking pool: the store lookup must not stall other connections.
        let db = self.db.clone();
        let user_id = claims.user_id;
        let exists = tokio::task::spawn_blocking(move || {
            let conn = db.lock().map_err(|e| format!("DB lock error: {}", e))?;
            models::is_active_user(&conn, user_id).map_err(|e| e.to_string())
        })
        .await
        .map_err(|e| AuthError::Lookup(format!("Task join: {}", e)))?
        .map_err(AuthError::Lookup)?;

        if !exists {
            return Err(AuthError::UnknownUser(user_id));
        }
        Ok(user_id)
    }
}
