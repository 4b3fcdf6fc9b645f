pub mod authenticator;
pub mod jwt;
pub mod middleware;

pub use authenticator::{Identity, TokenAuthenticator};

/// Primary key of a user account in the identity store.
pub type UserId = i64;

/// Extract the token from an `Authorization: Bearer <token>` header value.
/// Returns `None` for other schemes and for an empty token.
pub fn bearer_token(header_value: &str) -> Option<&str> {
    header_value
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|token| !token.is_empty())
}
