use axum::{
    extract::FromRequestParts,
    http::{request::Parts, StatusCode},
};

use subtle::ConstantTimeEq;

use super::bearer_token;

/// Shared secret that out-of-process publishers present as a bearer token.
/// Stored in request extensions by the router middleware.
#[derive(Clone)]
pub struct PublishToken(pub Option<String>);

/// Extractor proving the request came from a trusted publisher
/// (`Authorization: Bearer <publish_token>`).
#[derive(Debug, Clone, Copy)]
pub struct ServiceCaller;

impl<S> FromRequestParts<S> for ServiceCaller
where
    S: Send + Sync,
{
    type Rejection = StatusCode;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let expected = parts
            .extensions
            .get::<PublishToken>()
            .ok_or(StatusCode::INTERNAL_SERVER_ERROR)?;
        // Ingress is disabled when no publish token is configured.
        let expected = expected.0.as_deref().ok_or(StatusCode::NOT_FOUND)?;

        let presented = parts
            .headers
            .get("Authorization")
            .and_then(|v| v.to_str().ok())
            .and_then(bearer_token)
            .ok_or(StatusCode::UNAUTHORIZED)?;

        if !tokens_match(presented.as_bytes(), expected.as_bytes()) {
            return Err(StatusCode::UNAUTHORIZED);
        }
        Ok(ServiceCaller)
    }
}

/// Constant-time token comparison. Both sides are padded to the longer
/// length so a length mismatch takes the same path as a byte mismatch.
fn tokens_match(presented: &[u8], expected: &[u8]) -> bool {
    let len = presented.len().max(expected.len());
    let mut a = vec![0u8; len];
    let mut b = vec![0u8; len];
    a[..presented.len()].copy_from_slice(presented);
    b[..expected.len()].copy_from_slice(expected);

    let same_len = (presented.len() as u64).ct_eq(&(expected.len() as u64));
    (a.as_slice().ct_eq(b.as_slice()) & same_len).into()
}
