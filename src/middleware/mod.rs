//! mod.rs
//!
//! User/auth issuance is an opaque external dependency of this core (§1 Non-goals) — the
//! edge gateway in front of us is assumed to have already authenticated the caller and
//! forwards the resolved identity in a trusted header. This extractor only parses that
//! header; it does not verify anything, the same way the original `AuthUser` extractor only
//! checked the shape of its credentials before trusting the database lookup.

use axum::{
    extract::FromRequestParts,
    http::{request::Parts, StatusCode},
};

#[derive(Debug, Clone)]
pub struct UserId(pub String);

impl<S> FromRequestParts<S> for UserId
where
    S: Send + Sync,
{
    type Rejection = StatusCode;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let value = parts
            .headers
            .get("x-user-id")
            .and_then(|v| v.to_str().ok())
            .filter(|v| !v.trim().is_empty())
            .ok_or(StatusCode::UNAUTHORIZED)?;
        Ok(UserId(value.to_string()))
    }
}
