//! Caller identity.
//!
//! Session issuance happens upstream of this service; the authenticating
//! proxy forwards the caller's owner id in [`OWNER_HEADER`].

use axum::extract::FromRequestParts;
use axum::http::request::Parts;

use super::error::ApiError;

pub const OWNER_HEADER: &str = "x-owner-id";

/// The authenticated owner of a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Owner(pub String);

impl<S> FromRequestParts<S> for Owner
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .headers
            .get(OWNER_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|owner| !owner.is_empty())
            .map(|owner| Owner(owner.to_string()))
            .ok_or(ApiError::Unauthorized)
    }
}
