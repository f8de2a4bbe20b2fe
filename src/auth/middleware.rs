//! Principal extraction
//!
//! Reads the caller from headers set by the authenticating proxy.

use super::Principal;
use crate::error::AppError;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::http::HeaderMap;

pub const USER_HEADER: &str = "x-forwarded-user";
pub const CAPABILITIES_HEADER: &str = "x-forwarded-capabilities";

impl Principal {
    /// Principal from forwarded headers; capabilities are comma separated
    pub fn from_headers(headers: &HeaderMap) -> Result<Self, AppError> {
        let username = headers
            .get(USER_HEADER)
            .and_then(|h| h.to_str().ok())
            .map(str::trim)
            .filter(|u| !u.is_empty())
            .ok_or_else(|| AppError::Unauthorized(format!("Missing {} header", USER_HEADER)))?;

        let capabilities = headers
            .get(CAPABILITIES_HEADER)
            .and_then(|h| h.to_str().ok())
            .map(|caps| {
                caps.split(',')
                    .map(str::trim)
                    .filter(|c| !c.is_empty())
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default();

        Ok(Principal {
            username: username.to_string(),
            capabilities,
        })
    }
}

impl<S> FromRequestParts<S> for Principal
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Principal::from_headers(&parts.headers)
    }
}
