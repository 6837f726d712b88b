//! Extract the authenticated principal from the request (`X-Principal-ID` header).

use async_trait::async_trait;
use axum::{extract::FromRequestParts, http::request::Parts};

/// Header set by the authenticating proxy. Default: `X-Principal-ID`.
pub const PRINCIPAL_HEADER: &str = "X-Principal-ID";

/// Extractor for the optional principal id.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Principal(pub Option<String>);

#[async_trait]
impl<S> FromRequestParts<S> for Principal
where
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let value = parts
            .headers
            .get(PRINCIPAL_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());
        Ok(Principal(value))
    }
}
