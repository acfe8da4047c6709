use crate::error::ApiError;
use auth_zanzibar::User;
use axum::{
    async_trait,
    extract::{FromRequestParts, Request},
    http::request::Parts,
    middleware::Next,
    response::Response,
};
use std::time::Instant;

/// Header carrying the caller resolved by the upstream proxy.
pub const USER_ID_HEADER: &str = "x-user-id";

/// Request timing middleware
pub async fn request_timing_middleware(request: Request, next: Next) -> Response {
    let start = Instant::now();
    let method = request.method().clone();
    let uri = request.uri().clone();

    let response = next.run(request).await;

    let elapsed = start.elapsed();

    tracing::info!(
        method = %method,
        uri = %uri,
        duration_ms = elapsed.as_millis(),
        status = response.status().as_u16(),
        "Request processed"
    );

    response
}

/// The authenticated caller, taken from `X-User-ID`.
///
/// The proxy in front of this service has already authenticated the caller;
/// the header value is trusted as-is once it parses as a user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Actor(pub User);

#[async_trait]
impl<S> FromRequestParts<S> for Actor
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let raw = parts
            .headers
            .get(USER_ID_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .ok_or_else(|| ApiError::authentication("missing X-User-ID header"))?;

        let user = User::parse(raw)
            .map_err(|err| ApiError::authentication(format!("invalid X-User-ID header: {err}")))?;
        Ok(Actor(user))
    }
}
