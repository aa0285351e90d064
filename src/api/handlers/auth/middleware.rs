//! Request guards that run before any handler: rate limiting, then CSRF.

use axum::{
    extract::{ConnectInfo, Extension, Request},
    http::{header::SET_COOKIE, HeaderValue, Method},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::{net::SocketAddr, sync::Arc};
use tracing::warn;

use super::state::AuthState;
use super::utils::{client_key, cookie, extract_cookie, extract_csrf_header, CSRF_COOKIE_NAME};
use crate::auth::{AuthError, RateLimitDecision, RateLimitTier};

/// Tier applied to a request path. `None` means the path is not throttled.
#[must_use]
pub fn tier_for(path: &str) -> Option<RateLimitTier> {
    match path {
        "/health" => None,
        "/signup" | "/login" | "/google" => Some(RateLimitTier::Auth),
        "/resend-verification" | "/forgot-password" | "/reset-password" => {
            Some(RateLimitTier::Strict)
        }
        _ => Some(RateLimitTier::General),
    }
}

pub async fn rate_limit(
    auth_state: Extension<Arc<AuthState>>,
    request: Request,
    next: Next,
) -> Response {
    let path = request.uri().path().to_string();
    let Some(tier) = tier_for(&path) else {
        return next.run(request).await;
    };

    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    let client = client_key(
        request.headers(),
        peer,
        auth_state.config().trust_proxy_headers(),
    );
    match auth_state.rate_limiter().check(tier, &path, &client).await {
        Ok(RateLimitDecision::Allowed) => next.run(request).await,
        Ok(RateLimitDecision::Limited { retry_after }) => {
            AuthError::RateLimited { retry_after }.into_response()
        }
        // Fail open when the counter store is unreachable.
        Err(err) => {
            warn!("rate limiter unavailable, allowing request: {err:#}");
            next.run(request).await
        }
    }
}

pub async fn csrf(
    auth_state: Extension<Arc<AuthState>>,
    request: Request,
    next: Next,
) -> Response {
    let method = request.method();
    if *method == Method::GET || *method == Method::HEAD || *method == Method::OPTIONS {
        return next.run(request).await;
    }

    let session_id = extract_cookie(request.headers(), CSRF_COOKIE_NAME);
    let token = extract_csrf_header(request.headers());
    match auth_state
        .csrf()
        .validate(session_id.as_deref(), token.as_deref())
        .await
    {
        Ok(()) => {
            let refreshed = match session_id.as_deref() {
                Some(session_id) => refresh_grant(&auth_state, session_id).await,
                None => None,
            };
            let mut response = next.run(request).await;
            if let Some(value) = refreshed {
                response.headers_mut().append(SET_COOKIE, value);
            }
            response
        }
        Err(err) => {
            if matches!(err, AuthError::Forbidden) {
                warn!(path = %request.uri().path(), "csrf check failed");
            }
            err.into_response()
        }
    }
}

/// Slide a used grant and build the matching cookie. A store failure only
/// costs the extension, never the request.
async fn refresh_grant(auth_state: &AuthState, session_id: &str) -> Option<HeaderValue> {
    match auth_state.csrf().touch(session_id).await {
        Ok(true) => cookie(
            CSRF_COOKIE_NAME,
            session_id,
            auth_state.csrf().ttl(),
            auth_state.config().secure_cookies(),
        )
        .ok(),
        Ok(false) => None,
        Err(err) => {
            warn!("failed to extend csrf grant: {err:#}");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tiers_by_route() {
        assert_eq!(tier_for("/login"), Some(RateLimitTier::Auth));
        assert_eq!(tier_for("/signup"), Some(RateLimitTier::Auth));
        assert_eq!(tier_for("/google"), Some(RateLimitTier::Auth));
        assert_eq!(tier_for("/forgot-password"), Some(RateLimitTier::Strict));
        assert_eq!(tier_for("/resend-verification"), Some(RateLimitTier::Strict));
        assert_eq!(tier_for("/reset-password"), Some(RateLimitTier::Strict));
        assert_eq!(tier_for("/refresh-token"), Some(RateLimitTier::General));
        assert_eq!(tier_for("/verify-email"), Some(RateLimitTier::General));
        assert_eq!(tier_for("/me"), Some(RateLimitTier::General));
        assert_eq!(tier_for("/health"), None);
    }
}
