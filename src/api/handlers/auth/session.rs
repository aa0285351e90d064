//! Refresh, logout and logout-all.

use axum::{
    extract::Extension,
    http::{header::SET_COOKIE, HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
};
use std::sync::Arc;

use super::principal::require_auth;
use super::state::AuthState;
use super::types::{AccessTokenResponse, MessageResponse};
use super::utils::{clear_cookie, extract_cookie, REFRESH_COOKIE_NAME};
use crate::auth::AuthError;

/// Mint a new access token from the refresh cookie.
#[utoipa::path(
    post,
    path = "/refresh-token",
    params(
        ("x-csrf-token" = String, Header, description = "Token from GET /csrf-token")
    ),
    responses(
        (status = 200, description = "New access token", body = AccessTokenResponse),
        (status = 401, description = "Missing, invalid, expired or revoked refresh token", body = MessageResponse)
    ),
    tag = "auth"
)]
pub async fn refresh_token(
    headers: HeaderMap,
    auth_state: Extension<Arc<AuthState>>,
) -> impl IntoResponse {
    let Some(refresh_token) = extract_cookie(&headers, REFRESH_COOKIE_NAME) else {
        return AuthError::TokenInvalid.into_response();
    };

    match auth_state.service().refresh(&refresh_token).await {
        Ok(access_token) => {
            (StatusCode::OK, Json(AccessTokenResponse { access_token })).into_response()
        }
        Err(err) => err.into_response(),
    }
}

/// End the session bound to the refresh cookie.
#[utoipa::path(
    post,
    path = "/logout",
    params(
        ("x-csrf-token" = String, Header, description = "Token from GET /csrf-token")
    ),
    responses(
        (status = 200, description = "Logged out", body = MessageResponse),
        (status = 401, description = "Missing or invalid access token", body = MessageResponse),
        (status = 403, description = "Session belongs to another user", body = MessageResponse)
    ),
    security(("bearer" = [])),
    tag = "auth"
)]
pub async fn logout(
    headers: HeaderMap,
    auth_state: Extension<Arc<AuthState>>,
) -> impl IntoResponse {
    let principal = match require_auth(&headers, &auth_state) {
        Ok(principal) => principal,
        Err(err) => return err.into_response(),
    };

    let refresh_token = extract_cookie(&headers, REFRESH_COOKIE_NAME);
    match auth_state
        .service()
        .logout(principal.user_id, refresh_token.as_deref())
        .await
    {
        Ok(()) => logged_out(&auth_state, "Logged out successfully"),
        Err(err) => err.into_response(),
    }
}

/// End every session of the caller.
#[utoipa::path(
    post,
    path = "/logout-all",
    params(
        ("x-csrf-token" = String, Header, description = "Token from GET /csrf-token")
    ),
    responses(
        (status = 200, description = "Logged out everywhere", body = MessageResponse),
        (status = 401, description = "Missing or invalid access token", body = MessageResponse)
    ),
    security(("bearer" = [])),
    tag = "auth"
)]
pub async fn logout_all(
    headers: HeaderMap,
    auth_state: Extension<Arc<AuthState>>,
) -> impl IntoResponse {
    let principal = match require_auth(&headers, &auth_state) {
        Ok(principal) => principal,
        Err(err) => return err.into_response(),
    };

    match auth_state.service().logout_all(principal.user_id).await {
        Ok(_) => logged_out(&auth_state, "Logged out from all devices"),
        Err(err) => err.into_response(),
    }
}

fn logged_out(auth_state: &AuthState, message: &str) -> Response {
    // Always clear the cookie, even if the session record was missing.
    let mut response_headers = HeaderMap::new();
    if let Ok(cookie) = clear_cookie(REFRESH_COOKIE_NAME, auth_state.config().secure_cookies()) {
        response_headers.insert(SET_COOKIE, cookie);
    }
    (
        StatusCode::OK,
        response_headers,
        Json(MessageResponse::new(message)),
    )
        .into_response()
}
