//! Anti-forgery grant issuance.

use axum::{
    extract::Extension,
    http::{header::SET_COOKIE, HeaderMap, StatusCode},
    response::{IntoResponse, Json},
};
use std::sync::Arc;
use tracing::error;

use super::state::AuthState;
use super::types::CsrfTokenResponse;
use super::utils::{cookie, extract_cookie, CSRF_COOKIE_NAME};

/// Issue a CSRF token and bind it to the anonymous `sessionId` cookie.
///
/// The token must be echoed in the `x-csrf-token` header on every mutating request.
#[utoipa::path(
    get,
    path = "/csrf-token",
    responses(
        (status = 200, description = "CSRF grant issued", body = CsrfTokenResponse)
    ),
    tag = "auth"
)]
pub async fn csrf_token(
    headers: HeaderMap,
    auth_state: Extension<Arc<AuthState>>,
) -> impl IntoResponse {
    let existing = extract_cookie(&headers, CSRF_COOKIE_NAME);
    let grant = match auth_state.csrf().issue(existing.as_deref()).await {
        Ok(grant) => grant,
        Err(err) => return err.into_response(),
    };

    let mut response_headers = HeaderMap::new();
    match cookie(
        CSRF_COOKIE_NAME,
        &grant.session_id,
        auth_state.csrf().ttl(),
        auth_state.config().secure_cookies(),
    ) {
        Ok(value) => {
            response_headers.insert(SET_COOKIE, value);
        }
        Err(err) => {
            error!("Failed to build csrf cookie: {err}");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    }

    (
        StatusCode::OK,
        response_headers,
        Json(CsrfTokenResponse {
            csrf_token: grant.token,
        }),
    )
        .into_response()
}
