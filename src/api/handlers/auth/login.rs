//! Password and federated login.

use axum::{
    extract::Extension,
    http::{header::SET_COOKIE, HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
};
use std::sync::Arc;
use tracing::error;

use super::state::AuthState;
use super::types::{GoogleLoginRequest, LoginRequest, LoginResponse, MessageResponse, UserResponse};
use super::utils::{cookie, device, validate_login, REFRESH_COOKIE_NAME};
use crate::auth::{AuthError, LoginOutcome};

/// Login with email and password.
///
/// Returns the access token in the body and the refresh token as an `HttpOnly` cookie.
#[utoipa::path(
    post,
    path = "/login",
    request_body = LoginRequest,
    params(
        ("x-csrf-token" = String, Header, description = "Token from GET /csrf-token")
    ),
    responses(
        (status = 200, description = "Logged in", body = LoginResponse),
        (status = 400, description = "Invalid input", body = MessageResponse),
        (status = 401, description = "Invalid email or password", body = MessageResponse),
        (status = 403, description = "Email not verified or CSRF check failed", body = MessageResponse),
        (status = 429, description = "Account locked or rate limited", body = MessageResponse)
    ),
    tag = "auth"
)]
pub async fn login(
    headers: HeaderMap,
    auth_state: Extension<Arc<AuthState>>,
    payload: Option<Json<LoginRequest>>,
) -> impl IntoResponse {
    let Some(Json(request)) = payload else {
        return AuthError::validation("Missing payload").into_response();
    };

    let email = match validate_login(&request.email, &request.password) {
        Ok(email) => email,
        Err(err) => return err.into_response(),
    };

    match auth_state
        .service()
        .login(&email, &request.password, &device(&headers))
        .await
    {
        Ok(outcome) => login_response(&auth_state, outcome),
        Err(err) => err.into_response(),
    }
}

/// Login with a Google ID token. First-time users are created verified.
#[utoipa::path(
    post,
    path = "/google",
    request_body = GoogleLoginRequest,
    params(
        ("x-csrf-token" = String, Header, description = "Token from GET /csrf-token")
    ),
    responses(
        (status = 200, description = "Logged in", body = LoginResponse),
        (status = 400, description = "Missing credential or federated login disabled", body = MessageResponse),
        (status = 401, description = "Credential rejected by the provider", body = MessageResponse),
        (status = 429, description = "Rate limited", body = MessageResponse)
    ),
    tag = "auth"
)]
pub async fn google(
    headers: HeaderMap,
    auth_state: Extension<Arc<AuthState>>,
    payload: Option<Json<GoogleLoginRequest>>,
) -> impl IntoResponse {
    let credential = match payload {
        Some(Json(request)) if !request.credential.trim().is_empty() => request.credential,
        _ => return AuthError::validation("Google credential is required").into_response(),
    };

    match auth_state
        .service()
        .federated_login(credential.trim(), &device(&headers))
        .await
    {
        Ok(outcome) => login_response(&auth_state, outcome),
        Err(err) => err.into_response(),
    }
}

fn login_response(auth_state: &AuthState, outcome: LoginOutcome) -> Response {
    let refresh_cookie = match cookie(
        REFRESH_COOKIE_NAME,
        &outcome.refresh_token,
        auth_state.service().issuer().refresh_ttl(),
        auth_state.config().secure_cookies(),
    ) {
        Ok(value) => value,
        Err(err) => {
            error!("Failed to build refresh cookie: {err}");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    let mut response_headers = HeaderMap::new();
    response_headers.insert(SET_COOKIE, refresh_cookie);
    (
        StatusCode::OK,
        response_headers,
        Json(LoginResponse {
            message: "Login successful".to_string(),
            access_token: outcome.access_token,
            user: UserResponse::from(&outcome.user),
        }),
    )
        .into_response()
}
