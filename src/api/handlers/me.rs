//! Endpoints about the authenticated caller.

use axum::{
    extract::Extension,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Json},
};
use std::sync::Arc;

use super::auth::{
    require_auth,
    types::{CurrentUserResponse, MessageResponse, SessionResponse, SessionsResponse, UserResponse},
    AuthState,
};

/// Profile of the caller.
#[utoipa::path(
    get,
    path = "/me",
    responses(
        (status = 200, description = "Current user", body = CurrentUserResponse),
        (status = 401, description = "Missing or invalid access token", body = MessageResponse)
    ),
    security(("bearer" = [])),
    tag = "me"
)]
pub async fn me(headers: HeaderMap, auth_state: Extension<Arc<AuthState>>) -> impl IntoResponse {
    let principal = match require_auth(&headers, &auth_state) {
        Ok(principal) => principal,
        Err(err) => return err.into_response(),
    };

    match auth_state.service().current_user(principal.user_id).await {
        Ok(user) => (
            StatusCode::OK,
            Json(CurrentUserResponse {
                user: UserResponse::from(&user),
            }),
        )
            .into_response(),
        Err(err) => err.into_response(),
    }
}

/// Active sessions of the caller, newest first.
#[utoipa::path(
    get,
    path = "/me/sessions",
    responses(
        (status = 200, description = "Active sessions", body = SessionsResponse),
        (status = 401, description = "Missing or invalid access token", body = MessageResponse)
    ),
    security(("bearer" = [])),
    tag = "me"
)]
pub async fn sessions(
    headers: HeaderMap,
    auth_state: Extension<Arc<AuthState>>,
) -> impl IntoResponse {
    let principal = match require_auth(&headers, &auth_state) {
        Ok(principal) => principal,
        Err(err) => return err.into_response(),
    };

    match auth_state.service().list_sessions(principal.user_id).await {
        Ok(sessions) => (
            StatusCode::OK,
            Json(SessionsResponse {
                sessions: sessions.into_iter().map(SessionResponse::from).collect(),
            }),
        )
            .into_response(),
        Err(err) => err.into_response(),
    }
}
