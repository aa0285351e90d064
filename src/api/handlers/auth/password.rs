//! Forgot and reset password.

use axum::{
    extract::Extension,
    http::StatusCode,
    response::{IntoResponse, Json},
};
use std::sync::Arc;

use super::state::AuthState;
use super::types::{EmailRequest, MessageResponse, ResetPasswordRequest};
use super::utils::{validate_email, validate_reset};
use crate::auth::AuthError;

/// Email a password reset link. Answers the same way for unknown addresses.
#[utoipa::path(
    post,
    path = "/forgot-password",
    request_body = EmailRequest,
    params(
        ("x-csrf-token" = String, Header, description = "Token from GET /csrf-token")
    ),
    responses(
        (status = 200, description = "Request accepted", body = MessageResponse),
        (status = 400, description = "Invalid email", body = MessageResponse),
        (status = 429, description = "Rate limited", body = MessageResponse)
    ),
    tag = "auth"
)]
pub async fn forgot_password(
    auth_state: Extension<Arc<AuthState>>,
    payload: Option<Json<EmailRequest>>,
) -> impl IntoResponse {
    let Some(Json(request)) = payload else {
        return AuthError::validation("Missing payload").into_response();
    };
    let email = match validate_email(&request.email) {
        Ok(email) => email,
        Err(err) => return err.into_response(),
    };

    match auth_state.service().forgot_password(&email).await {
        Ok(()) => (
            StatusCode::OK,
            Json(MessageResponse::new(
                "If that email exists, a password reset link has been sent",
            )),
        )
            .into_response(),
        Err(err) => err.into_response(),
    }
}

/// Redeem a reset token and set a new password. Every session of the user ends.
#[utoipa::path(
    post,
    path = "/reset-password",
    request_body = ResetPasswordRequest,
    params(
        ("x-csrf-token" = String, Header, description = "Token from GET /csrf-token")
    ),
    responses(
        (status = 200, description = "Password reset", body = MessageResponse),
        (status = 400, description = "Invalid input or invalid/expired token", body = MessageResponse),
        (status = 429, description = "Rate limited", body = MessageResponse)
    ),
    tag = "auth"
)]
pub async fn reset_password(
    auth_state: Extension<Arc<AuthState>>,
    payload: Option<Json<ResetPasswordRequest>>,
) -> impl IntoResponse {
    let Some(Json(request)) = payload else {
        return AuthError::validation("Missing payload").into_response();
    };
    let token = match validate_reset(&request.token, &request.password) {
        Ok(token) => token,
        Err(err) => return err.into_response(),
    };

    match auth_state
        .service()
        .reset_password(&token, &request.password)
        .await
    {
        Ok(()) => (
            StatusCode::OK,
            Json(MessageResponse::new("Password reset successfully!")),
        )
            .into_response(),
        Err(err) => err.into_response(),
    }
}
