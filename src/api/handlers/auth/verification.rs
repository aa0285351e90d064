//! Email verification endpoints.

use axum::{
    extract::Extension,
    http::StatusCode,
    response::{IntoResponse, Json},
};
use std::sync::Arc;

use super::state::AuthState;
use super::types::{EmailRequest, MessageResponse, VerifyEmailRequest};
use super::utils::validate_email;
use crate::auth::AuthError;

/// Redeem a verification link token or six digit code.
#[utoipa::path(
    post,
    path = "/verify-email",
    request_body = VerifyEmailRequest,
    params(
        ("x-csrf-token" = String, Header, description = "Token from GET /csrf-token")
    ),
    responses(
        (status = 200, description = "Email verified", body = MessageResponse),
        (status = 400, description = "Invalid or expired token", body = MessageResponse)
    ),
    tag = "auth"
)]
pub async fn verify_email(
    auth_state: Extension<Arc<AuthState>>,
    payload: Option<Json<VerifyEmailRequest>>,
) -> impl IntoResponse {
    let token = match payload {
        Some(Json(request)) if !request.token.trim().is_empty() => request.token,
        _ => return AuthError::validation("Verification token is required").into_response(),
    };

    match auth_state.service().verify_email(token.trim()).await {
        Ok(()) => (
            StatusCode::OK,
            Json(MessageResponse::new("Email verified successfully!")),
        )
            .into_response(),
        Err(err) => err.into_response(),
    }
}

/// Reissue the verification link and code.
///
/// Answers the same way whether or not the address exists or is already verified.
#[utoipa::path(
    post,
    path = "/resend-verification",
    request_body = EmailRequest,
    params(
        ("x-csrf-token" = String, Header, description = "Token from GET /csrf-token")
    ),
    responses(
        (status = 200, description = "Resend accepted", body = MessageResponse),
        (status = 400, description = "Invalid email", body = MessageResponse),
        (status = 429, description = "Rate limited", body = MessageResponse)
    ),
    tag = "auth"
)]
pub async fn resend_verification(
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

    match auth_state.service().resend_verification(&email).await {
        Ok(()) => (
            StatusCode::OK,
            Json(MessageResponse::new(
                "If that account needs verification, a new email has been sent",
            )),
        )
            .into_response(),
        Err(err) => err.into_response(),
    }
}
