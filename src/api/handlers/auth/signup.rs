//! Account creation.

use axum::{
    extract::Extension,
    http::StatusCode,
    response::{IntoResponse, Json},
};
use std::sync::Arc;

use super::state::AuthState;
use super::types::{MessageResponse, SignupRequest, SignupResponse, UserResponse};
use super::utils::validate_signup;
use crate::auth::AuthError;

/// Create an unverified account and email the verification link and code.
#[utoipa::path(
    post,
    path = "/signup",
    request_body = SignupRequest,
    params(
        ("x-csrf-token" = String, Header, description = "Token from GET /csrf-token")
    ),
    responses(
        (status = 201, description = "Account created", body = SignupResponse),
        (status = 400, description = "Invalid input or email already registered", body = MessageResponse),
        (status = 403, description = "CSRF check failed", body = MessageResponse),
        (status = 429, description = "Rate limited", body = MessageResponse)
    ),
    tag = "auth"
)]
pub async fn signup(
    auth_state: Extension<Arc<AuthState>>,
    payload: Option<Json<SignupRequest>>,
) -> impl IntoResponse {
    let Some(Json(request)) = payload else {
        return AuthError::validation("Missing payload").into_response();
    };

    let (name, email) = match validate_signup(&request.name, &request.email, &request.password) {
        Ok(valid) => valid,
        Err(err) => return err.into_response(),
    };

    match auth_state
        .service()
        .signup(&name, &email, &request.password)
        .await
    {
        Ok(user) => (
            StatusCode::CREATED,
            Json(SignupResponse {
                message: "Account created successfully! Please check your email to verify your account."
                    .to_string(),
                user: UserResponse::from(&user),
            }),
        )
            .into_response(),
        Err(err) => err.into_response(),
    }
}
