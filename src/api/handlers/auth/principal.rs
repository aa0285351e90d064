//! Authenticated principal extraction.
//!
//! Flow Overview: read the bearer access token, verify it, and hand the user id to
//! the handler. Account lookups happen in the handlers that need them.

use axum::http::HeaderMap;
use uuid::Uuid;

use super::state::AuthState;
use super::utils::extract_bearer_token;
use crate::auth::{AuthError, AuthResult};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Principal {
    pub user_id: Uuid,
}

/// Resolve the bearer access token, or fail with 401.
pub fn require_auth(headers: &HeaderMap, auth_state: &AuthState) -> AuthResult<Principal> {
    let token = extract_bearer_token(headers).ok_or(AuthError::TokenInvalid)?;
    let user_id = auth_state.service().authenticate(&token)?;
    Ok(Principal { user_id })
}
