//! HTTP mapping of [`AuthError`].

use axum::{
    http::{header::RETRY_AFTER, HeaderValue, StatusCode},
    response::{IntoResponse, Json, Response},
};
use serde_json::json;
use std::time::Duration;
use tracing::error;

use crate::auth::AuthError;

impl AuthError {
    #[must_use]
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Validation(_) | Self::NotFound | Self::DuplicateEmail => StatusCode::BAD_REQUEST,
            Self::InvalidCredentials | Self::TokenExpired | Self::TokenInvalid => {
                StatusCode::UNAUTHORIZED
            }
            Self::EmailNotVerified | Self::Forbidden => StatusCode::FORBIDDEN,
            Self::AccountLocked { .. } | Self::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = match &self {
            Self::Internal(err) => {
                error!("internal error: {err:#}");
                json!({ "message": "Internal server error" })
            }
            Self::EmailNotVerified => json!({
                "message": self.to_string(),
                "emailVerified": false,
            }),
            Self::AccountLocked { retry_after } => json!({
                "message": format!(
                    "Account temporarily locked. Try again in {} minutes",
                    ceil_minutes(*retry_after)
                ),
                "retry_after_seconds": ceil_seconds(*retry_after),
            }),
            Self::RateLimited { retry_after } => json!({
                "message": self.to_string(),
                "retry_after_seconds": ceil_seconds(*retry_after),
            }),
            _ => json!({ "message": self.to_string() }),
        };

        let mut response = (status, Json(body)).into_response();
        if let Some(retry_after) = self.retry_after() {
            response
                .headers_mut()
                .insert(RETRY_AFTER, HeaderValue::from(ceil_seconds(retry_after)));
        }
        response
    }
}

fn ceil_seconds(duration: Duration) -> u64 {
    let seconds = duration.as_secs();
    if duration.subsec_nanos() > 0 {
        seconds + 1
    } else {
        seconds
    }
}

fn ceil_minutes(duration: Duration) -> u64 {
    ceil_seconds(duration).div_ceil(60)
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::{anyhow, Result};
    use http_body_util::BodyExt;
    use serde_json::Value;

    async fn body_json(response: Response) -> Result<Value> {
        let bytes = response.into_body().collect().await?.to_bytes();
        Ok(serde_json::from_slice(&bytes)?)
    }

    #[test]
    fn status_mapping() {
        assert_eq!(AuthError::validation("x").status(), StatusCode::BAD_REQUEST);
        assert_eq!(AuthError::NotFound.status(), StatusCode::BAD_REQUEST);
        assert_eq!(AuthError::DuplicateEmail.status(), StatusCode::BAD_REQUEST);
        assert_eq!(AuthError::InvalidCredentials.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(AuthError::TokenExpired.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(AuthError::EmailNotVerified.status(), StatusCode::FORBIDDEN);
        assert_eq!(AuthError::Forbidden.status(), StatusCode::FORBIDDEN);
        assert_eq!(
            AuthError::RateLimited {
                retry_after: Duration::from_secs(1)
            }
            .status(),
            StatusCode::TOO_MANY_REQUESTS
        );
    }

    #[tokio::test]
    async fn lockout_carries_retry_hint() -> Result<()> {
        let response = AuthError::AccountLocked {
            retry_after: Duration::from_millis(14 * 60 * 1000 + 1),
        }
        .into_response();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(
            response.headers().get(RETRY_AFTER).and_then(|v| v.to_str().ok()),
            Some("841")
        );
        let body = body_json(response).await?;
        assert_eq!(body["retry_after_seconds"], 841);
        assert_eq!(
            body["message"],
            "Account temporarily locked. Try again in 15 minutes"
        );
        Ok(())
    }

    #[tokio::test]
    async fn internal_details_are_hidden() -> Result<()> {
        let response = AuthError::Internal(anyhow!("connection refused to 10.0.0.5")).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = body_json(response).await?;
        assert_eq!(body["message"], "Internal server error");
        Ok(())
    }

    #[tokio::test]
    async fn unverified_login_flags_email() -> Result<()> {
        let body = body_json(AuthError::EmailNotVerified.into_response()).await?;
        assert_eq!(body["emailVerified"], false);
        Ok(())
    }
}
