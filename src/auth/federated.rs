//! Federated identity verification.
//!
//! The client sends the provider-issued ID token; the server confirms it with the
//! provider before trusting any claim in it.

use anyhow::Context;
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use tracing::{instrument, warn};
use url::Url;

use super::error::{AuthError, AuthResult};

pub const GOOGLE_TOKENINFO_URL: &str = "https://oauth2.googleapis.com/tokeninfo";
const GOOGLE_ISSUERS: [&str; 2] = ["accounts.google.com", "https://accounts.google.com"];

/// Claims the auth core relies on after a provider confirmed the credential.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FederatedIdentity {
    pub subject: String,
    pub email: String,
    pub name: String,
}

#[async_trait]
pub trait FederatedVerifier: Send + Sync {
    /// # Errors
    /// [`AuthError::TokenInvalid`] when the provider rejects the credential.
    async fn verify(&self, credential: &str) -> AuthResult<FederatedIdentity>;
}

/// Used when no provider client id is configured.
#[derive(Clone, Debug)]
pub struct DisabledFederatedVerifier;

#[async_trait]
impl FederatedVerifier for DisabledFederatedVerifier {
    async fn verify(&self, _credential: &str) -> AuthResult<FederatedIdentity> {
        Err(AuthError::validation("Federated login is not enabled"))
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Flag {
    Bool(bool),
    Text(String),
}

impl Flag {
    fn is_true(&self) -> bool {
        match self {
            Self::Bool(value) => *value,
            Self::Text(value) => value.eq_ignore_ascii_case("true"),
        }
    }
}

#[derive(Debug, Deserialize)]
struct TokenInfo {
    aud: String,
    iss: String,
    sub: String,
    email: Option<String>,
    email_verified: Option<Flag>,
    name: Option<String>,
}

/// Verifies Google ID tokens through the `tokeninfo` endpoint.
pub struct GoogleIdTokenVerifier {
    client: reqwest::Client,
    client_id: String,
    tokeninfo_url: Url,
}

impl GoogleIdTokenVerifier {
    /// # Errors
    /// Returns an error if the HTTP client cannot be built or the URL is invalid.
    pub fn new(client_id: String, tokeninfo_url: &str, timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(crate::APP_USER_AGENT)
            .timeout(timeout)
            .build()
            .context("failed to build federated verifier HTTP client")?;
        let tokeninfo_url = Url::parse(tokeninfo_url)
            .with_context(|| format!("invalid tokeninfo URL: {tokeninfo_url}"))?;
        Ok(Self {
            client,
            client_id,
            tokeninfo_url,
        })
    }
}

#[async_trait]
impl FederatedVerifier for GoogleIdTokenVerifier {
    #[instrument(skip_all, name = "federated.verify")]
    async fn verify(&self, credential: &str) -> AuthResult<FederatedIdentity> {
        let response = self
            .client
            .get(self.tokeninfo_url.clone())
            .query(&[("id_token", credential)])
            .send()
            .await
            .context("tokeninfo request failed")?;

        if !response.status().is_success() {
            warn!(status = %response.status(), "provider rejected id token");
            return Err(AuthError::TokenInvalid);
        }

        let info: TokenInfo = response
            .json()
            .await
            .context("failed to decode tokeninfo response")?;

        if info.aud != self.client_id {
            warn!("id token audience mismatch");
            return Err(AuthError::TokenInvalid);
        }
        if !GOOGLE_ISSUERS.contains(&info.iss.as_str()) {
            warn!(issuer = %info.iss, "id token issuer mismatch");
            return Err(AuthError::TokenInvalid);
        }
        if !info.email_verified.as_ref().is_some_and(Flag::is_true) {
            warn!("provider email is not verified");
            return Err(AuthError::TokenInvalid);
        }
        let email = info
            .email
            .map(|email| email.trim().to_lowercase())
            .filter(|email| !email.is_empty())
            .ok_or(AuthError::TokenInvalid)?;
        let name = info
            .name
            .map(|name| name.trim().to_string())
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| email.split('@').next().unwrap_or_default().to_string());

        Ok(FederatedIdentity {
            subject: info.sub,
            email,
            name,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use axum::{extract::Query, http::StatusCode, routing::get, Json, Router};
    use serde_json::{json, Value};
    use std::collections::HashMap;
    use tokio::net::TcpListener;

    async fn tokeninfo(Query(params): Query<HashMap<String, String>>) -> (StatusCode, Json<Value>) {
        match params.get("id_token").map(String::as_str) {
            Some("good") => (
                StatusCode::OK,
                Json(json!({
                    "aud": "client-123",
                    "iss": "https://accounts.google.com",
                    "sub": "google-sub-1",
                    "email": "Alice@X.com",
                    "email_verified": "true",
                    "name": "Alice"
                })),
            ),
            Some("other-audience") => (
                StatusCode::OK,
                Json(json!({
                    "aud": "someone-else",
                    "iss": "accounts.google.com",
                    "sub": "google-sub-2",
                    "email": "bob@x.com",
                    "email_verified": true
                })),
            ),
            Some("unverified") => (
                StatusCode::OK,
                Json(json!({
                    "aud": "client-123",
                    "iss": "accounts.google.com",
                    "sub": "google-sub-3",
                    "email": "carol@x.com",
                    "email_verified": "false"
                })),
            ),
            _ => (
                StatusCode::BAD_REQUEST,
                Json(json!({"error": "invalid_token"})),
            ),
        }
    }

    async fn verifier() -> Result<GoogleIdTokenVerifier> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let app = Router::new().route("/tokeninfo", get(tokeninfo));
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });
        GoogleIdTokenVerifier::new(
            "client-123".to_string(),
            &format!("http://{addr}/tokeninfo"),
            Duration::from_secs(5),
        )
    }

    #[tokio::test]
    async fn accepts_verified_token_for_our_audience() -> Result<()> {
        let identity = verifier().await?.verify("good").await?;
        assert_eq!(
            identity,
            FederatedIdentity {
                subject: "google-sub-1".to_string(),
                email: "alice@x.com".to_string(),
                name: "Alice".to_string(),
            }
        );
        Ok(())
    }

    #[tokio::test]
    async fn rejects_bad_tokens() -> Result<()> {
        let verifier = verifier().await?;
        for credential in ["other-audience", "unverified", "garbage"] {
            assert!(
                matches!(
                    verifier.verify(credential).await,
                    Err(AuthError::TokenInvalid)
                ),
                "{credential} should be rejected"
            );
        }
        Ok(())
    }

    #[tokio::test]
    async fn disabled_verifier_refuses() {
        assert!(matches!(
            DisabledFederatedVerifier.verify("anything").await,
            Err(AuthError::Validation(_))
        ));
    }
}
