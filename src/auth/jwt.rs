//! Signed access and refresh tokens.
//!
//! Both kinds are HS256 JWTs, but each kind has its own secret: a refresh token
//! never validates as an access token and the other way round.

use anyhow::{anyhow, Context, Result};
use chrono::Utc;
use jsonwebtoken::{
    decode, encode, errors::ErrorKind, Algorithm, DecodingKey, EncodingKey, Header, Validation,
};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use ulid::Ulid;
use uuid::Uuid;

use super::error::{AuthError, AuthResult};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenKind {
    Access,
    Refresh,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub kind: TokenKind,
    pub iat: i64,
    pub exp: i64,
    /// Unique per token so two logins in the same second never mint the same refresh token.
    pub jti: String,
}

struct Keys {
    encoding: EncodingKey,
    decoding: DecodingKey,
}

impl Keys {
    fn new(secret: &SecretString) -> Self {
        let bytes = secret.expose_secret().as_bytes();
        Self {
            encoding: EncodingKey::from_secret(bytes),
            decoding: DecodingKey::from_secret(bytes),
        }
    }
}

pub struct TokenIssuer {
    access: Keys,
    refresh: Keys,
    access_ttl: Duration,
    refresh_ttl: Duration,
}

impl TokenIssuer {
    /// # Errors
    /// Returns an error if a secret is empty or both kinds share the same secret.
    pub fn new(
        access_secret: &SecretString,
        refresh_secret: &SecretString,
        access_ttl: Duration,
        refresh_ttl: Duration,
    ) -> Result<Self> {
        if access_secret.expose_secret().is_empty() || refresh_secret.expose_secret().is_empty() {
            return Err(anyhow!("JWT secrets must not be empty"));
        }
        if access_secret.expose_secret() == refresh_secret.expose_secret() {
            return Err(anyhow!("access and refresh JWT secrets must differ"));
        }
        Ok(Self {
            access: Keys::new(access_secret),
            refresh: Keys::new(refresh_secret),
            access_ttl,
            refresh_ttl,
        })
    }

    #[must_use]
    pub fn access_ttl(&self) -> Duration {
        self.access_ttl
    }

    #[must_use]
    pub fn refresh_ttl(&self) -> Duration {
        self.refresh_ttl
    }

    pub fn issue_access(&self, user_id: Uuid) -> AuthResult<String> {
        Ok(self.encode_at(TokenKind::Access, user_id, Utc::now().timestamp())?)
    }

    pub fn issue_refresh(&self, user_id: Uuid) -> AuthResult<String> {
        Ok(self.encode_at(TokenKind::Refresh, user_id, Utc::now().timestamp())?)
    }

    /// # Errors
    /// [`AuthError::TokenExpired`] or [`AuthError::TokenInvalid`].
    pub fn verify_access(&self, token: &str) -> AuthResult<Uuid> {
        self.verify(TokenKind::Access, token).map(|claims| claims.sub)
    }

    /// # Errors
    /// [`AuthError::TokenExpired`] or [`AuthError::TokenInvalid`].
    pub fn verify_refresh(&self, token: &str) -> AuthResult<Uuid> {
        self.verify(TokenKind::Refresh, token).map(|claims| claims.sub)
    }

    fn keys(&self, kind: TokenKind) -> (&Keys, Duration) {
        match kind {
            TokenKind::Access => (&self.access, self.access_ttl),
            TokenKind::Refresh => (&self.refresh, self.refresh_ttl),
        }
    }

    fn encode_at(&self, kind: TokenKind, user_id: Uuid, issued_at: i64) -> Result<String> {
        let (keys, ttl) = self.keys(kind);
        let ttl = i64::try_from(ttl.as_secs()).unwrap_or(i64::MAX);
        let claims = Claims {
            sub: user_id,
            kind,
            iat: issued_at,
            exp: issued_at.saturating_add(ttl),
            jti: Ulid::new().to_string(),
        };
        encode(&Header::new(Algorithm::HS256), &claims, &keys.encoding)
            .context("failed to sign token")
    }

    fn verify(&self, kind: TokenKind, token: &str) -> AuthResult<Claims> {
        let (keys, _) = self.keys(kind);
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;

        let data = decode::<Claims>(token, &keys.decoding, &validation).map_err(|err| {
            match err.kind() {
                ErrorKind::ExpiredSignature => AuthError::TokenExpired,
                _ => AuthError::TokenInvalid,
            }
        })?;

        if data.claims.kind == kind {
            Ok(data.claims)
        } else {
            Err(AuthError::TokenInvalid)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn issuer() -> Result<TokenIssuer> {
        TokenIssuer::new(
            &SecretString::from("access-secret".to_string()),
            &SecretString::from("refresh-secret".to_string()),
            Duration::from_secs(15 * 60),
            Duration::from_secs(30 * 24 * 60 * 60),
        )
    }

    #[test]
    fn access_token_round_trip() -> Result<()> {
        let issuer = issuer()?;
        let user_id = Uuid::new_v4();
        let token = issuer.issue_access(user_id)?;
        assert_eq!(issuer.verify_access(&token)?, user_id);
        Ok(())
    }

    #[test]
    fn kinds_do_not_cross_validate() -> Result<()> {
        let issuer = issuer()?;
        let user_id = Uuid::new_v4();
        let access = issuer.issue_access(user_id)?;
        let refresh = issuer.issue_refresh(user_id)?;

        assert!(matches!(
            issuer.verify_refresh(&access),
            Err(AuthError::TokenInvalid)
        ));
        assert!(matches!(
            issuer.verify_access(&refresh),
            Err(AuthError::TokenInvalid)
        ));
        Ok(())
    }

    #[test]
    fn expired_and_invalid_are_distinct() -> Result<()> {
        let issuer = issuer()?;
        let stale = issuer.encode_at(
            TokenKind::Access,
            Uuid::new_v4(),
            Utc::now().timestamp() - 16 * 60,
        )?;
        assert!(matches!(
            issuer.verify_access(&stale),
            Err(AuthError::TokenExpired)
        ));
        assert!(matches!(
            issuer.verify_access("not.a.jwt"),
            Err(AuthError::TokenInvalid)
        ));
        Ok(())
    }

    #[test]
    fn refresh_tokens_are_unique() -> Result<()> {
        let issuer = issuer()?;
        let user_id = Uuid::new_v4();
        assert_ne!(issuer.issue_refresh(user_id)?, issuer.issue_refresh(user_id)?);
        Ok(())
    }

    #[test]
    fn rejects_shared_or_empty_secrets() {
        let same = SecretString::from("same".to_string());
        let ttl = Duration::from_secs(60);
        assert!(TokenIssuer::new(&same, &same, ttl, ttl).is_err());

        let empty = SecretString::from(String::new());
        assert!(TokenIssuer::new(&empty, &same, ttl, ttl).is_err());
    }
}
