//! Single-use verification and reset tokens.
//!
//! A token is either a long opaque value sent inside a link or a six digit code
//! typed by the user. Both shapes are stored as hashes with an explicit form so a
//! lookup only matches the form that was actually presented.

use anyhow::{anyhow, Context};
use chrono::Utc;
use std::{sync::Arc, time::Duration};
use tracing::debug;
use uuid::Uuid;

use super::error::{AuthError, AuthResult};
use super::utils::{generate_otp, generate_token, hash_token, is_otp_shape};
use crate::store::{AuthStore, InsertOutcome, NewToken, TokenForm, TokenPurpose, TokenRecord};

const MAX_INSERT_ATTEMPTS: usize = 5;

/// A freshly minted token. `value` goes to the user and is never persisted.
#[derive(Debug)]
pub struct IssuedToken {
    pub value: String,
    pub record: TokenRecord,
}

pub struct VerificationTokens {
    store: Arc<dyn AuthStore>,
}

impl VerificationTokens {
    #[must_use]
    pub fn new(store: Arc<dyn AuthStore>) -> Self {
        Self { store }
    }

    /// Issue a high-entropy link token.
    pub async fn create(
        &self,
        user_id: Uuid,
        purpose: TokenPurpose,
        ttl: Duration,
    ) -> AuthResult<IssuedToken> {
        self.insert(user_id, purpose, TokenForm::Link, ttl).await
    }

    /// Issue a six digit code. Codes are unique among stored rows; a collision retries.
    pub async fn create_otp(
        &self,
        user_id: Uuid,
        purpose: TokenPurpose,
        ttl: Duration,
    ) -> AuthResult<IssuedToken> {
        self.insert(user_id, purpose, TokenForm::Otp, ttl).await
    }

    /// Live token of `purpose` whose form matches the shape of `value`.
    pub async fn find(&self, value: &str, purpose: TokenPurpose) -> AuthResult<Option<TokenRecord>> {
        let presented = presented_form(value);
        let record = self
            .store
            .find_live_token(&hash_token(value), purpose)
            .await?;
        Ok(record.filter(|record| record.form == presented))
    }

    pub async fn delete(&self, value: &str) -> AuthResult<bool> {
        Ok(self.store.delete_token(&hash_token(value)).await?)
    }

    /// Find then delete. When two requests race, only the one that removes the row wins.
    ///
    /// # Errors
    /// [`AuthError::NotFound`] for unknown, expired, mismatched, or already used tokens.
    pub async fn consume(&self, value: &str, purpose: TokenPurpose) -> AuthResult<TokenRecord> {
        let record = self.find(value, purpose).await?.ok_or(AuthError::NotFound)?;
        if self.delete(value).await? {
            Ok(record)
        } else {
            debug!(token_id = %record.id, "token redeemed concurrently");
            Err(AuthError::NotFound)
        }
    }

    /// Drop every pending token of `purpose` for a user.
    pub async fn delete_for_user(&self, user_id: Uuid, purpose: TokenPurpose) -> AuthResult<u64> {
        Ok(self.store.delete_user_tokens(user_id, purpose).await?)
    }

    pub async fn cleanup_expired(&self) -> AuthResult<u64> {
        Ok(self.store.delete_expired_tokens().await?)
    }

    async fn insert(
        &self,
        user_id: Uuid,
        purpose: TokenPurpose,
        form: TokenForm,
        ttl: Duration,
    ) -> AuthResult<IssuedToken> {
        let ttl = chrono::Duration::from_std(ttl).context("token ttl out of range")?;

        for _ in 0..MAX_INSERT_ATTEMPTS {
            let value = match form {
                TokenForm::Link => generate_token()?,
                TokenForm::Otp => generate_otp(),
            };
            let outcome = self
                .store
                .insert_token(NewToken {
                    user_id,
                    token_hash: hash_token(&value),
                    purpose,
                    form,
                    expires_at: Utc::now() + ttl,
                })
                .await?;
            match outcome {
                InsertOutcome::Created(record) => return Ok(IssuedToken { value, record }),
                InsertOutcome::Conflict => debug!(form = form.as_str(), "token collision, retrying"),
            }
        }

        Err(anyhow!("failed to issue a unique {} token", form.as_str()).into())
    }
}

fn presented_form(value: &str) -> TokenForm {
    if is_otp_shape(value) {
        TokenForm::Otp
    } else {
        TokenForm::Link
    }
}
