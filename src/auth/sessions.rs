//! Server-side sessions, one per issued refresh token.
//!
//! A refresh token is only honored while its session row exists, so deleting the
//! row revokes the token immediately whatever its JWT expiry says.

use anyhow::{anyhow, Context};
use chrono::Utc;
use std::{sync::Arc, time::Duration};
use uuid::Uuid;

use super::error::AuthResult;
use super::utils::hash_token;
use crate::store::{AuthStore, InsertOutcome, Session};

const MAX_DEVICE_CHARS: usize = 255;

pub struct SessionRegistry {
    store: Arc<dyn AuthStore>,
    retention: Duration,
}

impl SessionRegistry {
    #[must_use]
    pub fn new(store: Arc<dyn AuthStore>, retention: Duration) -> Self {
        Self { store, retention }
    }

    #[must_use]
    pub fn retention(&self) -> Duration {
        self.retention
    }

    /// Record a session. Several sessions per user (and per device) are allowed.
    pub async fn create(
        &self,
        user_id: Uuid,
        refresh_token: &str,
        device: &str,
    ) -> AuthResult<Session> {
        let device = normalize_device(device);
        match self
            .store
            .insert_session(user_id, &hash_token(refresh_token), &device)
            .await?
        {
            InsertOutcome::Created(session) => Ok(session),
            InsertOutcome::Conflict => Err(anyhow!("refresh token already bound to a session").into()),
        }
    }

    pub async fn find_by_token(&self, refresh_token: &str) -> AuthResult<Option<Session>> {
        Ok(self.store.find_session(&hash_token(refresh_token)).await?)
    }

    pub async fn list(&self, user_id: Uuid) -> AuthResult<Vec<Session>> {
        Ok(self.store.list_sessions(user_id).await?)
    }

    pub async fn delete(&self, refresh_token: &str) -> AuthResult<bool> {
        Ok(self.store.delete_session(&hash_token(refresh_token)).await?)
    }

    pub async fn delete_all_by_user(&self, user_id: Uuid) -> AuthResult<u64> {
        Ok(self.store.delete_user_sessions(user_id).await?)
    }

    /// Remove sessions older than the retention window.
    pub async fn cleanup_expired(&self) -> AuthResult<u64> {
        let retention = chrono::Duration::from_std(self.retention)
            .context("session retention out of range")?;
        Ok(self
            .store
            .delete_sessions_created_before(Utc::now() - retention)
            .await?)
    }
}

fn normalize_device(device: &str) -> String {
    let trimmed = device.trim();
    if trimmed.is_empty() {
        "unknown".to_string()
    } else {
        trimmed.chars().take(MAX_DEVICE_CHARS).collect()
    }
}
