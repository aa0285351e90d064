//! Durable state: users, sessions, and single-use tokens.
//!
//! Secrets never reach the store in raw form. Sessions and tokens are keyed by the
//! SHA-256 digest of the value handed to the client, so a leaked table cannot be
//! replayed against the API.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use utoipa::ToSchema;
use uuid::Uuid;

mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

pub(crate) const SCHEMA_SQL: &str = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/sql/schema.sql"));

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    #[default]
    User,
    Admin,
}

impl Role {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Admin => "admin",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "user" => Some(Self::User),
            "admin" => Some(Self::Admin),
            _ => None,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct User {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub password_hash: Option<String>,
    pub federated_id: Option<String>,
    pub role: Role,
    pub email_verified: bool,
    pub created_at: DateTime<Utc>,
}

/// Fields for a user that does not exist yet. The email must already be normalized.
#[derive(Clone, Debug)]
pub struct NewUser {
    pub name: String,
    pub email: String,
    pub password_hash: Option<String>,
    pub federated_id: Option<String>,
    pub role: Role,
    pub email_verified: bool,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Session {
    pub id: Uuid,
    pub user_id: Uuid,
    pub device: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TokenPurpose {
    Verify,
    Reset,
}

impl TokenPurpose {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Verify => "verify",
            Self::Reset => "reset",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "verify" => Some(Self::Verify),
            "reset" => Some(Self::Reset),
            _ => None,
        }
    }
}

/// Shape of the secret a token was issued as.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TokenForm {
    /// Long opaque value embedded in an emailed link.
    Link,
    /// Six digit code typed in by the user.
    Otp,
}

impl TokenForm {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Link => "link",
            Self::Otp => "otp",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "link" => Some(Self::Link),
            "otp" => Some(Self::Otp),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TokenRecord {
    pub id: Uuid,
    pub user_id: Uuid,
    pub purpose: TokenPurpose,
    pub form: TokenForm,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Debug)]
pub struct NewToken {
    pub user_id: Uuid,
    pub token_hash: Vec<u8>,
    pub purpose: TokenPurpose,
    pub form: TokenForm,
    pub expires_at: DateTime<Utc>,
}

/// Outcome of an insert guarded by a uniqueness constraint.
#[derive(Debug, PartialEq, Eq)]
pub enum InsertOutcome<T> {
    Created(T),
    Conflict,
}

#[async_trait]
pub trait UserStore: Send + Sync {
    /// Insert a user; a taken email or federated id yields [`InsertOutcome::Conflict`].
    async fn insert_user(&self, user: NewUser) -> Result<InsertOutcome<User>>;
    /// Case-insensitive lookup.
    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>>;
    async fn find_user_by_id(&self, id: Uuid) -> Result<Option<User>>;
    async fn find_user_by_federated_id(&self, federated_id: &str) -> Result<Option<User>>;
    async fn mark_email_verified(&self, id: Uuid) -> Result<bool>;
    async fn set_password_hash(&self, id: Uuid, password_hash: &str) -> Result<bool>;
    /// Attach a federated identity and mark the address verified.
    async fn link_federated_id(&self, id: Uuid, federated_id: &str) -> Result<bool>;
    async fn set_role(&self, id: Uuid, role: Role) -> Result<bool>;
}

#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn insert_session(
        &self,
        user_id: Uuid,
        token_hash: &[u8],
        device: &str,
    ) -> Result<InsertOutcome<Session>>;
    async fn find_session(&self, token_hash: &[u8]) -> Result<Option<Session>>;
    /// Sessions of one user, newest first.
    async fn list_sessions(&self, user_id: Uuid) -> Result<Vec<Session>>;
    async fn delete_session(&self, token_hash: &[u8]) -> Result<bool>;
    async fn delete_user_sessions(&self, user_id: Uuid) -> Result<u64>;
    async fn delete_sessions_created_before(&self, cutoff: DateTime<Utc>) -> Result<u64>;
}

#[async_trait]
pub trait TokenStore: Send + Sync {
    /// Insert a token; a duplicate hash yields [`InsertOutcome::Conflict`].
    async fn insert_token(&self, token: NewToken) -> Result<InsertOutcome<TokenRecord>>;
    /// Only unexpired rows of the requested purpose are returned.
    async fn find_live_token(
        &self,
        token_hash: &[u8],
        purpose: TokenPurpose,
    ) -> Result<Option<TokenRecord>>;
    /// Returns `true` only for the caller that actually removed the row.
    async fn delete_token(&self, token_hash: &[u8]) -> Result<bool>;
    async fn delete_user_tokens(&self, user_id: Uuid, purpose: TokenPurpose) -> Result<u64>;
    async fn delete_expired_tokens(&self) -> Result<u64>;
}

/// Everything the auth core needs from durable storage.
#[async_trait]
pub trait AuthStore: UserStore + SessionStore + TokenStore {
    async fn ping(&self) -> Result<()>;
}
