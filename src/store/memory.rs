use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{
    AuthStore, InsertOutcome, NewToken, NewUser, Role, Session, SessionStore, TokenPurpose,
    TokenRecord, TokenStore, User, UserStore,
};

#[derive(Debug, Default)]
struct Tables {
    users: HashMap<Uuid, User>,
    sessions: HashMap<Vec<u8>, Session>,
    tokens: HashMap<Vec<u8>, TokenRecord>,
}

/// In-process store for `memory://` deployments and tests.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl UserStore for MemoryStore {
    async fn insert_user(&self, user: NewUser) -> Result<InsertOutcome<User>> {
        let mut tables = self.tables.write().await;
        let email_taken = tables
            .users
            .values()
            .any(|existing| existing.email.eq_ignore_ascii_case(&user.email));
        let federated_taken = user.federated_id.as_deref().is_some_and(|federated_id| {
            tables
                .users
                .values()
                .any(|existing| existing.federated_id.as_deref() == Some(federated_id))
        });
        if email_taken || federated_taken {
            return Ok(InsertOutcome::Conflict);
        }

        let record = User {
            id: Uuid::new_v4(),
            name: user.name,
            email: user.email,
            password_hash: user.password_hash,
            federated_id: user.federated_id,
            role: user.role,
            email_verified: user.email_verified,
            created_at: Utc::now(),
        };
        tables.users.insert(record.id, record.clone());
        Ok(InsertOutcome::Created(record))
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>> {
        let tables = self.tables.read().await;
        Ok(tables
            .users
            .values()
            .find(|user| user.email.eq_ignore_ascii_case(email))
            .cloned())
    }

    async fn find_user_by_id(&self, id: Uuid) -> Result<Option<User>> {
        Ok(self.tables.read().await.users.get(&id).cloned())
    }

    async fn find_user_by_federated_id(&self, federated_id: &str) -> Result<Option<User>> {
        let tables = self.tables.read().await;
        Ok(tables
            .users
            .values()
            .find(|user| user.federated_id.as_deref() == Some(federated_id))
            .cloned())
    }

    async fn mark_email_verified(&self, id: Uuid) -> Result<bool> {
        let mut tables = self.tables.write().await;
        Ok(tables.users.get_mut(&id).map_or(false, |user| {
            user.email_verified = true;
            true
        }))
    }

    async fn set_password_hash(&self, id: Uuid, password_hash: &str) -> Result<bool> {
        let mut tables = self.tables.write().await;
        Ok(tables.users.get_mut(&id).map_or(false, |user| {
            user.password_hash = Some(password_hash.to_string());
            true
        }))
    }

    async fn link_federated_id(&self, id: Uuid, federated_id: &str) -> Result<bool> {
        let mut tables = self.tables.write().await;
        Ok(tables.users.get_mut(&id).map_or(false, |user| {
            user.federated_id = Some(federated_id.to_string());
            user.email_verified = true;
            true
        }))
    }

    async fn set_role(&self, id: Uuid, role: Role) -> Result<bool> {
        let mut tables = self.tables.write().await;
        Ok(tables.users.get_mut(&id).map_or(false, |user| {
            user.role = role;
            true
        }))
    }
}

#[async_trait]
impl SessionStore for MemoryStore {
    async fn insert_session(
        &self,
        user_id: Uuid,
        token_hash: &[u8],
        device: &str,
    ) -> Result<InsertOutcome<Session>> {
        let mut tables = self.tables.write().await;
        if tables.sessions.contains_key(token_hash) {
            return Ok(InsertOutcome::Conflict);
        }
        let session = Session {
            id: Uuid::new_v4(),
            user_id,
            device: device.to_string(),
            created_at: Utc::now(),
        };
        tables.sessions.insert(token_hash.to_vec(), session.clone());
        Ok(InsertOutcome::Created(session))
    }

    async fn find_session(&self, token_hash: &[u8]) -> Result<Option<Session>> {
        Ok(self.tables.read().await.sessions.get(token_hash).cloned())
    }

    async fn list_sessions(&self, user_id: Uuid) -> Result<Vec<Session>> {
        let tables = self.tables.read().await;
        let mut sessions: Vec<Session> = tables
            .sessions
            .values()
            .filter(|session| session.user_id == user_id)
            .cloned()
            .collect();
        sessions.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(sessions)
    }

    async fn delete_session(&self, token_hash: &[u8]) -> Result<bool> {
        Ok(self
            .tables
            .write()
            .await
            .sessions
            .remove(token_hash)
            .is_some())
    }

    async fn delete_user_sessions(&self, user_id: Uuid) -> Result<u64> {
        let mut tables = self.tables.write().await;
        let before = tables.sessions.len();
        tables.sessions.retain(|_, session| session.user_id != user_id);
        Ok(removed_count(before, tables.sessions.len()))
    }

    async fn delete_sessions_created_before(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let mut tables = self.tables.write().await;
        let before = tables.sessions.len();
        tables.sessions.retain(|_, session| session.created_at >= cutoff);
        Ok(removed_count(before, tables.sessions.len()))
    }
}

#[async_trait]
impl TokenStore for MemoryStore {
    async fn insert_token(&self, token: NewToken) -> Result<InsertOutcome<TokenRecord>> {
        let mut tables = self.tables.write().await;
        if tables.tokens.contains_key(&token.token_hash) {
            return Ok(InsertOutcome::Conflict);
        }
        let record = TokenRecord {
            id: Uuid::new_v4(),
            user_id: token.user_id,
            purpose: token.purpose,
            form: token.form,
            expires_at: token.expires_at,
            created_at: Utc::now(),
        };
        tables.tokens.insert(token.token_hash, record.clone());
        Ok(InsertOutcome::Created(record))
    }

    async fn find_live_token(
        &self,
        token_hash: &[u8],
        purpose: TokenPurpose,
    ) -> Result<Option<TokenRecord>> {
        let now = Utc::now();
        let tables = self.tables.read().await;
        Ok(tables
            .tokens
            .get(token_hash)
            .filter(|record| record.purpose == purpose && record.expires_at > now)
            .cloned())
    }

    async fn delete_token(&self, token_hash: &[u8]) -> Result<bool> {
        Ok(self
            .tables
            .write()
            .await
            .tokens
            .remove(token_hash)
            .is_some())
    }

    async fn delete_user_tokens(&self, user_id: Uuid, purpose: TokenPurpose) -> Result<u64> {
        let mut tables = self.tables.write().await;
        let before = tables.tokens.len();
        tables
            .tokens
            .retain(|_, record| !(record.user_id == user_id && record.purpose == purpose));
        Ok(removed_count(before, tables.tokens.len()))
    }

    async fn delete_expired_tokens(&self) -> Result<u64> {
        let now = Utc::now();
        let mut tables = self.tables.write().await;
        let before = tables.tokens.len();
        tables.tokens.retain(|_, record| record.expires_at > now);
        Ok(removed_count(before, tables.tokens.len()))
    }
}

#[async_trait]
impl AuthStore for MemoryStore {
    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}

fn removed_count(before: usize, after: usize) -> u64 {
    u64::try_from(before.saturating_sub(after)).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::TokenForm;
    use chrono::Duration;

    fn new_user(email: &str) -> NewUser {
        NewUser {
            name: "Alice".to_string(),
            email: email.to_string(),
            password_hash: Some("hash".to_string()),
            federated_id: None,
            role: Role::User,
            email_verified: false,
        }
    }

    #[tokio::test]
    async fn insert_user_rejects_duplicate_email_case_insensitive() -> Result<()> {
        let store = MemoryStore::new();
        let created = store.insert_user(new_user("alice@x.com")).await?;
        assert!(matches!(created, InsertOutcome::Created(_)));

        let duplicate = store.insert_user(new_user("ALICE@x.com")).await?;
        assert_eq!(duplicate, InsertOutcome::Conflict);
        Ok(())
    }

    #[tokio::test]
    async fn link_federated_id_marks_verified() -> Result<()> {
        let store = MemoryStore::new();
        let InsertOutcome::Created(user) = store.insert_user(new_user("bob@x.com")).await? else {
            anyhow::bail!("user was not created");
        };
        assert!(store.link_federated_id(user.id, "google-1").await?);

        let linked = store.find_user_by_federated_id("google-1").await?;
        assert_eq!(linked.map(|user| user.email_verified), Some(true));
        Ok(())
    }

    #[tokio::test]
    async fn sessions_are_listed_newest_first_and_revoked_per_user() -> Result<()> {
        let store = MemoryStore::new();
        let user_id = Uuid::new_v4();
        let other_id = Uuid::new_v4();
        store.insert_session(user_id, b"one", "laptop").await?;
        store.insert_session(user_id, b"two", "phone").await?;
        store.insert_session(other_id, b"three", "tablet").await?;

        assert_eq!(
            store.insert_session(user_id, b"one", "again").await?,
            InsertOutcome::Conflict
        );
        assert_eq!(store.list_sessions(user_id).await?.len(), 2);

        assert_eq!(store.delete_user_sessions(user_id).await?, 2);
        assert!(store.find_session(b"one").await?.is_none());
        assert!(store.find_session(b"three").await?.is_some());
        Ok(())
    }

    #[tokio::test]
    async fn expired_tokens_are_inert_and_swept() -> Result<()> {
        let store = MemoryStore::new();
        let user_id = Uuid::new_v4();
        store
            .insert_token(NewToken {
                user_id,
                token_hash: b"stale".to_vec(),
                purpose: TokenPurpose::Verify,
                form: TokenForm::Otp,
                expires_at: Utc::now() - Duration::minutes(1),
            })
            .await?;
        store
            .insert_token(NewToken {
                user_id,
                token_hash: b"fresh".to_vec(),
                purpose: TokenPurpose::Verify,
                form: TokenForm::Link,
                expires_at: Utc::now() + Duration::minutes(10),
            })
            .await?;

        assert!(store
            .find_live_token(b"stale", TokenPurpose::Verify)
            .await?
            .is_none());
        assert!(store
            .find_live_token(b"fresh", TokenPurpose::Reset)
            .await?
            .is_none());
        assert!(store
            .find_live_token(b"fresh", TokenPurpose::Verify)
            .await?
            .is_some());

        assert_eq!(store.delete_expired_tokens().await?, 1);
        assert!(store.delete_token(b"fresh").await?);
        assert!(!store.delete_token(b"fresh").await?);
        Ok(())
    }
}
