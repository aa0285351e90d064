//! User identities and password verification.
//!
//! Passwords are hashed with Argon2id on the blocking pool so a burst of logins
//! cannot stall the async runtime.

use anyhow::{anyhow, Context};
use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Algorithm, Argon2, Params, Version,
};
use std::sync::Arc;
use tracing::warn;
use uuid::Uuid;

use super::error::{AuthError, AuthResult};
use crate::store::{AuthStore, InsertOutcome, NewUser, Role, User};

/// Identity to register. `password` is plain text and never stored.
#[derive(Clone, Debug)]
pub struct NewCredentials<'a> {
    pub name: &'a str,
    pub email: &'a str,
    pub password: Option<&'a str>,
    pub federated_id: Option<&'a str>,
    pub role: Role,
}

/// What [`CredentialStore::ensure_admin`] did to reach an administrator account.
#[derive(Debug, PartialEq, Eq)]
pub enum AdminProvision {
    Created(User),
    Promoted(User),
    Unchanged(User),
}

pub struct CredentialStore {
    store: Arc<dyn AuthStore>,
    params: Params,
}

impl CredentialStore {
    #[must_use]
    pub fn new(store: Arc<dyn AuthStore>, params: Params) -> Self {
        Self { store, params }
    }

    /// Register a user. Federated identities are trusted to have verified the address.
    ///
    /// # Errors
    /// [`AuthError::DuplicateEmail`] when the email is taken, [`AuthError::Validation`]
    /// when neither a password nor a federated id is supplied.
    pub async fn create(&self, credentials: NewCredentials<'_>) -> AuthResult<User> {
        let password_hash = match credentials.password {
            Some(password) => Some(self.hash_password(password).await?),
            None if credentials.federated_id.is_some() => None,
            None => return Err(AuthError::validation("Password is required")),
        };

        let outcome = self
            .store
            .insert_user(NewUser {
                name: credentials.name.to_string(),
                email: credentials.email.to_string(),
                password_hash,
                federated_id: credentials.federated_id.map(str::to_string),
                role: credentials.role,
                email_verified: credentials.federated_id.is_some(),
            })
            .await?;

        match outcome {
            InsertOutcome::Created(user) => Ok(user),
            InsertOutcome::Conflict => Err(AuthError::DuplicateEmail),
        }
    }

    pub async fn find_by_email(&self, email: &str) -> AuthResult<Option<User>> {
        Ok(self.store.find_user_by_email(email).await?)
    }

    pub async fn find_by_id(&self, id: Uuid) -> AuthResult<Option<User>> {
        Ok(self.store.find_user_by_id(id).await?)
    }

    pub async fn find_by_federated_id(&self, federated_id: &str) -> AuthResult<Option<User>> {
        Ok(self.store.find_user_by_federated_id(federated_id).await?)
    }

    /// Constant-time check of `plain` against a stored PHC string.
    /// A malformed stored hash never matches.
    pub async fn verify_password(&self, plain: &str, password_hash: &str) -> AuthResult<bool> {
        let plain = plain.to_string();
        let password_hash = password_hash.to_string();
        let params = self.params.clone();
        let matches = tokio::task::spawn_blocking(move || {
            let Ok(parsed) = PasswordHash::new(&password_hash) else {
                warn!("stored password hash is not a valid PHC string");
                return false;
            };
            hasher(params)
                .verify_password(plain.as_bytes(), &parsed)
                .is_ok()
        })
        .await
        .context("password verification task failed")?;
        Ok(matches)
    }

    pub async fn verify_email(&self, user_id: Uuid) -> AuthResult<()> {
        if self.store.mark_email_verified(user_id).await? {
            Ok(())
        } else {
            Err(AuthError::NotFound)
        }
    }

    /// Make `email` a verified administrator. A new account gets `password`; an
    /// existing one keeps its credentials and is promoted in place.
    ///
    /// # Errors
    /// Store failures, or [`AuthError::DuplicateEmail`] when another writer
    /// registers the address between lookup and insert.
    pub async fn ensure_admin(
        &self,
        name: &str,
        email: &str,
        password: &str,
    ) -> AuthResult<AdminProvision> {
        if let Some(user) = self.find_by_email(email).await? {
            if user.role == Role::Admin && user.email_verified {
                return Ok(AdminProvision::Unchanged(user));
            }
            if !self.store.set_role(user.id, Role::Admin).await? {
                return Err(AuthError::NotFound);
            }
            self.verify_email(user.id).await?;
            return Ok(AdminProvision::Promoted(User {
                role: Role::Admin,
                email_verified: true,
                ..user
            }));
        }

        let user = self
            .create(NewCredentials {
                name,
                email,
                password: Some(password),
                federated_id: None,
                role: Role::Admin,
            })
            .await?;
        self.verify_email(user.id).await?;
        Ok(AdminProvision::Created(User {
            email_verified: true,
            ..user
        }))
    }

    pub async fn update_password(&self, user_id: Uuid, new_password: &str) -> AuthResult<()> {
        let password_hash = self.hash_password(new_password).await?;
        if self.store.set_password_hash(user_id, &password_hash).await? {
            Ok(())
        } else {
            Err(AuthError::NotFound)
        }
    }

    pub async fn link_federated_account(&self, user_id: Uuid, federated_id: &str) -> AuthResult<()> {
        if self.store.link_federated_id(user_id, federated_id).await? {
            Ok(())
        } else {
            Err(AuthError::NotFound)
        }
    }

    async fn hash_password(&self, password: &str) -> AuthResult<String> {
        let password = password.to_string();
        let params = self.params.clone();
        let hash = tokio::task::spawn_blocking(move || {
            let salt = SaltString::generate(&mut OsRng);
            hasher(params)
                .hash_password(password.as_bytes(), &salt)
                .map(|hash| hash.to_string())
                .map_err(|err| anyhow!("failed to hash password: {err}"))
        })
        .await
        .context("password hashing task failed")??;
        Ok(hash)
    }
}

fn hasher(params: Params) -> Argon2<'static> {
    Argon2::new(Algorithm::Argon2id, Version::V0x13, params)
}

#[cfg(test)]
pub(crate) fn test_params() -> Params {
    // Smallest cost argon2 accepts; keeps the suite fast.
    Params::new(8, 1, 1, None).unwrap_or_default()
}
