//! Orchestrates the auth flows on top of the individual components.
//!
//! Handlers validate input, then call exactly one method here. Every method
//! returns an explicit [`AuthResult`] so callers can match on the error taxonomy.

use std::{sync::Arc, time::Duration};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::{
    credentials::{CredentialStore, NewCredentials},
    error::{AuthError, AuthResult},
    federated::FederatedVerifier,
    jwt::TokenIssuer,
    lockout::LoginGuard,
    sessions::SessionRegistry,
    tokens::VerificationTokens,
};
use crate::{
    email::Notifier,
    store::{Role, Session, TokenPurpose, User},
};

/// Validity windows for the single-use tokens.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TokenLifetimes {
    pub verify_link: Duration,
    pub verify_otp: Duration,
    pub reset: Duration,
}

impl Default for TokenLifetimes {
    fn default() -> Self {
        Self {
            verify_link: Duration::from_secs(24 * 60 * 60),
            verify_otp: Duration::from_secs(15 * 60),
            reset: Duration::from_secs(60 * 60),
        }
    }
}

/// Result of a successful credential or federated login.
#[derive(Debug)]
pub struct LoginOutcome {
    pub user: User,
    pub access_token: String,
    pub refresh_token: String,
    pub session: Session,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CleanupReport {
    pub tokens: u64,
    pub sessions: u64,
}

pub struct AuthService {
    credentials: CredentialStore,
    tokens: VerificationTokens,
    sessions: SessionRegistry,
    issuer: TokenIssuer,
    guard: LoginGuard,
    notifier: Arc<dyn Notifier>,
    federated: Arc<dyn FederatedVerifier>,
    lifetimes: TokenLifetimes,
}

impl AuthService {
    #[must_use]
    pub fn new(
        credentials: CredentialStore,
        tokens: VerificationTokens,
        sessions: SessionRegistry,
        issuer: TokenIssuer,
        guard: LoginGuard,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            credentials,
            tokens,
            sessions,
            issuer,
            guard,
            notifier,
            federated: Arc::new(super::federated::DisabledFederatedVerifier),
            lifetimes: TokenLifetimes::default(),
        }
    }

    #[must_use]
    pub fn with_federated_verifier(mut self, federated: Arc<dyn FederatedVerifier>) -> Self {
        self.federated = federated;
        self
    }

    #[must_use]
    pub fn with_lifetimes(mut self, lifetimes: TokenLifetimes) -> Self {
        self.lifetimes = lifetimes;
        self
    }

    #[must_use]
    pub fn issuer(&self) -> &TokenIssuer {
        &self.issuer
    }

    /// Create an unverified account and send the verification link and code.
    pub async fn signup(&self, name: &str, email: &str, password: &str) -> AuthResult<User> {
        let email = normalize_email(email);
        let user = self
            .credentials
            .create(NewCredentials {
                name,
                email: &email,
                password: Some(password),
                federated_id: None,
                role: Role::User,
            })
            .await?;
        info!(user_id = %user.id, "user signed up");

        self.issue_verification(&user).await?;
        Ok(user)
    }

    /// Password login. Every failure, including an unknown email, counts towards
    /// the lockout of that email.
    pub async fn login(&self, email: &str, password: &str, device: &str) -> AuthResult<LoginOutcome> {
        let email = normalize_email(email);
        self.guard.check(&email).await?;

        let user = self.credentials.find_by_email(&email).await?;
        let matched = match user.as_ref().and_then(|user| user.password_hash.as_deref()) {
            Some(hash) => self.credentials.verify_password(password, hash).await?,
            None => false,
        };

        let user = match user {
            Some(user) if matched => user,
            _ => {
                self.guard.record_failure(&email).await?;
                return Err(AuthError::InvalidCredentials);
            }
        };

        self.guard.record_success(&email).await?;

        if !user.email_verified {
            debug!(user_id = %user.id, "login refused before email verification");
            return Err(AuthError::EmailNotVerified);
        }

        self.start_session(user, device).await
    }

    /// Login with a provider credential. Known provider subjects sign straight in,
    /// an existing account with the same email is linked, otherwise a verified
    /// account is created.
    pub async fn federated_login(&self, credential: &str, device: &str) -> AuthResult<LoginOutcome> {
        let identity = self.federated.verify(credential).await?;

        let user = if let Some(user) = self
            .credentials
            .find_by_federated_id(&identity.subject)
            .await?
        {
            user
        } else if let Some(mut user) = self.credentials.find_by_email(&identity.email).await? {
            self.credentials
                .link_federated_account(user.id, &identity.subject)
                .await?;
            info!(user_id = %user.id, "linked federated identity to existing account");
            user.federated_id = Some(identity.subject.clone());
            user.email_verified = true;
            user
        } else {
            let user = self
                .credentials
                .create(NewCredentials {
                    name: &identity.name,
                    email: &identity.email,
                    password: None,
                    federated_id: Some(&identity.subject),
                    role: Role::User,
                })
                .await?;
            info!(user_id = %user.id, "user signed up with federated identity");
            user
        };

        self.start_session(user, device).await
    }

    /// Mint a new access token. The refresh token must verify and its session must
    /// still exist.
    pub async fn refresh(&self, refresh_token: &str) -> AuthResult<String> {
        let user_id = self.issuer.verify_refresh(refresh_token)?;
        let session = self
            .sessions
            .find_by_token(refresh_token)
            .await?
            .ok_or(AuthError::TokenInvalid)?;
        if session.user_id != user_id {
            warn!(session_id = %session.id, "refresh token subject does not own its session");
            return Err(AuthError::TokenInvalid);
        }
        self.issuer.issue_access(user_id)
    }

    /// Redeem a verification link token or code. Remaining verification tokens of
    /// the user are discarded once the address is verified.
    pub async fn verify_email(&self, token: &str) -> AuthResult<()> {
        let record = self.tokens.consume(token, TokenPurpose::Verify).await?;
        self.credentials.verify_email(record.user_id).await?;
        let discarded = self
            .tokens
            .delete_for_user(record.user_id, TokenPurpose::Verify)
            .await?;
        info!(user_id = %record.user_id, discarded, "email verified");
        Ok(())
    }

    /// Reissue the verification link and code. Silent for unknown or already
    /// verified addresses.
    pub async fn resend_verification(&self, email: &str) -> AuthResult<()> {
        let email = normalize_email(email);
        match self.credentials.find_by_email(&email).await? {
            Some(user) if !user.email_verified => self.issue_verification(&user).await,
            Some(_) => {
                debug!("verification resend requested for verified account");
                Ok(())
            }
            None => {
                debug!("verification resend requested for unknown email");
                Ok(())
            }
        }
    }

    /// Send a reset link. Silent for unknown addresses.
    pub async fn forgot_password(&self, email: &str) -> AuthResult<()> {
        let email = normalize_email(email);
        let Some(user) = self.credentials.find_by_email(&email).await? else {
            debug!("password reset requested for unknown email");
            return Ok(());
        };

        self.tokens
            .delete_for_user(user.id, TokenPurpose::Reset)
            .await?;
        let reset = self
            .tokens
            .create(user.id, TokenPurpose::Reset, self.lifetimes.reset)
            .await?;

        if let Err(err) = self
            .notifier
            .send_password_reset_email(&user.email, &reset.value)
            .await
        {
            error!(user_id = %user.id, "failed to dispatch password reset email: {err:#}");
        }
        info!(user_id = %user.id, "password reset requested");
        Ok(())
    }

    /// Redeem a reset token, replace the password and sign the user out everywhere.
    pub async fn reset_password(&self, token: &str, new_password: &str) -> AuthResult<()> {
        let record = self.tokens.consume(token, TokenPurpose::Reset).await?;
        self.credentials
            .update_password(record.user_id, new_password)
            .await?;
        let revoked = self.sessions.delete_all_by_user(record.user_id).await?;
        self.tokens
            .delete_for_user(record.user_id, TokenPurpose::Reset)
            .await?;
        info!(user_id = %record.user_id, revoked, "password reset");
        Ok(())
    }

    /// End the session bound to `refresh_token`. Without a token there is nothing
    /// to revoke.
    ///
    /// # Errors
    /// [`AuthError::Forbidden`] when the session belongs to another user.
    pub async fn logout(&self, user_id: Uuid, refresh_token: Option<&str>) -> AuthResult<()> {
        let Some(refresh_token) = refresh_token else {
            return Ok(());
        };
        match self.sessions.find_by_token(refresh_token).await? {
            Some(session) if session.user_id != user_id => {
                warn!(%user_id, session_id = %session.id, "logout of a foreign session refused");
                Err(AuthError::Forbidden)
            }
            Some(session) => {
                self.sessions.delete(refresh_token).await?;
                info!(%user_id, session_id = %session.id, "session ended");
                Ok(())
            }
            None => Ok(()),
        }
    }

    pub async fn logout_all(&self, user_id: Uuid) -> AuthResult<u64> {
        let revoked = self.sessions.delete_all_by_user(user_id).await?;
        info!(%user_id, revoked, "all sessions ended");
        Ok(revoked)
    }

    /// Resolve the user behind an access token.
    pub fn authenticate(&self, access_token: &str) -> AuthResult<Uuid> {
        self.issuer.verify_access(access_token)
    }

    /// # Errors
    /// [`AuthError::TokenInvalid`] when the account no longer exists.
    pub async fn current_user(&self, user_id: Uuid) -> AuthResult<User> {
        self.credentials
            .find_by_id(user_id)
            .await?
            .ok_or(AuthError::TokenInvalid)
    }

    pub async fn list_sessions(&self, user_id: Uuid) -> AuthResult<Vec<Session>> {
        self.sessions.list(user_id).await
    }

    /// Sweep expired tokens and sessions past retention.
    pub async fn cleanup(&self) -> AuthResult<CleanupReport> {
        Ok(CleanupReport {
            tokens: self.tokens.cleanup_expired().await?,
            sessions: self.sessions.cleanup_expired().await?,
        })
    }

    async fn start_session(&self, user: User, device: &str) -> AuthResult<LoginOutcome> {
        let access_token = self.issuer.issue_access(user.id)?;
        let refresh_token = self.issuer.issue_refresh(user.id)?;
        let session = self
            .sessions
            .create(user.id, &refresh_token, device)
            .await?;
        info!(user_id = %user.id, session_id = %session.id, "user logged in");
        Ok(LoginOutcome {
            user,
            access_token,
            refresh_token,
            session,
        })
    }

    async fn issue_verification(&self, user: &User) -> AuthResult<()> {
        self.tokens
            .delete_for_user(user.id, TokenPurpose::Verify)
            .await?;
        let link = self
            .tokens
            .create(user.id, TokenPurpose::Verify, self.lifetimes.verify_link)
            .await?;
        let otp = self
            .tokens
            .create_otp(user.id, TokenPurpose::Verify, self.lifetimes.verify_otp)
            .await?;

        if let Err(err) = self
            .notifier
            .send_verification_email(&user.email, &link.value, &otp.value)
            .await
        {
            error!(user_id = %user.id, "failed to dispatch verification email: {err:#}");
        }
        Ok(())
    }
}

fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}
