//! Authentication and session lifecycle core.
//!
//! Leaf components each own one concern ([`credentials`], [`tokens`], [`sessions`],
//! [`jwt`], [`lockout`], [`csrf`], [`rate_limit`]); [`AuthService`] composes them
//! into the user-facing flows.

pub mod credentials;
pub mod csrf;
pub mod error;
pub mod federated;
pub mod jwt;
pub mod lockout;
pub mod rate_limit;
pub mod service;
pub mod sessions;
pub mod tokens;
pub mod utils;

pub use credentials::{AdminProvision, CredentialStore, NewCredentials};
pub use csrf::{CsrfGrant, CsrfGuard};
pub use error::{AuthError, AuthResult};
pub use federated::{
    DisabledFederatedVerifier, FederatedIdentity, FederatedVerifier, GoogleIdTokenVerifier,
};
pub use jwt::TokenIssuer;
pub use lockout::LoginGuard;
pub use rate_limit::{
    KvRateLimiter, NoopRateLimiter, RateLimitConfig, RateLimitDecision, RateLimitPolicy,
    RateLimitTier, RateLimiter,
};
pub use service::{AuthService, CleanupReport, LoginOutcome, TokenLifetimes};
pub use sessions::SessionRegistry;
pub use tokens::VerificationTokens;
