//! # ClipForge auth
//!
//! Authentication and session lifecycle service for ClipForge AI.
//!
//! ## Flows
//!
//! - **Signup** creates an unverified account and emails both a verification link
//!   and a six digit code. Either one verifies the address.
//! - **Login** checks the password, refuses unverified accounts, and issues a short
//!   lived access token plus a refresh token bound to a server-side session.
//! - **Refresh** mints access tokens only while the refresh token's session exists,
//!   so logout, logout-all and password reset revoke immediately.
//! - **Password reset** redeems a single-use token and ends every session.
//!
//! ## Shared state
//!
//! Login lockout, CSRF grants and rate-limit windows live in a [`kv::KvStore`] so
//! that several instances behind a load balancer enforce the same limits. With a
//! `memory://` DSN everything, including users and sessions, stays in process.

pub mod api;
pub mod auth;
pub mod cli;
pub mod email;
pub mod kv;
pub mod store;

#[allow(clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = match built_info::GIT_COMMIT_HASH {
    Some(hash) => hash,
    None => "unknown",
};

pub const APP_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"),);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_git_commit_hash_format() {
        if GIT_COMMIT_HASH == "unknown" {
            // Acceptable in non-git build environments
            return;
        }
        assert!(
            GIT_COMMIT_HASH.chars().all(|c| c.is_ascii_hexdigit()),
            "GIT_COMMIT_HASH should be a hex string, got: {GIT_COMMIT_HASH}"
        );
        assert!(
            GIT_COMMIT_HASH.len() >= 7,
            "GIT_COMMIT_HASH should be at least 7 characters long, got: {GIT_COMMIT_HASH}"
        );
    }

    #[test]
    fn test_app_user_agent_format() {
        assert!(APP_USER_AGENT.starts_with(env!("CARGO_PKG_NAME")));
        assert!(APP_USER_AGENT.contains(env!("CARGO_PKG_VERSION")));
    }
}
