//! Token, lockout, throttling and federated login arguments.

use anyhow::{Context, Result};
use clap::{Arg, ArgAction, ArgMatches, Command};
use secrecy::SecretString;

pub const ARG_JWT_ACCESS_SECRET: &str = "jwt-access-secret";
pub const ARG_JWT_REFRESH_SECRET: &str = "jwt-refresh-secret";
pub const ARG_GOOGLE_CLIENT_ID: &str = "google-client-id";
pub const ARG_TRUST_PROXY_HEADERS: &str = "trust-proxy-headers";

#[derive(Debug)]
pub struct TokenOptions {
    pub access_secret: SecretString,
    pub refresh_secret: SecretString,
    pub access_ttl_seconds: u64,
    pub refresh_ttl_seconds: u64,
    pub session_retention_seconds: u64,
    pub verify_link_ttl_seconds: u64,
    pub verify_otp_ttl_seconds: u64,
    pub reset_ttl_seconds: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TierOptions {
    pub max_requests: u32,
    pub window_seconds: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GuardOptions {
    pub lockout_max_attempts: u32,
    pub lockout_window_seconds: u64,
    pub csrf_ttl_seconds: u64,
    pub auth_tier: TierOptions,
    pub strict_tier: TierOptions,
    pub general_tier: TierOptions,
    pub trust_proxy_headers: bool,
}

#[derive(Debug)]
pub struct Options {
    pub tokens: TokenOptions,
    pub guard: GuardOptions,
    pub google_client_id: Option<String>,
}

impl Options {
    /// # Errors
    /// Returns an error if a required secret is missing.
    pub fn parse(matches: &ArgMatches) -> Result<Self> {
        let secret = |name: &str| -> Result<SecretString> {
            matches
                .get_one::<String>(name)
                .map(|value| SecretString::from(value.clone()))
                .with_context(|| format!("missing required argument: --{name}"))
        };
        let seconds = |name: &str, default: u64| matches.get_one::<u64>(name).copied().unwrap_or(default);
        let count = |name: &str, default: u32| matches.get_one::<u32>(name).copied().unwrap_or(default);

        let tokens = TokenOptions {
            access_secret: secret(ARG_JWT_ACCESS_SECRET)?,
            refresh_secret: secret(ARG_JWT_REFRESH_SECRET)?,
            access_ttl_seconds: seconds("access-token-ttl-seconds", 900),
            refresh_ttl_seconds: seconds("refresh-token-ttl-seconds", 2_592_000),
            session_retention_seconds: seconds("session-retention-seconds", 2_592_000),
            verify_link_ttl_seconds: seconds("verify-link-ttl-seconds", 86_400),
            verify_otp_ttl_seconds: seconds("verify-otp-ttl-seconds", 900),
            reset_ttl_seconds: seconds("reset-token-ttl-seconds", 3_600),
        };

        let guard = GuardOptions {
            lockout_max_attempts: count("lockout-max-attempts", 5),
            lockout_window_seconds: seconds("lockout-window-seconds", 900),
            csrf_ttl_seconds: seconds("csrf-ttl-seconds", 86_400),
            auth_tier: TierOptions {
                max_requests: count("rate-limit-auth-max", 10),
                window_seconds: seconds("rate-limit-auth-window-seconds", 900),
            },
            strict_tier: TierOptions {
                max_requests: count("rate-limit-strict-max", 3),
                window_seconds: seconds("rate-limit-strict-window-seconds", 3_600),
            },
            general_tier: TierOptions {
                max_requests: count("rate-limit-general-max", 100),
                window_seconds: seconds("rate-limit-general-window-seconds", 900),
            },
            trust_proxy_headers: matches.get_flag(ARG_TRUST_PROXY_HEADERS),
        };

        let google_client_id = matches
            .get_one::<String>(ARG_GOOGLE_CLIENT_ID)
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty());

        Ok(Self {
            tokens,
            guard,
            google_client_id,
        })
    }
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    let command = with_token_args(command);
    let command = with_guard_args(command);
    with_federated_args(command)
}

fn seconds_arg(name: &'static str, env: &'static str, default: &'static str, help: &'static str) -> Arg {
    Arg::new(name)
        .long(name)
        .help(help)
        .env(env)
        .default_value(default)
        .value_parser(clap::value_parser!(u64).range(1..))
}

fn count_arg(name: &'static str, env: &'static str, default: &'static str, help: &'static str) -> Arg {
    Arg::new(name)
        .long(name)
        .help(help)
        .env(env)
        .default_value(default)
        .value_parser(clap::value_parser!(u32).range(1..))
}

fn with_token_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_JWT_ACCESS_SECRET)
                .long(ARG_JWT_ACCESS_SECRET)
                .help("HMAC secret for access tokens")
                .env("CLIPFORGE_JWT_ACCESS_SECRET")
                .hide_env_values(true)
                .required(true),
        )
        .arg(
            Arg::new(ARG_JWT_REFRESH_SECRET)
                .long(ARG_JWT_REFRESH_SECRET)
                .help("HMAC secret for refresh tokens, must differ from the access secret")
                .env("CLIPFORGE_JWT_REFRESH_SECRET")
                .hide_env_values(true)
                .required(true),
        )
        .arg(seconds_arg(
            "access-token-ttl-seconds",
            "CLIPFORGE_ACCESS_TOKEN_TTL_SECONDS",
            "900",
            "Access token lifetime in seconds",
        ))
        .arg(seconds_arg(
            "refresh-token-ttl-seconds",
            "CLIPFORGE_REFRESH_TOKEN_TTL_SECONDS",
            "2592000",
            "Refresh token lifetime in seconds",
        ))
        .arg(seconds_arg(
            "session-retention-seconds",
            "CLIPFORGE_SESSION_RETENTION_SECONDS",
            "2592000",
            "Sessions older than this are removed by the cleanup job",
        ))
        .arg(seconds_arg(
            "verify-link-ttl-seconds",
            "CLIPFORGE_VERIFY_LINK_TTL_SECONDS",
            "86400",
            "Email verification link lifetime in seconds",
        ))
        .arg(seconds_arg(
            "verify-otp-ttl-seconds",
            "CLIPFORGE_VERIFY_OTP_TTL_SECONDS",
            "900",
            "Email verification code lifetime in seconds",
        ))
        .arg(seconds_arg(
            "reset-token-ttl-seconds",
            "CLIPFORGE_RESET_TOKEN_TTL_SECONDS",
            "3600",
            "Password reset token lifetime in seconds",
        ))
}

fn with_guard_args(command: Command) -> Command {
    command
        .arg(count_arg(
            "lockout-max-attempts",
            "CLIPFORGE_LOCKOUT_MAX_ATTEMPTS",
            "5",
            "Failed logins before an account is locked",
        ))
        .arg(seconds_arg(
            "lockout-window-seconds",
            "CLIPFORGE_LOCKOUT_WINDOW_SECONDS",
            "900",
            "Failure counting window and lock duration in seconds",
        ))
        .arg(seconds_arg(
            "csrf-ttl-seconds",
            "CLIPFORGE_CSRF_TTL_SECONDS",
            "86400",
            "CSRF grant lifetime in seconds",
        ))
        .arg(count_arg(
            "rate-limit-auth-max",
            "CLIPFORGE_RATE_LIMIT_AUTH_MAX",
            "10",
            "Requests per window on signup, login and google",
        ))
        .arg(seconds_arg(
            "rate-limit-auth-window-seconds",
            "CLIPFORGE_RATE_LIMIT_AUTH_WINDOW_SECONDS",
            "900",
            "Window for the auth tier in seconds",
        ))
        .arg(count_arg(
            "rate-limit-strict-max",
            "CLIPFORGE_RATE_LIMIT_STRICT_MAX",
            "3",
            "Requests per window on resend-verification, forgot-password and reset-password",
        ))
        .arg(seconds_arg(
            "rate-limit-strict-window-seconds",
            "CLIPFORGE_RATE_LIMIT_STRICT_WINDOW_SECONDS",
            "3600",
            "Window for the strict tier in seconds",
        ))
        .arg(count_arg(
            "rate-limit-general-max",
            "CLIPFORGE_RATE_LIMIT_GENERAL_MAX",
            "100",
            "Requests per window on every other route",
        ))
        .arg(seconds_arg(
            "rate-limit-general-window-seconds",
            "CLIPFORGE_RATE_LIMIT_GENERAL_WINDOW_SECONDS",
            "900",
            "Window for the general tier in seconds",
        ))
        .arg(
            Arg::new(ARG_TRUST_PROXY_HEADERS)
                .long(ARG_TRUST_PROXY_HEADERS)
                .help("Rate limit on X-Forwarded-For/X-Real-IP; only behind a proxy that sets them")
                .env("CLIPFORGE_TRUST_PROXY_HEADERS")
                .action(ArgAction::SetTrue),
        )
}

fn with_federated_args(command: Command) -> Command {
    command.arg(
        Arg::new(ARG_GOOGLE_CLIENT_ID)
            .long(ARG_GOOGLE_CLIENT_ID)
            .help("Google OAuth client id; Google login is disabled when unset")
            .env("CLIPFORGE_GOOGLE_CLIENT_ID"),
    )
}
