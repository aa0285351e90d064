use crate::{
    api::{self, handlers::auth::AuthConfig, Services},
    auth::{
        federated::GOOGLE_TOKENINFO_URL,
        rate_limit::{RateLimitConfig, RateLimitPolicy},
        DisabledFederatedVerifier, FederatedVerifier, GoogleIdTokenVerifier, TokenIssuer,
        TokenLifetimes,
    },
    cli::{
        commands::{
            auth::{GuardOptions, TierOptions, TokenOptions},
            email::{SmtpOptions, WorkerOptions},
        },
        telemetry,
    },
    email::{
        EmailSender, EmailTemplates, EmailWorkerConfig, LogEmailSender, SmtpConfig,
        SmtpEmailSender,
    },
};
use anyhow::{Context, Result};
use std::{sync::Arc, time::Duration};
use tracing::info;
use url::Url;

const GOOGLE_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug)]
pub struct Args {
    pub port: u16,
    pub dsn: String,
    pub frontend_base_url: String,
    pub cleanup_interval_seconds: u64,
    pub tokens: TokenOptions,
    pub guard: GuardOptions,
    pub google_client_id: Option<String>,
    pub smtp: Option<SmtpOptions>,
    pub email_worker: WorkerOptions,
}

/// Execute the server action.
/// # Errors
/// Returns an error if the configuration is inconsistent or the server fails to start.
pub async fn execute(args: Args) -> Result<()> {
    log_startup_args(&args);

    let issuer = TokenIssuer::new(
        &args.tokens.access_secret,
        &args.tokens.refresh_secret,
        Duration::from_secs(args.tokens.access_ttl_seconds),
        Duration::from_secs(args.tokens.refresh_ttl_seconds),
    )
    .context("Invalid JWT configuration")?;

    let federated: Arc<dyn FederatedVerifier> = match args.google_client_id {
        Some(client_id) => Arc::new(GoogleIdTokenVerifier::new(
            client_id,
            GOOGLE_TOKENINFO_URL,
            GOOGLE_TIMEOUT,
        )?),
        None => Arc::new(DisabledFederatedVerifier),
    };

    let email_sender: Arc<dyn EmailSender> = match args.smtp {
        Some(smtp) => Arc::new(smtp_sender(smtp)?),
        None => Arc::new(LogEmailSender),
    };

    let lifetimes = TokenLifetimes {
        verify_link: Duration::from_secs(args.tokens.verify_link_ttl_seconds),
        verify_otp: Duration::from_secs(args.tokens.verify_otp_ttl_seconds),
        reset: Duration::from_secs(args.tokens.reset_ttl_seconds),
    };

    let email_templates = EmailTemplates::new(&args.frontend_base_url).with_ttls(
        lifetimes.verify_link,
        lifetimes.verify_otp,
        lifetimes.reset,
    );

    let email_config = EmailWorkerConfig::new()
        .with_queue_capacity(args.email_worker.queue_capacity)
        .with_concurrency(args.email_worker.concurrency)
        .with_max_attempts(args.email_worker.max_attempts)
        .with_backoff_base_seconds(args.email_worker.backoff_base_seconds)
        .with_backoff_max_seconds(args.email_worker.backoff_max_seconds)
        .with_send_timeout_seconds(args.email_worker.send_timeout_seconds);

    let auth_config = AuthConfig::new(args.frontend_base_url)
        .with_session_retention_seconds(args.tokens.session_retention_seconds)
        .with_lifetimes(lifetimes)
        .with_lockout(
            args.guard.lockout_max_attempts,
            args.guard.lockout_window_seconds,
        )
        .with_csrf_ttl_seconds(args.guard.csrf_ttl_seconds)
        .with_rate_limits(rate_limits(&args.guard))
        .with_trust_proxy_headers(args.guard.trust_proxy_headers);

    let result = api::new(
        args.port,
        args.dsn,
        auth_config,
        Services {
            issuer,
            federated,
            email_sender,
            email_templates,
            email_config,
        },
        Duration::from_secs(args.cleanup_interval_seconds),
    )
    .await;

    telemetry::shutdown_tracer();

    result
}

fn smtp_sender(smtp: SmtpOptions) -> Result<SmtpEmailSender> {
    let mut config = SmtpConfig::new(smtp.host, smtp.port, smtp.from).with_tls(smtp.tls);
    if let (Some(username), Some(password)) = (smtp.username, smtp.password) {
        config = config.with_credentials(username, password);
    }
    SmtpEmailSender::new(&config).context("Invalid SMTP configuration")
}

fn policy(tier: TierOptions) -> RateLimitPolicy {
    RateLimitPolicy::new(tier.max_requests, Duration::from_secs(tier.window_seconds))
}

fn rate_limits(guard: &GuardOptions) -> RateLimitConfig {
    RateLimitConfig {
        auth: policy(guard.auth_tier),
        strict: policy(guard.strict_tier),
        general: policy(guard.general_tier),
    }
}

fn log_startup_args(args: &Args) {
    let entries = [
        ("listen", format!("tcp:{}", args.port)),
        ("dsn", redact_dsn(&args.dsn)),
        ("frontend_base_url", args.frontend_base_url.clone()),
        (
            "google_login",
            args.google_client_id.is_some().to_string(),
        ),
        (
            "smtp",
            args.smtp.as_ref().map_or_else(
                || "disabled (log only)".to_string(),
                |smtp| format!("{}:{}", smtp.host, smtp.port),
            ),
        ),
        (
            "lockout",
            format!(
                "{} attempts / {}s",
                args.guard.lockout_max_attempts, args.guard.lockout_window_seconds
            ),
        ),
        (
            "rate_limit_key",
            if args.guard.trust_proxy_headers {
                "forwarded headers".to_string()
            } else {
                "socket peer".to_string()
            },
        ),
        (
            "cleanup_interval",
            format!("{}s", args.cleanup_interval_seconds),
        ),
    ];
    log_entries("Startup configuration", &entries);
}

fn redact_dsn(dsn: &str) -> String {
    match Url::parse(dsn) {
        Ok(mut parsed) => {
            if parsed.password().is_some() {
                let _ = parsed.set_password(Some("REDACTED"));
            }
            parsed.to_string()
        }
        Err(_) => "invalid-dsn".to_string(),
    }
}

fn log_entries(title: &str, entries: &[(&str, String)]) {
    let max_key_len = entries.iter().map(|(key, _)| key.len()).max().unwrap_or(0);
    let mut message = format!(
        "{} {} - {}\n\n{title}:",
        env!("CARGO_PKG_NAME"),
        env!("CARGO_PKG_VERSION"),
        short_commit(crate::GIT_COMMIT_HASH)
    );
    for (key, value) in entries {
        let padding = " ".repeat(max_key_len.saturating_sub(key.len()));
        let _ =
            std::fmt::Write::write_fmt(&mut message, format_args!("\n  {key}:{padding} {value}"));
    }
    info!("{message}");
}

fn short_commit(hash: &str) -> String {
    let trimmed = hash.trim();
    if trimmed.len() > 7 {
        trimmed[..7].to_string()
    } else {
        trimmed.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redact_dsn_hides_password() {
        assert_eq!(
            redact_dsn("postgres://clip:secret@db:5432/clipforge"),
            "postgres://clip:REDACTED@db:5432/clipforge"
        );
        assert_eq!(redact_dsn("memory://"), "memory://");
        assert_eq!(redact_dsn("not a dsn"), "invalid-dsn");
    }

    #[test]
    fn short_commit_truncates() {
        assert_eq!(short_commit("0123456789abcdef"), "0123456");
        assert_eq!(short_commit("abc"), "abc");
    }

    #[test]
    fn rate_limits_map_tiers() {
        let tier = |max_requests, window_seconds| TierOptions {
            max_requests,
            window_seconds,
        };
        let limits = rate_limits(&GuardOptions {
            lockout_max_attempts: 5,
            lockout_window_seconds: 900,
            csrf_ttl_seconds: 60,
            auth_tier: tier(10, 900),
            strict_tier: tier(3, 3600),
            general_tier: tier(100, 900),
            trust_proxy_headers: false,
        });
        assert_eq!(limits.auth, RateLimitPolicy::new(10, Duration::from_secs(900)));
        assert_eq!(limits.strict, RateLimitPolicy::new(3, Duration::from_secs(3600)));
        assert_eq!(limits.general, RateLimitPolicy::new(100, Duration::from_secs(900)));
    }
}
