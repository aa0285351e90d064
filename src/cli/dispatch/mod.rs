//! Command-line argument dispatch.
//!
//! Maps validated CLI matches to the action the binary executes, such as
//! starting the API server with its full configuration.

use crate::cli::actions::{admin, server::Args, Action};
use crate::cli::commands::{self, auth, email};
use anyhow::{Context, Result};

/// Map validated CLI matches to an action: `create-admin` when that subcommand
/// is present, the server otherwise.
///
/// # Errors
/// Returns an error if required arguments are missing or inconsistent.
pub fn handler(matches: &clap::ArgMatches) -> Result<Action> {
    let dsn = matches
        .get_one::<String>("dsn")
        .cloned()
        .context("missing required argument: --dsn")?;

    if let Some(admin_matches) = matches.subcommand_matches(commands::admin::COMMAND) {
        let options = commands::admin::Options::parse(admin_matches)?;
        return Ok(Action::CreateAdmin(admin::Args {
            dsn,
            name: options.name,
            email: options.email,
            password: options.password,
        }));
    }

    let port = matches.get_one::<u16>("port").copied().unwrap_or(8080);
    let frontend_base_url = matches
        .get_one::<String>("frontend-base-url")
        .cloned()
        .context("missing required argument: --frontend-base-url")?;
    let cleanup_interval_seconds = matches
        .get_one::<u64>("cleanup-interval-seconds")
        .copied()
        .unwrap_or(3600);

    let auth_opts = auth::Options::parse(matches)?;
    let email_opts = email::Options::parse(matches)?;

    Ok(Action::Server(Args {
        port,
        dsn,
        frontend_base_url,
        cleanup_interval_seconds,
        tokens: auth_opts.tokens,
        guard: auth_opts.guard,
        google_client_id: auth_opts.google_client_id,
        smtp: email_opts.smtp,
        email_worker: email_opts.worker,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;

    fn base_env<'a>(extra: &[(&'a str, Option<&'a str>)]) -> Vec<(&'a str, Option<&'a str>)> {
        let mut vars = vec![
            ("CLIPFORGE_DSN", Some("memory://")),
            ("CLIPFORGE_JWT_ACCESS_SECRET", Some("access-secret")),
            ("CLIPFORGE_JWT_REFRESH_SECRET", Some("refresh-secret")),
            ("CLIPFORGE_GOOGLE_CLIENT_ID", None),
            ("CLIPFORGE_SMTP_HOST", None),
            ("CLIPFORGE_SMTP_PORT", None),
            ("CLIPFORGE_SMTP_TLS", None),
            ("CLIPFORGE_SMTP_USERNAME", None),
            ("CLIPFORGE_SMTP_PASSWORD", None),
            ("CLIPFORGE_LOCKOUT_MAX_ATTEMPTS", None),
            ("CLIPFORGE_TRUST_PROXY_HEADERS", None),
        ];
        vars.retain(|(key, _)| extra.iter().all(|(extra_key, _)| extra_key != key));
        vars.extend_from_slice(extra);
        vars
    }

    #[test]
    fn defaults_build_server_action() {
        temp_env::with_vars(base_env(&[]), || {
            let matches = crate::cli::commands::new().get_matches_from(vec!["clipforge-auth"]);
            let result = handler(&matches);
            assert!(result.is_ok());
            if let Ok(Action::Server(args)) = result {
                assert_eq!(args.dsn, "memory://");
                assert_eq!(args.tokens.access_secret.expose_secret(), "access-secret");
                assert_eq!(args.tokens.access_ttl_seconds, 900);
                assert_eq!(args.tokens.refresh_ttl_seconds, 2_592_000);
                assert_eq!(args.guard.lockout_max_attempts, 5);
                assert_eq!(args.guard.auth_tier.max_requests, 10);
                assert_eq!(args.guard.strict_tier.window_seconds, 3_600);
                assert!(!args.guard.trust_proxy_headers);
                assert!(args.google_client_id.is_none());
                assert!(args.smtp.is_none());
                assert_eq!(args.email_worker.max_attempts, 5);
            }
        });
    }

    #[test]
    fn smtp_and_google_options() {
        temp_env::with_vars(
            base_env(&[
                ("CLIPFORGE_SMTP_HOST", Some("smtp.clipforge.ai")),
                ("CLIPFORGE_SMTP_PORT", Some("465")),
                ("CLIPFORGE_SMTP_USERNAME", Some("mailer")),
                ("CLIPFORGE_SMTP_PASSWORD", Some("hunter2")),
                ("CLIPFORGE_GOOGLE_CLIENT_ID", Some("client.apps.googleusercontent.com")),
            ]),
            || {
                let matches = crate::cli::commands::new().get_matches_from(vec!["clipforge-auth"]);
                let result = handler(&matches);
                assert!(result.is_ok());
                if let Ok(Action::Server(args)) = result {
                    let smtp = args.smtp.as_ref();
                    assert_eq!(smtp.map(|smtp| smtp.port), Some(465));
                    assert_eq!(
                        smtp.map(|smtp| smtp.tls),
                        Some(crate::email::smtp::SmtpTls::Implicit)
                    );
                    assert_eq!(
                        args.google_client_id.as_deref(),
                        Some("client.apps.googleusercontent.com")
                    );
                }
            },
        );
    }

    #[test]
    fn create_admin_subcommand_builds_admin_action() {
        temp_env::with_vars(
            base_env(&[
                ("CLIPFORGE_JWT_ACCESS_SECRET", None),
                ("CLIPFORGE_JWT_REFRESH_SECRET", None),
                ("CLIPFORGE_ADMIN_NAME", None),
                ("CLIPFORGE_ADMIN_EMAIL", Some("admin@clipforge.ai")),
                ("CLIPFORGE_ADMIN_PASSWORD", Some("adminpass1")),
            ]),
            || {
                let matches = crate::cli::commands::new()
                    .get_matches_from(vec!["clipforge-auth", "create-admin"]);
                let result = handler(&matches);
                assert!(matches!(result, Ok(Action::CreateAdmin(_))));
                if let Ok(Action::CreateAdmin(args)) = result {
                    assert_eq!(args.dsn, "memory://");
                    assert_eq!(args.name, "Admin User");
                    assert_eq!(args.email, "admin@clipforge.ai");
                    assert_eq!(args.password.expose_secret(), "adminpass1");
                }
            },
        );
    }

    #[test]
    fn trust_proxy_headers_from_env() {
        temp_env::with_vars(
            base_env(&[("CLIPFORGE_TRUST_PROXY_HEADERS", Some("true"))]),
            || {
                let matches = crate::cli::commands::new().get_matches_from(vec!["clipforge-auth"]);
                let result = handler(&matches);
                assert!(matches!(
                    result,
                    Ok(Action::Server(ref args)) if args.guard.trust_proxy_headers
                ));
            },
        );
    }

    #[test]
    fn smtp_credentials_must_be_paired() {
        temp_env::with_vars(
            base_env(&[
                ("CLIPFORGE_SMTP_HOST", Some("smtp.clipforge.ai")),
                ("CLIPFORGE_SMTP_USERNAME", Some("mailer")),
            ]),
            || {
                let matches = crate::cli::commands::new().get_matches_from(vec!["clipforge-auth"]);
                let result = handler(&matches);
                assert!(result.is_err());
            },
        );
    }
}
