//! SMTP and delivery worker arguments.

use anyhow::{anyhow, Result};
use clap::{builder::PossibleValuesParser, Arg, ArgMatches, Command};
use secrecy::SecretString;

use crate::email::smtp::SmtpTls;

pub const ARG_SMTP_HOST: &str = "smtp-host";

#[derive(Debug)]
pub struct SmtpOptions {
    pub host: String,
    pub port: u16,
    pub tls: SmtpTls,
    pub username: Option<String>,
    pub password: Option<SecretString>,
    pub from: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerOptions {
    pub queue_capacity: usize,
    pub concurrency: usize,
    pub max_attempts: u32,
    pub backoff_base_seconds: u64,
    pub backoff_max_seconds: u64,
    pub send_timeout_seconds: u64,
}

#[derive(Debug)]
pub struct Options {
    /// `None` logs emails instead of sending them.
    pub smtp: Option<SmtpOptions>,
    pub worker: WorkerOptions,
}

fn parse_tls(value: Option<&str>, port: u16) -> SmtpTls {
    match value {
        Some("implicit") => SmtpTls::Implicit,
        Some("starttls") => SmtpTls::StartTls,
        Some("none") => SmtpTls::None,
        _ => SmtpTls::for_port(port),
    }
}

impl Options {
    /// # Errors
    /// Returns an error if only one half of the SMTP credentials is given.
    pub fn parse(matches: &ArgMatches) -> Result<Self> {
        let smtp = match matches
            .get_one::<String>(ARG_SMTP_HOST)
            .map(|host| host.trim())
            .filter(|host| !host.is_empty())
        {
            Some(host) => {
                let port = matches.get_one::<u16>("smtp-port").copied().unwrap_or(587);
                let username = matches.get_one::<String>("smtp-username").cloned();
                let password = matches
                    .get_one::<String>("smtp-password")
                    .map(|value| SecretString::from(value.clone()));
                if username.is_some() != password.is_some() {
                    return Err(anyhow!(
                        "--smtp-username and --smtp-password must be set together"
                    ));
                }
                Some(SmtpOptions {
                    host: host.to_string(),
                    port,
                    tls: parse_tls(matches.get_one::<String>("smtp-tls").map(String::as_str), port),
                    username,
                    password,
                    from: matches
                        .get_one::<String>("smtp-from")
                        .cloned()
                        .unwrap_or_else(|| DEFAULT_FROM.to_string()),
                })
            }
            None => None,
        };

        let worker = WorkerOptions {
            queue_capacity: matches
                .get_one::<usize>("email-queue-capacity")
                .copied()
                .unwrap_or(1024),
            concurrency: matches
                .get_one::<usize>("email-concurrency")
                .copied()
                .unwrap_or(4),
            max_attempts: matches
                .get_one::<u32>("email-max-attempts")
                .copied()
                .unwrap_or(5),
            backoff_base_seconds: matches
                .get_one::<u64>("email-backoff-base-seconds")
                .copied()
                .unwrap_or(5),
            backoff_max_seconds: matches
                .get_one::<u64>("email-backoff-max-seconds")
                .copied()
                .unwrap_or(300),
            send_timeout_seconds: matches
                .get_one::<u64>("email-send-timeout-seconds")
                .copied()
                .unwrap_or(30),
        };

        Ok(Self { smtp, worker })
    }
}

const DEFAULT_FROM: &str = "ClipForge AI <no-reply@clipforge.ai>";

#[must_use]
pub fn with_args(command: Command) -> Command {
    let command = with_smtp_args(command);
    with_worker_args(command)
}

fn with_smtp_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_SMTP_HOST)
                .long(ARG_SMTP_HOST)
                .help("SMTP relay host; emails are only logged when unset")
                .env("CLIPFORGE_SMTP_HOST"),
        )
        .arg(
            Arg::new("smtp-port")
                .long("smtp-port")
                .help("SMTP relay port")
                .env("CLIPFORGE_SMTP_PORT")
                .default_value("587")
                .value_parser(clap::value_parser!(u16)),
        )
        .arg(
            Arg::new("smtp-tls")
                .long("smtp-tls")
                .help("SMTP transport security, defaults to implicit on port 465 and starttls otherwise")
                .env("CLIPFORGE_SMTP_TLS")
                .value_parser(PossibleValuesParser::new(["implicit", "starttls", "none"])),
        )
        .arg(
            Arg::new("smtp-username")
                .long("smtp-username")
                .help("SMTP username")
                .env("CLIPFORGE_SMTP_USERNAME"),
        )
        .arg(
            Arg::new("smtp-password")
                .long("smtp-password")
                .help("SMTP password")
                .env("CLIPFORGE_SMTP_PASSWORD")
                .hide_env_values(true),
        )
        .arg(
            Arg::new("smtp-from")
                .long("smtp-from")
                .help("Sender mailbox for verification and reset emails")
                .env("CLIPFORGE_SMTP_FROM")
                .default_value(DEFAULT_FROM),
        )
}

fn with_worker_args(command: Command) -> Command {
    command
        .arg(
            Arg::new("email-queue-capacity")
                .long("email-queue-capacity")
                .help("Pending emails held before new ones are dropped")
                .env("CLIPFORGE_EMAIL_QUEUE_CAPACITY")
                .default_value("1024")
                .value_parser(clap::value_parser!(usize)),
        )
        .arg(
            Arg::new("email-concurrency")
                .long("email-concurrency")
                .help("Emails delivered in parallel")
                .env("CLIPFORGE_EMAIL_CONCURRENCY")
                .default_value("4")
                .value_parser(clap::value_parser!(usize)),
        )
        .arg(
            Arg::new("email-max-attempts")
                .long("email-max-attempts")
                .help("Delivery attempts before an email is given up")
                .env("CLIPFORGE_EMAIL_MAX_ATTEMPTS")
                .default_value("5")
                .value_parser(clap::value_parser!(u32)),
        )
        .arg(
            Arg::new("email-backoff-base-seconds")
                .long("email-backoff-base-seconds")
                .help("Base delay for email retry backoff")
                .env("CLIPFORGE_EMAIL_BACKOFF_BASE_SECONDS")
                .default_value("5")
                .value_parser(clap::value_parser!(u64)),
        )
        .arg(
            Arg::new("email-backoff-max-seconds")
                .long("email-backoff-max-seconds")
                .help("Max delay for email retry backoff")
                .env("CLIPFORGE_EMAIL_BACKOFF_MAX_SECONDS")
                .default_value("300")
                .value_parser(clap::value_parser!(u64)),
        )
        .arg(
            Arg::new("email-send-timeout-seconds")
                .long("email-send-timeout-seconds")
                .help("Timeout for a single delivery attempt")
                .env("CLIPFORGE_EMAIL_SEND_TIMEOUT_SECONDS")
                .default_value("30")
                .value_parser(clap::value_parser!(u64)),
        )
}
